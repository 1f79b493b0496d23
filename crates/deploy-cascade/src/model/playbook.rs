use super::{descending_names, environment::Environments, Environment, ROOT_ENVIRONMENT_NAME};
use crate::{
    closure::Closure,
    error::{Error, RefKind, Result},
    info::{
        playbook_info, ParameterValue, Parameters, PlayInfo, PlayRef, PlaybookInfo, PlaybookParameterSpec,
        PlaybookScene, TaskInfo,
    },
    table::{LayeredVariables, Variables},
};
use indexmap::IndexMap;
use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

pub const DEFAULT_SCENE_NAME: &str = "default";
pub const TASK_PATH_SEPARATOR: char = '/';

/// Playbook groups keyed by playbook name
#[derive(Debug, Default)]
pub struct Playbooks {
    map: IndexMap<String, PlaybookGroup>,
}

impl Playbooks {
    #[tracing::instrument(level = "trace", skip_all, fields(playbooks = infos.len()))]
    pub fn new(infos: &IndexMap<String, Arc<PlaybookInfo>>, envs: &Arc<Environments>) -> Result<Self> {
        let mut map = IndexMap::with_capacity(infos.len());
        for (key, info) in infos {
            map.insert(key.clone(), PlaybookGroup::new(info, infos, envs)?);
        }
        tracing::debug!(playbooks = map.len(), "resolved playbooks");
        Ok(Self { map })
    }

    pub fn find_group(&self, name: &str) -> Option<&PlaybookGroup> {
        self.map.get(name)
    }

    pub fn group(&self, name: &str) -> Result<&PlaybookGroup> {
        self.find_group(name)
            .ok_or_else(|| Error::not_found(RefKind::Playbook, name))
    }

    /// Playbook `name` resolved for `parameters`
    pub fn get_or_create(&self, name: &str, parameters: &Parameters) -> Result<Arc<Playbook>> {
        self.group(name)?.get_or_create(parameters)
    }

    pub fn values(&self) -> impl Iterator<Item = &PlaybookGroup> {
        self.map.values()
    }

    pub fn search(&self, key: Option<&str>) -> Vec<&PlaybookGroup> {
        let mut list: Vec<_> = self
            .map
            .values()
            .filter(|group| key.map_or(true, |key| group.name.contains(key)))
            .collect();
        list.sort_by(|x, y| x.name.cmp(&y.name));
        list
    }
}

/// A parameter spec and the playbooks declaring an equal one
#[derive(Debug, Clone, PartialEq, derive_new::new)]
pub struct DeclaredSpec {
    pub playbooks: Vec<String>,
    pub spec: PlaybookParameterSpec,
}

/// Every variant of one playbook
///
/// A variant is the playbook resolved for a set of parameters. Variants are created on demand and cached.
pub struct PlaybookGroup {
    pub info: Arc<PlaybookInfo>,
    pub name: String,
    /// specs declared anywhere along the unfiltered chain
    pub parameter_specs: IndexMap<String, Vec<DeclaredSpec>>,
    /// resolved with the playbook's own parameter specs
    pub defaults: Arc<Playbook>,
    list: Mutex<Vec<Arc<Playbook>>>,
    infos: IndexMap<String, Arc<PlaybookInfo>>,
    envs: Arc<Environments>,
}

impl fmt::Debug for PlaybookGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybookGroup")
            .field("name", &self.name)
            .field("parameter_specs", &self.parameter_specs)
            .field("variants", &self.variants().len())
            .finish_non_exhaustive()
    }
}

impl PlaybookGroup {
    #[tracing::instrument(level = "trace", skip_all, fields(playbook = %info.name))]
    fn new(
        info: &Arc<PlaybookInfo>,
        infos: &IndexMap<String, Arc<PlaybookInfo>>,
        envs: &Arc<Environments>,
    ) -> Result<Self> {
        let mut parameter_specs: IndexMap<String, Vec<DeclaredSpec>> = IndexMap::new();
        for name in descending_names(infos, &info.name, RefKind::Playbook)? {
            for spec in playbook_info(infos, &name)?.parameter_specs.values() {
                let declared = parameter_specs.entry(spec.name.clone()).or_default();
                match declared.iter_mut().find(|d| d.spec.equals(spec)) {
                    Some(found) => found.playbooks.push(name.clone()),
                    None => declared.push(DeclaredSpec::new(vec![name.clone()], spec.clone())),
                }
            }
        }

        let own: Parameters = info
            .parameter_specs
            .iter()
            .map(|(name, spec)| (name.clone(), ParameterValue::Spec(spec.clone())))
            .collect();
        let defaults = Arc::new(Playbook::new(info, &own, infos, envs)?);

        Ok(Self {
            info: Arc::clone(info),
            name: info.name.clone(),
            parameter_specs,
            list: Mutex::new(vec![Arc::clone(&defaults)]),
            defaults,
            infos: infos.clone(),
            envs: Arc::clone(envs),
        })
    }

    /// First cached variant accepting `parameters`, or a new one
    ///
    /// A variant is skipped if it lacks the spec of a parameter the group knows, or rejects the parameters.
    pub fn get_or_create(&self, parameters: &Parameters) -> Result<Arc<Playbook>> {
        let mut list = self.list.lock().unwrap_or_else(PoisonError::into_inner);
        let found = list.iter().find(|playbook| {
            parameters
                .keys()
                .filter(|name| self.parameter_specs.contains_key(*name))
                .all(|name| playbook.parameter_specs.contains_key(name) && playbook.match_parameters(parameters))
        });
        if let Some(playbook) = found {
            return Ok(Arc::clone(playbook));
        }

        let playbook = Arc::new(Playbook::new(&self.info, parameters, &self.infos, &self.envs)?);
        list.push(Arc::clone(&playbook));
        tracing::debug!(playbook = %self.name, variants = list.len(), "created playbook variant");
        Ok(playbook)
    }

    pub fn variants(&self) -> Vec<Arc<Playbook>> {
        self.list.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[derive(Debug)]
pub struct Playbook {
    pub info: Arc<PlaybookInfo>,
    pub name: String,
    pub description: Option<String>,
    /// ancestors kept for the parameters, closest first
    pub ascending_parents: Vec<String>,
    pub parameter_specs: IndexMap<String, PlaybookParameterSpec>,
    pub active_in_env: String,
    pub vars: Arc<LayeredVariables>,
    /// environment variables below the playbook variables
    pub cascade_vars: Arc<LayeredVariables>,
    pub plays: IndexMap<String, Play>,
    pub scenes: IndexMap<String, PlaybookScene>,
}

impl Playbook {
    #[tracing::instrument(level = "trace", skip_all, fields(playbook = %info.name))]
    fn new(
        info: &Arc<PlaybookInfo>,
        parameters: &Parameters,
        infos: &IndexMap<String, Arc<PlaybookInfo>>,
        envs: &Environments,
    ) -> Result<Self> {
        let descending = info
            .descending(parameters, infos)?
            .iter()
            .map(|name| playbook_info(infos, name).cloned())
            .collect::<Result<Vec<_>>>()?;
        let ascending: Vec<_> = descending.iter().rev().cloned().collect();
        let name = info.name.clone();

        let mut parameter_specs: IndexMap<String, PlaybookParameterSpec> = IndexMap::new();
        for playbook in &descending {
            for spec in playbook.parameter_specs.values() {
                let merged = match parameter_specs.get(&spec.name) {
                    Some(narrowed) => narrowed.intersect(spec)?,
                    None => spec.clone(),
                };
                parameter_specs.insert(spec.name.clone(), merged);
            }
        }

        let active_in_env = ascending
            .iter()
            .find_map(|playbook| playbook.active_in_env.clone())
            .unwrap_or_else(|| ROOT_ENVIRONMENT_NAME.to_string());
        let env = envs.get(&active_in_env)?;

        let mut vars = LayeredVariables::new(format!("playbook {name}"));
        for playbook in &descending[..descending.len().saturating_sub(1)] {
            if !playbook.vars.is_empty() {
                vars.add_layer(playbook.vars.clone());
            }
        }
        vars.add_writable_layer(info.vars.clone());
        let vars = Arc::new(vars);

        let mut cascade_vars = LayeredVariables::new(format!("cascade playbook {name}"));
        cascade_vars.add_layer(env.vars.clone());
        cascade_vars.add_layer(vars.clone());
        cascade_vars.set_writable_layer(info.vars.clone());

        let mut declared: IndexMap<&str, &str> = IndexMap::new();
        for playbook in &descending {
            for play in playbook.plays.keys() {
                declared.insert(play, &playbook.name);
            }
        }
        let plays = declared
            .into_iter()
            .map(|(play, playbook)| -> Result<(String, Play)> {
                let play_ref = PlayRef::new(playbook, play);
                Ok((play.to_string(), Play::new(play_ref, &ascending, env, &vars)?))
            })
            .collect::<Result<_>>()?;

        let mut scenes = IndexMap::new();
        for playbook in &descending {
            for scene in playbook.scenes.values() {
                scenes.insert(scene.name.clone(), scene.clone());
            }
        }

        Ok(Self {
            info: Arc::clone(info),
            description: info.description.clone(),
            ascending_parents: ascending[1..].iter().map(|p| p.name.clone()).collect(),
            parameter_specs,
            active_in_env,
            vars,
            cascade_vars: Arc::new(cascade_vars),
            plays,
            scenes,
            name,
        })
    }

    pub fn default_scene(&self) -> Option<&PlaybookScene> {
        self.scenes.get(DEFAULT_SCENE_NAME)
    }

    pub fn match_parameters(&self, parameters: &Parameters) -> bool {
        self.parameter_specs
            .values()
            .all(|spec| spec.matches(parameters))
    }

    pub fn get_play(&self, name: &str) -> Result<&Play> {
        self.plays
            .get(name)
            .ok_or_else(|| Error::not_found(RefKind::Play, format!("{}:{name}", self.name)))
    }

    pub fn is_enabled_in(&self, env: &Environment) -> bool {
        env.belongs_to(&self.active_in_env)
    }
}

#[derive(Debug)]
pub struct Play {
    pub name: String,
    /// the most specific declaration
    pub declared_by: PlayRef,
    pub description: Option<String>,
    pub tasks: TaskList,
    pub vars: Arc<LayeredVariables>,
    pub cascade_vars: Arc<LayeredVariables>,
    pub serial: f64,
    pub when: Option<Closure>,
    pub included_only_in_env: Option<Vec<String>>,
    pub excluded_in_env: Option<Vec<String>>,
    pub retries: u32,
    pub always_run: bool,
    pub resources_required: Vec<String>,
}

impl Play {
    fn new(
        declared_by: PlayRef,
        ascending: &[Arc<PlaybookInfo>],
        env: &Environment,
        playbook_vars: &Arc<LayeredVariables>,
    ) -> Result<Self> {
        let info = declared_by.resolve(ascending)?;
        let refs = declared_by.descending(ascending)?;
        let descending = refs
            .iter()
            .map(|play| play.resolve(ascending))
            .collect::<Result<Vec<&PlayInfo>>>()?;
        tracing::trace!(play = %declared_by, chain = descending.len(), "resolving play");

        let mut vars = LayeredVariables::new(format!("play {}", info.name));
        for play in &descending[..descending.len().saturating_sub(1)] {
            vars.add_layer(play.vars.clone());
        }
        vars.add_writable_layer(info.vars.clone());
        let vars = Arc::new(vars);

        let mut cascade_vars = LayeredVariables::new(format!("cascade play {}", info.name));
        cascade_vars.add_layer(env.vars.clone());
        cascade_vars.add_layer(playbook_vars.clone());
        cascade_vars.add_layer(vars.clone());

        Ok(Self {
            name: info.name.clone(),
            description: info.description.clone(),
            tasks: TaskList::new(descending.iter().flat_map(|play| play.tasks.iter()))?,
            vars,
            cascade_vars: Arc::new(cascade_vars),
            serial: descending.iter().rev().find_map(|play| play.serial).unwrap_or(0.0),
            when: descending.iter().rev().find_map(|play| play.when.clone()),
            included_only_in_env: descending.iter().rev().find_map(|play| play.included_only_in_env.clone()),
            excluded_in_env: descending.iter().rev().find_map(|play| play.excluded_in_env.clone()),
            retries: descending.iter().rev().find_map(|play| play.retries).unwrap_or(0),
            always_run: descending.iter().rev().find_map(|play| play.always_run).unwrap_or(false),
            resources_required: descending
                .iter()
                .flat_map(|play| play.resources_required.iter().cloned())
                .collect(),
            declared_by,
        })
    }

    pub fn is_enabled_in_env(&self, env: &Environment) -> Result<bool> {
        env.is_included_in(
            self.included_only_in_env.as_deref(),
            self.excluded_in_env.as_deref(),
        )
    }
}

/// Tasks addressed by `/` separated paths
#[derive(Debug, Clone, Default)]
pub struct TaskList {
    list: Vec<Task>,
}

impl TaskList {
    pub fn new<'a>(infos: impl IntoIterator<Item = &'a TaskInfo>) -> Result<Self> {
        let mut tasks = Self::default();
        for info in infos {
            tasks.insert_task(&info.path, info)?;
        }
        Ok(tasks)
    }

    /// Insert below the parent tasks named by `path`, a task of the same name is replaced in place
    pub fn insert_task(&mut self, path: &str, info: &TaskInfo) -> Result<()> {
        if let Some((parent, rest)) = path.split_once(TASK_PATH_SEPARATOR) {
            let task = self
                .list
                .iter_mut()
                .find(|task| task.name == parent)
                .ok_or_else(|| Error::not_found(RefKind::ParentTask, format!("{parent} for task path {path}")))?;
            return task.children.insert_task(rest, info);
        }

        let task = Task::new(path, info);
        match self.list.iter().position(|t| t.name == path) {
            Some(i) => self.list[i] = task,
            None => self.list.push(task),
        }
        Ok(())
    }

    pub fn tasks(&self) -> &[Task] {
        &self.list
    }

    /// `true` if no task has a closure
    pub fn is_empty(&self) -> bool {
        self.list.iter().all(Task::is_empty)
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub name: String,
    pub closure: Option<Closure>,
    pub children: TaskList,
    pub when: Vec<Closure>,
    pub included_only_in_env: Option<Vec<String>>,
    pub excluded_in_env: Option<Vec<String>>,
    pub retries: Option<u32>,
    pub tags: Vec<String>,
    pub resources_required: Vec<String>,
    pub include_retired_hosts: bool,
    pub only_retired_hosts: bool,
    pub reverse: bool,
}

impl Task {
    fn new(name: &str, info: &TaskInfo) -> Self {
        Self {
            name: name.to_string(),
            closure: info.closure.clone(),
            children: TaskList::default(),
            when: info.when.clone(),
            included_only_in_env: info.included_only_in_env.clone(),
            excluded_in_env: info.excluded_in_env.clone(),
            retries: info.retries,
            tags: info.tags.clone(),
            resources_required: info.resources_required.clone(),
            include_retired_hosts: info.include_retired_hosts,
            only_retired_hosts: info.only_retired_hosts,
            reverse: info.reverse,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.closure.is_none() && self.children.is_empty()
    }

    pub fn is_enabled_in_env(&self, env: &Environment) -> Result<bool> {
        env.is_included_in(
            self.included_only_in_env.as_deref(),
            self.excluded_in_env.as_deref(),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{info::parameters, info_table, name::VariableName, value::Value};
    use pretty_assertions::assert_eq;

    fn model() -> (Arc<Environments>, Playbooks) {
        let table = info_table!(
            r#"
envs:
  shared.defaults: { abstracted: true }
  prod:
    parents: [shared.defaults]
    vars: [{ name: region, value: us }]
playbooks:
  base:
    vars: [{ name: image, value: base }]
    scenes:
      default: { plays: [build, deploy] }
    plays:
      build:
        tasks:
          - { path: compile }
          - { path: compile/unit }
      deploy:
        serial: 0.5
        retries: 2
        includedOnlyInEnv: [prod]
        resourcesRequired: [lock]
  java:
    parents: [base]
    parameterSpecs:
      lang: { allowedValues: [java] }
    plays:
      build:
        parents: ["@super"]
        tasks:
          - { path: package }
  node:
    parents: [base]
    parameterSpecs:
      lang: { allowedValues: [node] }
  app:
    parents: [base, java, node]
    activeInEnv: prod
    plays:
      deploy:
        parents: ["@super"]
        alwaysRun: true
        resourcesRequired: [slot]
"#
        );
        let envs = Arc::new(Environments::new(&table.envs).unwrap());
        let playbooks = Playbooks::new(&table.playbooks, &envs).unwrap();
        (envs, playbooks)
    }

    fn lang(value: &str) -> Parameters {
        parameters(&[("lang".to_string(), Value::from(value))].into_iter().collect())
    }

    fn task_names(tasks: &TaskList) -> Vec<String> {
        tasks
            .tasks()
            .iter()
            .flat_map(|task| {
                let children = task_names(&task.children).into_iter().map(|child| format!("{}/{child}", task.name));
                std::iter::once(task.name.clone()).chain(children)
            })
            .collect()
    }

    #[test]
    fn group_collects_specs_along_the_chain() {
        let (_, playbooks) = model();
        let group = playbooks.group("app").unwrap();

        assert_eq!(group.parameter_specs["lang"].len(), 2);
        assert_eq!(group.parameter_specs["lang"][0].playbooks, ["java"]);
        assert_eq!(group.parameter_specs["lang"][1].playbooks, ["node"]);
        assert_eq!(group.defaults.ascending_parents, ["base"]);
        assert!(group.defaults.parameter_specs.is_empty());
    }

    #[test]
    fn variants_are_created_once_per_parameters() {
        let (_, playbooks) = model();

        let java = playbooks.get_or_create("app", &lang("java")).unwrap();
        assert_eq!(java.ascending_parents, ["java", "base"]);
        assert!(Arc::ptr_eq(&java, &playbooks.get_or_create("app", &lang("java")).unwrap()));

        let node = playbooks.get_or_create("app", &lang("node")).unwrap();
        assert_eq!(node.ascending_parents, ["node", "base"]);
        assert!(!Arc::ptr_eq(&java, &node));

        let group = playbooks.group("app").unwrap();
        let plain = playbooks.get_or_create("app", &Parameters::new()).unwrap();
        assert!(Arc::ptr_eq(&plain, &group.defaults));
        assert_eq!(group.variants().len(), 3);
        assert!(playbooks.get_or_create("missing", &Parameters::new()).is_err());
    }

    #[test]
    fn plays_cascade_along_super() {
        let (_, playbooks) = model();
        let java = playbooks.get_or_create("app", &lang("java")).unwrap();

        assert_eq!(java.plays.keys().collect::<Vec<_>>(), ["build", "deploy"]);
        let build = java.get_play("build").unwrap();
        assert_eq!(build.declared_by, PlayRef::new("java", "build"));
        assert_eq!(task_names(&build.tasks), ["compile", "compile/unit", "package"]);
        assert!(build.tasks.is_empty());

        let deploy = java.get_play("deploy").unwrap();
        assert_eq!(deploy.declared_by, PlayRef::new("app", "deploy"));
        assert_eq!(deploy.serial, 0.5);
        assert_eq!(deploy.retries, 2);
        assert!(deploy.always_run);
        assert_eq!(deploy.resources_required, ["lock", "slot"]);

        let defaults = &playbooks.group("app").unwrap().defaults;
        assert_eq!(task_names(&defaults.get_play("build").unwrap().tasks), ["compile", "compile/unit"]);
    }

    #[test]
    fn enabled_in_environments() {
        let (envs, playbooks) = model();
        let app = &playbooks.group("app").unwrap().defaults;
        let prod = envs.get("prod").unwrap();
        let root = envs.get_root().unwrap();

        assert_eq!(app.active_in_env, "prod");
        assert!(app.is_enabled_in(prod));
        assert!(!app.is_enabled_in(root));
        let deploy = app.get_play("deploy").unwrap();
        assert!(deploy.is_enabled_in_env(prod).unwrap());
        assert!(!deploy.is_enabled_in_env(root).unwrap());
    }

    #[test]
    fn variables_cascade_from_environment() {
        let (_, playbooks) = model();
        let app = &playbooks.group("app").unwrap().defaults;
        let image = VariableName::parse("image");
        let region = VariableName::parse("region");

        assert!(app.vars.exists(&image));
        assert!(!app.vars.exists(&region));
        assert!(app.cascade_vars.exists(&region));
        assert!(app.get_play("deploy").unwrap().cascade_vars.exists(&image));
        assert_eq!(app.default_scene().map(|scene| scene.plays.len()), Some(2));
    }

    #[test]
    fn task_paths_need_their_parent() {
        let task = |path: &str| TaskInfo {
            path: path.to_string(),
            ..Default::default()
        };

        let err = TaskList::new(&[task("build/test")]).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: RefKind::ParentTask, .. }));

        let tasks = TaskList::new(&[task("a"), task("b"), task("a")]).unwrap();
        assert_eq!(task_names(&tasks), ["a", "b"]);
    }
}
