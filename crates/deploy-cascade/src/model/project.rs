use super::{
    environment::{Environment, EnvironmentQuery, Environments, ROOT_ENVIRONMENT_NAME},
    playbook::{Playbook, Playbooks},
    resolve_all, AbstractMode, Reuse,
};
use crate::{
    closure::Closure,
    error::{Error, RefKind, Result},
    info::{parameters, ProjectInfo, ProjectPlaybookInfo},
    table::{LayeredVariables, SimpleVariables, Variables},
    value::Value,
};
use indexmap::IndexMap;
use std::{fmt, sync::Arc};

pub const ROOT_PROJECT_NAME: &str = "$";

/// Resolved projects, parents inserted before their children
#[derive(Debug, Clone, Default)]
pub struct Projects {
    map: IndexMap<String, Arc<Project>>,
}

impl Projects {
    #[tracing::instrument(level = "trace", skip_all, fields(projects = infos.len()))]
    pub fn new(
        infos: &IndexMap<String, Arc<ProjectInfo>>,
        envs: &Environments,
        project_playbooks: &IndexMap<String, Arc<ProjectPlaybookInfo>>,
        playbooks: &Playbooks,
    ) -> Result<Self> {
        Self::resolve(infos, envs, project_playbooks, playbooks, None)
    }

    /// Resolve again, reusing the projects whose chain has no changed name
    #[tracing::instrument(level = "trace", skip_all, fields(changed = changed.len()))]
    pub fn with_changes(
        &self,
        infos: &IndexMap<String, Arc<ProjectInfo>>,
        envs: &Environments,
        project_playbooks: &IndexMap<String, Arc<ProjectPlaybookInfo>>,
        playbooks: &Playbooks,
        changed: &[String],
    ) -> Result<Self> {
        let previous = Reuse::new(&self.map, changed);
        Self::resolve(infos, envs, project_playbooks, playbooks, Some(previous))
    }

    fn resolve(
        infos: &IndexMap<String, Arc<ProjectInfo>>,
        envs: &Environments,
        project_playbooks: &IndexMap<String, Arc<ProjectPlaybookInfo>>,
        playbooks: &Playbooks,
        previous: Option<Reuse<'_, Project>>,
    ) -> Result<Self> {
        let map = resolve_all(infos, RefKind::Project, previous, |name, descending| {
            Project::new(name, descending, infos, envs, project_playbooks, playbooks)
        })?;
        tracing::debug!(projects = map.len(), "resolved projects");
        Ok(Self { map })
    }

    pub fn find(&self, name: &str) -> Option<&Arc<Project>> {
        self.map.get(name)
    }

    pub fn get(&self, name: &str) -> Result<&Arc<Project>> {
        self.find(name)
            .ok_or_else(|| Error::not_found(RefKind::Project, name))
    }

    pub fn get_root(&self) -> Result<&Arc<Project>> {
        self.get(ROOT_PROJECT_NAME)
    }

    pub fn values(&self) -> impl Iterator<Item = &Arc<Project>> {
        self.map.values()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Projects whose name contains `key`, sorted by name
    pub fn search(&self, key: Option<&str>, mode: AbstractMode) -> Vec<&Arc<Project>> {
        let mut list: Vec<_> = self
            .map
            .values()
            .filter(|project| key.map_or(true, |key| project.project_name.contains(key)))
            .filter(|project| mode.accepts(project.abstracted))
            .collect();
        list.sort_by(|x, y| x.project_name.cmp(&y.project_name));
        list
    }
}

/// What project variables are resolved for
#[derive(Debug, Clone, Copy)]
pub enum EnvSelector<'a> {
    /// overrides whose query matches the environment
    Env(&'a Environment),
    /// overrides whose query includes this one
    Query(&'a EnvironmentQuery),
}

impl fmt::Display for EnvSelector<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvSelector::Env(env) => f.write_str(&env.name),
            EnvSelector::Query(query) => write!(f, "{query}"),
        }
    }
}

#[derive(Debug)]
pub struct Project {
    pub info: Arc<ProjectInfo>,
    pub project_name: String,
    pub key: Option<String>,
    pub id: Option<String>,
    pub abstracted: bool,
    pub description: Option<String>,
    /// ancestors farthest first, then the project itself
    pub descending: Vec<Arc<ProjectInfo>>,
    pub parents: Vec<String>,
    pub active_in_env: String,
    pub project_name_generator: Option<Closure>,
    pub variable_group_generator: Option<Closure>,
    pub playbook_name: Option<String>,
    pub playbook_params: Option<IndexMap<String, Value>>,
    pub playbook: Option<Arc<Playbook>>,
    pub when: Vec<Closure>,
    pub included_in_env: Option<Vec<String>>,
    pub included_only_in_env: Option<Vec<String>>,
    pub excluded_in_env: Option<Vec<String>>,
    pub vars: Arc<SimpleVariables>,
    pub cascade_vars: Arc<LayeredVariables>,
    pub overrides: Vec<ProjectOverride>,
    /// concrete environment name to the environment whose variables it uses
    pub sharing: IndexMap<String, String>,
}

impl Project {
    #[tracing::instrument(level = "trace", skip_all, fields(project = name))]
    fn new(
        name: &str,
        descending: Vec<String>,
        infos: &IndexMap<String, Arc<ProjectInfo>>,
        envs: &Environments,
        project_playbooks: &IndexMap<String, Arc<ProjectPlaybookInfo>>,
        playbooks: &Playbooks,
    ) -> Result<Self> {
        let descending = descending
            .iter()
            .map(|name| {
                infos
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::not_found(RefKind::Project, name.as_str()))
            })
            .collect::<Result<Vec<_>>>()?;
        let info = match descending.last() {
            Some(info) => Arc::clone(info),
            None => return Err(Error::not_found(RefKind::Project, name)),
        };
        let ascending = || descending.iter().rev();

        let active_in_env = ascending()
            .find_map(|p| p.active_in_env.clone())
            .unwrap_or_else(|| ROOT_ENVIRONMENT_NAME.to_string());
        let env = envs.get(&active_in_env)?;

        let playbook_name = ascending().find_map(|p| p.playbook_name.clone());
        let project_playbook = project_playbooks.get(name);
        let playbook_params = project_playbook.map(|pp| pp.playbook_params.clone());
        let playbook = match (&playbook_name, &playbook_params) {
            (Some(playbook_name), Some(params)) => {
                Some(playbooks.get_or_create(playbook_name, &parameters(params))?)
            }
            _ => None,
        };

        let mut cascade_vars = LayeredVariables::new(format!("cascade project {}", info.project_name));
        cascade_vars.add_layer(env.vars.clone());
        if let Some(playbook) = &playbook {
            cascade_vars.add_layer(playbook.vars.clone());
        }
        for ancestor in &descending[..descending.len() - 1] {
            if !ancestor.vars.is_empty() {
                cascade_vars.add_layer(ancestor.vars.clone());
            }
        }
        cascade_vars.add_writable_layer(info.vars.clone());

        let mut project = Self {
            project_name: info.project_name.clone(),
            key: info.key.clone(),
            id: info.id.clone(),
            abstracted: info.abstracted,
            description: info.description.clone(),
            parents: info.parents.clone(),
            active_in_env,
            project_name_generator: ascending().find_map(|p| p.project_name_generator.clone()),
            variable_group_generator: ascending().find_map(|p| p.variable_group_generator.clone()),
            playbook_name,
            playbook_params,
            playbook,
            when: ascending()
                .find(|p| !p.when.is_empty())
                .map(|p| p.when.clone())
                .unwrap_or_default(),
            included_in_env: info.included_in_env.clone(),
            included_only_in_env: info.included_only_in_env.clone(),
            excluded_in_env: info.excluded_in_env.clone(),
            vars: info.vars.clone(),
            cascade_vars: Arc::new(cascade_vars),
            overrides: vec![],
            sharing: sharing(&info.project_name, &descending, envs)?,
            descending,
            info,
        };

        let mut queries: Vec<&EnvironmentQuery> = vec![];
        for ancestor in &project.descending {
            for declared in &ancestor.overrides {
                if !queries.iter().any(|query| query.equals(&declared.query)) {
                    queries.push(&declared.query);
                }
            }
        }
        let overrides = queries
            .into_iter()
            .map(|query| {
                ProjectOverride::new(query.clone(), &project, project_playbook.map(|pp| &**pp), playbooks, envs)
            })
            .collect::<Result<Vec<_>>>()?;
        project.overrides = overrides;

        Ok(project)
    }

    /// Checked along the chain, farthest first
    ///
    /// `includedOnlyInEnv` rejects at once, `excludedInEnv` can be lifted again by a closer `includedInEnv`.
    pub fn is_enabled_in_env(&self, env: &Environment) -> Result<bool> {
        if !env.belongs_to(&self.active_in_env) {
            return Ok(false);
        }
        let mut excluded = false;
        for project in &self.descending {
            if let Some(included) = &project.included_in_env {
                if env.is_included_in(Some(included.as_slice()), None)? {
                    excluded = false;
                }
            }
            if let Some(only) = &project.included_only_in_env {
                if !env.is_included_in(Some(only.as_slice()), None)? {
                    return Ok(false);
                }
                excluded = false;
            }
            if let Some(excluding) = &project.excluded_in_env {
                if env.is_included_in(Some(excluding.as_slice()), None)? {
                    excluded = true;
                }
            }
        }
        Ok(!excluded)
    }

    /// Declared variables of every project along the chain, each with its overrides for `selector`
    pub fn get_vars_for_env(&self, selector: EnvSelector<'_>, envs: &Environments) -> Result<LayeredVariables> {
        let mut vars = LayeredVariables::new(format!(
            "cascade project {} in env {selector}",
            self.project_name
        ));
        for project in &self.descending {
            vars.add_layer(Arc::new(declared_vars_for_env(project, selector, envs)?));
        }
        Ok(vars)
    }

    pub fn find_override(&self, query: &EnvironmentQuery) -> Option<&ProjectOverride> {
        self.overrides.iter().find(|o| o.query.equals(query))
    }

    /// `true` if `ancestor` is this project or one of its ancestors
    pub fn belongs_to(&self, ancestor: &str) -> bool {
        self.descending.iter().any(|p| p.project_name == ancestor)
    }

    pub fn is_root(&self) -> bool {
        self.project_name == ROOT_PROJECT_NAME
    }
}

fn declared_vars_for_env(
    project: &ProjectInfo,
    selector: EnvSelector<'_>,
    envs: &Environments,
) -> Result<LayeredVariables> {
    let mut vars = LayeredVariables::new(format!(
        "project {} in env {selector}",
        project.project_name
    ));
    if !project.vars.is_empty() {
        vars.add_layer(project.vars.clone());
    }

    match selector {
        EnvSelector::Env(env) => {
            // applied in the order of the environment chain, an override of a closer environment wins
            let mut matched: Vec<_> = project
                .overrides
                .iter()
                .filter(|o| o.query.matches(env))
                .collect();
            for name in &env.descending {
                let ancestor = envs.get(name)?;
                let (hits, rest): (Vec<_>, Vec<_>) =
                    matched.into_iter().partition(|o| o.query.matches(ancestor));
                matched = rest;
                for hit in hits {
                    if !hit.vars.is_empty() {
                        vars.add_layer(hit.vars.clone());
                    }
                }
            }
        }
        EnvSelector::Query(query) => {
            for declared in &project.overrides {
                if declared.query.includes(query, envs)? {
                    vars.add_layer(declared.vars.clone());
                }
            }
        }
    }
    Ok(vars)
}

/// Last matching rule along the chain wins
fn sharing(
    project: &str,
    descending: &[Arc<ProjectInfo>],
    envs: &Environments,
) -> Result<IndexMap<String, String>> {
    let rules: Vec<(&String, &String)> = descending.iter().flat_map(|p| p.sharing.iter()).collect();
    let mut sharing = IndexMap::new();
    if rules.is_empty() {
        return Ok(sharing);
    }

    for env in envs.values().filter(|env| !env.abstracted) {
        let mut target = None;
        for &(key, value) in &rules {
            if env.is_included_in(Some(std::slice::from_ref(key)), None)? {
                target = Some(value);
            }
        }
        let Some(target) = target.filter(|target| **target != env.name) else {
            continue;
        };
        if envs.get(target)?.abstracted {
            return Err(Error::SharingIntoAbstract {
                project: project.to_string(),
                target: target.clone(),
            });
        }
        sharing.insert(env.name.clone(), target.clone());
    }
    Ok(sharing)
}

/// Project variables for the environments matched by one query
#[derive(Debug)]
pub struct ProjectOverride {
    pub title: String,
    pub query: EnvironmentQuery,
    pub playbook_params: Option<IndexMap<String, Value>>,
    pub playbook: Option<Arc<Playbook>>,
    pub vars: Arc<LayeredVariables>,
    pub cascade_vars: Arc<LayeredVariables>,
    /// no project at this level declares the query, the variables can not be written
    pub inherited: bool,
}

impl ProjectOverride {
    fn new(
        query: EnvironmentQuery,
        project: &Project,
        project_playbook: Option<&ProjectPlaybookInfo>,
        playbooks: &Playbooks,
        envs: &Environments,
    ) -> Result<Self> {
        let playbook_params = project_playbook
            .and_then(|pp| pp.overrides.iter().find(|o| o.query.equals(&query)))
            .map(|o| o.playbook_params.clone());
        let playbook = match (&project.playbook_name, &playbook_params) {
            (Some(name), Some(params)) => Some(playbooks.get_or_create(name, &parameters(params))?),
            _ => None,
        };

        let own = project.info.overrides.iter().find(|o| o.query.equals(&query));
        let mut vars = project.get_vars_for_env(EnvSelector::Query(&query), envs)?;
        if let Some(own) = own {
            vars.set_writable_layer(own.vars.clone());
        }
        let vars = Arc::new(vars);

        let mut cascade_vars = LayeredVariables::new(format!(
            "cascade project {} in {query}",
            project.project_name
        ));
        cascade_vars.add_layer(envs.get(&project.active_in_env)?.vars.clone());
        if let Some(playbook) = &playbook {
            cascade_vars.add_layer(playbook.vars.clone());
        }
        cascade_vars.add_layer(vars.clone());
        if let Some(own) = own {
            cascade_vars.set_writable_layer(own.vars.clone());
        }

        Ok(Self {
            title: query.to_string(),
            query,
            playbook_params,
            playbook,
            vars,
            cascade_vars: Arc::new(cascade_vars),
            inherited: own.is_none(),
        })
    }
}
