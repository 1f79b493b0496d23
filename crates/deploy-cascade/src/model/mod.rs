//! Resolved views over a [DeployInfoTable]
//!
//! Every entity is resolved against its descending chain: its ancestors farthest first and the entity itself last.
//! Variables cascade through [LayeredVariables](crate::table::LayeredVariables) stacks built from that chain, so a
//! closer definition shadows a farther one.
//!
//! Resolved collections are immutable. [DeployModelTable::with_records] derives a new model and reuses every entity
//! whose chain did not change.
mod environment;
mod host;
mod playbook;
mod project;

pub use environment::{
    Environment, EnvironmentQuery, Environments, LOCALHOST, LOCAL_ENV_LABEL, PROD_ENV_LABEL,
    ROOT_ENVIRONMENT_NAME, TEST_ENV_LABEL,
};
pub use host::{Host, HostGroup, HostGroups, Hosts, LabelFilter, DEFAULT_CHANNEL, DEFAULT_PORT};
pub use playbook::{
    DeclaredSpec, Play, Playbook, PlaybookGroup, Playbooks, Task, TaskList, DEFAULT_SCENE_NAME,
    TASK_PATH_SEPARATOR,
};
pub use project::{EnvSelector, Project, ProjectOverride, Projects, ROOT_PROJECT_NAME};

use crate::{
    error::{Error, RefKind, Result},
    info::{DeployInfoTable, EnvironmentInfo, PlaybookInfo, ProjectInfo},
    inherits,
    records::{ChangeSet, Commit, DeployRecordTable},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Filter on the `abstracted` flag used by searches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbstractMode {
    #[default]
    All,
    Abstracted,
    Concrete,
}

impl AbstractMode {
    pub fn accepts(self, abstracted: bool) -> bool {
        match self {
            AbstractMode::All => true,
            AbstractMode::Abstracted => abstracted,
            AbstractMode::Concrete => !abstracted,
        }
    }
}

/// Info record with a list of parent names
pub(crate) trait Inheritable {
    fn parents(&self) -> &[String];
}

impl Inheritable for EnvironmentInfo {
    fn parents(&self) -> &[String] {
        &self.parents
    }
}

impl Inheritable for PlaybookInfo {
    fn parents(&self) -> &[String] {
        &self.parents
    }
}

impl Inheritable for ProjectInfo {
    fn parents(&self) -> &[String] {
        &self.parents
    }
}

/// Descending chain of `name`, ancestors farthest first
pub(crate) fn descending_names<I: Inheritable>(
    infos: &IndexMap<String, Arc<I>>,
    name: &str,
    kind: RefKind,
) -> Result<Vec<String>> {
    inherits::descending(&name.to_string(), |current: &String| {
        infos
            .get(current)
            .map(|info| info.parents().to_vec())
            .ok_or_else(|| Error::not_found(kind, current.as_str()))
    })
}

/// Previously resolved entities and the names whose info changed since
pub(crate) struct Reuse<'a, T> {
    previous: &'a IndexMap<String, Arc<T>>,
    changed: &'a [String],
}

impl<'a, T> Reuse<'a, T> {
    pub(crate) fn new(previous: &'a IndexMap<String, Arc<T>>, changed: &'a [String]) -> Self {
        Self { previous, changed }
    }

    /// The previous entity if no name of its chain changed
    fn find(&self, descending: &[String]) -> Option<Arc<T>> {
        if descending.iter().any(|name| self.changed.contains(name)) {
            return None;
        }
        descending
            .last()
            .and_then(|name| self.previous.get(name))
            .cloned()
    }
}

/// Resolve every entry of `infos`, each parent before its children
///
/// `build` receives the name and its descending chain.
pub(crate) fn resolve_all<I, T>(
    infos: &IndexMap<String, Arc<I>>,
    kind: RefKind,
    previous: Option<Reuse<'_, T>>,
    mut build: impl FnMut(&str, Vec<String>) -> Result<T>,
) -> Result<IndexMap<String, Arc<T>>>
where
    I: Inheritable,
{
    let mut map: IndexMap<String, Arc<T>> = IndexMap::with_capacity(infos.len());
    let mut reused = 0;
    for key in infos.keys() {
        for name in descending_names(infos, key, kind)? {
            if map.contains_key(&name) {
                continue;
            }
            let descending = descending_names(infos, &name, kind)?;
            let resolved = match previous.as_ref().and_then(|reuse| reuse.find(&descending)) {
                Some(resolved) => {
                    reused += 1;
                    resolved
                }
                None => Arc::new(build(&name, descending)?),
            };
            map.insert(name, resolved);
        }
    }
    tracing::trace!(%kind, resolved = map.len(), reused, "resolved chains");
    Ok(map)
}

/// Environments, playbooks and projects resolved from one info table
#[derive(Debug, Clone)]
pub struct DeployModelTable {
    pub info: Arc<DeployInfoTable>,
    pub envs: Arc<Environments>,
    pub playbooks: Arc<Playbooks>,
    pub projects: Arc<Projects>,
}

impl DeployModelTable {
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn new(info: Arc<DeployInfoTable>) -> Result<Self> {
        let envs = Arc::new(Environments::new(&info.envs)?);
        let playbooks = Arc::new(Playbooks::new(&info.playbooks, &envs)?);
        let projects = Arc::new(Projects::new(
            &info.projects,
            &envs,
            &info.project_playbooks,
            &playbooks,
        )?);
        Ok(Self {
            info,
            envs,
            playbooks,
            projects,
        })
    }

    pub fn commit(&self) -> Option<&Commit> {
        self.info.commit.as_ref()
    }

    /// Apply `records` and resolve only what they touch
    ///
    /// Environment changes invalidate playbooks and projects, project changes only the projects inheriting them.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn with_records(&self, records: &DeployRecordTable) -> Result<(Self, ChangeSet)> {
        let (info, changes) = self.info.with_record_table(records)?;
        let info = Arc::new(info);

        let envs_changed = !changes.envs.is_empty();
        let envs = match envs_changed {
            true => Arc::new(self.envs.with_changes(&info.envs, &changes.envs)?),
            false => Arc::clone(&self.envs),
        };
        let playbooks = match envs_changed {
            true => Arc::new(Playbooks::new(&info.playbooks, &envs)?),
            false => Arc::clone(&self.playbooks),
        };
        let projects = if envs_changed {
            Arc::new(Projects::new(
                &info.projects,
                &envs,
                &info.project_playbooks,
                &playbooks,
            )?)
        } else if !changes.projects.is_empty() {
            Arc::new(self.projects.with_changes(
                &info.projects,
                &envs,
                &info.project_playbooks,
                &playbooks,
                &changes.projects,
            )?)
        } else {
            Arc::clone(&self.projects)
        };

        tracing::debug!(
            envs = ?changes.envs,
            projects = ?changes.projects,
            rebuilt_playbooks = envs_changed,
            "derived model table"
        );
        Ok((
            Self {
                info,
                envs,
                playbooks,
                projects,
            },
            changes,
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{info_table, name::VariableName, table::Variables};
    use pretty_assertions::assert_eq;

    fn model() -> DeployModelTable {
        let table = info_table!(
            r#"
envs:
  shared.defaults:
    abstracted: true
    vars: [{ id: 1, name: region, value: eu }]
  prod:
    parents: [shared.defaults]
    labels: [prod]
  qa:
    parents: [shared.defaults]
playbooks:
  base:
    plays:
      deploy: {}
projects:
  $:
    abstracted: true
    playbookName: base
  shop:
    parents: [$]
    vars: [{ id: 2, name: replicas, value: 1 }]
  blog:
    parents: [$]
projectPlaybooks:
  shop: {}
"#
        );
        DeployModelTable::new(Arc::new(table)).unwrap()
    }

    fn value(vars: &dyn Variables, name: &str) -> Option<String> {
        vars.get(&VariableName::parse(name))
            .and_then(|variable| variable.value())
            .map(ToString::to_string)
    }

    #[test]
    fn abstract_mode_filters() {
        assert!(AbstractMode::All.accepts(true));
        assert!(AbstractMode::Abstracted.accepts(true));
        assert!(!AbstractMode::Abstracted.accepts(false));
        assert!(AbstractMode::Concrete.accepts(false));
    }

    #[test]
    fn resolves_every_collection() {
        let model = model();
        assert_eq!(model.envs.len(), 3);
        assert_eq!(model.projects.values().count(), 3);
        let shop = model.projects.get("shop").unwrap();
        assert_eq!(shop.playbook.as_ref().map(|p| p.name.as_str()), Some("base"));
        assert!(model.projects.get("blog").unwrap().playbook.is_none());
    }

    #[test]
    fn env_records_rebuild_only_touched_chains() {
        let model = model();
        let records = DeployRecordTable::from_yaml_str(
            r#"
assigns:
  - { id: 3, envName: qa, variableInfo: { name: region, value: us } }
"#,
        )
        .unwrap();
        let (next, changes) = model.with_records(&records).unwrap();

        assert_eq!(changes.envs, ["qa"]);
        assert!(Arc::ptr_eq(
            model.envs.get("prod").unwrap(),
            next.envs.get("prod").unwrap()
        ));
        assert!(!Arc::ptr_eq(
            model.envs.get("qa").unwrap(),
            next.envs.get("qa").unwrap()
        ));
        assert_eq!(value(&*next.envs.get("qa").unwrap().vars, "region").as_deref(), Some("us"));
        assert_eq!(value(&*model.envs.get("qa").unwrap().vars, "region").as_deref(), Some("eu"));
        assert!(!Arc::ptr_eq(&model.playbooks, &next.playbooks));
    }

    #[test]
    fn project_records_keep_envs_and_playbooks() {
        let model = model();
        let records = DeployRecordTable::from_yaml_str(
            r#"
assigns:
  - { id: 3, scope: project, projectName: shop, variableInfo: { name: replicas, value: 3 } }
"#,
        )
        .unwrap();
        let (next, changes) = model.with_records(&records).unwrap();

        assert!(changes.envs.is_empty());
        assert_eq!(changes.projects, ["shop"]);
        assert!(Arc::ptr_eq(&model.envs, &next.envs));
        assert!(Arc::ptr_eq(&model.playbooks, &next.playbooks));
        assert!(Arc::ptr_eq(
            model.projects.get("blog").unwrap(),
            next.projects.get("blog").unwrap()
        ));
        let shop = next.projects.get("shop").unwrap();
        assert_eq!(value(&*shop.vars, "replicas").as_deref(), Some("3"));
    }

    #[test]
    fn empty_records_reuse_everything() {
        let model = model();
        let (next, changes) = model.with_records(&DeployRecordTable::default()).unwrap();
        assert!(changes.is_empty());
        assert!(Arc::ptr_eq(&model.projects, &next.projects));
    }
}
