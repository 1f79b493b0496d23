//! Raw deployment tables as they are stored
//!
//! Every info map is keyed by name, an entry may leave its name out. [DeployInfoTable::new] fills in the names and
//! builds the own variable table of every entry once, later stages only layer those tables.
mod environment;
mod playbook;
mod project;

pub use environment::{EnvironmentInfo, HostGroupInfo, HostInfo};
pub(crate) use playbook::playbook_info;
pub use playbook::{
    parameters, ParameterValue, Parameters, PlayInfo, PlayRef, PlaybookInfo, PlaybookParameterSpec,
    PlaybookScene, TaskInfo, INHERITS_SUPER,
};
pub use project::{ProjectInfo, ProjectOverrideInfo, ProjectPlaybookInfo, ProjectPlaybookOverrideInfo};

use crate::{
    error::Result,
    records::Commit,
    variable::{IdAllocator, VariableInfo},
    visit::{Visit, VisitInfos},
};
use indexmap::IndexMap;
use serde::Deserialize;
use std::{path::Path, sync::Arc};

/// Info tables with prepared entries
///
/// Entries are shared, deriving a table from another one only replaces the entries that change.
#[derive(Debug, Clone, Default)]
pub struct DeployInfoTable {
    pub commit: Option<Commit>,
    pub envs: IndexMap<String, Arc<EnvironmentInfo>>,
    pub playbooks: IndexMap<String, Arc<PlaybookInfo>>,
    pub projects: IndexMap<String, Arc<ProjectInfo>>,
    pub project_playbooks: IndexMap<String, Arc<ProjectPlaybookInfo>>,
}

/// Serialized form of [DeployInfoTable]
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInfoTable {
    #[serde(default)]
    pub commit: Option<Commit>,
    #[serde(default)]
    pub envs: IndexMap<String, EnvironmentInfo>,
    #[serde(default)]
    pub playbooks: IndexMap<String, PlaybookInfo>,
    #[serde(default)]
    pub projects: IndexMap<String, ProjectInfo>,
    #[serde(default)]
    pub project_playbooks: IndexMap<String, ProjectPlaybookInfo>,
}

impl DeployInfoTable {
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn new(raw: RawInfoTable) -> Result<Self> {
        let envs = prepare_all(raw.envs, EnvironmentInfo::prepare)?;
        let playbooks = prepare_all(raw.playbooks, PlaybookInfo::prepare)?;
        let projects = prepare_all(raw.projects, ProjectInfo::prepare)?;
        let project_playbooks = raw
            .project_playbooks
            .into_iter()
            .map(|(key, info)| (key, Arc::new(info)))
            .collect();

        let table = Self {
            commit: raw.commit,
            envs,
            playbooks,
            projects,
            project_playbooks,
        };
        tracing::debug!(
            envs = table.envs.len(),
            playbooks = table.playbooks.len(),
            projects = table.projects.len(),
            "info table ready"
        );
        Ok(table)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::new(serde_json::from_str(json)?)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Self::new(serde_yaml::from_str(yaml)?)
    }

    /// Load a table from a `.json` file, any other extension is read as yaml
    pub fn load_file(file_path: &Path) -> Result<Self> {
        let file_path = file_path.canonicalize()?;
        tracing::info!(path=%file_path.display(), "loading file");

        let file_contents = std::fs::read_to_string(&file_path)?;
        match file_path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&file_contents),
            _ => Self::from_yaml_str(&file_contents),
        }
    }

    /// Allocator seeded with every variable id in use
    pub fn id_allocator(&self) -> IdAllocator {
        IdAllocator::seeded(self)
    }
}

impl VisitInfos for DeployInfoTable {
    fn visit_infos(&self, visitor: &mut dyn Visit<VariableInfo>) {
        for env in self.envs.values() {
            env.var_infos.visit_infos(visitor);
        }
        for playbook in self.playbooks.values() {
            playbook.var_infos.visit_infos(visitor);
            for play in playbook.plays.values() {
                play.var_infos.visit_infos(visitor);
            }
        }
        for project in self.projects.values() {
            project.var_infos.visit_infos(visitor);
            for project_override in &project.overrides {
                project_override.var_infos.visit_infos(visitor);
            }
        }
    }
}

fn prepare_all<T>(
    raw: IndexMap<String, T>,
    prepare: impl Fn(T, &str) -> Result<T>,
) -> Result<IndexMap<String, Arc<T>>> {
    let mut prepared = IndexMap::with_capacity(raw.len());
    for (key, info) in raw {
        let info = prepare(info, &key)?;
        prepared.insert(key, Arc::new(info));
    }
    Ok(prepared)
}

/// Utility macro to create a [DeployInfoTable] from yaml
///
/// ```
/// # use deploy_cascade::info_table;
/// let table = info_table!("envs: { shared.defaults: {} }");
/// assert!(table.envs.contains_key("shared.defaults"));
/// ```
///
/// # Panic
/// Panics on invalid input
///
/// ```should_panic
/// # use deploy_cascade::info_table;
/// info_table!("envs: [not, a, map]");
/// ```
#[macro_export]
macro_rules! info_table {
    { $expr:expr } => {
        $crate::info::DeployInfoTable::from_yaml_str($expr).expect("info table must parse")
    };
}
