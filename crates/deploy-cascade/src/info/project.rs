use crate::{
    closure::Closure,
    error::Result,
    model::EnvironmentQuery,
    records::Assignment,
    table::SimpleVariables,
    util,
    value::Value,
    variable::VariableInfo,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    #[serde(default)]
    pub project_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name_generator: Option<Closure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_group_generator: Option<Closure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(
        default,
        deserialize_with = "util::optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_in_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub abstracted: bool,
    #[serde(default, rename = "vars")]
    pub var_infos: Vec<VariableInfo>,
    #[serde(default)]
    pub overrides: Vec<ProjectOverrideInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook_name: Option<String>,
    #[serde(default)]
    pub when: Vec<Closure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included_in_env: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included_only_in_env: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded_in_env: Option<Vec<String>>,
    /// share rule per environment key, the value names the environment whose variables are used
    #[serde(default)]
    pub sharing: IndexMap<String, String>,
    #[serde(skip)]
    pub vars: Arc<SimpleVariables>,
}

impl ProjectInfo {
    pub fn new(project_name: impl Into<String>) -> Self {
        let mut info = Self {
            project_name: project_name.into(),
            ..Default::default()
        };
        info.vars = Arc::new(SimpleVariables::new(info.source()));
        info
    }

    fn source(&self) -> String {
        format!("project {}", self.project_name)
    }

    pub(crate) fn prepare(mut self, key: &str) -> Result<Self> {
        util::fill_name(&mut self.project_name, key);
        self.rebuild_vars()?;
        self.overrides = std::mem::take(&mut self.overrides)
            .into_iter()
            .map(|o| ProjectOverrideInfo::new(&self.project_name, o.query, o.var_infos))
            .collect::<Result<_>>()?;
        Ok(self)
    }

    fn rebuild_vars(&mut self) -> Result<()> {
        self.vars = Arc::new(SimpleVariables::from_infos(self.source(), &self.var_infos)?);
        Ok(())
    }

    /// Apply assignments, the ones naming an environment go to the override of that environment
    pub fn with_assign_records(&self, records: &[&Assignment]) -> Result<Self> {
        let mut var_infos = self.var_infos.clone();
        let mut by_env: IndexMap<&str, Vec<&Assignment>> = IndexMap::new();
        for &record in records {
            match record.env_name.as_deref() {
                Some(env) => by_env.entry(env).or_default().push(record),
                None => record.insert_to(&mut var_infos),
            }
        }

        let mut overrides = self.overrides.clone();
        for (env, records) in by_env {
            let query = EnvironmentQuery::new(env)?;
            let index = overrides.iter().position(|o| o.query.equals(&query));
            let mut list = index
                .map(|i| overrides[i].var_infos.clone())
                .unwrap_or_default();
            for record in records {
                record.insert_to(&mut list);
            }
            let info = ProjectOverrideInfo::new(&self.project_name, query, list)?;
            match index {
                Some(i) => overrides[i] = info,
                None => overrides.push(info),
            }
        }

        let mut info = Self {
            var_infos,
            overrides,
            ..self.clone()
        };
        info.rebuild_vars()?;
        Ok(info)
    }
}

/// Variables of a project that apply only in the environments matched by `query`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectOverrideInfo {
    pub query: EnvironmentQuery,
    #[serde(default, rename = "vars")]
    pub var_infos: Vec<VariableInfo>,
    #[serde(skip)]
    pub vars: Arc<SimpleVariables>,
}

impl ProjectOverrideInfo {
    pub fn new(project: &str, query: EnvironmentQuery, var_infos: Vec<VariableInfo>) -> Result<Self> {
        let vars = SimpleVariables::from_infos(format!("project {project} in {query}"), &var_infos)?;
        Ok(Self {
            query,
            var_infos,
            vars: Arc::new(vars),
        })
    }
}

/// Which playbook a project deploys with, and with which parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPlaybookInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook_name: Option<String>,
    #[serde(default)]
    pub playbook_params: IndexMap<String, Value>,
    #[serde(default)]
    pub overrides: Vec<ProjectPlaybookOverrideInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPlaybookOverrideInfo {
    pub query: EnvironmentQuery,
    #[serde(default)]
    pub playbook_params: IndexMap<String, Value>,
}
