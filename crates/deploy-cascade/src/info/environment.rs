use crate::{
    error::Result,
    records::{apply_records, Assignment, HostGroupRecord, HostRecord},
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
pub struct EnvironmentInfo {
    #[serde(default)]
    pub name: String,
    #[serde(
        default,
        deserialize_with = "util::optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default)]
    pub abstracted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, rename = "vars")]
    pub var_infos: Vec<VariableInfo>,
    #[serde(default)]
    pub hosts: IndexMap<String, HostInfo>,
    #[serde(default)]
    pub host_groups: IndexMap<String, HostGroupInfo>,
    #[serde(skip)]
    pub vars: Arc<SimpleVariables>,
}

impl EnvironmentInfo {
    pub fn new(name: impl Into<String>) -> Self {
        let mut info = Self {
            name: name.into(),
            ..Default::default()
        };
        info.vars = Arc::new(SimpleVariables::new(info.source()));
        info
    }

    fn source(&self) -> String {
        format!("env {}", self.name)
    }

    /// Fill missing names from the map keys and build the variable table
    pub(crate) fn prepare(mut self, key: &str) -> Result<Self> {
        util::fill_name(&mut self.name, key);
        for (name, host) in self.hosts.iter_mut() {
            util::fill_name(&mut host.name, name);
        }
        for (name, group) in self.host_groups.iter_mut() {
            util::fill_name(&mut group.name, name);
        }
        self.rebuild_vars()?;
        Ok(self)
    }

    fn rebuild_vars(&mut self) -> Result<()> {
        self.vars = Arc::new(SimpleVariables::from_infos(self.source(), &self.var_infos)?);
        Ok(())
    }

    pub fn with_host_records(&self, records: &[&HostRecord]) -> Self {
        let mut hosts = self.hosts.clone();
        apply_records(records.iter().copied(), &mut hosts);
        Self {
            hosts,
            ..self.clone()
        }
    }

    pub fn with_host_group_records(&self, records: &[&HostGroupRecord]) -> Self {
        let mut host_groups = self.host_groups.clone();
        apply_records(records.iter().copied(), &mut host_groups);
        Self {
            host_groups,
            ..self.clone()
        }
    }

    /// Own variable list with the assignments applied in order
    pub fn with_assign_records(&self, records: &[&Assignment]) -> Result<Self> {
        let mut var_infos = self.var_infos.clone();
        for record in records {
            record.insert_to(&mut var_infos);
        }
        let mut info = Self {
            var_infos,
            ..self.clone()
        };
        info.rebuild_vars()?;
        Ok(info)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    #[serde(default)]
    pub name: String,
    #[serde(
        default,
        deserialize_with = "util::optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub retired: bool,
    #[serde(default)]
    pub labels: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl HostInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Merge a more specific declaration of the same host into this one
    pub fn merge(&mut self, that: &HostInfo) {
        if that.id.is_some() {
            self.id = that.id.clone();
        }
        if that.user.is_some() {
            self.user = that.user.clone();
        }
        if that.port.is_some() {
            self.port = that.port;
        }
        if that.channel.is_some() {
            self.channel = that.channel.clone();
        }
        if that.retired {
            self.retired = true;
        }
        for (key, value) in &that.labels {
            self.labels.insert(key.clone(), value.clone());
        }
        if that.description.is_some() {
            self.description = that.description.clone();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostGroupInfo {
    #[serde(default)]
    pub name: String,
    #[serde(
        default,
        deserialize_with = "util::optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// drop the hosts declared by less specific environments
    #[serde(default)]
    pub override_hosts: bool,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub hosts_retired: Vec<String>,
    #[serde(default)]
    pub inherits: Vec<String>,
    #[serde(default)]
    pub inherits_retired: Vec<String>,
}

impl HostGroupInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Merge a more specific declaration of the same group into this one
    ///
    /// Lists are unioned unless `that` overrides the hosts.
    pub fn merge(&mut self, that: &HostGroupInfo) {
        if that.id.is_some() {
            self.id = that.id.clone();
        }
        if that.description.is_some() {
            self.description = that.description.clone();
        }
        if that.override_hosts {
            self.hosts.clear();
            self.hosts_retired.clear();
        }
        util::union(&mut self.hosts, &that.hosts);
        util::union(&mut self.hosts_retired, &that.hosts_retired);
        util::union(&mut self.inherits, &that.inherits);
        util::union(&mut self.inherits_retired, &that.inherits_retired);
    }
}
