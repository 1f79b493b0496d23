//! Delta records
//!
//! A [DeployRecordTable] is what an editing session produces on top of a loaded [DeployInfoTable]: upserts of
//! environments, hosts, host groups and projects plus variable [Assignment]s. Applying it yields a new info table
//! that shares every untouched entry with the old one.
use crate::{
    closure::Closure,
    error::{Error, RefKind, Result},
    info::{DeployInfoTable, EnvironmentInfo, HostGroupInfo, HostInfo, ProjectInfo},
    model::{ROOT_ENVIRONMENT_NAME, ROOT_PROJECT_NAME},
    util,
    value::Value,
    variable::{IdAllocator, VariableInfo},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, path::Path, sync::Arc};

/// Overwrite every field `$record` defines
macro_rules! copy_defined {
    ($target:expr, $record:expr, [$($field:ident),+ $(,)?]) => {
        $(
            if let Some(value) = &$record.$field {
                $target.$field = value.clone().into();
            }
        )+
    };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    #[serde(
        default,
        deserialize_with = "util::optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    pub author: Option<String>,
    pub comment: Option<String>,
    pub timestamp: Option<String>,
    #[serde(
        default,
        deserialize_with = "util::optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<String>,
}

/// Record that upserts an entry of an info map
pub(crate) trait Record {
    type Entry;

    fn key(&self) -> &str;

    fn disabled(&self) -> bool;

    /// Same entity as `other`, used to fold records of one table
    fn same(&self, other: &Self) -> bool;

    /// Take over the fields `newer` defines
    fn merge(&mut self, newer: &Self);

    fn create(&self) -> Self::Entry;

    fn apply(&self, entry: &Self::Entry) -> Self::Entry;

    fn has_id(entry: &Self::Entry) -> bool;
}

/// Upsert `records` into `target` and return the touched keys
///
/// A disabled record deletes an entry that already carries an id.
pub(crate) fn apply_records<'r, R: Record + 'r>(
    records: impl IntoIterator<Item = &'r R>,
    target: &mut IndexMap<String, R::Entry>,
) -> Vec<String> {
    let mut touched = vec![];
    for record in records {
        let key = record.key();
        match target.get(key) {
            Some(entry) if R::has_id(entry) && record.disabled() => {
                tracing::trace!(key, "record removes entry");
                target.shift_remove(key);
            }
            Some(entry) => {
                let entry = record.apply(entry);
                target.insert(key.to_string(), entry);
            }
            None => {
                target.insert(key.to_string(), record.create());
            }
        }
        touched.push(key.to_string());
    }
    touched
}

fn upsert<R: Record>(list: &mut Vec<R>, record: R) {
    match list.iter_mut().find(|existing| existing.same(&record)) {
        Some(existing) => existing.merge(&record),
        None => list.push(record),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentRecord {
    pub name: String,
    #[serde(
        default,
        deserialize_with = "util::optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    pub abstracted: Option<bool>,
    pub disabled: Option<bool>,
    pub description: Option<String>,
    pub parents: Option<Vec<String>>,
    pub labels: Option<Vec<String>>,
}

impl EnvironmentRecord {
    fn apply_to(&self, info: &mut EnvironmentInfo) {
        copy_defined!(info, self, [id, abstracted, description, parents, labels]);
    }
}

impl Record for EnvironmentRecord {
    type Entry = Arc<EnvironmentInfo>;

    fn key(&self) -> &str {
        &self.name
    }

    fn disabled(&self) -> bool {
        self.disabled.unwrap_or_default()
    }

    fn same(&self, other: &Self) -> bool {
        self.name == other.name
    }

    fn merge(&mut self, newer: &Self) {
        copy_defined!(self, newer, [id, abstracted, disabled, description, parents, labels]);
    }

    fn create(&self) -> Self::Entry {
        let mut info = EnvironmentInfo::new(&self.name);
        self.apply_to(&mut info);
        Arc::new(info)
    }

    fn apply(&self, entry: &Self::Entry) -> Self::Entry {
        let mut info = EnvironmentInfo::clone(entry);
        self.apply_to(&mut info);
        Arc::new(info)
    }

    fn has_id(entry: &Self::Entry) -> bool {
        entry.id.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRecord {
    pub env: String,
    pub name: String,
    #[serde(
        default,
        deserialize_with = "util::optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub channel: Option<String>,
    pub retired: Option<bool>,
    pub disabled: Option<bool>,
    pub labels: Option<IndexMap<String, Value>>,
    pub description: Option<String>,
}

impl Record for HostRecord {
    type Entry = HostInfo;

    fn key(&self) -> &str {
        &self.name
    }

    fn disabled(&self) -> bool {
        self.disabled.unwrap_or_default()
    }

    fn same(&self, other: &Self) -> bool {
        self.name == other.name && self.env == other.env
    }

    fn merge(&mut self, newer: &Self) {
        copy_defined!(
            self,
            newer,
            [id, user, port, channel, retired, disabled, labels, description]
        );
    }

    fn create(&self) -> Self::Entry {
        self.apply(&HostInfo::new(&self.name))
    }

    fn apply(&self, entry: &Self::Entry) -> Self::Entry {
        let mut info = entry.clone();
        copy_defined!(info, self, [id, user, port, channel, retired, labels, description]);
        info
    }

    fn has_id(entry: &Self::Entry) -> bool {
        entry.id.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostGroupRecord {
    pub env: String,
    pub name: String,
    #[serde(
        default,
        deserialize_with = "util::optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    pub description: Option<String>,
    pub override_hosts: Option<bool>,
    pub hosts: Option<Vec<String>>,
    pub inherits: Option<Vec<String>>,
    pub inherits_retired: Option<Vec<String>>,
    pub disabled: Option<bool>,
}

impl Record for HostGroupRecord {
    type Entry = HostGroupInfo;

    fn key(&self) -> &str {
        &self.name
    }

    fn disabled(&self) -> bool {
        self.disabled.unwrap_or_default()
    }

    fn same(&self, other: &Self) -> bool {
        self.name == other.name && self.env == other.env
    }

    fn merge(&mut self, newer: &Self) {
        copy_defined!(
            self,
            newer,
            [id, description, override_hosts, hosts, inherits, inherits_retired, disabled]
        );
    }

    fn create(&self) -> Self::Entry {
        self.apply(&HostGroupInfo::new(&self.name))
    }

    fn apply(&self, entry: &Self::Entry) -> Self::Entry {
        let mut info = entry.clone();
        copy_defined!(
            info,
            self,
            [id, description, override_hosts, hosts, inherits, inherits_retired]
        );
        info
    }

    fn has_id(entry: &Self::Entry) -> bool {
        entry.id.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub project_name: String,
    pub project_name_generator: Option<Closure>,
    pub variable_group_generator: Option<Closure>,
    pub key: Option<String>,
    #[serde(
        default,
        deserialize_with = "util::optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    pub active_in_env: Option<String>,
    pub description: Option<String>,
    pub parents: Option<Vec<String>>,
    pub abstracted: Option<bool>,
    pub disabled: Option<bool>,
    pub playbook_name: Option<String>,
    pub when: Option<Vec<Closure>>,
    pub included_in_env: Option<Vec<String>>,
    pub included_only_in_env: Option<Vec<String>>,
    pub excluded_in_env: Option<Vec<String>>,
    pub sharing: Option<IndexMap<String, String>>,
}

impl ProjectRecord {
    fn apply_to(&self, info: &mut ProjectInfo) {
        copy_defined!(
            info,
            self,
            [
                project_name_generator,
                variable_group_generator,
                key,
                id,
                active_in_env,
                description,
                parents,
                abstracted,
                playbook_name,
                when,
                included_in_env,
                included_only_in_env,
                excluded_in_env,
                sharing,
            ]
        );
    }
}

impl Record for ProjectRecord {
    type Entry = Arc<ProjectInfo>;

    fn key(&self) -> &str {
        &self.project_name
    }

    fn disabled(&self) -> bool {
        self.disabled.unwrap_or_default()
    }

    fn same(&self, other: &Self) -> bool {
        self.project_name == other.project_name
    }

    fn merge(&mut self, newer: &Self) {
        copy_defined!(
            self,
            newer,
            [
                project_name_generator,
                variable_group_generator,
                key,
                id,
                active_in_env,
                description,
                parents,
                abstracted,
                disabled,
                playbook_name,
                when,
                included_in_env,
                included_only_in_env,
                excluded_in_env,
                sharing,
            ]
        );
    }

    fn create(&self) -> Self::Entry {
        let mut info = ProjectInfo::new(&self.project_name);
        self.apply_to(&mut info);
        Arc::new(info)
    }

    fn apply(&self, entry: &Self::Entry) -> Self::Entry {
        let mut info = ProjectInfo::clone(entry);
        self.apply_to(&mut info);
        Arc::new(info)
    }

    fn has_id(entry: &Self::Entry) -> bool {
        entry.id.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentScope {
    #[default]
    Environment,
    Project,
}

/// Variable assignment targeting the own variable list of an environment or a project
///
/// Ids are dotted numbers. The records carrying an id sit at the end of a variable list, sorted by
/// [Assignment::compare_id], and an assignment replaces the record with its id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    #[serde(deserialize_with = "util::id")]
    pub id: String,
    pub env_name: Option<String>,
    pub project_name: Option<String>,
    pub scope: Option<AssignmentScope>,
    #[serde(default)]
    pub variable_info: VariableInfo,
    /// removes every record with this id instead of inserting
    #[serde(default)]
    pub disabled: bool,
}

impl Assignment {
    pub fn new(ids: &mut IdAllocator, variable_info: VariableInfo) -> Self {
        Self {
            id: ids.next_id(),
            variable_info,
            ..Default::default()
        }
    }

    pub fn scope(&self) -> AssignmentScope {
        self.scope.unwrap_or_default()
    }

    /// Numeric comparison segment by segment, a prefix sorts first
    ///
    /// A segment that is not a number counts as 0.
    pub fn compare_id(id1: &str, id2: &str) -> Ordering {
        let mut left = id1.split('.');
        let mut right = id2.split('.');
        loop {
            match (left.next(), right.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(x), Some(y)) => {
                    let x: i64 = x.trim().parse().unwrap_or_default();
                    let y: i64 = y.trim().parse().unwrap_or_default();
                    if x != y {
                        return x.cmp(&y);
                    }
                }
            }
        }
    }

    pub fn insert_to(&self, list: &mut Vec<VariableInfo>) {
        if self.disabled {
            list.retain(|info| info.id.as_deref() != Some(self.id.as_str()));
            return;
        }

        let record = VariableInfo {
            id: Some(self.id.clone()),
            ..self.variable_info.clone()
        };
        for index in (0..list.len()).rev() {
            let ordering = list[index]
                .id
                .as_deref()
                .map(|id| Self::compare_id(id, &self.id));
            match ordering {
                Some(Ordering::Equal) => {
                    list[index] = record;
                    return;
                }
                // records without id or with a smaller id stay in front
                None | Some(Ordering::Less) => {
                    list.insert(index + 1, record);
                    return;
                }
                Some(Ordering::Greater) => {}
            }
        }
        list.insert(0, record);
    }

    fn same(&self, other: &Self) -> bool {
        self.id == other.id
    }

    fn merge(&mut self, newer: &Self) {
        copy_defined!(self, newer, [env_name, project_name, scope]);
        self.variable_info = newer.variable_info.clone();
        self.disabled = newer.disabled;
    }
}

/// Edits collected on top of an info table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRecordTable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<Commit>,
    #[serde(default)]
    pub envs: Vec<EnvironmentRecord>,
    #[serde(default)]
    pub projects: Vec<ProjectRecord>,
    #[serde(default)]
    pub assigns: Vec<Assignment>,
    #[serde(default)]
    pub hosts: Vec<HostRecord>,
    #[serde(default)]
    pub host_groups: Vec<HostGroupRecord>,
}

impl DeployRecordTable {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load records from a `.json` file, any other extension is read as yaml
    pub fn load_file(file_path: &Path) -> Result<Self> {
        let file_path = file_path.canonicalize()?;
        tracing::info!(path=%file_path.display(), "loading records");

        let file_contents = std::fs::read_to_string(&file_path)?;
        match file_path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&file_contents),
            _ => Self::from_yaml_str(&file_contents),
        }
    }

    pub fn add_env(&self, record: EnvironmentRecord) -> Self {
        let mut table = self.clone();
        upsert(&mut table.envs, record);
        table
    }

    pub fn add_project(&self, record: ProjectRecord) -> Self {
        let mut table = self.clone();
        upsert(&mut table.projects, record);
        table
    }

    pub fn add_host(&self, record: HostRecord) -> Self {
        let mut table = self.clone();
        upsert(&mut table.hosts, record);
        table
    }

    pub fn add_host_group(&self, record: HostGroupRecord) -> Self {
        let mut table = self.clone();
        upsert(&mut table.host_groups, record);
        table
    }

    pub fn add_assign(&self, record: Assignment) -> Self {
        let mut table = self.clone();
        match table.assigns.iter_mut().find(|existing| existing.same(&record)) {
            Some(existing) => existing.merge(&record),
            None => table.assigns.push(record),
        }
        table
    }
}

/// Names of the environments and projects a record table touched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub envs: Vec<String>,
    pub projects: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.envs.is_empty() && self.projects.is_empty()
    }

    fn touch_env(&mut self, name: &str) {
        util::union(&mut self.envs, &[name.to_string()]);
    }

    fn touch_project(&mut self, name: &str) {
        util::union(&mut self.projects, &[name.to_string()]);
    }
}

fn group_by<'a, T>(
    items: impl IntoIterator<Item = &'a T>,
    key: impl Fn(&'a T) -> &'a str,
) -> IndexMap<&'a str, Vec<&'a T>> {
    let mut groups: IndexMap<&str, Vec<&T>> = IndexMap::new();
    for item in items {
        groups.entry(key(item)).or_default().push(item);
    }
    groups
}

fn env_info<'a>(
    envs: &'a IndexMap<String, Arc<EnvironmentInfo>>,
    name: &str,
) -> Result<&'a Arc<EnvironmentInfo>> {
    envs.get(name)
        .ok_or_else(|| Error::not_found(RefKind::Environment, name))
}

impl DeployInfoTable {
    /// Apply `records` and report what changed
    ///
    /// Entries the records do not touch are shared with `self`.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn with_record_table(&self, records: &DeployRecordTable) -> Result<(DeployInfoTable, ChangeSet)> {
        let mut target = DeployInfoTable {
            commit: records.commit.clone().or_else(|| self.commit.clone()),
            ..self.clone()
        };
        let mut changes = ChangeSet::default();

        for name in apply_records(&records.envs, &mut target.envs) {
            changes.touch_env(&name);
        }

        for (env, hosts) in group_by(&records.hosts, |r| r.env.as_str()) {
            let info = env_info(&target.envs, env)?.with_host_records(&hosts);
            target.envs.insert(env.to_string(), Arc::new(info));
            changes.touch_env(env);
        }

        for (env, groups) in group_by(&records.host_groups, |r| r.env.as_str()) {
            let info = env_info(&target.envs, env)?.with_host_group_records(&groups);
            target.envs.insert(env.to_string(), Arc::new(info));
            changes.touch_env(env);
        }

        let env_assigns = group_by(
            records
                .assigns
                .iter()
                .filter(|a| a.scope() == AssignmentScope::Environment),
            |a| a.env_name.as_deref().unwrap_or(ROOT_ENVIRONMENT_NAME),
        );
        for (env, assigns) in env_assigns {
            let info = env_info(&target.envs, env)?.with_assign_records(&assigns)?;
            target.envs.insert(env.to_string(), Arc::new(info));
            changes.touch_env(env);
        }

        for name in apply_records(&records.projects, &mut target.projects) {
            changes.touch_project(&name);
        }

        let project_assigns = group_by(
            records
                .assigns
                .iter()
                .filter(|a| a.scope() == AssignmentScope::Project),
            |a| a.project_name.as_deref().unwrap_or(ROOT_PROJECT_NAME),
        );
        for (project, assigns) in project_assigns {
            let info = target
                .projects
                .get(project)
                .ok_or_else(|| Error::not_found(RefKind::Project, project))?
                .with_assign_records(&assigns)?;
            target.projects.insert(project.to_string(), Arc::new(info));
            changes.touch_project(project);
        }

        tracing::debug!(
            envs = changes.envs.len(),
            projects = changes.projects.len(),
            "applied record table"
        );
        Ok((target, changes))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{info_table, table::Variables};
    use pretty_assertions::assert_eq;

    fn ids(list: &[VariableInfo]) -> Vec<String> {
        list.iter()
            .map(|info| info.id.clone().unwrap_or_else(|| "-".to_string()))
            .collect()
    }

    fn assignment(id: &str, name: &str, value: &str) -> Assignment {
        Assignment {
            id: id.to_string(),
            variable_info: VariableInfo::simple(name, value),
            ..Default::default()
        }
    }

    #[test]
    fn ids_compare_numerically() {
        assert_eq!(Assignment::compare_id("1.2", "1.10"), Ordering::Less);
        assert_eq!(Assignment::compare_id("2", "1.10"), Ordering::Greater);
        assert_eq!(Assignment::compare_id("1", "1.1"), Ordering::Less);
        assert_eq!(Assignment::compare_id("3.0", "3.0"), Ordering::Equal);
        assert_eq!(Assignment::compare_id("x", "0"), Ordering::Equal);
    }

    #[test]
    fn insert_keeps_id_order() {
        let mut list = vec![VariableInfo::simple("plain", "p")];
        for id in ["1", "1.1", "2"] {
            assignment(id, "v", id).insert_to(&mut list);
        }
        assignment("1.2", "v", "new").insert_to(&mut list);
        assert_eq!(ids(&list), ["-", "1", "1.1", "1.2", "2"]);

        assignment("1.1", "v", "replaced").insert_to(&mut list);
        assert_eq!(ids(&list), ["-", "1", "1.1", "1.2", "2"]);
        assert_eq!(list[2].value, Some(Value::from("replaced")));

        Assignment {
            disabled: true,
            ..assignment("1", "v", "")
        }
        .insert_to(&mut list);
        assert_eq!(ids(&list), ["-", "1.1", "1.2", "2"]);
    }

    #[test]
    fn insert_before_everything_bigger() {
        let mut list = vec![];
        assignment("5", "v", "5").insert_to(&mut list);
        assignment("3", "v", "3").insert_to(&mut list);
        assert_eq!(ids(&list), ["3", "5"]);
    }

    #[test]
    fn record_table_merges_defined_fields() {
        let table = DeployRecordTable::default()
            .add_env(EnvironmentRecord {
                name: "qa".to_string(),
                description: Some("first".to_string()),
                labels: Some(vec!["testenv".to_string()]),
                ..Default::default()
            })
            .add_env(EnvironmentRecord {
                name: "qa".to_string(),
                description: Some("second".to_string()),
                ..Default::default()
            });

        assert_eq!(table.envs.len(), 1);
        assert_eq!(table.envs[0].description.as_deref(), Some("second"));
        assert_eq!(table.envs[0].labels, Some(vec!["testenv".to_string()]));
    }

    #[test]
    fn applies_records_and_shares_untouched_entries() {
        let info = info_table!(
            r#"
envs:
  shared.defaults:
    id: 1
  prod:
    id: 2
    parents: [shared.defaults]
    hosts:
      web1: {}
  legacy:
    id: 3
projects:
  $: {}
  shop:
    parents: [$]
"#
        );
        let records = DeployRecordTable::from_yaml_str(
            r#"
envs:
  - { name: prod, description: production }
  - { name: legacy, disabled: true }
hosts:
  - { env: prod, name: web2, user: deploy }
assigns:
  - { id: 10, variableInfo: { name: greeting, value: hi } }
  - { id: 11, scope: project, projectName: shop, envName: prod, variableInfo: { name: replicas, value: 3 } }
"#,
        )
        .unwrap();

        let (next, changes) = info.with_record_table(&records).unwrap();

        assert_eq!(changes.envs, ["prod", "legacy", "shared.defaults"]);
        assert_eq!(changes.projects, ["shop"]);
        assert!(!next.envs.contains_key("legacy"));
        assert_eq!(next.envs["prod"].description.as_deref(), Some("production"));
        assert_eq!(next.envs["prod"].hosts.keys().collect::<Vec<_>>(), ["web1", "web2"]);
        assert!(next.envs["shared.defaults"].vars.exists(&"greeting".into()));
        assert!(Arc::ptr_eq(&info.projects["$"], &next.projects["$"]));

        let shop = &next.projects["shop"];
        assert_eq!(shop.overrides.len(), 1);
        assert_eq!(shop.overrides[0].query.to_string(), "prod");
        assert!(shop.overrides[0].vars.exists(&"replicas".into()));
    }

    #[test]
    fn unknown_env_in_host_record_fails() {
        let info = info_table!("envs: { prod: {} }");
        let records = DeployRecordTable::default().add_host(HostRecord {
            env: "qa".to_string(),
            name: "web1".to_string(),
            ..Default::default()
        });

        let err = info.with_record_table(&records).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: RefKind::Environment, .. }));
    }
}
