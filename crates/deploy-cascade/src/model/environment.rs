use super::{
    host::{Host, HostGroup, HostGroups, Hosts, LabelFilter},
    resolve_all, AbstractMode, Reuse,
};
use crate::{
    error::{Error, RefKind, Result},
    info::{EnvironmentInfo, HostGroupInfo, HostInfo},
    query::QueryExpression,
    table::{LayeredVariables, Variables},
    util,
};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, sync::Arc};

pub const ROOT_ENVIRONMENT_NAME: &str = "shared.defaults";
pub const LOCALHOST: &str = "localhost";

pub const LOCAL_ENV_LABEL: &str = "local";
pub const TEST_ENV_LABEL: &str = "testenv";
pub const PROD_ENV_LABEL: &str = "prod";

/// Resolved environments, parents inserted before their children
#[derive(Debug, Clone, Default)]
pub struct Environments {
    map: IndexMap<String, Arc<Environment>>,
}

impl Environments {
    #[tracing::instrument(level = "trace", skip_all, fields(envs = infos.len()))]
    pub fn new(infos: &IndexMap<String, Arc<EnvironmentInfo>>) -> Result<Self> {
        Self::resolve(infos, None)
    }

    /// Resolve again, reusing the environments whose chain has no changed name
    #[tracing::instrument(level = "trace", skip_all, fields(changed = changed.len()))]
    pub fn with_changes(
        &self,
        infos: &IndexMap<String, Arc<EnvironmentInfo>>,
        changed: &[String],
    ) -> Result<Self> {
        Self::resolve(infos, Some(Reuse::new(&self.map, changed)))
    }

    fn resolve(
        infos: &IndexMap<String, Arc<EnvironmentInfo>>,
        previous: Option<Reuse<'_, Environment>>,
    ) -> Result<Self> {
        let map = resolve_all(
            infos,
            RefKind::Environment,
            previous,
            |name, chain| Environment::new(name, chain, infos),
        )?;
        tracing::debug!(envs = map.len(), "resolved environments");
        Ok(Self { map })
    }

    pub fn find(&self, name: &str) -> Option<&Arc<Environment>> {
        self.map.get(name)
    }

    pub fn get(&self, name: &str) -> Result<&Arc<Environment>> {
        self.find(name)
            .ok_or_else(|| Error::not_found(RefKind::Environment, name))
    }

    pub fn get_root(&self) -> Result<&Arc<Environment>> {
        self.get(ROOT_ENVIRONMENT_NAME)
    }

    /// Smallest set of environments covering every environment matching `key`
    ///
    /// An environment is left out when one of its ancestors matches too.
    pub fn gets_by_key(&self, key: &str) -> Result<Vec<&Arc<Environment>>> {
        let mut list: Vec<&Arc<Environment>> = vec![];
        for env in self.map.values() {
            if !env.matches_key(key) {
                continue;
            }
            if list.iter().any(|listed| env.belongs_to(&listed.name)) {
                continue;
            }
            list.retain(|listed| !listed.belongs_to(&env.name));
            list.push(env);
        }
        if list.is_empty() {
            return Err(Error::not_found(RefKind::Environment, key));
        }
        Ok(list)
    }

    pub fn values(&self) -> impl Iterator<Item = &Arc<Environment>> {
        self.map.values()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn concrete_count(&self) -> usize {
        self.map.values().filter(|env| !env.abstracted).count()
    }

    /// Environments whose name contains `key`, sorted by name
    pub fn search(&self, key: Option<&str>, mode: AbstractMode) -> Vec<&Arc<Environment>> {
        let mut list: Vec<_> = self
            .map
            .values()
            .filter(|env| key.map_or(true, |key| env.name.contains(key)))
            .filter(|env| mode.accepts(env.abstracted))
            .collect();
        list.sort_by(|x, y| x.name.cmp(&y.name));
        list
    }
}

#[derive(Debug)]
pub struct Environment {
    pub info: Arc<EnvironmentInfo>,
    pub name: String,
    pub id: Option<String>,
    pub abstracted: bool,
    pub description: Option<String>,
    /// ancestors farthest first, then the environment itself
    pub descending: Vec<String>,
    pub parents: Vec<String>,
    pub labels: Vec<String>,
    pub vars: Arc<LayeredVariables>,
    pub hosts: Hosts,
    pub host_groups: HostGroups,
}

impl Environment {
    #[tracing::instrument(level = "trace", skip_all, fields(env = name))]
    fn new(
        name: &str,
        descending: Vec<String>,
        infos: &IndexMap<String, Arc<EnvironmentInfo>>,
    ) -> Result<Self> {
        let chain = descending
            .iter()
            .map(|name| {
                infos
                    .get(name)
                    .ok_or_else(|| Error::not_found(RefKind::Environment, name.as_str()))
            })
            .collect::<Result<Vec<_>>>()?;
        let Some((info, ancestors)) = chain.split_last() else {
            return Err(Error::not_found(RefKind::Environment, name));
        };

        let mut vars = LayeredVariables::new(format!("env {name}"));
        for ancestor in ancestors {
            if !ancestor.vars.is_empty() {
                vars.add_layer(ancestor.vars.clone());
            }
        }
        vars.add_writable_layer(info.vars.clone());

        let mut labels = vec![];
        let mut host_infos: IndexMap<String, HostInfo> = IndexMap::new();
        let mut group_infos: IndexMap<String, HostGroupInfo> = IndexMap::new();
        for env in &chain {
            util::union(&mut labels, &env.labels);
            for (host_name, host) in &env.hosts {
                host_infos
                    .entry(host_name.clone())
                    .or_insert_with(|| HostInfo::new(host_name))
                    .merge(host);
            }
            for (group_name, group) in &env.host_groups {
                group_infos
                    .entry(group_name.clone())
                    .or_insert_with(|| HostGroupInfo::new(group_name))
                    .merge(group);
            }
        }

        let hosts = Hosts::new(&host_infos);
        let host_groups = HostGroups::new(&group_infos, &hosts)?;

        Ok(Self {
            info: Arc::clone(info),
            name: info.name.clone(),
            id: info.id.clone(),
            abstracted: info.abstracted,
            description: info.description.clone(),
            parents: info.parents.clone(),
            descending,
            labels,
            vars: Arc::new(vars),
            hosts,
            host_groups,
        })
    }

    /// Host with the given retirement status
    pub fn find_host(&self, name: &str, retired: bool) -> Option<&Host> {
        self.hosts.find(name).filter(|host| host.retired == retired)
    }

    pub fn get_host(&self, name: &str, retired: bool) -> Result<&Host> {
        self.find_host(name, retired)
            .ok_or_else(|| Error::not_found(RefKind::Host, name))
    }

    pub fn localhost(&self) -> Result<&Host> {
        self.get_host(LOCALHOST, false)
    }

    pub fn find_host_group(&self, name: &str) -> Option<&HostGroup> {
        self.host_groups.find(name)
    }

    pub fn get_host_group(&self, name: &str) -> Result<&HostGroup> {
        self.host_groups.get(name)
    }

    /// Active hosts selected by `query`
    pub fn query_hosts(&self, query: &str) -> Result<Vec<&Host>> {
        let mut hosts = self.query_all_hosts(query)?;
        hosts.retain(|host| !host.retired);
        Ok(hosts)
    }

    /// Hosts of the groups and the hosts whose name matches `query`, first occurrence of a name wins
    pub fn query_all_hosts(&self, query: &str) -> Result<Vec<&Host>> {
        let expr = QueryExpression::parse(query)?;
        let grouped = self
            .host_groups
            .values()
            .filter(|group| expr.matches(&group.name))
            .flat_map(|group| group.hosts().iter());
        let named = self.hosts.values().filter(|host| expr.matches(&host.name));

        let mut list: Vec<&Host> = vec![];
        for host in grouped.chain(named) {
            if !list.iter().any(|listed| listed.name == host.name) {
                list.push(host);
            }
        }
        Ok(list)
    }

    pub fn filter_hosts_by_labels(&self, filter: &LabelFilter) -> Vec<&Host> {
        self.hosts.filter_by_labels(filter)
    }

    /// Names of the active hosts of a group
    pub fn group_servers(&self, group: &str) -> Result<Vec<&str>> {
        Ok(self
            .get_host_group(group)?
            .hosts()
            .iter()
            .filter(|host| !host.retired)
            .map(|host| host.name.as_str())
            .collect())
    }

    /// Included by any of the `including` queries and by none of the `excluding` ones
    ///
    /// A missing `including` list includes every environment.
    pub fn is_included_in(&self, including: Option<&[String]>, excluding: Option<&[String]>) -> Result<bool> {
        if let Some(including) = including {
            if !self.matches_any(including)? {
                return Ok(false);
            }
        }
        match excluding {
            Some(excluding) => Ok(!self.matches_any(excluding)?),
            None => Ok(true),
        }
    }

    fn matches_any(&self, queries: &[String]) -> Result<bool> {
        for query in queries {
            if EnvironmentQuery::new(query)?.matches(self) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn envtype(&self) -> &'static str {
        if self.is_prod() {
            PROD_ENV_LABEL
        } else if self.is_test() {
            TEST_ENV_LABEL
        } else {
            LOCAL_ENV_LABEL
        }
    }

    pub fn is_local(&self) -> bool {
        self.has_label(LOCAL_ENV_LABEL)
    }

    pub fn is_test(&self) -> bool {
        self.has_label(TEST_ENV_LABEL)
    }

    pub fn is_prod(&self) -> bool {
        self.has_label(PROD_ENV_LABEL)
    }

    pub fn is_root(&self) -> bool {
        self.name == ROOT_ENVIRONMENT_NAME
    }

    fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// `true` if `ancestor` is this environment or one of its ancestors
    pub fn belongs_to(&self, ancestor: &str) -> bool {
        self.descending.iter().any(|name| name == ancestor)
    }

    /// Literal term semantics of environment queries
    pub fn matches_key(&self, key: &str) -> bool {
        key == "all" || self.name == key || self.has_label(key) || self.belongs_to(key)
    }
}

/// Query selecting environments by name, label or ancestor
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentQuery {
    expr: QueryExpression,
}

impl EnvironmentQuery {
    pub fn new(query: &str) -> Result<Self> {
        Ok(Self {
            expr: QueryExpression::parse(query)?,
        })
    }

    pub fn expr(&self) -> &QueryExpression {
        &self.expr
    }

    pub fn matches(&self, env: &Environment) -> bool {
        self.expr
            .matches_with(&env.name, &mut |key, _| env.matches_key(key))
    }

    /// `true` if every environment selected by `other` is selected by this query
    pub fn includes(&self, other: &EnvironmentQuery, envs: &Environments) -> Result<bool> {
        self.expr.try_includes_with::<Error>(&other.expr, &mut |key, target| {
            let bigger = envs.gets_by_key(key)?;
            let smaller = envs.gets_by_key(target)?;
            Ok(smaller
                .iter()
                .all(|env| bigger.iter().any(|big| env.belongs_to(&big.name))))
        })
    }

    pub fn equals(&self, other: &EnvironmentQuery) -> bool {
        self.expr.equals(&other.expr)
    }
}

impl fmt::Display for EnvironmentQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)
    }
}

impl Serialize for EnvironmentQuery {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Queries are stored as plain text or as `{expr: ...}`
#[derive(Deserialize)]
#[serde(untagged)]
enum RawQuery {
    Text(String),
    Expr { expr: String },
}

impl<'de> Deserialize<'de> for EnvironmentQuery {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = match RawQuery::deserialize(deserializer)? {
            RawQuery::Text(text) | RawQuery::Expr { expr: text } => text,
        };
        EnvironmentQuery::new(&text).map_err(serde::de::Error::custom)
    }
}
