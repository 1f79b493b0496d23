use crate::{
    error::{Error, RefKind, Result},
    graph::Graph,
    info::{HostGroupInfo, HostInfo},
    value::Value,
};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::collections::HashMap;

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_CHANNEL: &str = "ssh";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub port: u16,
    pub channel: String,
    pub retired: bool,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub labels: IndexMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Host {
    pub fn new(info: &HostInfo) -> Self {
        Self {
            name: info.name.clone(),
            id: info.id.clone(),
            user: info.user.clone(),
            port: info.port.unwrap_or(DEFAULT_PORT),
            channel: info
                .channel
                .clone()
                .unwrap_or_else(|| DEFAULT_CHANNEL.to_string()),
            retired: info.retired,
            labels: info.labels.clone(),
            description: info.description.clone(),
        }
    }

    pub fn to_retired(&self, retired: bool) -> Self {
        Self {
            retired,
            ..self.clone()
        }
    }
}

/// Label selection for [Hosts::filter_by_labels]
#[derive(Debug, Clone, PartialEq)]
pub enum LabelFilter {
    /// every label must be present
    Names(Vec<String>),
    /// every label must have the value, a null value also matches a missing label
    Values(IndexMap<String, Value>),
}

impl LabelFilter {
    fn matches(&self, host: &Host) -> bool {
        match self {
            LabelFilter::Names(names) => names.iter().all(|name| host.labels.contains_key(name)),
            LabelFilter::Values(values) => values.iter().all(|(name, expected)| {
                match host.labels.get(name) {
                    Some(actual) => actual == expected,
                    None => expected.is_null(),
                }
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Hosts {
    map: IndexMap<String, Host>,
}

impl Hosts {
    pub fn new(infos: &IndexMap<String, HostInfo>) -> Self {
        Self {
            map: infos
                .values()
                .map(|info| (info.name.clone(), Host::new(info)))
                .collect(),
        }
    }

    pub fn find(&self, name: &str) -> Option<&Host> {
        self.map.get(name)
    }

    pub fn get(&self, name: &str) -> Result<&Host> {
        self.find(name)
            .ok_or_else(|| Error::not_found(RefKind::Host, name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Host> {
        self.map.values()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Hosts whose name contains `key`, ignoring case
    pub fn search(&self, key: Option<&str>) -> Vec<&Host> {
        let Some(key) = key.filter(|key| !key.is_empty()) else {
            return self.map.values().collect();
        };
        let lowered = key.to_lowercase();
        self.map
            .values()
            .filter(|host| host.name.to_lowercase().contains(&lowered))
            .collect()
    }

    pub fn filter_by_labels(&self, filter: &LabelFilter) -> Vec<&Host> {
        self.map
            .values()
            .filter(|host| filter.matches(host))
            .collect()
    }
}

/// How a group takes over the hosts of another group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InheritType {
    Inherit,
    Retired,
}

#[derive(Debug, Clone)]
pub struct HostGroup {
    pub name: String,
    pub id: Option<String>,
    pub description: Option<String>,
    /// hosts declared by the group itself, `hostsRetired` applied
    pub self_hosts: Vec<Host>,
    pub inherits: Vec<String>,
    pub inherits_retired: Vec<String>,
    /// own hosts plus the hosts of every inherited group
    pub inclusive_hosts: Vec<Host>,
    /// inclusive hosts without the ones a group inheriting this one declares itself
    pub exclusive_hosts: Vec<Host>,
}

impl HostGroup {
    pub fn hosts(&self) -> &[Host] {
        &self.inclusive_hosts
    }

    fn self_hosts(info: &HostGroupInfo, hosts: &Hosts) -> Result<Vec<Host>> {
        let mut list = info
            .hosts
            .iter()
            .map(|name| hosts.get(name).cloned())
            .collect::<Result<Vec<_>>>()?;

        for name in &info.hosts_retired {
            let mut found = false;
            for host in list.iter_mut().filter(|host| &host.name == name) {
                host.retired = true;
                found = true;
            }
            if !found {
                list.push(hosts.get(name)?.to_retired(true));
            }
        }
        Ok(list)
    }
}

/// Hosts keyed by name, a host replacing another one keeps its position
#[derive(Default)]
struct HostSet {
    index: HashMap<String, usize>,
    list: Vec<Host>,
}

impl HostSet {
    /// Insert `host`, it stays retired only if both sides are retired
    fn insert(&mut self, host: Host) {
        match self.index.get(&host.name) {
            Some(&i) => {
                let retired = self.list[i].retired && host.retired;
                self.list[i] = host.to_retired(retired);
            }
            None => {
                self.index.insert(host.name.clone(), self.list.len());
                self.list.push(host);
            }
        }
    }

    /// Insert `host` as it is
    fn overwrite(&mut self, host: Host) {
        match self.index.get(&host.name) {
            Some(&i) => self.list[i] = host,
            None => {
                self.index.insert(host.name.clone(), self.list.len());
                self.list.push(host);
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HostGroups {
    map: IndexMap<String, HostGroup>,
}

impl HostGroups {
    #[tracing::instrument(level = "trace", skip_all, fields(groups = infos.len()))]
    pub fn new(infos: &IndexMap<String, HostGroupInfo>, hosts: &Hosts) -> Result<Self> {
        // arcs point from the inherited group to the inheriting one
        let mut graph: Graph<&HostGroupInfo, InheritType> = Graph::new();
        for info in infos.values() {
            graph.node(&info.name, info);
        }
        for info in infos.values() {
            for parent in &info.inherits_retired {
                Self::require(infos, parent)?;
                graph.arc_with(parent, &info.name, InheritType::Retired);
            }
            for parent in &info.inherits {
                Self::require(infos, parent)?;
                graph.arc_with(parent, &info.name, InheritType::Inherit);
            }
        }
        let order: Vec<String> = graph
            .topology()?
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut self_hosts: HashMap<&str, Vec<Host>> = HashMap::new();
        let mut inclusive: HashMap<&str, Vec<Host>> = HashMap::new();
        for name in &order {
            let info = Self::require(infos, name)?;
            let own = HostGroup::self_hosts(info, hosts)?;

            let mut set = HostSet::default();
            for parent in &info.inherits {
                for host in inclusive.get(parent.as_str()).into_iter().flatten() {
                    set.insert(host.clone());
                }
            }
            for parent in &info.inherits_retired {
                for host in inclusive.get(parent.as_str()).into_iter().flatten() {
                    set.insert(host.to_retired(true));
                }
            }
            for host in &own {
                set.overwrite(host.clone());
            }

            inclusive.insert(info.name.as_str(), set.list);
            self_hosts.insert(info.name.as_str(), own);
        }

        // names declared by the groups inheriting each group, computed once per group
        let mut declared_below: HashMap<&str, IndexSet<&str>> = HashMap::new();
        for name in order.iter().rev() {
            let mut below = IndexSet::new();
            for next in graph.next(name)? {
                if graph.get_arc(name, next) != Some(&InheritType::Inherit) {
                    continue;
                }
                let next = Self::require(infos, next)?.name.as_str();
                below.extend(self_hosts[next].iter().map(|host| host.name.as_str()));
                below.extend(declared_below[next].iter().copied());
            }
            declared_below.insert(Self::require(infos, name)?.name.as_str(), below);
        }

        let mut map = IndexMap::with_capacity(infos.len());
        for info in infos.values() {
            let name = info.name.as_str();
            let inclusive_hosts = inclusive.remove(name).unwrap_or_default();
            let exclusive_hosts = inclusive_hosts
                .iter()
                .filter(|host| !declared_below[name].contains(host.name.as_str()))
                .cloned()
                .collect();
            let group = HostGroup {
                name: info.name.clone(),
                id: info.id.clone(),
                description: info.description.clone(),
                self_hosts: self_hosts.get(name).cloned().unwrap_or_default(),
                inherits: info.inherits.clone(),
                inherits_retired: info.inherits_retired.clone(),
                inclusive_hosts,
                exclusive_hosts,
            };
            map.insert(info.name.clone(), group);
        }
        Ok(Self { map })
    }

    fn require<'a>(infos: &'a IndexMap<String, HostGroupInfo>, name: &str) -> Result<&'a HostGroupInfo> {
        infos
            .get(name)
            .ok_or_else(|| Error::not_found(RefKind::HostGroup, name))
    }

    pub fn find(&self, name: &str) -> Option<&HostGroup> {
        self.map.get(name)
    }

    pub fn get(&self, name: &str) -> Result<&HostGroup> {
        self.find(name)
            .ok_or_else(|| Error::not_found(RefKind::HostGroup, name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &HostGroup> {
        self.map.values()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn search(&self, key: Option<&str>) -> Vec<&HostGroup> {
        let Some(key) = key.filter(|key| !key.is_empty()) else {
            return self.map.values().collect();
        };
        let lowered = key.to_lowercase();
        self.map
            .values()
            .filter(|group| group.name.to_lowercase().contains(&lowered))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hosts(names: &[&str]) -> Hosts {
        let infos = names
            .iter()
            .map(|name| (name.to_string(), HostInfo::new(*name)))
            .collect();
        Hosts::new(&infos)
    }

    fn groups(yaml: &str) -> IndexMap<String, HostGroupInfo> {
        let mut infos: IndexMap<String, HostGroupInfo> = serde_yaml::from_str(yaml).unwrap();
        for (key, info) in infos.iter_mut() {
            info.name = key.clone();
        }
        infos
    }

    fn names(hosts: &[Host]) -> Vec<String> {
        hosts
            .iter()
            .map(|host| match host.retired {
                true => format!("{} (retired)", host.name),
                false => host.name.clone(),
            })
            .collect()
    }

    #[test]
    fn host_defaults() {
        let host = Host::new(&HostInfo::new("web1"));
        assert_eq!(host.port, 22);
        assert_eq!(host.channel, "ssh");
        assert!(!host.retired);
    }

    #[test]
    fn exclusive_hosts_leave_out_hosts_of_inheriting_groups() {
        let groups = HostGroups::new(
            &groups(
                r#"
web: { hosts: [h1] }
api: { hosts: [h2], inherits: [web] }
all: { inherits: [web, api] }
"#,
            ),
            &hosts(&["h1", "h2"]),
        )
        .unwrap();

        let web = groups.get("web").unwrap();
        let api = groups.get("api").unwrap();
        let all = groups.get("all").unwrap();
        assert_eq!(names(&web.exclusive_hosts), ["h1"]);
        assert_eq!(names(&api.exclusive_hosts), ["h1", "h2"]);
        assert_eq!(names(&all.exclusive_hosts), ["h1", "h2"]);
        assert_eq!(names(&all.inclusive_hosts), ["h1", "h2"]);
    }

    #[test]
    fn redeclared_host_is_not_exclusive_to_the_parent() {
        let groups = HostGroups::new(
            &groups(
                r#"
base: { hosts: [h1, h2] }
child: { hosts: [h2], inherits: [base] }
"#,
            ),
            &hosts(&["h1", "h2"]),
        )
        .unwrap();

        assert_eq!(names(&groups.get("base").unwrap().exclusive_hosts), ["h1"]);
        assert_eq!(names(&groups.get("child").unwrap().exclusive_hosts), ["h1", "h2"]);
        assert_eq!(names(&groups.get("base").unwrap().self_hosts), ["h1", "h2"]);
        assert_eq!(names(&groups.get("child").unwrap().self_hosts), ["h2"]);
    }

    #[test]
    fn retired_inheritance_and_retired_self_hosts() {
        let groups = HostGroups::new(
            &groups(
                r#"
old: { hosts: [h1, h2] }
new: { hosts: [h3], hostsRetired: [h3, h4], inheritsRetired: [old] }
mixed: { inherits: [old], inheritsRetired: [new] }
"#,
            ),
            &hosts(&["h1", "h2", "h3", "h4"]),
        )
        .unwrap();

        let new = groups.get("new").unwrap();
        assert_eq!(names(&new.self_hosts), ["h3 (retired)", "h4 (retired)"]);
        assert_eq!(
            names(&new.inclusive_hosts),
            ["h1 (retired)", "h2 (retired)", "h3 (retired)", "h4 (retired)"]
        );

        // inherited active beats retired
        let mixed = groups.get("mixed").unwrap();
        assert_eq!(
            names(&mixed.inclusive_hosts),
            ["h1", "h2", "h3 (retired)", "h4 (retired)"]
        );
    }

    #[test]
    fn cyclic_inheritance_fails() {
        let err = HostGroups::new(
            &groups(
                r#"
a: { inherits: [b] }
b: { inherits: [a] }
"#,
            ),
            &hosts(&[]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Cycle(names) if names == ["a", "b"]));
    }

    #[test]
    fn unknown_references_fail() {
        let err = HostGroups::new(&groups("a: { inherits: [missing] }"), &hosts(&[])).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: RefKind::HostGroup, .. }));

        let err = HostGroups::new(&groups("a: { hosts: [ghost] }"), &hosts(&[])).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: RefKind::Host, .. }));
    }

    #[test]
    fn label_filters() {
        let infos: IndexMap<String, HostInfo> = serde_yaml::from_str(
            r#"
web1: { name: web1, labels: { zone: a, ssd: true } }
web2: { name: web2, labels: { zone: b } }
db1: { name: db1 }
"#,
        )
        .unwrap();
        let hosts = Hosts::new(&infos);

        let by_name = hosts.filter_by_labels(&LabelFilter::Names(vec!["zone".to_string()]));
        assert_eq!(by_name.iter().map(|h| h.name.as_str()).collect::<Vec<_>>(), ["web1", "web2"]);

        let by_value = hosts.filter_by_labels(&LabelFilter::Values(
            [
                ("zone".to_string(), Value::from("b")),
                ("ssd".to_string(), Value::Null),
            ]
            .into_iter()
            .collect(),
        ));
        assert_eq!(by_value.iter().map(|h| h.name.as_str()).collect::<Vec<_>>(), ["web2"]);

        assert_eq!(hosts.search(Some("WEB")).len(), 2);
        assert_eq!(hosts.search(None).len(), 3);
    }
}
