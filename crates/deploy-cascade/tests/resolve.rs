//! Resolution scenarios across environments, projects and records

use deploy_cascade::{
    error::{Error, RefKind},
    info::DeployInfoTable,
    info_table,
    model::{AbstractMode, DeployModelTable, EnvSelector, EnvironmentQuery, LabelFilter},
    name::VariableName,
    records::DeployRecordTable,
    table::Variables,
    value::Value,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const TABLE: &str = r#"
envs:
  shared.defaults:
    abstracted: true
    vars:
      - { id: 1, name: region, value: eu }
      - { id: 2, name: db.host, value: localhost }
      - { id: 3, name: db.port, value: 5432 }
    hosts:
      localhost: {}
  prod:
    parents: [shared.defaults]
    labels: [prod]
    vars:
      - { id: 4, name: db.host, value: db.prod }
    hosts:
      web1: { labels: { role: web } }
      web2: { labels: { role: web } }
      db1: { labels: { role: db }, port: 2222 }
    hostGroups:
      web: { hosts: [web1, web2] }
      db: { hosts: [db1] }
  prod.eu:
    parents: [prod]
    hosts:
      web2: { retired: true }
  qa:
    parents: [shared.defaults]
    labels: [testenv]
projects:
  $:
    abstracted: true
    vars: [{ id: 10, name: replicas, value: 1 }]
  shop:
    parents: [$]
    overrides:
      - query: prod
        vars: [{ id: 11, name: replicas, value: 3 }]
"#;

fn model() -> DeployModelTable {
    DeployModelTable::new(Arc::new(info_table!(TABLE))).unwrap()
}

fn value(vars: &dyn Variables, name: &str) -> Option<String> {
    vars.get(&VariableName::parse(name))
        .and_then(|variable| variable.value())
        .map(ToString::to_string)
}

fn names<'a>(hosts: impl IntoIterator<Item = &'a deploy_cascade::model::Host>) -> Vec<&'a str> {
    hosts.into_iter().map(|host| host.name.as_str()).collect()
}

#[test]
fn nested_variables_cascade_per_field() {
    let model = model();
    let prod = model.envs.get("prod.eu").unwrap();

    assert_eq!(prod.descending, ["shared.defaults", "prod", "prod.eu"]);
    assert_eq!(value(&*prod.vars, "db.host").as_deref(), Some("db.prod"));
    assert_eq!(value(&*prod.vars, "db.port").as_deref(), Some("5432"));
    assert_eq!(value(&*prod.vars, "region").as_deref(), Some("eu"));

    let qa = model.envs.get("qa").unwrap();
    assert_eq!(value(&*qa.vars, "db.host").as_deref(), Some("localhost"));
}

#[test]
fn hosts_merge_along_the_chain() {
    let model = model();
    let prod = model.envs.get("prod").unwrap();
    let eu = model.envs.get("prod.eu").unwrap();

    assert_eq!(prod.group_servers("web").unwrap(), ["web1", "web2"]);
    assert_eq!(eu.group_servers("web").unwrap(), ["web1"]);
    assert_eq!(names(eu.query_hosts("web*").unwrap()), ["web1"]);
    assert_eq!(names(eu.query_all_hosts("web*").unwrap()), ["web1", "web2"]);
    assert_eq!(names(prod.query_hosts("db : web1").unwrap()), ["db1", "web1"]);

    let db1 = prod.hosts.get("db1").unwrap();
    assert_eq!((db1.port, db1.channel.as_str()), (2222, "ssh"));
    assert_eq!(eu.localhost().unwrap().port, 22);

    let web = LabelFilter::Values([("role".to_string(), Value::from("web"))].into_iter().collect());
    assert_eq!(names(prod.filter_hosts_by_labels(&web)), ["web1", "web2"]);
    assert!(matches!(
        prod.group_servers("missing"),
        Err(Error::NotFound { kind: RefKind::HostGroup, .. })
    ));
}

#[test]
fn environment_queries() {
    let model = model();
    let env = |name: &str| model.envs.get(name).unwrap();
    let query = |text: &str| EnvironmentQuery::new(text).unwrap();

    assert!(query("prod & !prod.eu").matches(env("prod")));
    assert!(!query("prod & !prod.eu").matches(env("prod.eu")));
    assert!(query("testenv").matches(env("qa")));
    assert!(query("all").matches(env("qa")));

    assert!(query("prod").includes(&query("prod.eu"), &model.envs).unwrap());
    assert!(!query("prod.eu").includes(&query("prod"), &model.envs).unwrap());
    assert!(query("prod : qa").includes(&query("qa"), &model.envs).unwrap());

    assert!(env("prod.eu")
        .is_included_in(Some(["prod".to_string()].as_slice()), Some(["qa".to_string()].as_slice()))
        .unwrap());
    assert!(matches!(EnvironmentQuery::new("prod &"), Err(Error::Syntax(_))));
}

#[test]
fn search_environments() {
    let model = model();
    let found: Vec<&str> = model
        .envs
        .search(Some("prod"), AbstractMode::Concrete)
        .into_iter()
        .map(|env| env.name.as_str())
        .collect();

    assert_eq!(found, ["prod", "prod.eu"]);
    assert_eq!(model.envs.concrete_count(), 3);
    assert_eq!(model.envs.get("prod.eu").unwrap().envtype(), "prod");
    assert_eq!(model.envs.get("qa").unwrap().envtype(), "testenv");
}

#[test]
fn records_rebuild_what_they_touch() {
    let model = model();
    let records = DeployRecordTable::from_yaml_str(
        r#"
envs:
  - { name: prod.us, parents: [prod], labels: [us] }
hosts:
  - { env: prod, name: web3, labels: { role: web } }
hostGroups:
  - { env: prod, name: web, hosts: [web1, web2, web3] }
assigns:
  - { id: 4, envName: prod, disabled: true }
  - { id: 11, scope: project, projectName: shop, envName: prod, variableInfo: { name: replicas, value: 5 } }
"#,
    )
    .unwrap();
    let (next, changes) = model.with_records(&records).unwrap();

    assert_eq!(changes.envs, ["prod.us", "prod"]);
    assert_eq!(changes.projects, ["shop"]);
    assert!(Arc::ptr_eq(
        model.envs.get("qa").unwrap(),
        next.envs.get("qa").unwrap()
    ));

    let us = next.envs.get("prod.us").unwrap();
    assert_eq!(us.labels, ["prod", "us"]);
    assert_eq!(us.group_servers("web").unwrap(), ["web1", "web2", "web3"]);
    assert_eq!(value(&*us.vars, "db.host").as_deref(), Some("localhost"));
    assert_eq!(
        value(&*model.envs.get("prod").unwrap().vars, "db.host").as_deref(),
        Some("db.prod")
    );

    let prod = next.envs.get("prod").unwrap();
    let shop = next.projects.get("shop").unwrap();
    let vars = shop.get_vars_for_env(EnvSelector::Env(prod), &next.envs).unwrap();
    assert_eq!(value(&vars, "replicas").as_deref(), Some("5"));
    let vars = shop.get_vars_for_env(EnvSelector::Env(next.envs.get("qa").unwrap()), &next.envs).unwrap();
    assert_eq!(value(&vars, "replicas").as_deref(), Some("1"));
}

#[test]
fn broken_chains_are_reported() {
    let cycle = DeployInfoTable::from_yaml_str(
        r#"
envs:
  a: { parents: [b] }
  b: { parents: [a] }
"#,
    )
    .unwrap();
    assert!(matches!(
        DeployModelTable::new(Arc::new(cycle)),
        Err(Error::InheritanceCycle(_))
    ));

    let missing = info_table!("envs: { a: { parents: [ghost] } }");
    assert!(matches!(
        DeployModelTable::new(Arc::new(missing)),
        Err(Error::NotFound { kind: RefKind::Environment, .. })
    ));
}

#[test]
fn json_tables_accept_numeric_and_text_ids() {
    let table = DeployInfoTable::from_json_str(
        r#"{
  "envs": {
    "shared.defaults": {
      "abstracted": true,
      "vars": [
        { "id": 1, "name": "a", "value": 1 },
        { "id": "1.2", "name": "b", "value": "two" }
      ]
    },
    "local": { "parents": ["shared.defaults"], "labels": ["local"] }
  }
}"#,
    )
    .unwrap();
    let model = DeployModelTable::new(Arc::new(table)).unwrap();
    let local = model.envs.get("local").unwrap();

    assert!(local.is_local());
    assert_eq!(value(&*local.vars, "b").as_deref(), Some("two"));
    assert_eq!(model.info.id_allocator().next_id(), "2");
}
