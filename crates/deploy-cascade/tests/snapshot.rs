//! Snapshot tests
//!
//! Resolves each *.yaml file in /tests/fixtures/ individually and compares if the
//! rendered environments change.

use deploy_cascade::{info::DeployInfoTable, model::DeployModelTable, table::Variables, value::Value};
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
struct RenderedEnvironment {
    name: String,
    envtype: &'static str,
    labels: Vec<String>,
    hosts: Vec<String>,
    groups: IndexMap<String, Vec<String>>,
    vars: IndexMap<String, Value>,
}

#[test]
fn snapshots() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("DEPLOY_CASCADE_LOG"))
        .with_writer(std::io::stderr)
        .init();

    insta::glob!("fixtures/*.yaml", |path| {
        let reader = std::fs::read_to_string(path).unwrap();
        let info = DeployInfoTable::from_yaml_str(&reader).expect("must be valid info table");
        let model = DeployModelTable::new(Arc::new(info)).expect("must resolve");

        let rendered: Vec<RenderedEnvironment> = model
            .envs
            .values()
            .filter(|env| !env.abstracted)
            .map(|env| RenderedEnvironment {
                name: env.name.clone(),
                envtype: env.envtype(),
                labels: env.labels.clone(),
                hosts: env
                    .hosts
                    .values()
                    .filter(|host| !host.retired)
                    .map(|host| host.name.clone())
                    .collect(),
                groups: env
                    .host_groups
                    .names()
                    .map(|group| {
                        let servers = env.group_servers(group).expect("group exists");
                        (group.to_string(), servers.into_iter().map(str::to_string).collect())
                    })
                    .collect(),
                vars: env
                    .vars
                    .variables()
                    .filter_map(|variable| {
                        let name = variable.name()?.to_string();
                        Some((name, variable.value().cloned().unwrap_or_default()))
                    })
                    .collect(),
            })
            .collect();

        insta::assert_yaml_snapshot!(rendered);
    });
}
