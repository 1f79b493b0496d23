mod cli;

use deploy_cascade::{
    info::DeployInfoTable,
    model::{DeployModelTable, EnvSelector, Environment, EnvironmentQuery},
    records::DeployRecordTable,
    table::Variables,
    variable::VariableInfo,
};
use serde::Serialize;
use std::sync::Arc;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("DEPLOY_CASCADE_LOG"))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

fn run(cli: cli::Cli) -> anyhow::Result<()> {
    use cli::Command::*;

    if let Dev(dev_cli) = &cli.command {
        return dev(&cli.input, dev_cli);
    }

    let model = load(&cli.input)?;
    let output = &cli.output;

    match cli.command {
        Envs { key, mode } => {
            let envs: Vec<EnvironmentView> = model
                .envs
                .search(key.as_deref(), mode.into())
                .into_iter()
                .map(|env| EnvironmentView::new(env))
                .collect();
            write(output, &envs)
        }
        EnvVars { env } => {
            let env = model.envs.get(&env)?;
            write(output, &infos(&*env.vars))
        }
        Hosts { env, query, all } => {
            let env = model.envs.get(&env)?;
            let hosts = match (query, all) {
                (Some(query), true) => env.query_all_hosts(&query)?,
                (Some(query), false) => env.query_hosts(&query)?,
                (None, _) => env.hosts.values().filter(|host| all || !host.retired).collect(),
            };
            write(output, &hosts)
        }
        GroupServers { env, group } => {
            let env = model.envs.get(&env)?;
            write(output, &env.group_servers(&group)?)
        }
        ProjectVars { project, env } => {
            let project = model.projects.get(&project)?;
            let vars = match env {
                None => infos(&*project.cascade_vars),
                Some(env) => match model.envs.find(&env) {
                    Some(env) => infos(&project.get_vars_for_env(EnvSelector::Env(env), &model.envs)?),
                    None => {
                        let query = EnvironmentQuery::new(&env)?;
                        infos(&project.get_vars_for_env(EnvSelector::Query(&query), &model.envs)?)
                    }
                },
            };
            write(output, &vars)
        }
        Query(query_cli) => query(&model, query_cli, output),
        Dev(_) => Ok(()),
    }
}

fn load_info(input: &cli::InputArgs) -> anyhow::Result<DeployInfoTable> {
    let info = match &input.file {
        Some(file_path) => DeployInfoTable::load_file(file_path)?,
        None => {
            let stdin = std::io::read_to_string(std::io::stdin())?;
            DeployInfoTable::from_yaml_str(&stdin)?
        }
    };
    anyhow::ensure!(!info.envs.is_empty(), "No environments loaded");
    Ok(info)
}

fn load(input: &cli::InputArgs) -> anyhow::Result<DeployModelTable> {
    let model = DeployModelTable::new(Arc::new(load_info(input)?))?;

    match &input.records {
        None => Ok(model),
        Some(records_path) => {
            let records = DeployRecordTable::load_file(records_path)?;
            let (model, changes) = model.with_records(&records)?;
            tracing::info!(envs = ?changes.envs, projects = ?changes.projects, "applied records");
            Ok(model)
        }
    }
}

fn query(model: &DeployModelTable, cli: cli::QueryCommand, output: &cli::OutputArgs) -> anyhow::Result<()> {
    use cli::QuerySubCommand::*;

    let result = match cli.command {
        Match { query, env } => EnvironmentQuery::new(&query)?.matches(model.envs.get(&env)?),
        Includes { query, other } => {
            EnvironmentQuery::new(&query)?.includes(&EnvironmentQuery::new(&other)?, &model.envs)?
        }
    };
    write(output, &result)
}

fn write<T: Serialize + ?Sized>(output: &cli::OutputArgs, value: &T) -> anyhow::Result<()> {
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), value)?,
        cli::OutputFormat::Json => serde_json::to_writer_pretty(std::io::stdout(), value)?,
    };

    Ok(())
}

fn infos(vars: &dyn Variables) -> Vec<VariableInfo> {
    vars.variables().map(|variable| variable.to_info()).collect()
}

#[derive(Serialize)]
struct EnvironmentView<'a> {
    name: &'a str,
    abstracted: bool,
    envtype: &'static str,
    parents: &'a [String],
    labels: &'a [String],
}

impl<'a> EnvironmentView<'a> {
    fn new(env: &'a Environment) -> Self {
        Self {
            name: &env.name,
            abstracted: env.abstracted,
            envtype: env.envtype(),
            parents: &env.parents,
            labels: &env.labels,
        }
    }
}

/// developer utilities
///
/// A quick way to expose internal structures for debugging purposes
fn dev(input: &cli::InputArgs, cli: &cli::DevCommand) -> anyhow::Result<()> {
    use cli::DevSubCommand::*;

    let info = load_info(input)?;

    match cli.command {
        Info => println!("{info:#?}"),
        Model => {
            let model = DeployModelTable::new(Arc::new(info))?;
            println!("{model:#?}")
        }
    }

    Ok(())
}
