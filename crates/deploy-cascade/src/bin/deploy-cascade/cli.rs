//! deploy-cascade cli interface

use clap::{Parser, Subcommand, ValueEnum};
use deploy_cascade::model::AbstractMode;
use std::fmt::Formatter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[clap(flatten)]
    pub input: InputArgs,

    #[clap(flatten)]
    pub output: OutputArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List environments sorted by name
    Envs {
        /// Only environments whose name contains this key
        key: Option<String>,

        #[arg(short = 'a', long = "abstract", value_enum, default_value_t)]
        mode: AbstractArg,
    },

    /// Print the cascaded variables of an environment
    EnvVars {
        env: String,
    },

    /// List the hosts of an environment
    ///
    /// Without a query every host that is not retired is printed
    Hosts {
        env: String,

        /// Host selection like `web* & !web3 : db`
        query: Option<String>,

        /// Select from all hosts, retired ones included
        #[arg(long)]
        all: bool,
    },

    /// Print the host names of a host group
    #[command(alias = "servers")]
    GroupServers {
        env: String,
        group: String,
    },

    /// Print the variables of a project
    ///
    /// With --env the overrides matching that environment are applied
    ProjectVars {
        project: String,

        /// Environment name or environment query
        #[arg(short = 'e', long = "env")]
        env: Option<String>,
    },

    /// Evaluate environment queries
    Query(QueryCommand),

    /// Print debug information for development
    Dev(DevCommand),
}

#[derive(Parser, Debug)]
pub struct InputArgs {
    /// Load the info table from a file
    ///
    /// `.json` files are read as json, everything else as yaml.
    /// Reads yaml from stdin when absent.
    #[clap(short = 'f', long = "input-file", global(true))]
    pub file: Option<PathBuf>,

    /// Apply a record table on top of the info table
    #[clap(short = 'r', long = "records-file", global(true))]
    pub records: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct OutputArgs {
    #[arg(short = 'F', long = "output-format", default_value_t, global(true))]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum OutputFormat {
    Json,
    #[default]
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
        }
    }
}

/// Which environments `envs` lists by their `abstracted` flag
#[derive(ValueEnum, Clone, Copy, Default, Debug)]
pub enum AbstractArg {
    #[default]
    All,
    Abstracted,
    Concrete,
}

impl From<AbstractArg> for AbstractMode {
    fn from(arg: AbstractArg) -> Self {
        match arg {
            AbstractArg::All => AbstractMode::All,
            AbstractArg::Abstracted => AbstractMode::Abstracted,
            AbstractArg::Concrete => AbstractMode::Concrete,
        }
    }
}

#[derive(Parser, Debug)]
pub struct QueryCommand {
    #[command(subcommand)]
    pub command: QuerySubCommand,
}

#[derive(Subcommand, Debug)]
pub enum QuerySubCommand {
    /// Check whether a query matches an environment
    Match { query: String, env: String },

    /// Check whether the first query includes the second
    Includes { query: String, other: String },
}

#[derive(Parser, Debug)]
pub struct DevCommand {
    #[command(subcommand)]
    pub command: DevSubCommand,
}

#[derive(Subcommand, Debug)]
pub enum DevSubCommand {
    Info,
    Model,
}
