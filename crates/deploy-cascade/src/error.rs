//! error taxonomy shared by every resolver stage
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Kind of entity a failed lookup was looking for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Environment,
    Host,
    HostGroup,
    Playbook,
    Play,
    ParentTask,
    Project,
    GraphNode,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefKind::Environment => f.write_str("environment"),
            RefKind::Host => f.write_str("host"),
            RefKind::HostGroup => f.write_str("host group"),
            RefKind::Playbook => f.write_str("playbook"),
            RefKind::Play => f.write_str("play"),
            RefKind::ParentTask => f.write_str("parent task"),
            RefKind::Project => f.write_str("project"),
            RefKind::GraphNode => f.write_str("graph node"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not find {kind} {name}")]
    NotFound { kind: RefKind, name: String },

    #[error("duplicated play found: {0}")]
    DuplicatedPlay(String),
    #[error("illegal status: {0}")]
    IllegalStatus(String),
    #[error("writable is not set in variable table {0}")]
    WritableNotSet(String),
    #[error("variable without a name can not be put into variable table {0}")]
    UnnamedVariable(String),
    #[error("invalid field name {0:?}")]
    InvalidFieldName(String),
    #[error("malformed {kind} variable: {reason}")]
    MalformedVariable { kind: String, reason: String },
    #[error("{wrapper} can not wrap a {candidate} variable")]
    IneligibleWrap {
        wrapper: &'static str,
        candidate: &'static str,
    },

    #[error("env {target} is abstracted, only non-abstracted env can be shared (project {project})")]
    SharingIntoAbstract { project: String, target: String },
    #[error("circle found in graph {0:?}")]
    Cycle(Vec<String>),
    #[error("inheritance cycle: {}", .0.join(" -> "))]
    InheritanceCycle(Vec<String>),

    #[error(transparent)]
    Syntax(#[from] crate::query::SyntaxError),

    #[error("unable to parse json records")]
    Json(#[from] serde_json::Error),
    #[error("unable to parse yaml records")]
    Yaml(#[from] serde_yaml::Error),
    #[error("IO error")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn not_found(kind: RefKind, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }
}
