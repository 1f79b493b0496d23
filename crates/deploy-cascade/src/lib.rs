//! # deploy-cascade - cascading deployment configuration
//!
//! Resolves environments, hosts, playbooks and projects whose settings are inherited along parent chains.
//!
//! ## Introduction for developers
//!
//! Read this to understand how `deploy-cascade` works internally.
//!
//! ### Terms
//!
//! - an `info` is a raw record exactly as it is stored, it only names its parents
//! - a `record` is an edit on top of the infos (a variable assignment, a changed host, ...)
//! - a `model` entity is an info resolved against all its ancestors
//!
//! Every entity kind supports multiple parents:
//!
//! ```yaml
//! envs:
//!   shared.defaults:          # the root environment
//!     abstracted: true
//!     vars:
//!       - { name: region, value: eu }
//!   prod:
//!     parents: [shared.defaults]
//!     labels: [prod]
//!   prod.eu:
//!     parents: [prod]
//!     vars:
//!       - { name: replicas, value: 3 }
//! ```
//!
//! ### Loading
//!
//! Infos are deserialized with [serde] from yaml or json into a [info::RawInfoTable].
//! [info::DeployInfoTable::new] fills in missing names from the map keys and builds the own variable table of every
//! entry once. Entries are kept behind [std::sync::Arc] from here on.
//!
//! ### Variables
//!
//! A variable is addressed by a dotted [name::VariableName]. [table::SimpleVariables] stores the variables of one
//! entry as a trie, a variable on a path masks everything declared below it.
//!
//! [table::LayeredVariables] stacks tables, the innermost layer wins. Only one table is writable and writes copy that
//! table first, tables shared between stacks never change. The writable table may sit inside a nested stack.
//!
//! ### Resolving
//!
//! see [model::DeployModelTable::new]
//!
//! For each entity we compute the descending chain ([inherits::descending]): ancestors farthest first, the entity
//! itself last, every ancestor once. A name already on the current path is an inheritance cycle.
//!
//! | **entity**   | **cascades**                                                              |
//! |--------------|---------------------------------------------------------------------------|
//! | environment  | variables, labels, hosts and host groups merged along the chain           |
//! | host group   | inherited hosts through a [graph::Graph] walked in topological order       |
//! | playbook     | parameter specs (intersected), plays, scenes; `@super` names parent plays |
//! | project      | variables per environment through overrides keyed by environment queries |
//!
//! Environment queries use a small boolean grammar ([query::QueryExpression]): `prod & !prod.legacy : qa*`.
//!
//! ### Edits
//!
//! [records::DeployRecordTable] collects edits. [model::DeployModelTable::with_records] applies them to the infos and
//! resolves again, reusing every entity whose chain did not change.
//!
pub mod closure;
pub mod error;
pub mod graph;
pub mod info;
pub mod inherits;
pub mod model;
pub mod name;
pub mod query;
pub mod records;
pub mod table;
mod util;
pub mod value;
pub mod variable;
pub mod visit;

pub use error::{Error, Result};
