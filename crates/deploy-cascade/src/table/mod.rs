//! Variable namespaces
//!
//! - [SimpleVariables]: an ordered trie keyed by path segment
//! - [LayeredVariables]: a stack of tables simulating inheritance, the innermost layer shadows the outer ones
mod layered;
mod simple;

pub use layered::LayeredVariables;
pub use simple::SimpleVariables;

use crate::{error::Result, name::VariableName, variable::Variable};
use std::fmt;
use std::sync::Arc;

/// Result of a lookup that tells masked variables apart from missing ones
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    Found(&'a Variable),
    /// an ancestor of the name resolved to a variable which masks the rest of the path
    Invisible,
    Missing,
}

impl<'a> Lookup<'a> {
    pub fn found(self) -> Option<&'a Variable> {
        match self {
            Lookup::Found(variable) => Some(variable),
            Lookup::Invisible | Lookup::Missing => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        !matches!(self, Lookup::Missing)
    }
}

pub type VariableIter<'a> = Box<dyn Iterator<Item = &'a Variable> + 'a>;

pub trait Variables: fmt::Debug + Send + Sync {
    /// Label used in messages to tell tables apart
    fn source(&self) -> &str;

    fn is_empty(&self) -> bool;

    /// `true` if a variable is stored exactly at `name`
    fn contains(&self, name: &VariableName) -> bool;

    /// `true` if anything is stored below `name`
    fn contains_children(&self, name: &VariableName) -> bool;

    /// `true` if `name` or one of its ancestors is a variable in this table
    fn hidden(&self, name: &VariableName) -> bool;

    fn get_with_invisible(&self, name: &VariableName) -> Lookup<'_>;

    /// Direct children of `name` in insertion order
    fn fields(&self, name: &VariableName) -> VariableIter<'_>;

    fn reverse_fields(&self, name: &VariableName) -> VariableIter<'_>;

    /// Every visible variable in insertion order
    fn variables(&self) -> VariableIter<'_>;

    /// Every variable, shadowed ones included
    fn all_variables(&self) -> VariableIter<'_>;

    fn put(&mut self, variable: Variable) -> Result<()>;

    fn clear(&mut self);

    /// Copy of this table with `old` swapped for `new`, `None` if `old` is not part of it
    fn with_swapped(&self, _old: &Arc<SimpleVariables>, _new: &Arc<SimpleVariables>) -> Option<Arc<dyn Variables>> {
        None
    }

    /// Non-repeatable variable at `name`, masked variables count as missing
    fn get(&self, name: &VariableName) -> Option<&Variable> {
        self.get_with_invisible(name).found()
    }

    fn exists(&self, name: &VariableName) -> bool {
        self.get(name).is_some()
    }

    /// Variables without another returned variable as ancestor
    fn top_variables(&self) -> Vec<&Variable> {
        let mut top: Vec<&Variable> = vec![];
        for variable in self.variables() {
            let Some(name) = variable.name() else {
                continue;
            };
            let nested = top
                .iter()
                .filter_map(|v| v.name())
                .any(|parent| name.belongs_to(parent));
            if name.path().len() == 1 || !nested {
                top.push(variable);
            }
        }
        top
    }

    fn merge(&mut self, other: &dyn Variables) -> Result<()> {
        for variable in other.variables() {
            self.put(variable.clone())?;
        }
        Ok(())
    }
}
