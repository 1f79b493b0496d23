use super::{Lookup, VariableIter, Variables};
use crate::{
    error::{Error, Result},
    name::VariableName,
    variable::{Variable, VariableInfo},
};
use indexmap::IndexMap;

/// Flat variable table
///
/// Every path segment is a [Node]. A node without children map is a terminal, a node with a children map is a
/// directory. A directory may carry a variable of its own, which happens when `a.b` is put after `a`.
#[derive(Debug, Clone)]
pub struct SimpleVariables {
    source: String,
    root: Node,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Slot {
    Field(String),
    /// repeatable entries are never deduplicated, they are keyed by insertion counter
    Repeated(usize),
}

#[derive(Debug, Clone, Default)]
struct Node {
    variable: Option<Variable>,
    children: Option<IndexMap<Slot, Node>>,
    next_repeated: usize,
}

impl Node {
    fn terminal(variable: Variable) -> Self {
        Self {
            variable: Some(variable),
            ..Default::default()
        }
    }

    fn directory() -> Self {
        Self {
            children: Some(IndexMap::new()),
            ..Default::default()
        }
    }

    fn field(&self, field: &str) -> Option<&Node> {
        self.children
            .as_ref()
            .and_then(|children| children.get(&Slot::Field(field.to_string())))
    }

    fn is_directory(&self) -> bool {
        self.children.is_some()
    }

    fn has_children(&self) -> bool {
        self.children
            .as_ref()
            .is_some_and(|children| !children.is_empty())
    }

    fn children(&self) -> impl DoubleEndedIterator<Item = &Node> {
        self.children.iter().flat_map(|children| children.values())
    }

    /// depth first, a node's own variable before its children
    fn travel<'a>(&'a self, out: &mut Vec<&'a Variable>) {
        if let Some(variable) = &self.variable {
            out.push(variable);
        }
        for child in self.children() {
            child.travel(out);
        }
    }

    fn put(&mut self, variable: Variable, repeatable: bool, last: &str) {
        let children = self.children.get_or_insert_with(IndexMap::new);
        if repeatable {
            children.insert(Slot::Repeated(self.next_repeated), Node::terminal(variable));
            self.next_repeated += 1;
            return;
        }
        match children.get_mut(&Slot::Field(last.to_string())) {
            Some(existing) => existing.variable = Some(variable),
            None => {
                children.insert(Slot::Field(last.to_string()), Node::terminal(variable));
            }
        }
    }
}

impl Default for SimpleVariables {
    fn default() -> Self {
        Self::new("")
    }
}

impl SimpleVariables {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            root: Node::directory(),
        }
    }

    pub fn from_infos(source: impl Into<String>, infos: &[VariableInfo]) -> Result<Self> {
        let mut table = Self::new(source);
        for info in infos {
            table.put(Variable::from_info(info)?)?;
        }
        Ok(table)
    }

    /// Every variable below `name`
    pub fn children(&self, name: &VariableName) -> Vec<&Variable> {
        let mut out = vec![];
        if let Some(node) = self.navigate(name) {
            for child in node.children() {
                child.travel(&mut out);
            }
        }
        out
    }

    fn navigate(&self, name: &VariableName) -> Option<&Node> {
        let mut node = &self.root;
        for field in name.path() {
            node = node.field(field)?;
        }
        Some(node)
    }

    /// Parent directory of `name`, turning terminals on the way into directories
    fn create_dir(&mut self, name: &VariableName) -> &mut Node {
        let path = name.path();
        let mut node = &mut self.root;
        for field in &path[..path.len().saturating_sub(1)] {
            let children = node.children.get_or_insert_with(IndexMap::new);
            node = children
                .entry(Slot::Field(field.clone()))
                .or_insert_with(Node::directory);
            if !node.is_directory() {
                node.children = Some(IndexMap::new());
            }
        }
        node
    }
}

impl Variables for SimpleVariables {
    fn source(&self) -> &str {
        &self.source
    }

    fn is_empty(&self) -> bool {
        !self.root.has_children()
    }

    fn contains(&self, name: &VariableName) -> bool {
        self.navigate(name)
            .is_some_and(|node| node.variable.is_some())
    }

    fn contains_children(&self, name: &VariableName) -> bool {
        self.navigate(name).is_some_and(Node::has_children)
    }

    fn hidden(&self, name: &VariableName) -> bool {
        let mut node = &self.root;
        for field in name.path() {
            let Some(next) = node.field(field) else {
                return false;
            };
            if !next.is_directory() || next.variable.is_some() {
                return true;
            }
            node = next;
        }
        false
    }

    fn get_with_invisible(&self, name: &VariableName) -> Lookup<'_> {
        let mut node = &self.root;
        let mut invisible = false;
        for field in name.path() {
            if !node.is_directory() {
                return Lookup::Invisible;
            }
            invisible = invisible || node.variable.is_some();
            match node.field(field) {
                Some(next) => node = next,
                None if invisible => return Lookup::Invisible,
                None => return Lookup::Missing,
            }
        }
        match &node.variable {
            Some(variable) => Lookup::Found(variable),
            None if invisible => Lookup::Invisible,
            None => Lookup::Missing,
        }
    }

    fn fields(&self, name: &VariableName) -> VariableIter<'_> {
        match self.navigate(name) {
            Some(node) => Box::new(node.children().filter_map(|n| n.variable.as_ref())),
            None => Box::new(std::iter::empty()),
        }
    }

    fn reverse_fields(&self, name: &VariableName) -> VariableIter<'_> {
        match self.navigate(name) {
            Some(node) => Box::new(node.children().rev().filter_map(|n| n.variable.as_ref())),
            None => Box::new(std::iter::empty()),
        }
    }

    fn variables(&self) -> VariableIter<'_> {
        let mut out = vec![];
        self.root.travel(&mut out);
        Box::new(out.into_iter())
    }

    fn all_variables(&self) -> VariableIter<'_> {
        self.variables()
    }

    fn put(&mut self, variable: Variable) -> Result<()> {
        let Some(name) = variable.name.clone() else {
            return Err(Error::UnnamedVariable(self.source.clone()));
        };
        tracing::trace!(source = %self.source, %name, "put variable");
        self.create_dir(&name)
            .put(variable, name.repeatable(), name.last());
        Ok(())
    }

    fn clear(&mut self) {
        self.root = Node::directory();
    }
}
