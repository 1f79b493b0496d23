//! Directed graph over named nodes
//!
//! Nodes and arcs keep insertion order so traversals and the topological order are deterministic.
use crate::{
    error::{Error, RefKind, Result},
    visit::Visit,
};
use indexmap::IndexMap;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Node reached during a traversal
#[derive(Debug)]
pub struct Step<'g, T, A> {
    pub name: &'g str,
    pub data: Option<&'g T>,
    /// node the step came from, `None` for the starter
    pub from: Option<&'g str>,
    pub direction: Option<Direction>,
    pub arc: Option<&'g A>,
}

#[derive(Debug, Clone)]
struct Node<T> {
    data: Option<T>,
    prev: Vec<String>,
    next: Vec<String>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            data: None,
            prev: vec![],
            next: vec![],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Graph<T, A = ()> {
    nodes: IndexMap<String, Node<T>>,
    /// from -> to -> arc data
    arcs: IndexMap<String, IndexMap<String, A>>,
}

impl<T, A> Default for Graph<T, A> {
    fn default() -> Self {
        Self {
            nodes: IndexMap::new(),
            arcs: IndexMap::new(),
        }
    }
}

impl<T, A> Graph<T, A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node or replace the data of an existing one
    pub fn node(&mut self, name: &str, data: T) -> &mut Self {
        self.nodes.entry(name.to_string()).or_default().data = Some(data);
        self
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.nodes.get(name).and_then(|node| node.data.as_ref())
    }

    pub fn put(&mut self, name: &str, data: T) -> Result<()> {
        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| Error::not_found(RefKind::GraphNode, name))?;
        node.data = Some(data);
        Ok(())
    }

    /// Add an arc, missing endpoints are created without data
    pub fn arc(&mut self, from: &str, to: &str) -> &mut Self {
        let from_node = self.nodes.entry(from.to_string()).or_default();
        if !from_node.next.iter().any(|n| n == to) {
            from_node.next.push(to.to_string());
        }
        let to_node = self.nodes.entry(to.to_string()).or_default();
        if !to_node.prev.iter().any(|n| n == from) {
            to_node.prev.push(from.to_string());
        }
        self
    }

    pub fn arc_with(&mut self, from: &str, to: &str, data: A) -> &mut Self {
        self.arc(from, to);
        self.arcs
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string(), data);
        self
    }

    pub fn get_arc(&self, from: &str, to: &str) -> Option<&A> {
        self.arcs.get(from).and_then(|arcs| arcs.get(to))
    }

    pub fn remove_node(&mut self, name: &str) -> &mut Self {
        if let Some(node) = self.nodes.shift_remove(name) {
            for prev in &node.prev {
                if let Some(prev) = self.nodes.get_mut(prev) {
                    prev.next.retain(|n| n != name);
                }
                if let Some(arcs) = self.arcs.get_mut(prev) {
                    arcs.shift_remove(name);
                }
            }
            for next in &node.next {
                if let Some(next) = self.nodes.get_mut(next) {
                    next.prev.retain(|n| n != name);
                }
            }
            self.arcs.shift_remove(name);
        }
        self
    }

    pub fn remove_arc(&mut self, from: &str, to: &str) -> &mut Self {
        if self.contains_node(from) && self.contains_node(to) {
            if let Some(node) = self.nodes.get_mut(from) {
                node.next.retain(|n| n != to);
            }
            if let Some(node) = self.nodes.get_mut(to) {
                node.prev.retain(|n| n != from);
            }
            if let Some(arcs) = self.arcs.get_mut(from) {
                arcs.shift_remove(to);
            }
        }
        self
    }

    pub fn prev(&self, name: &str) -> Result<&[String]> {
        self.require(name).map(|(_, node)| node.prev.as_slice())
    }

    pub fn next(&self, name: &str) -> Result<&[String]> {
        self.require(name).map(|(_, node)| node.next.as_slice())
    }

    /// Nodes without incoming arcs
    pub fn starters(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.prev.is_empty())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Every node exactly once, each before all of its successors
    ///
    /// Among the nodes without remaining incoming arcs the earliest inserted one goes first.
    #[tracing::instrument(level = "trace", skip_all, fields(nodes = self.nodes.len()))]
    pub fn topology(&self) -> Result<Vec<&str>> {
        let mut incoming: IndexMap<&str, usize> = self
            .nodes
            .iter()
            .map(|(name, node)| (name.as_str(), node.prev.len()))
            .collect();
        let mut sorted = Vec::with_capacity(incoming.len());

        while !incoming.is_empty() {
            let Some((name, _)) = incoming.iter().find(|(_, count)| **count == 0) else {
                let remaining = incoming.keys().map(|name| name.to_string()).collect();
                return Err(Error::Cycle(remaining));
            };
            let name = *name;
            incoming.shift_remove(name);
            for next in &self.nodes[name].next {
                if let Some(count) = incoming.get_mut(next.as_str()) {
                    *count -= 1;
                }
            }
            sorted.push(name);
        }

        Ok(sorted)
    }

    pub fn travel_forward<'g>(
        &'g self,
        starter: &str,
        mut visitor: impl Visit<Step<'g, T, A>>,
    ) -> Result<()> {
        let (starter, _) = self.require(starter)?;
        self.travel(starter, Direction::Forward, &mut HashSet::new(), &mut visitor);
        Ok(())
    }

    pub fn travel_backward<'g>(
        &'g self,
        starter: &str,
        mut visitor: impl Visit<Step<'g, T, A>>,
    ) -> Result<()> {
        let (starter, _) = self.require(starter)?;
        self.travel(starter, Direction::Backward, &mut HashSet::new(), &mut visitor);
        Ok(())
    }

    /// Visit everything reachable from `starter`, and everything that reaches one of those nodes
    ///
    /// Each forward reached node is visited, then the nodes leading to it are walked backwards. A node is visited at
    /// most once per direction. Returning `false` from the visitor for a forward step skips both its successors and
    /// its predecessors.
    pub fn travel_forest<'g>(
        &'g self,
        starter: &str,
        mut visitor: impl Visit<Step<'g, T, A>>,
    ) -> Result<()> {
        let (starter, _) = self.require(starter)?;
        let mut backward_closed = HashSet::new();
        let mut forward = |reached: &Step<'g, T, A>| {
            if !visitor.visit(reached) {
                return false;
            }
            let mut backward = |step: &Step<'g, T, A>| {
                step.name == reached.name || visitor.visit(step)
            };
            self.travel(
                reached.name,
                Direction::Backward,
                &mut backward_closed,
                &mut backward,
            );
            true
        };
        self.travel(starter, Direction::Forward, &mut HashSet::new(), &mut forward);
        Ok(())
    }

    /// explicit stack depth first walk, successors are visited in insertion order
    fn travel<'g>(
        &'g self,
        starter: &'g str,
        direction: Direction,
        closed: &mut HashSet<&'g str>,
        visitor: &mut dyn Visit<Step<'g, T, A>>,
    ) {
        let mut open = vec![Step {
            name: starter,
            data: self.get(starter),
            from: None,
            direction: None,
            arc: None,
        }];

        while let Some(step) = open.pop() {
            if !closed.insert(step.name) {
                continue;
            }
            if !visitor.visit(&step) {
                continue;
            }
            let Some(node) = self.nodes.get(step.name) else {
                continue;
            };
            let neighbours = match direction {
                Direction::Forward => &node.next,
                Direction::Backward => &node.prev,
            };
            for neighbour in neighbours.iter().rev() {
                let arc = match direction {
                    Direction::Forward => self.get_arc(step.name, neighbour),
                    Direction::Backward => self.get_arc(neighbour, step.name),
                };
                open.push(Step {
                    name: neighbour,
                    data: self.get(neighbour),
                    from: Some(step.name),
                    direction: Some(direction),
                    arc,
                });
            }
        }
    }

    fn require(&self, name: &str) -> Result<(&str, &Node<T>)> {
        self.nodes
            .get_key_value(name)
            .map(|(name, node)| (name.as_str(), node))
            .ok_or_else(|| Error::not_found(RefKind::GraphNode, name))
    }
}

impl<T: Clone, A: Clone> Graph<T, A> {
    /// Same nodes with every arc flipped
    pub fn reverse(&self) -> Self {
        let mut reversed = Graph::new();
        for (name, node) in &self.nodes {
            let entry = reversed.nodes.entry(name.clone()).or_default();
            entry.data = node.data.clone();
            for next in &node.next {
                match self.get_arc(name, next) {
                    Some(arc) => reversed.arc_with(next, name, arc.clone()),
                    None => reversed.arc(next, name),
                };
            }
        }
        reversed
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn graph(arcs: &[(&str, &str)]) -> Graph<u32> {
        let mut graph = Graph::new();
        for (from, to) in arcs {
            graph.arc(from, to);
        }
        graph
    }

    #[test]
    fn topology_orders_predecessors_first() {
        let graph = graph(&[("web", "api"), ("web", "all"), ("api", "all"), ("db", "all")]);

        assert_eq!(graph.topology().unwrap(), ["web", "api", "db", "all"]);
    }

    #[test]
    fn topology_reports_cycles() {
        let graph = graph(&[("a", "b"), ("b", "a"), ("c", "a")]);

        let err = graph.topology().unwrap_err();
        assert!(matches!(&err, Error::Cycle(names) if names == &["a", "b"]), "{err:?}");
    }

    #[test]
    fn self_arc_is_a_cycle() {
        assert!(graph(&[("a", "a")]).topology().is_err());
    }

    #[test]
    fn travel_forward_visits_once_and_can_prune() {
        let graph = graph(&[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d"), ("c", "e")]);

        let mut seen = vec![];
        graph
            .travel_forward("a", |step: &Step<u32, ()>| {
                seen.push(step.name.to_string());
                step.name != "c"
            })
            .unwrap();
        assert_eq!(seen, ["a", "b", "d", "c"]);
    }

    #[test]
    fn travel_forest_walks_back_from_reachable_nodes() {
        // x -> y <- z, w is unrelated
        let mut graph = graph(&[("x", "y"), ("z", "y")]);
        graph.node("w", 0);

        let mut seen = vec![];
        graph
            .travel_forest("x", |step: &Step<u32, ()>| {
                seen.push(step.name.to_string());
                true
            })
            .unwrap();
        assert_eq!(seen, ["x", "y", "z"]);
    }

    #[test]
    fn unknown_starter_is_not_found() {
        let graph = graph(&[("a", "b")]);
        let err = graph.travel_backward("nope", |_: &Step<u32, ()>| true).unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                kind: RefKind::GraphNode,
                ..
            }
        ));
    }

    #[test]
    fn arcs_carry_data_and_reverse() {
        let mut graph: Graph<u32, &str> = Graph::new();
        graph.node("a", 1).arc_with("a", "b", "inherits");
        graph.arc("c", "b");

        assert_eq!(graph.get("a"), Some(&1));
        assert_eq!(graph.get("b"), None);
        assert_eq!(graph.get_arc("a", "b"), Some(&"inherits"));
        assert_eq!(graph.prev("b").unwrap(), ["a", "c"]);
        assert_eq!(graph.starters(), ["a", "c"]);

        let reversed = graph.reverse();
        assert_eq!(reversed.get_arc("b", "a"), Some(&"inherits"));
        assert_eq!(reversed.starters(), ["b"]);

        graph.remove_node("b");
        assert_eq!(graph.next("a").unwrap(), Vec::<String>::new());
        assert_eq!(graph.get_arc("a", "b"), None);
    }
}
