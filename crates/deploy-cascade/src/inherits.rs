//! Multiple inheritance chains
//!
//! The descending chain of an entity lists its ancestors farthest first and the entity itself last. Every ancestor
//! shows up once, at the position where the depth first walk over the parent lists first completes it.
use crate::error::{Error, Result};
use std::{collections::HashSet, fmt::Display, hash::Hash};

struct Walk<'f, K, F> {
    parents: &'f mut F,
    closed: HashSet<K>,
    path: Vec<K>,
    out: Vec<K>,
}

impl<'f, K, F> Walk<'f, K, F>
where
    K: Clone + Eq + Hash + Display,
    F: FnMut(&K) -> Result<Vec<K>>,
{
    fn new(parents: &'f mut F, start: &K, close_start: bool) -> Self {
        let mut closed = HashSet::new();
        if close_start {
            closed.insert(start.clone());
        }
        Self {
            parents,
            closed,
            path: vec![start.clone()],
            out: vec![],
        }
    }

    fn travel(&mut self, current: &K) -> Result<()> {
        for parent in (self.parents)(current)? {
            if self.path.contains(&parent) {
                let mut cycle: Vec<String> = self.path.iter().map(ToString::to_string).collect();
                cycle.push(parent.to_string());
                return Err(Error::InheritanceCycle(cycle));
            }
            if self.closed.insert(parent.clone()) {
                self.path.push(parent.clone());
                self.travel(&parent)?;
                self.path.pop();
                self.out.push(parent);
            }
        }
        Ok(())
    }
}

/// Ancestors of `start`, farthest first, without `start`
pub fn descending_parents<K, F>(start: &K, mut parents: F) -> Result<Vec<K>>
where
    K: Clone + Eq + Hash + Display,
    F: FnMut(&K) -> Result<Vec<K>>,
{
    let mut walk = Walk::new(&mut parents, start, false);
    walk.travel(start)?;
    Ok(walk.out)
}

/// Ancestors of `start`, farthest first, followed by `start`
pub fn descending<K, F>(start: &K, mut parents: F) -> Result<Vec<K>>
where
    K: Clone + Eq + Hash + Display,
    F: FnMut(&K) -> Result<Vec<K>>,
{
    let mut walk = Walk::new(&mut parents, start, true);
    walk.travel(start)?;
    walk.out.push(start.clone());
    tracing::trace!(%start, chain = walk.out.len(), "descending chain");
    Ok(walk.out)
}

pub fn ascending_parents<K, F>(start: &K, parents: F) -> Result<Vec<K>>
where
    K: Clone + Eq + Hash + Display,
    F: FnMut(&K) -> Result<Vec<K>>,
{
    let mut chain = descending_parents(start, parents)?;
    chain.reverse();
    Ok(chain)
}

pub fn ascending<K, F>(start: &K, parents: F) -> Result<Vec<K>>
where
    K: Clone + Eq + Hash + Display,
    F: FnMut(&K) -> Result<Vec<K>>,
{
    let mut chain = descending(start, parents)?;
    chain.reverse();
    Ok(chain)
}

/// First value produced walking the ascending chain, `start` included
pub fn nearest<K, F, R>(
    start: &K,
    parents: F,
    mut value: impl FnMut(&K) -> Option<R>,
) -> Result<Option<R>>
where
    K: Clone + Eq + Hash + Display,
    F: FnMut(&K) -> Result<Vec<K>>,
{
    Ok(ascending(start, parents)?.iter().find_map(|k| value(k)))
}

/// `true` if `ancestor` is `start` or one of its ancestors
pub fn belongs_to<K, F>(start: &K, parents: F, ancestor: &K) -> Result<bool>
where
    K: Clone + Eq + Hash + Display,
    F: FnMut(&K) -> Result<Vec<K>>,
{
    if start == ancestor {
        return Ok(true);
    }
    Ok(descending(start, parents)?.contains(ancestor))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::RefKind;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    fn parents_of<'a>(
        table: &'a IndexMap<&'static str, Vec<&'static str>>,
    ) -> impl FnMut(&String) -> Result<Vec<String>> + 'a {
        move |name: &String| {
            table
                .get(name.as_str())
                .map(|parents| parents.iter().map(|p| p.to_string()).collect())
                .ok_or_else(|| Error::not_found(RefKind::Environment, name.as_str()))
        }
    }

    fn table(entries: &[(&'static str, &[&'static str])]) -> IndexMap<&'static str, Vec<&'static str>> {
        entries
            .iter()
            .map(|(name, parents)| (*name, parents.to_vec()))
            .collect()
    }

    #[test]
    fn diamond_visits_shared_ancestor_once() {
        let table = table(&[
            ("root", &[]),
            ("prod", &["root"]),
            ("eu", &["root"]),
            ("prod-eu", &["prod", "eu"]),
        ]);

        let chain = descending(&"prod-eu".to_string(), parents_of(&table)).unwrap();
        assert_eq!(chain, ["root", "prod", "eu", "prod-eu"]);

        let chain = ascending_parents(&"prod-eu".to_string(), parents_of(&table)).unwrap();
        assert_eq!(chain, ["eu", "prod", "root"]);
    }

    #[test]
    fn cycles_are_errors() {
        let table = table(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);

        let err = descending(&"a".to_string(), parents_of(&table)).unwrap_err();
        assert_eq!(err.to_string(), "inheritance cycle: a -> b -> c -> a");
    }

    #[test]
    fn missing_parent_is_not_found() {
        let table = table(&[("a", &["ghost"])]);

        let err = descending(&"a".to_string(), parents_of(&table)).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn nearest_prefers_self_then_closest() {
        let table = table(&[("root", &[]), ("mid", &["root"]), ("leaf", &["mid"])]);
        let values: IndexMap<&str, u32> = [("root", 1), ("mid", 2)].into_iter().collect();

        let found = nearest(&"leaf".to_string(), parents_of(&table), |k| {
            values.get(k.as_str()).copied()
        })
        .unwrap();
        assert_eq!(found, Some(2));
        assert!(belongs_to(&"leaf".to_string(), parents_of(&table), &"root".to_string()).unwrap());
        assert!(!belongs_to(&"root".to_string(), parents_of(&table), &"leaf".to_string()).unwrap());
    }
}
