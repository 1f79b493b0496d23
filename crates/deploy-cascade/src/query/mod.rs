//! Boolean query expressions
//!
//! Used to select environments and hosts: `prod & !legacy`, `web-* : api`, `!(a : b)`.
//!
//! - `&` (and) binds tighter than `:` (or), `!` (not) binds tightest
//! - a term containing `*` is a wildcard pattern, any other term is a literal key
//!
//! Literal keys are matched by a caller supplied matcher so that queries can follow environment or label semantics
//! instead of plain string identity.
mod lexer;
mod parser;

use std::{convert::Infallible, fmt, str::FromStr};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("syntax error in query {query:?} at {fragment:?}: {reason}")]
pub struct SyntaxError {
    pub query: String,
    pub fragment: String,
    pub reason: &'static str,
}

impl SyntaxError {
    fn new(query: &str, fragment: String, reason: &'static str) -> Self {
        Self {
            query: query.to_string(),
            fragment,
            reason,
        }
    }
}

/// `*`-delimited wildcard term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wildcard {
    key: String,
    parts: Vec<String>,
}

impl Wildcard {
    fn new(key: &str) -> Self {
        let key = key.trim().to_string();
        let parts = key
            .split('*')
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();
        Self { key, parts }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Anchored at both ends unless the pattern starts or ends with `*`, parts must occur in order
    pub fn matches(&self, target: &str) -> bool {
        let (Some(first), Some(last)) = (self.parts.first(), self.parts.last()) else {
            return true;
        };
        if !self.key.starts_with('*') && !target.starts_with(first.as_str()) {
            return false;
        }
        if !self.key.ends_with('*') && !target.ends_with(last.as_str()) {
            return false;
        }

        let mut offset = 0;
        for part in &self.parts {
            match find_from(target, part, offset) {
                Some(found) => offset = found + part.len(),
                None => return false,
            }
        }
        true
    }

    /// `true` if every string matched by `other` is matched by this pattern
    fn includes_pattern(&self, other: &Wildcard) -> bool {
        if other.key.starts_with('*') && !self.key.starts_with('*') {
            return false;
        }
        if other.key.ends_with('*') && !self.key.ends_with('*') {
            return false;
        }

        let mut j = 0;
        let mut offset = 0;
        for part in &self.parts {
            let mut found = false;
            while j < other.parts.len() {
                if let Some(n) = find_from(&other.parts[j], part, offset) {
                    found = true;
                    offset = n + part.len();
                    break;
                }
                offset = 0;
                j += 1;
            }
            if !found {
                return false;
            }
        }
        true
    }
}

fn find_from(haystack: &str, needle: &str, offset: usize) -> Option<usize> {
    haystack
        .get(offset..)
        .and_then(|rest| rest.find(needle))
        .map(|n| n + offset)
}

/// Parsed query expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryExpression {
    Or(Box<QueryExpression>, Box<QueryExpression>),
    And(Box<QueryExpression>, Box<QueryExpression>),
    Not(Box<QueryExpression>),
    Simple(String),
    Pattern(Wildcard),
}

impl QueryExpression {
    pub fn parse(query: &str) -> Result<Self, SyntaxError> {
        parser::parse(query)
    }

    fn term(text: &str) -> Self {
        if text.contains('*') {
            QueryExpression::Pattern(Wildcard::new(text))
        } else {
            QueryExpression::Simple(text.trim().to_string())
        }
    }

    /// Match with plain string equality for literal terms
    pub fn matches(&self, target: &str) -> bool {
        self.matches_with(target, &mut |key, target| key == target)
    }

    pub fn matches_with(&self, target: &str, matcher: &mut dyn FnMut(&str, &str) -> bool) -> bool {
        let result: Result<bool, Infallible> =
            self.try_matches_with(target, &mut |key, target| Ok(matcher(key, target)));
        result.unwrap_or_else(|never| match never {})
    }

    /// Match `target`, literal terms are decided by `matcher(term, target)`
    pub fn try_matches_with<E>(
        &self,
        target: &str,
        matcher: &mut dyn FnMut(&str, &str) -> Result<bool, E>,
    ) -> Result<bool, E> {
        Ok(match self {
            QueryExpression::Or(left, right) => {
                left.try_matches_with(target, matcher)? || right.try_matches_with(target, matcher)?
            }
            QueryExpression::And(left, right) => {
                left.try_matches_with(target, matcher)? && right.try_matches_with(target, matcher)?
            }
            QueryExpression::Not(expr) => !expr.try_matches_with(target, matcher)?,
            QueryExpression::Simple(key) => matcher(key, target)?,
            QueryExpression::Pattern(pattern) => pattern.matches(target),
        })
    }

    pub fn includes(&self, other: &QueryExpression) -> bool {
        self.includes_with(other, &mut |key, other| key == other)
    }

    pub fn includes_with(
        &self,
        other: &QueryExpression,
        matcher: &mut dyn FnMut(&str, &str) -> bool,
    ) -> bool {
        let result: Result<bool, Infallible> =
            self.try_includes_with(other, &mut |key, other| Ok(matcher(key, other)));
        result.unwrap_or_else(|never| match never {})
    }

    /// `true` if every target matched by `other` is also matched by this expression
    ///
    /// Decided structurally and conservatively. `matcher(a, b)` answers whether literal term `a` covers literal term
    /// `b`. An expression always includes an equal expression.
    pub fn try_includes_with<E>(
        &self,
        other: &QueryExpression,
        matcher: &mut dyn FnMut(&str, &str) -> Result<bool, E>,
    ) -> Result<bool, E> {
        use QueryExpression::*;

        if self.equals(other) {
            return Ok(true);
        }

        Ok(match self {
            Or(left, right) => match other {
                Or(other_left, other_right) => {
                    self.try_includes_with(other_left, matcher)?
                        && self.try_includes_with(other_right, matcher)?
                }
                _ => {
                    left.try_includes_with(other, matcher)?
                        || right.try_includes_with(other, matcher)?
                }
            },
            And(left, right) => match other {
                // one narrowed operand is enough
                And(other_left, other_right) => {
                    self.try_includes_with(other_left, matcher)?
                        || self.try_includes_with(other_right, matcher)?
                }
                _ => {
                    left.try_includes_with(other, matcher)?
                        && right.try_includes_with(other, matcher)?
                }
            },
            Not(expr) => match other {
                Not(other_expr) => other_expr.try_includes_with(expr, matcher)?,
                _ => false,
            },
            Simple(_) | Pattern(_) => match other {
                Or(other_left, other_right) => {
                    self.try_includes_with(other_left, matcher)?
                        && self.try_includes_with(other_right, matcher)?
                }
                And(other_left, other_right) => {
                    self.try_includes_with(other_left, matcher)?
                        || self.try_includes_with(other_right, matcher)?
                }
                Not(_) => false,
                Simple(other_key) => match self {
                    Simple(key) => matcher(key, other_key)?,
                    Pattern(pattern) => pattern.matches(other_key),
                    _ => false,
                },
                Pattern(other_pattern) => match self {
                    Pattern(pattern) => pattern.includes_pattern(other_pattern),
                    _ => false,
                },
            },
        })
    }

    /// Structural equality, tolerant of operand order
    pub fn equals(&self, other: &QueryExpression) -> bool {
        use QueryExpression::*;

        match (self, other) {
            (Or(left, right), Or(other_left, other_right))
            | (And(left, right), And(other_left, other_right)) => {
                (left.equals(other_left) && right.equals(other_right))
                    || (left.equals(other_right) && right.equals(other_left))
            }
            (Or(left, right) | And(left, right), _) => left.equals(other) && right.equals(other),
            (Not(expr), Not(other_expr)) => expr.equals(other_expr),
            (Not(_) | Simple(_) | Pattern(_), Or(other_left, other_right) | And(other_left, other_right)) => {
                self.equals(other_left) && self.equals(other_right)
            }
            (Simple(key), Simple(other_key)) => key == other_key,
            (Pattern(pattern), Pattern(other_pattern)) => pattern.key == other_pattern.key,
            _ => false,
        }
    }

    fn fmt_grouped(&self, f: &mut fmt::Formatter<'_>, grouped: bool) -> fmt::Result {
        if grouped {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for QueryExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryExpression::Or(left, right) => write!(f, "{left} : {right}"),
            QueryExpression::And(left, right) => {
                left.fmt_grouped(f, matches!(**left, QueryExpression::Or(..)))?;
                f.write_str(" & ")?;
                right.fmt_grouped(f, matches!(**right, QueryExpression::Or(..)))
            }
            QueryExpression::Not(expr) => {
                f.write_str("!")?;
                expr.fmt_grouped(
                    f,
                    matches!(**expr, QueryExpression::Or(..) | QueryExpression::And(..)),
                )
            }
            QueryExpression::Simple(key) => f.write_str(key),
            QueryExpression::Pattern(pattern) => f.write_str(&pattern.key),
        }
    }
}

impl FromStr for QueryExpression {
    type Err = SyntaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueryExpression::parse(s)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn q(query: &str) -> QueryExpression {
        query.parse().unwrap()
    }

    #[test]
    fn wildcard_anchors() {
        assert!(q("web-*").matches("web-01"));
        assert!(q("web-*").matches("web-"));
        assert!(!q("web-*").matches("01-web"));
        assert!(q("*-db").matches("prod-db"));
        assert!(!q("*-db").matches("db-prod"));
        assert!(q("a*c*e").matches("abcde"));
        assert!(!q("a*c*e").matches("aecde-x"));
        assert!(q("*").matches("anything"));
    }

    #[test]
    fn boolean_matching() {
        let query = q("prod & !legacy : local");
        assert!(query.matches("local"));
        assert!(query.matches("prod"));
        assert!(!query.matches("legacy"));

        let mut labels = |key: &str, target: &str| key == "prod" && target.starts_with("prod");
        assert!(q("prod & !prod-legacy").matches_with("prod-eu", &mut labels));
    }

    #[test]
    fn includes_is_reflexive() {
        for query in ["a", "a & b", "a : b & c", "!a", "!(a : b)", "web-*", "(a : b) & (c : d)"] {
            let parsed = q(query);
            assert!(parsed.includes(&parsed), "{query} must include itself");
        }
    }

    #[test]
    fn literal_includes_follows_equality() {
        assert!(q("a").includes(&q("a")));
        assert!(!q("a").includes(&q("b")));
        assert!(!q("b").includes(&q("a")));
    }

    #[test]
    fn structural_includes() {
        assert!(q("a : b").includes(&q("a")));
        assert!(!q("a").includes(&q("a : b")));
        assert!(q("a").includes(&q("a & b")));
        assert!(!q("a & b").includes(&q("a")));
        assert!(q("!a").includes(&q("!(a : b)")));
        assert!(!q("!a").includes(&q("a")));
        assert!(q("web-*").includes(&q("web-01")));
        assert!(q("web-*").includes(&q("web-0*")));
        assert!(!q("web-0*").includes(&q("web-*")));
        assert!(!q("web-*").includes(&q("*-web")));
    }

    #[test]
    fn includes_delegates_literal_containment() {
        let mut belongs = |key: &str, other: &str| other.starts_with(key);
        assert!(q("prod").includes_with(&q("prod.eu"), &mut belongs));
        assert!(!q("prod.eu").includes_with(&q("prod"), &mut belongs));
    }

    #[test]
    fn equality_ignores_operand_order() {
        assert!(q("a & b").equals(&q("b & a")));
        assert!(q("a : (b & c)").equals(&q("c & b : a")));
        assert!(!q("a & b").equals(&q("a : b")));
        assert!(q("a").equals(&q("a & a")));
    }

    #[test]
    fn display_round_trips() {
        assert_eq!(q("!(a:b) & c").to_string(), "!(a : b) & c");
        assert_eq!(q("  x\t&\ty ").to_string(), "x & y");
    }
}
