//! Dotted variable addressing
use crate::error::{Error, Result};
use std::fmt;

/// Terminal segment marking an entry appended to a repeatable container
pub const REPEATABLE: &str = "*";

/// Path of a variable, `a.b.c` is stored as `["a", "b", "c"]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableName {
    path: Vec<String>,
}

impl VariableName {
    pub fn parse(name: &str) -> Self {
        Self {
            path: name.split('.').map(str::to_string).collect(),
        }
    }

    pub fn from_path(path: Vec<String>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn first(&self) -> &str {
        self.path.first().map(String::as_str).unwrap_or_default()
    }

    pub fn last(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// Name of a direct child
    ///
    /// Empty segments and the repeatable marker are rejected, use [VariableName::to_repeatable] for the latter.
    pub fn field(&self, field: &str) -> Result<Self> {
        if field.is_empty() || field == REPEATABLE {
            return Err(Error::InvalidFieldName(field.to_string()));
        }
        let mut path = self.path.clone();
        path.push(field.to_string());
        Ok(Self { path })
    }

    pub fn repeatable(&self) -> bool {
        self.last() == REPEATABLE
    }

    pub fn to_repeatable(&self) -> Self {
        let mut path = self.path.clone();
        path.push(REPEATABLE.to_string());
        Self { path }
    }

    /// `true` if `other`'s whole path is a prefix of (or equal to) this path
    pub fn belongs_to(&self, other: &VariableName) -> bool {
        other.path.len() <= self.path.len() && self.path.starts_with(&other.path)
    }
}

impl fmt::Display for VariableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path.join("."))
    }
}

impl From<&str> for VariableName {
    fn from(value: &str) -> Self {
        VariableName::parse(value)
    }
}

impl From<&VariableName> for VariableName {
    fn from(value: &VariableName) -> Self {
        value.clone()
    }
}

impl serde::Serialize for VariableName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for VariableName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(VariableName::parse(&name))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn field_appends_segment() {
        let name = VariableName::parse("db.primary");
        let port = name.field("port").unwrap();

        assert_eq!(port.to_string(), "db.primary.port");
        assert_eq!(port.first(), "db");
        assert_eq!(port.last(), "port");
        assert!(port.belongs_to(&name));
        assert!(name.belongs_to(&name));
        assert!(!name.belongs_to(&port));
    }

    #[test]
    fn field_rejects_repeatable_and_empty() {
        let name = VariableName::parse("hosts");
        assert!(matches!(name.field("*"), Err(Error::InvalidFieldName(_))));
        assert!(matches!(name.field(""), Err(Error::InvalidFieldName(_))));

        let repeated = name.to_repeatable();
        assert!(repeated.repeatable());
        assert_eq!(repeated.to_string(), "hosts.*");
    }

    #[test]
    fn belongs_to_compares_whole_segments() {
        let name = VariableName::parse("ab.c");
        assert!(!name.belongs_to(&VariableName::parse("a")));
        assert!(name.belongs_to(&VariableName::parse("ab")));
    }
}
