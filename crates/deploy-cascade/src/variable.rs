//! Variable records and the closed set of variable kinds
//!
//! [VariableInfo] is the raw record as it is stored and exchanged. [Variable] is the typed form used by the
//! variable tables. Conversion happens once, when a record is put into a table.
use crate::{
    closure::Closure,
    error::{Error, Result},
    name::{VariableName, REPEATABLE},
    table::Variables,
    value::Value,
    visit::{Visit, VisitInfos},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Raw variable record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "crate::util::optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closure: Option<Closure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<Box<VariableInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<Vec<VariableInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<IndexMap<String, VariableInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option: Option<Value>,
}

impl VariableInfo {
    pub fn simple(name: &str, value: impl Into<Value>) -> Self {
        Self {
            name: Some(name.to_string()),
            kind: Some(VariableType::Simple.tag().to_string()),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// Copy without `id` and `name`, the form used when nesting a record inside a wrapper
    pub fn dehydrate(&self) -> Self {
        Self {
            name: None,
            id: None,
            ..self.clone()
        }
    }
}

/// Hands out fresh variable ids
///
/// Seeded from the highest integer prefix (`"12.3"` counts as `12`) of the ids already in use.
#[derive(Debug, Default, Clone)]
pub struct IdAllocator {
    max: u64,
}

impl IdAllocator {
    pub fn seeded<I: VisitInfos + ?Sized>(infos: &I) -> Self {
        let mut allocator = Self::default();
        allocator.observe(infos);
        allocator
    }

    pub fn observe<I: VisitInfos + ?Sized>(&mut self, infos: &I) {
        infos.visit_infos(&mut *self);
    }

    pub fn observe_id(&mut self, id: &str) {
        let prefix = id.split('.').next().unwrap_or_default();
        if let Ok(n) = prefix.trim().parse::<u64>() {
            self.max = self.max.max(n);
        }
    }

    pub fn next_id(&mut self) -> String {
        self.max += 1;
        self.max.to_string()
    }
}

impl Visit<VariableInfo> for IdAllocator {
    fn visit(&mut self, info: &VariableInfo) -> bool {
        if let Some(id) = &info.id {
            self.observe_id(id);
        }
        true
    }
}

/// Type tags with their editor capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableType {
    Abstracted,
    AppendedList,
    Cached,
    CascadeList,
    CascadeMap,
    Closure,
    Encrypted,
    ExpandableList,
    ExpandableMap,
    FilterList,
    FilterMap,
    LazyList,
    LazyMap,
    Map2List,
    SimpleList,
    SimpleMap,
    Simple,
    Lazy,
    TransformList,
    TransformMap,
    Transform,
    UserParameter,
}

impl VariableType {
    pub const ALL: [VariableType; 22] = [
        VariableType::Abstracted,
        VariableType::AppendedList,
        VariableType::Cached,
        VariableType::CascadeList,
        VariableType::CascadeMap,
        VariableType::Closure,
        VariableType::Encrypted,
        VariableType::ExpandableList,
        VariableType::ExpandableMap,
        VariableType::FilterList,
        VariableType::FilterMap,
        VariableType::LazyList,
        VariableType::LazyMap,
        VariableType::Map2List,
        VariableType::SimpleList,
        VariableType::SimpleMap,
        VariableType::Simple,
        VariableType::Lazy,
        VariableType::TransformList,
        VariableType::TransformMap,
        VariableType::Transform,
        VariableType::UserParameter,
    ];

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    pub fn tag(self) -> &'static str {
        match self {
            VariableType::Abstracted => "abstracted",
            VariableType::AppendedList => "appendedList",
            VariableType::Cached => "cached",
            VariableType::CascadeList => "cascadeList",
            VariableType::CascadeMap => "cascadeMap",
            VariableType::Closure => "closure",
            VariableType::Encrypted => "encrypted",
            VariableType::ExpandableList => "expandableList",
            VariableType::ExpandableMap => "expandableMap",
            VariableType::FilterList => "filterList",
            VariableType::FilterMap => "filterMap",
            VariableType::LazyList => "lazyList",
            VariableType::LazyMap => "lazyMap",
            VariableType::Map2List => "map2list",
            VariableType::SimpleList => "simpleList",
            VariableType::SimpleMap => "simpleMap",
            VariableType::Simple => "simple",
            VariableType::Lazy => "lazy",
            VariableType::TransformList => "transformList",
            VariableType::TransformMap => "transformMap",
            VariableType::Transform => "transform",
            VariableType::UserParameter => "userParameter",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            VariableType::Abstracted => "abstracted",
            VariableType::AppendedList => "appended list variable",
            VariableType::Cached => "cached variable",
            VariableType::CascadeList => "cascade list variable",
            VariableType::CascadeMap => "cascade map variable",
            VariableType::Closure => "closure",
            VariableType::Encrypted => "encrypted variable",
            VariableType::ExpandableList => "expandable list variable",
            VariableType::ExpandableMap => "expandable map variable",
            VariableType::FilterList => "filter list variable",
            VariableType::FilterMap => "filter map variable",
            VariableType::LazyList => "lazy list variable",
            VariableType::LazyMap => "lazy map variable",
            VariableType::Map2List => "map to list variable",
            VariableType::SimpleList => "simple list variable",
            VariableType::SimpleMap => "simple map variable",
            VariableType::Simple => "simple variable",
            VariableType::Lazy => "lazy variable",
            VariableType::TransformList => "transform list variable",
            VariableType::TransformMap => "transform map variable",
            VariableType::Transform => "transform variable",
            VariableType::UserParameter => "user parameter variable",
        }
    }

    pub fn is_list(self) -> bool {
        matches!(
            self,
            VariableType::SimpleList
                | VariableType::CascadeList
                | VariableType::FilterList
                | VariableType::LazyList
                | VariableType::TransformList
                | VariableType::Map2List
        )
    }

    pub fn is_map(self) -> bool {
        matches!(
            self,
            VariableType::SimpleMap
                | VariableType::CascadeMap
                | VariableType::FilterMap
                | VariableType::LazyMap
                | VariableType::TransformMap
        )
    }

    /// Wrapper types nest exactly one inner variable
    pub fn is_wrapper(self) -> bool {
        matches!(
            self,
            VariableType::AppendedList
                | VariableType::Cached
                | VariableType::Encrypted
                | VariableType::ExpandableList
                | VariableType::ExpandableMap
                | VariableType::FilterList
                | VariableType::FilterMap
                | VariableType::LazyList
                | VariableType::LazyMap
                | VariableType::Map2List
                | VariableType::Transform
                | VariableType::TransformList
                | VariableType::TransformMap
        )
    }

    fn wraps_with_closure(self) -> bool {
        matches!(
            self,
            VariableType::Transform
                | VariableType::FilterList
                | VariableType::FilterMap
                | VariableType::TransformList
                | VariableType::TransformMap
        )
    }

    /// Structural eligibility of `candidate` for this wrapper type
    pub fn can_wrap(self, candidate: &Variable) -> bool {
        let candidate = candidate.variable_type();
        match self {
            VariableType::Encrypted => candidate == VariableType::Simple,
            VariableType::Cached
            | VariableType::Transform
            | VariableType::AppendedList
            | VariableType::ExpandableList
            | VariableType::ExpandableMap => true,
            VariableType::FilterList | VariableType::TransformList => candidate.is_list(),
            VariableType::LazyList | VariableType::LazyMap => candidate == VariableType::Lazy,
            VariableType::FilterMap | VariableType::TransformMap | VariableType::Map2List => {
                candidate.is_map()
            }
            _ => false,
        }
    }

    /// Record of this wrapper around `candidate`, taking over its id and name
    pub fn wrap(self, candidate: &Variable) -> Result<VariableInfo> {
        if !self.can_wrap(candidate) {
            return Err(Error::IneligibleWrap {
                wrapper: self.tag(),
                candidate: candidate.variable_type().tag(),
            });
        }
        Ok(VariableInfo {
            id: candidate.id.clone(),
            name: candidate.name.as_ref().map(ToString::to_string),
            kind: Some(self.tag().to_string()),
            variable: Some(Box::new(candidate.to_info().dehydrate())),
            closure: self.wraps_with_closure().then(Closure::default),
            ..Default::default()
        })
    }

    /// Blank record for editors, `None` for types that can only be created by wrapping
    pub fn create_empty(self, name: Option<&str>) -> Option<VariableInfo> {
        let blank = VariableInfo {
            name: name.map(str::to_string),
            kind: Some(self.tag().to_string()),
            ..Default::default()
        };
        let info = match self {
            VariableType::Abstracted => blank,
            VariableType::Closure | VariableType::Lazy => VariableInfo {
                closure: Some(Closure::default()),
                ..blank
            },
            VariableType::Simple => VariableInfo {
                value: Some(Value::String(String::new())),
                ..blank
            },
            VariableType::UserParameter => VariableInfo {
                variable: VariableType::Simple.create_empty(None).map(Box::new),
                ..blank
            },
            VariableType::CascadeList => VariableInfo {
                list: Some(vec![]),
                ..blank
            },
            VariableType::CascadeMap => VariableInfo {
                map: Some(IndexMap::new()),
                ..blank
            },
            _ => return None,
        };
        Some(info)
    }
}

/// Typed payload of a [Variable]
#[derive(Debug, Clone, PartialEq)]
pub enum VariableKind {
    Simple {
        value: Value,
        choices: Option<Vec<Value>>,
    },
    Abstracted,
    Closure(Closure),
    Lazy(Closure),
    Encrypted(Box<Variable>),
    Cached(Box<Variable>),
    Transform {
        inner: Box<Variable>,
        closure: Closure,
    },
    AppendedList(Box<Variable>),
    ExpandableList(Box<Variable>),
    ExpandableMap(Box<Variable>),
    SimpleList(Vec<Variable>),
    SimpleMap(IndexMap<String, Variable>),
    CascadeList(Vec<Variable>),
    CascadeMap(IndexMap<String, Variable>),
    FilterList {
        inner: Box<Variable>,
        closure: Closure,
    },
    FilterMap {
        inner: Box<Variable>,
        closure: Closure,
    },
    TransformList {
        inner: Box<Variable>,
        closure: Closure,
    },
    TransformMap {
        inner: Box<Variable>,
        closure: Closure,
    },
    LazyList(Box<Variable>),
    LazyMap(Box<Variable>),
    Map2List(Box<Variable>),
    UserParameter {
        inner: Box<Variable>,
        option: Value,
    },
}

/// Entry of a list variable as seen from a variable table
#[derive(Debug, Clone, PartialEq)]
pub struct RawListEntry {
    pub variable: Variable,
    /// inherited from the table instead of declared by the list itself
    pub cascaded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawMapEntry {
    pub key: String,
    pub variable: Variable,
    pub cascaded: bool,
}

/// A typed variable
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub id: Option<String>,
    pub name: Option<VariableName>,
    pub kind: VariableKind,
}

impl Variable {
    /// Plain value without a record, stored as a simple variable
    pub fn literal(value: impl Into<Value>) -> Self {
        Self {
            id: None,
            name: None,
            kind: VariableKind::Simple {
                value: value.into(),
                choices: None,
            },
        }
    }

    pub fn from_info(info: &VariableInfo) -> Result<Self> {
        let variable_type = info
            .kind
            .as_deref()
            .and_then(VariableType::from_tag)
            .unwrap_or(VariableType::Simple);

        let inner = || -> Result<Box<Variable>> {
            let inner = info.variable.as_deref().ok_or_else(|| Error::MalformedVariable {
                kind: variable_type.tag().to_string(),
                reason: "missing inner variable".to_string(),
            })?;
            Ok(Box::new(Variable::from_info(inner)?))
        };
        let closure = || info.closure.clone().unwrap_or_default();
        let list = || -> Result<Vec<Variable>> {
            info.list
                .iter()
                .flatten()
                .map(Variable::from_info)
                .collect()
        };
        let map = || -> Result<IndexMap<String, Variable>> {
            info.map
                .iter()
                .flatten()
                .map(|(key, info)| Ok((key.clone(), Variable::from_info(info)?)))
                .collect()
        };

        let kind = match variable_type {
            VariableType::Simple => VariableKind::Simple {
                value: info.value.clone().unwrap_or_default(),
                choices: info.choices.clone(),
            },
            VariableType::Abstracted => VariableKind::Abstracted,
            VariableType::Closure => VariableKind::Closure(closure()),
            VariableType::Lazy => VariableKind::Lazy(closure()),
            VariableType::Encrypted => VariableKind::Encrypted(inner()?),
            VariableType::Cached => VariableKind::Cached(inner()?),
            VariableType::Transform => VariableKind::Transform {
                inner: inner()?,
                closure: closure(),
            },
            VariableType::AppendedList => VariableKind::AppendedList(inner()?),
            VariableType::ExpandableList => VariableKind::ExpandableList(inner()?),
            VariableType::ExpandableMap => VariableKind::ExpandableMap(inner()?),
            VariableType::SimpleList => VariableKind::SimpleList(list()?),
            VariableType::SimpleMap => VariableKind::SimpleMap(map()?),
            VariableType::CascadeList => VariableKind::CascadeList(list()?),
            VariableType::CascadeMap => VariableKind::CascadeMap(map()?),
            VariableType::FilterList => VariableKind::FilterList {
                inner: inner()?,
                closure: closure(),
            },
            VariableType::FilterMap => VariableKind::FilterMap {
                inner: inner()?,
                closure: closure(),
            },
            VariableType::TransformList => VariableKind::TransformList {
                inner: inner()?,
                closure: closure(),
            },
            VariableType::TransformMap => VariableKind::TransformMap {
                inner: inner()?,
                closure: closure(),
            },
            VariableType::LazyList => VariableKind::LazyList(inner()?),
            VariableType::LazyMap => VariableKind::LazyMap(inner()?),
            VariableType::Map2List => VariableKind::Map2List(inner()?),
            VariableType::UserParameter => VariableKind::UserParameter {
                inner: inner()?,
                option: info.option.clone().unwrap_or_default(),
            },
        };

        Ok(Self {
            id: info.id.clone(),
            name: info.name.as_deref().map(VariableName::parse),
            kind,
        })
    }

    pub fn variable_type(&self) -> VariableType {
        match &self.kind {
            VariableKind::Simple { .. } => VariableType::Simple,
            VariableKind::Abstracted => VariableType::Abstracted,
            VariableKind::Closure(_) => VariableType::Closure,
            VariableKind::Lazy(_) => VariableType::Lazy,
            VariableKind::Encrypted(_) => VariableType::Encrypted,
            VariableKind::Cached(_) => VariableType::Cached,
            VariableKind::Transform { .. } => VariableType::Transform,
            VariableKind::AppendedList(_) => VariableType::AppendedList,
            VariableKind::ExpandableList(_) => VariableType::ExpandableList,
            VariableKind::ExpandableMap(_) => VariableType::ExpandableMap,
            VariableKind::SimpleList(_) => VariableType::SimpleList,
            VariableKind::SimpleMap(_) => VariableType::SimpleMap,
            VariableKind::CascadeList(_) => VariableType::CascadeList,
            VariableKind::CascadeMap(_) => VariableType::CascadeMap,
            VariableKind::FilterList { .. } => VariableType::FilterList,
            VariableKind::FilterMap { .. } => VariableType::FilterMap,
            VariableKind::TransformList { .. } => VariableType::TransformList,
            VariableKind::TransformMap { .. } => VariableType::TransformMap,
            VariableKind::LazyList(_) => VariableType::LazyList,
            VariableKind::LazyMap(_) => VariableType::LazyMap,
            VariableKind::Map2List(_) => VariableType::Map2List,
            VariableKind::UserParameter { .. } => VariableType::UserParameter,
        }
    }

    pub fn name(&self) -> Option<&VariableName> {
        self.name.as_ref()
    }

    pub fn with_name(self, name: VariableName) -> Self {
        Self {
            name: Some(name),
            ..self
        }
    }

    pub fn with_id(self, id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..self
        }
    }

    pub fn dehydrate(self) -> Self {
        Self {
            id: None,
            name: None,
            ..self
        }
    }

    /// Literal value of a simple variable
    pub fn value(&self) -> Option<&Value> {
        match &self.kind {
            VariableKind::Simple { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn closure(&self) -> Option<&Closure> {
        match &self.kind {
            VariableKind::Closure(closure)
            | VariableKind::Lazy(closure)
            | VariableKind::Transform { closure, .. }
            | VariableKind::FilterList { closure, .. }
            | VariableKind::FilterMap { closure, .. }
            | VariableKind::TransformList { closure, .. }
            | VariableKind::TransformMap { closure, .. } => Some(closure),
            _ => None,
        }
    }

    /// The nested variable of a wrapper
    pub fn inner(&self) -> Option<&Variable> {
        match &self.kind {
            VariableKind::Encrypted(inner)
            | VariableKind::Cached(inner)
            | VariableKind::AppendedList(inner)
            | VariableKind::ExpandableList(inner)
            | VariableKind::ExpandableMap(inner)
            | VariableKind::LazyList(inner)
            | VariableKind::LazyMap(inner)
            | VariableKind::Map2List(inner)
            | VariableKind::Transform { inner, .. }
            | VariableKind::FilterList { inner, .. }
            | VariableKind::FilterMap { inner, .. }
            | VariableKind::TransformList { inner, .. }
            | VariableKind::TransformMap { inner, .. }
            | VariableKind::UserParameter { inner, .. } => Some(inner),
            _ => None,
        }
    }

    pub fn to_info(&self) -> VariableInfo {
        let mut info = VariableInfo {
            id: self.id.clone(),
            name: self.name.as_ref().map(ToString::to_string),
            kind: Some(self.variable_type().tag().to_string()),
            closure: self.closure().cloned(),
            variable: self.inner().map(|inner| Box::new(inner.to_info())),
            ..Default::default()
        };
        match &self.kind {
            VariableKind::Simple { value, choices } => {
                info.value = Some(value.clone());
                info.choices = choices.clone();
            }
            VariableKind::SimpleList(list) | VariableKind::CascadeList(list) => {
                info.list = Some(list.iter().map(Variable::to_info).collect());
            }
            VariableKind::SimpleMap(map) | VariableKind::CascadeMap(map) => {
                info.map = Some(
                    map.iter()
                        .map(|(key, variable)| (key.clone(), variable.to_info()))
                        .collect(),
                );
            }
            VariableKind::UserParameter { option, .. } => {
                info.option = Some(option.clone());
            }
            _ => {}
        }
        info
    }

    fn required_name(&self) -> Result<&VariableName> {
        self.name
            .as_ref()
            .ok_or_else(|| Error::MalformedVariable {
                kind: self.variable_type().tag().to_string(),
                reason: "a container must be named to be enumerated".to_string(),
            })
    }

    /// Entries of a list, as visible from `scope`
    ///
    /// Own entries of a cascade list are replaced by a variable of the same address in `scope`. Appended and
    /// expandable list fields declared in `scope` are added after the own entries.
    pub fn raw_list(&self, scope: &dyn Variables) -> Result<Vec<RawListEntry>> {
        match &self.kind {
            VariableKind::SimpleList(list) => Ok(list
                .iter()
                .map(|variable| RawListEntry {
                    variable: variable.clone(),
                    cascaded: false,
                })
                .collect()),
            VariableKind::CascadeList(list) => {
                let name = self.required_name()?;
                let mut entries: Vec<RawListEntry> = vec![];
                let mut append = |variable: &Variable, cascaded: bool| -> Result<()> {
                    let address = name.field(&entries.len().to_string())?;
                    let entry = match scope.get(&address) {
                        Some(found) => RawListEntry {
                            variable: found.clone(),
                            cascaded: true,
                        },
                        None => RawListEntry {
                            variable: variable.clone().with_name(address),
                            cascaded,
                        },
                    };
                    entries.push(entry);
                    Ok(())
                };

                for variable in list {
                    append(variable, false)?;
                }
                for variable in scope.fields(name) {
                    if matches!(
                        variable.kind,
                        VariableKind::AppendedList(_) | VariableKind::ExpandableList(_)
                    ) {
                        append(variable, true)?;
                    }
                }
                Ok(entries)
            }
            _ => Err(Error::MalformedVariable {
                kind: self.variable_type().tag().to_string(),
                reason: "not an enumerable list".to_string(),
            }),
        }
    }

    /// Entries of a map, as visible from `scope`
    ///
    /// For a cascade map the fields found in `scope` come first (innermost first), followed by the own entries. An own
    /// key shadows the same key found in `scope`, repeatable entries are never deduplicated.
    pub fn raw_map(&self, scope: &dyn Variables) -> Result<Vec<RawMapEntry>> {
        match &self.kind {
            VariableKind::SimpleMap(map) => Ok(map
                .iter()
                .map(|(key, variable)| RawMapEntry {
                    key: key.clone(),
                    variable: variable.clone(),
                    cascaded: false,
                })
                .collect()),
            VariableKind::CascadeMap(map) => {
                let name = self.required_name()?;
                let mut entries: Vec<RawMapEntry> = vec![];
                let child = |key: &str| -> Result<VariableName> {
                    if key == REPEATABLE {
                        Ok(name.to_repeatable())
                    } else {
                        name.field(key)
                    }
                };

                for variable in scope.reverse_fields(name) {
                    let Some(key) = variable.name.as_ref().map(|n| n.last().to_string()) else {
                        continue;
                    };
                    if key != REPEATABLE
                        && (map.contains_key(&key) || entries.iter().any(|e| e.key == key))
                    {
                        continue;
                    }
                    entries.push(RawMapEntry {
                        variable: variable.clone().with_name(child(&key)?),
                        key,
                        cascaded: true,
                    });
                }
                for (key, variable) in map {
                    entries.push(RawMapEntry {
                        key: key.clone(),
                        variable: variable.clone().with_name(child(key)?),
                        cascaded: false,
                    });
                }
                Ok(entries)
            }
            _ => Err(Error::MalformedVariable {
                kind: self.variable_type().tag().to_string(),
                reason: "not an enumerable map".to_string(),
            }),
        }
    }
}

impl TryFrom<&VariableInfo> for Variable {
    type Error = Error;

    fn try_from(info: &VariableInfo) -> Result<Self> {
        Variable::from_info(info)
    }
}

impl From<Value> for Variable {
    fn from(value: Value) -> Self {
        Variable::literal(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::table::SimpleVariables;
    use pretty_assertions::assert_eq;

    fn info(yaml: &str) -> VariableInfo {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn unknown_or_missing_tag_is_simple() {
        let variable = Variable::from_info(&info("{name: a, id: 1, type: mystery, value: 3}")).unwrap();
        assert_eq!(variable.variable_type(), VariableType::Simple);
        assert_eq!(variable.value(), Some(&Value::Integer(3)));

        let variable = Variable::from_info(&info("{name: b, value: text}")).unwrap();
        assert_eq!(variable.variable_type(), VariableType::Simple);
        assert_eq!(variable.name.unwrap().to_string(), "b");
    }

    #[test]
    fn wrapper_without_inner_is_malformed() {
        let err = Variable::from_info(&info("{name: a, type: encrypted}")).unwrap_err();
        assert!(matches!(err, Error::MalformedVariable { .. }), "{err:?}");
    }

    #[test]
    fn encrypted_only_wraps_simple() {
        let simple = Variable::from_info(&info("{name: pw, id: '7', value: hunter2}")).unwrap();
        let lazy = Variable::from_info(&info("{name: pw, id: '8', type: lazy, closure: {groovy: '{ 1 }'}}")).unwrap();

        assert!(VariableType::Encrypted.can_wrap(&simple));
        assert!(!VariableType::Encrypted.can_wrap(&lazy));
        assert!(VariableType::LazyList.can_wrap(&lazy));
        assert!(VariableType::Cached.can_wrap(&lazy));

        let wrapped = VariableType::Encrypted.wrap(&simple).unwrap();
        assert_eq!(wrapped.id.as_deref(), Some("7"));
        assert_eq!(wrapped.name.as_deref(), Some("pw"));
        assert_eq!(wrapped.kind.as_deref(), Some("encrypted"));
        let inner = wrapped.variable.unwrap();
        assert_eq!(inner.id, None);
        assert_eq!(inner.name, None);
        assert_eq!(inner.value, Some(Value::from("hunter2")));

        let err = VariableType::Encrypted.wrap(&lazy).unwrap_err();
        assert!(matches!(
            err,
            Error::IneligibleWrap {
                wrapper: "encrypted",
                candidate: "lazy"
            }
        ));
    }

    #[test]
    fn filter_wraps_lists_with_a_closure() {
        let list = Variable::from_info(&info("{name: l, type: simpleList, list: [{value: 1}]}")).unwrap();
        let wrapped = VariableType::FilterList.wrap(&list).unwrap();
        assert_eq!(wrapped.closure, Some(Closure::default()));
        assert!(!VariableType::FilterMap.can_wrap(&list));

        let variable = Variable::from_info(&wrapped).unwrap();
        assert_eq!(variable.variable_type(), VariableType::FilterList);
        assert_eq!(variable.inner().map(Variable::variable_type), Some(VariableType::SimpleList));
    }

    #[test]
    fn create_empty_only_for_creatable_types() {
        let empty = VariableType::CascadeMap.create_empty(Some("m")).unwrap();
        assert_eq!(empty.map, Some(IndexMap::new()));
        assert_eq!(empty.name.as_deref(), Some("m"));

        let empty = VariableType::Simple.create_empty(None).unwrap();
        assert_eq!(empty.value, Some(Value::String(String::new())));

        assert_eq!(VariableType::Encrypted.create_empty(None), None);
    }

    #[test]
    fn to_info_keeps_payload() {
        let original = info(
            "{name: m, id: '3', type: cascadeMap, map: {a: {value: 1}, b: {type: lazy, closure: {groovy: '{ x }'}}}}",
        );
        let variable = Variable::from_info(&original).unwrap();
        let back = variable.to_info();
        assert_eq!(back.map.as_ref().map(|m| m.len()), Some(2));
        assert_eq!(Variable::from_info(&back).unwrap(), variable);
    }

    #[test]
    fn id_allocator_uses_integer_prefix_of_nested_ids() {
        let infos = vec![
            info("{id: '4.2', value: 1}"),
            info("{id: 2, type: cached, variable: {id: '9.1', value: 1}}"),
            info("{value: no id}"),
        ];
        let mut ids = IdAllocator::seeded(&infos);
        assert_eq!(ids.next_id(), "10");
        assert_eq!(ids.next_id(), "11");
    }

    #[test]
    fn cascade_list_appends_scope_modifiers() {
        let vars = SimpleVariables::from_infos(
            "test",
            &[
                info("{name: ports, type: cascadeList, list: [{value: 80}, {value: 443}]}"),
                info("{name: ports.*, type: appendedList, variable: {value: 8080}}"),
                info("{name: ports.*, value: ignored}"),
            ],
        )
        .unwrap();

        let list = vars.get(&"ports".into()).unwrap();
        let entries = list.raw_list(&vars).unwrap();

        assert_eq!(
            entries.iter().map(|e| e.cascaded).collect::<Vec<_>>(),
            [false, false, true]
        );
        assert_eq!(
            entries
                .iter()
                .map(|e| e.variable.name.as_ref().unwrap().to_string())
                .collect::<Vec<_>>(),
            ["ports.0", "ports.1", "ports.2"]
        );
        assert_eq!(entries[2].variable.variable_type(), VariableType::AppendedList);
    }

    #[test]
    fn cascade_map_own_keys_shadow_scope() {
        let vars = SimpleVariables::from_infos(
            "test",
            &[
                info("{name: env, type: cascadeMap, map: {a: {value: own}}}"),
                info("{name: env.b, value: outer-b}"),
                info("{name: env.a, value: outer-a}"),
                info("{name: env.*, value: extra}"),
            ],
        )
        .unwrap();

        let map = vars.get(&"env".into()).unwrap();
        let entries = map.raw_map(&vars).unwrap();

        let rendered: Vec<_> = entries
            .iter()
            .map(|e| {
                (
                    e.key.as_str(),
                    e.variable.value().map(ToString::to_string).unwrap_or_default(),
                    e.cascaded,
                )
            })
            .collect();
        assert_eq!(
            rendered,
            [
                ("*", "extra".to_string(), true),
                ("b", "outer-b".to_string(), true),
                ("a", "own".to_string(), false),
            ]
        );
        assert_eq!(entries[0].variable.name.as_ref().unwrap().to_string(), "env.*");
    }
}
