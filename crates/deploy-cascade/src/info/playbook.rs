use crate::{
    closure::Closure,
    error::{Error, RefKind, Result},
    inherits,
    table::SimpleVariables,
    util,
    value::Value,
    variable::VariableInfo,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// Parent token naming the play of the same name in the next less specific playbook
pub const INHERITS_SUPER: &str = "@super";

pub type Parameters = IndexMap<String, ParameterValue>;

/// Value bound to a playbook parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Value(Value),
    /// stands for every value the spec allows, used when resolving a playbook with its own specs
    Spec(PlaybookParameterSpec),
}

impl From<Value> for ParameterValue {
    fn from(value: Value) -> Self {
        ParameterValue::Value(value)
    }
}

pub fn parameters(values: &IndexMap<String, Value>) -> Parameters {
    values
        .iter()
        .map(|(name, value)| (name.clone(), ParameterValue::Value(value.clone())))
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybookInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub parameter_specs: IndexMap<String, PlaybookParameterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_in_env: Option<String>,
    #[serde(default, rename = "vars")]
    pub var_infos: Vec<VariableInfo>,
    #[serde(default)]
    pub plays: IndexMap<String, PlayInfo>,
    #[serde(default)]
    pub scenes: IndexMap<String, PlaybookScene>,
    #[serde(skip)]
    pub vars: Arc<SimpleVariables>,
}

impl PlaybookInfo {
    pub(crate) fn prepare(mut self, key: &str) -> Result<Self> {
        util::fill_name(&mut self.name, key);
        for (name, spec) in self.parameter_specs.iter_mut() {
            util::fill_name(&mut spec.name, name);
        }
        for (name, scene) in self.scenes.iter_mut() {
            util::fill_name(&mut scene.name, name);
        }
        self.plays = std::mem::take(&mut self.plays)
            .into_iter()
            .map(|(name, play)| -> Result<(String, PlayInfo)> {
                let play = play.prepare(&name)?;
                Ok((name, play))
            })
            .collect::<Result<_>>()?;
        self.vars = Arc::new(SimpleVariables::from_infos(
            format!("playbook {}", self.name),
            &self.var_infos,
        )?);
        Ok(self)
    }

    pub fn match_parameters(&self, parameters: &Parameters) -> bool {
        self.parameter_specs
            .values()
            .all(|spec| spec.matches(parameters))
    }

    /// Descending chain, parents whose specs reject `parameters` are skipped
    pub fn descending(
        &self,
        parameters: &Parameters,
        infos: &IndexMap<String, Arc<PlaybookInfo>>,
    ) -> Result<Vec<String>> {
        inherits::descending(&self.name, |name: &String| {
            let mut parents = vec![];
            for parent in &playbook_info(infos, name)?.parents {
                if playbook_info(infos, parent)?.match_parameters(parameters) {
                    parents.push(parent.clone());
                }
            }
            Ok(parents)
        })
    }
}

pub(crate) fn playbook_info<'a>(
    infos: &'a IndexMap<String, Arc<PlaybookInfo>>,
    name: &str,
) -> Result<&'a Arc<PlaybookInfo>> {
    infos
        .get(name)
        .ok_or_else(|| Error::not_found(RefKind::Playbook, name))
}

/// Allowed values of a playbook parameter, `None` allows anything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybookParameterSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<Value>>,
}

impl PlaybookParameterSpec {
    pub fn new(name: impl Into<String>, allowed_values: Option<Vec<Value>>) -> Self {
        Self {
            name: name.into(),
            allowed_values,
        }
    }

    pub fn intersect(&self, that: &PlaybookParameterSpec) -> Result<Self> {
        if self.name != that.name {
            return Err(Error::IllegalStatus(format!(
                "parameter specs {} and {} have different names and can not be intersected",
                self.name, that.name
            )));
        }
        let allowed_values = match (&self.allowed_values, &that.allowed_values) {
            (None, other) | (other, None) => other.clone(),
            (Some(mine), Some(theirs)) => Some(
                mine.iter()
                    .filter(|value| theirs.contains(value))
                    .cloned()
                    .collect(),
            ),
        };
        Ok(Self::new(self.name.clone(), allowed_values))
    }

    /// Same name and same allowed values in any order
    pub fn equals(&self, that: &PlaybookParameterSpec) -> bool {
        self.name == that.name
            && match (&self.allowed_values, &that.allowed_values) {
                (None, None) => true,
                (Some(mine), Some(theirs)) => {
                    mine.len() == theirs.len() && mine.iter().all(|value| theirs.contains(value))
                }
                _ => false,
            }
    }

    pub fn matches(&self, parameters: &Parameters) -> bool {
        let Some(value) = parameters.get(&self.name) else {
            return false;
        };
        let Some(allowed) = &self.allowed_values else {
            return true;
        };
        match value {
            // everything the other spec allows must be allowed here
            ParameterValue::Spec(spec) => spec
                .allowed_values
                .as_ref()
                .is_some_and(|values| !values.is_empty() && values.iter().all(|v| allowed.contains(v))),
            ParameterValue::Value(value) => allowed.contains(value),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybookScene {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub plays: Vec<String>,
    #[serde(default)]
    pub tasks_to_skip: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "override")]
    pub overriding: bool,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default, rename = "vars")]
    pub var_infos: Vec<VariableInfo>,
    #[serde(default)]
    pub tasks: Vec<TaskInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Closure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included_only_in_env: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded_in_env: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always_run: Option<bool>,
    #[serde(default)]
    pub resources_required: Vec<String>,
    #[serde(skip)]
    pub vars: Arc<SimpleVariables>,
}

impl PlayInfo {
    fn prepare(mut self, key: &str) -> Result<Self> {
        util::fill_name(&mut self.name, key);
        self.vars = Arc::new(SimpleVariables::from_infos(
            format!("play {}", self.name),
            &self.var_infos,
        )?);
        Ok(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    /// `/` separated, a nested task names its parent tasks first
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closure: Option<Closure>,
    #[serde(default)]
    pub when: Vec<Closure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included_only_in_env: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded_in_env: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub resources_required: Vec<String>,
    #[serde(default)]
    pub include_retired_hosts: bool,
    #[serde(default)]
    pub only_retired_hosts: bool,
    #[serde(default)]
    pub reverse: bool,
}

/// A play addressed by the playbook declaring it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlayRef {
    pub playbook: String,
    pub play: String,
}

impl fmt::Display for PlayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.playbook, self.play)
    }
}

impl PlayRef {
    pub fn new(playbook: impl Into<String>, play: impl Into<String>) -> Self {
        Self {
            playbook: playbook.into(),
            play: play.into(),
        }
    }

    pub fn resolve<'a>(&self, ascending: &'a [Arc<PlaybookInfo>]) -> Result<&'a PlayInfo> {
        ascending
            .iter()
            .find(|playbook| playbook.name == self.playbook)
            .and_then(|playbook| playbook.plays.get(&self.play))
            .ok_or_else(|| Error::not_found(RefKind::Play, self.to_string()))
    }

    /// Play of the same name in the first playbook after the declaring one
    pub fn find_super(&self, ascending: &[Arc<PlaybookInfo>]) -> Result<Option<PlayRef>> {
        let mut found = false;
        for playbook in ascending {
            if !playbook.plays.contains_key(&self.play) {
                continue;
            }
            if playbook.name == self.playbook {
                if found {
                    return Err(Error::DuplicatedPlay(self.play.clone()));
                }
                found = true;
            } else if found {
                return Ok(Some(PlayRef::new(&playbook.name, &self.play)));
            }
        }
        Ok(None)
    }

    /// Most specific declaration of `play`
    pub fn find(play: &str, ascending: &[Arc<PlaybookInfo>]) -> Option<PlayRef> {
        ascending
            .iter()
            .find(|playbook| playbook.plays.contains_key(play))
            .map(|playbook| PlayRef::new(&playbook.name, play))
    }

    /// Plays this one inherits from, farthest first, followed by this one
    pub fn descending(&self, ascending: &[Arc<PlaybookInfo>]) -> Result<Vec<PlayRef>> {
        inherits::descending(self, |current: &PlayRef| {
            let mut parents = vec![];
            for parent in &current.resolve(ascending)?.parents {
                let found = if parent == INHERITS_SUPER {
                    current.find_super(ascending)?
                } else {
                    PlayRef::find(parent, ascending)
                };
                let found = found.ok_or_else(|| {
                    Error::not_found(RefKind::Play, format!("{parent} inherited by {current}"))
                })?;
                parents.push(found);
            }
            Ok(parents)
        })
    }
}
