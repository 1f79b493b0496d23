use serde::{Deserialize, Deserializer};

/// Ids are dotted numbers and show up as json numbers or strings depending on the producer
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Integer(i64),
    Decimal(f64),
}

impl From<RawId> for String {
    fn from(value: RawId) -> Self {
        match value {
            RawId::Text(text) => text,
            RawId::Integer(int) => int.to_string(),
            RawId::Decimal(decimal) => decimal.to_string(),
        }
    }
}

pub(crate) fn id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

pub(crate) fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawId>::deserialize(deserializer).map(|id| id.map(String::from))
}

/// Records stored in a map keyed by name may leave the name out
pub(crate) fn fill_name(name: &mut String, key: &str) {
    if name.is_empty() {
        *name = key.to_string();
    }
}

/// Append the items of `more` not already present
pub(crate) fn union<T: PartialEq + Clone>(items: &mut Vec<T>, more: &[T]) {
    for item in more {
        if !items.contains(item) {
            items.push(item.clone());
        }
    }
}
