use chrono::{DateTime, SecondsFormat, Utc};

use super::{TAG_BOOL, TAG_BYTES, TAG_DATETIME, TAG_DICT, TAG_FLOAT, TAG_INT, TAG_LIST, TAG_STR};
use crate::error::{BakedError, Result};

/// A decoded tagged value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(String),
    Float(f64),
    Bytes(Vec<u8>),
    DateTime(DateTime<Utc>),
    List(Vec<Value>),
    Dict(Dict),
    /// Value of a type registered at runtime, carried as its tag and the
    /// inner representation its codec works on.
    Ext { tag: String, value: Box<Value> },
}

impl Value {
    pub fn ext(tag: impl Into<String>, value: Value) -> Self {
        Value::Ext { tag: tag.into(), value: Box::new(value) }
    }

    /// Wire tag this value is encoded under.
    pub fn type_tag(&self) -> &str {
        match self {
            Value::Int(_)          => TAG_INT,
            Value::Bool(_)         => TAG_BOOL,
            Value::Str(_)          => TAG_STR,
            Value::Float(_)        => TAG_FLOAT,
            Value::Bytes(_)        => TAG_BYTES,
            Value::DateTime(_)     => TAG_DATETIME,
            Value::List(_)         => TAG_LIST,
            Value::Dict(_)         => TAG_DICT,
            Value::Ext { tag, .. } => tag,
        }
    }

    /// Short kind name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Ext { .. } => "ext",
            other => match other.type_tag() {
                TAG_INT      => "int",
                TAG_BOOL     => "bool",
                TAG_STR      => "str",
                TAG_FLOAT    => "float",
                TAG_BYTES    => "bytes",
                TAG_DATETIME => "datetime",
                TAG_LIST     => "list",
                _            => "dict",
            },
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Convert a parsed JSON document.  `null` has no tagged form.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        use serde_json::Value as Json;
        Ok(match json {
            Json::Null => return Err(BakedError::UnsupportedType("null".into())),
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().ok_or_else(|| {
                    BakedError::UnsupportedType(format!("number {n}"))
                })?),
            },
            Json::String(s) => Value::Str(s),
            Json::Array(items) => Value::List(
                items.into_iter().map(Value::from_json).collect::<Result<_>>()?,
            ),
            Json::Object(map) => {
                let mut dict = Dict::new();
                for (key, value) in map {
                    dict.insert(key, Value::from_json(value)?);
                }
                Value::Dict(dict)
            }
        })
    }

    /// Render as JSON for display.  Bytes become lowercase hex, datetimes
    /// RFC 3339, extension values `{"<tag>": inner}`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Int(i) => Json::from(*i),
            Value::Bool(b) => Json::from(*b),
            Value::Str(s) => Json::from(s.as_str()),
            Value::Float(f) => Json::from(*f),
            Value::Bytes(b) => Json::from(hex::encode(b)),
            Value::DateTime(dt) => Json::from(dt.to_rfc3339_opts(SecondsFormat::Micros, true)),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Dict(dict) => dict.to_json(),
            Value::Ext { tag, value } => {
                let mut map = serde_json::Map::new();
                map.insert(tag.clone(), value.to_json());
                Json::Object(map)
            }
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self { Value::Int(i) }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self { Value::Int(i64::from(i)) }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Value::Bool(b) }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self { Value::Float(f) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::Str(s.to_owned()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::Str(s) }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self { Value::Bytes(b) }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self { Value::DateTime(dt) }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self { Value::List(items) }
}

impl From<Dict> for Value {
    fn from(d: Dict) -> Self { Value::Dict(d) }
}

// ── Dict ─────────────────────────────────────────────────────────────────────

/// String-keyed mapping that keeps insertion order.
///
/// Encoding walks entries in order, so two dicts with the same entries in a
/// different order produce different bytes and compare unequal.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dict {
    entries: Vec<(String, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace.  A replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (key, value) in self.iter() {
            map.insert(key.to_owned(), value.to_json());
        }
        serde_json::Value::Object(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Dict {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut dict = Dict::new();
        for (key, value) in iter {
            dict.insert(key, value);
        }
        dict
    }
}

impl IntoIterator for Dict {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
