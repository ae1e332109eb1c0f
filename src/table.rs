// ABOUTME: The AMQP 0-9-1 field table: a mapping from short strings to typed values
// ABOUTME: Used for server/client properties, per-method arguments, and capability discovery

use std::collections::BTreeMap;

/// A single typed value that may appear in a [`Table`], matching the subset
/// of the AMQP 0-9-1 field-value grammar the connection core needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    LongString(String),
    Table(Table),
    Array(Vec<Value>),
    Void,
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::LongString(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::LongString(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::LongString(s)
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Self {
        Value::Table(t)
    }
}

/// A field table: ordered by key for deterministic encoding, though the wire
/// format does not require any particular order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table(BTreeMap<String, Value>);

impl Table {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
