//! The scalar cell payload and row types shared by every collector.

use std::collections::HashMap;

/// A single collected scalar. Collectors populate these from parsed
/// `/proc` lines or `pg_stat_activity` columns; the display layer formats
/// and colorizes them without needing to know which collector produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Absent,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl<T> From<Option<T>> for Value
where
    Value: From<T>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => Value::from(v),
            None => Value::Absent,
        }
    }
}

/// A flat collection of named scalars produced by a single collector pass
/// for a single entity (a host, a partition, a backend process).
pub type Row = HashMap<&'static str, Value>;

/// Identity key used to correspond a row across the previous/current
/// sample: either positional (system-wide singleton collectors) or keyed
/// (PID for processes, device name for partitions).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowKey {
    Singleton,
    Pid(i32),
    Named(String),
}
