//! The PackStream value model.
//!
//! One `Value` enum covers the entire wire-level type universe. Domain types
//! (nodes, relationships, temporal and spatial values) are `Structure` values
//! with fixed tags; typed views over them live in [`super::graph`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A PackStream value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absence of a value
    Null,
    /// Boolean
    Boolean(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit IEEE 754 float
    Float(f64),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// UTF-8 string
    String(String),
    /// Ordered list of values
    List(Vec<Value>),
    /// String-keyed map (insertion order not significant)
    Map(HashMap<String, Value>),
    /// Tagged structure
    Structure(Structure),
}

/// A tagged structure: a tag byte plus an ordered field list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    /// Tag byte identifying the structure kind
    pub tag: u8,
    /// Ordered fields
    pub fields: Vec<Value>,
}

impl Structure {
    /// Create a structure from a tag and its fields.
    pub fn new(tag: u8, fields: Vec<Value>) -> Self {
        Self { tag, fields }
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the structure has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field at `index`, if present.
    pub fn field(&self, index: usize) -> Option<&Value> {
        self.fields.get(index)
    }
}

impl Value {
    /// Whether this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Boolean view.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Float view. Integers widen losslessly enough for metadata use.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// String slice view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Byte-array view.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// List view.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Map view.
    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Structure view.
    pub fn as_structure(&self) -> Option<&Structure> {
        match self {
            Value::Structure(s) => Some(s),
            _ => None,
        }
    }

    /// Collect a list of strings, skipping non-string entries.
    ///
    /// Several metadata fields (bookmarks, result field names) arrive as
    /// string lists; this is the shared accessor for them.
    pub fn as_string_list(&self) -> Option<Vec<String>> {
        self.as_list().map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
    }

    /// Name of the value's type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Bytes(_) => "Bytes",
            Value::String(_) => "String",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Structure(_) => "Structure",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::List(l) => write!(f, "[{} items]", l.len()),
            Value::Map(m) => write!(f, "{{{} entries}}", m.len()),
            Value::Structure(s) => write!(f, "Structure(0x{:02X}, {} fields)", s.tag, s.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(v: HashMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

impl From<Structure> for Value {
    fn from(v: Structure) -> Self {
        Value::Structure(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_value() {
        let v = Value::Null;
        assert!(v.is_null());
        assert_eq!(v.type_name(), "Null");
        assert_eq!(v.as_int(), None);
    }

    #[test]
    fn scalar_accessors() {
        assert_eq!(Value::Boolean(true).as_bool(), Some(true));
        assert_eq!(Value::Integer(42).as_int(), Some(42));
        assert_eq!(Value::Integer(42).as_float(), Some(42.0));
        assert_eq!(Value::Float(2.5).as_float(), Some(2.5));
        assert_eq!(Value::Float(2.5).as_int(), None);
        assert_eq!(Value::String("hi".into()).as_str(), Some("hi"));
        assert_eq!(Value::Bytes(vec![1, 2]).as_bytes(), Some(&[1u8, 2][..]));
    }

    #[test]
    fn collection_accessors() {
        let list = Value::List(vec![Value::Integer(1), Value::Integer(2)]);
        assert_eq!(list.as_list().unwrap().len(), 2);

        let mut map = HashMap::new();
        map.insert("k".to_string(), Value::Integer(7));
        let map = Value::Map(map);
        assert_eq!(map.as_map().unwrap().get("k").unwrap().as_int(), Some(7));
    }

    #[test]
    fn string_list_accessor() {
        let v = Value::List(vec![
            Value::String("a".into()),
            Value::Integer(1),
            Value::String("b".into()),
        ]);
        assert_eq!(v.as_string_list(), Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(Value::Integer(1).as_string_list(), None);
    }

    #[test]
    fn structure_basics() {
        let s = Structure::new(0x4E, vec![Value::Integer(1)]);
        assert_eq!(s.tag, 0x4E);
        assert_eq!(s.len(), 1);
        assert!(!s.is_empty());
        assert_eq!(s.field(0), Some(&Value::Integer(1)));
        assert_eq!(s.field(1), None);

        let v: Value = s.into();
        assert!(v.as_structure().is_some());
    }

    #[test]
    fn from_conversions() {
        let _: Value = true.into();
        let _: Value = 1i64.into();
        let _: Value = 1i32.into();
        let _: Value = 1.5f64.into();
        let _: Value = "s".into();
        let _: Value = String::from("s").into();
        let _: Value = vec![1u8, 2].into();
        let _: Value = vec![Value::Null].into();
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(3i64)), Value::Integer(3));
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::String("x".into()).to_string(), "\"x\"");
        assert_eq!(Value::List(vec![]).to_string(), "[0 items]");
        assert_eq!(
            Value::Structure(Structure::new(0x4E, vec![])).to_string(),
            "Structure(0x4E, 0 fields)"
        );
    }
}
