//! The message payload type: a small tagged-variant tree.
//!
//! The wire format only cares that the payload serializes as canonical
//! JSON; this module exists so the network layer can build and read
//! reserved-kind payloads without reaching for a general JSON crate API at
//! every call site. Dotted-path lookup (`"a.b.c"`) is a fold over nested
//! documents.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single value in a `Document` tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    Array(Vec<Value>),
    Document(Document),
}

/// An ordered map from field name to `Value`. Serializes with sorted keys
/// so that two documents built in different field orders compare equal
/// byte-for-byte on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(BTreeMap<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Fold a dotted path (`"a.b.c"`) through nested sub-documents.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            match current {
                Value::Document(doc) => current = doc.0.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(Value::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        if s.is_empty() {
            return Ok(Self::new());
        }
        serde_json::from_str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Document> for Value {
    fn from(d: Document) -> Self {
        Value::Document(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_path_folds_through_sub_documents() {
        let inner = Document::new().set("c", 42i64);
        let doc = Document::new().set("a", Document::new().set("b", inner));
        assert_eq!(doc.get_path("a.b.c"), Some(&Value::Int(42)));
    }

    #[test]
    fn dotted_path_misses_on_non_document_intermediate() {
        let doc = Document::new().set("a", "leaf");
        assert_eq!(doc.get_path("a.b"), None);
    }

    #[test]
    fn canonical_json_round_trips() {
        let doc = Document::new().set("Leader", "host:5000").set("CurrentTerm", 3i64);
        let json = doc.to_canonical_json();
        let back = Document::from_json(&json).unwrap();
        assert_eq!(doc, back);
    }

    #[test]
    fn empty_string_parses_to_empty_document() {
        let doc = Document::from_json("").unwrap();
        assert!(doc.is_empty());
    }
}
