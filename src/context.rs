//! Workflow Context
//!
//! Versioned, copy-on-write mapping of named values threaded through a workflow.
//! A `Context` is never mutated in place: every derivation clones the entry map behind a
//! fresh `Arc` and bumps the version, so earlier snapshots stay intact for replay and for
//! matching a paused invocation against the state it was paused with.

pub mod template;

use crate::error::ContextError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A single value stored in a [`Context`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ContextValue {
    Text(String),
    Bool(bool),
    /// Structured data (objects, arrays, numbers)
    Record(Value),
    /// Opaque bytes, hex-encoded when serialized
    Blob(#[serde(with = "blob_hex")] Vec<u8>),
}

/// Declared kind of a context value, used to type template placeholders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Text,
    Bool,
    Record,
    Blob,
    Any,
}

impl ValueKind {
    pub fn accepts(&self, value: &ContextValue) -> bool {
        matches!(self, ValueKind::Any) || *self == value.kind()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Text => "text",
            ValueKind::Bool => "bool",
            ValueKind::Record => "record",
            ValueKind::Blob => "blob",
            ValueKind::Any => "any",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ContextValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            ContextValue::Text(_) => ValueKind::Text,
            ContextValue::Bool(_) => ValueKind::Bool,
            ContextValue::Record(_) => ValueKind::Record,
            ContextValue::Blob(_) => ValueKind::Blob,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContextValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ContextValue::Bool(flag) => Some(*flag),
            ContextValue::Record(Value::Bool(flag)) => Some(*flag),
            _ => None,
        }
    }

    /// Render the value for interpolation into a prompt template.
    pub fn render(&self) -> String {
        match self {
            ContextValue::Text(text) => text.clone(),
            ContextValue::Bool(flag) => flag.to_string(),
            ContextValue::Record(Value::String(text)) => text.clone(),
            ContextValue::Record(value) => value.to_string(),
            ContextValue::Blob(bytes) => hex::encode(bytes),
        }
    }

    /// Lift a JSON value: strings become text, booleans become bools, the rest records.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(text) => ContextValue::Text(text),
            Value::Bool(flag) => ContextValue::Bool(flag),
            other => ContextValue::Record(other),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ContextValue::Text(text) => Value::String(text.clone()),
            ContextValue::Bool(flag) => Value::Bool(*flag),
            ContextValue::Record(value) => value.clone(),
            ContextValue::Blob(bytes) => Value::String(hex::encode(bytes)),
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Text(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::Text(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Bool(value)
    }
}

impl From<Value> for ContextValue {
    fn from(value: Value) -> Self {
        ContextValue::from_json(value)
    }
}

impl From<Vec<u8>> for ContextValue {
    fn from(value: Vec<u8>) -> Self {
        ContextValue::Blob(value)
    }
}

/// Ordered, versioned key/value state threaded through a workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    entries: Arc<BTreeMap<String, ContextValue>>,
    version: u64,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a version-0 context from initial entries.
    pub fn from_entries<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<ContextValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            entries: Arc::new(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.into(), value.into()))
                    .collect(),
            ),
            version: 0,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn entries(&self) -> &BTreeMap<String, ContextValue> {
        &self.entries
    }

    pub fn require(&self, key: &str) -> Result<&ContextValue, ContextError> {
        self.get(key)
            .ok_or_else(|| ContextError::MissingKey(key.to_string()))
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ContextValue::as_text)
    }

    /// New context with `key` set to `value`.
    pub fn with(&self, key: impl Into<String>, value: impl Into<ContextValue>) -> Context {
        let key = key.into();
        let value = value.into();
        self.derive(|entries| {
            entries.insert(key, value);
        })
    }

    /// New context with `key` removed. Still bumps the version when the key was absent.
    pub fn without(&self, key: &str) -> Context {
        self.derive(|entries| {
            entries.remove(key);
        })
    }

    /// New context with every entry of `other` laid over this one.
    pub fn merged(&self, other: &Context) -> Context {
        self.derive(|entries| {
            for (key, value) in other.iter() {
                entries.insert(key.to_string(), value.clone());
            }
        })
    }

    /// Apply an infallible edit to a copy of the entries, producing the next version.
    pub fn derive(&self, edit: impl FnOnce(&mut BTreeMap<String, ContextValue>)) -> Context {
        let mut entries = (*self.entries).clone();
        edit(&mut entries);
        Context {
            entries: Arc::new(entries),
            version: self.version + 1,
        }
    }

    /// Apply a fallible edit. On error the source context is untouched and no version is spent.
    pub fn try_derive<E>(
        &self,
        edit: impl FnOnce(&mut BTreeMap<String, ContextValue>) -> Result<(), E>,
    ) -> Result<Context, E> {
        let mut entries = (*self.entries).clone();
        edit(&mut entries)?;
        Ok(Context {
            entries: Arc::new(entries),
            version: self.version + 1,
        })
    }

    /// Resolve a dot path such as `review.items.0.title`.
    ///
    /// The first segment names a context key; the rest walk into record objects and arrays.
    pub fn resolve_path(&self, path: &str) -> Option<ContextValue> {
        let mut segments = path.split('.');
        let head = self.get(segments.next()?)?;
        let rest: Vec<&str> = segments.collect();
        if rest.is_empty() {
            return Some(head.clone());
        }

        let mut current = head.to_json();
        for segment in rest {
            current = match current {
                Value::Object(mut map) => map.remove(segment)?,
                Value::Array(mut items) => {
                    let index: usize = segment.parse().ok()?;
                    if index >= items.len() {
                        return None;
                    }
                    items.swap_remove(index)
                }
                _ => return None,
            };
        }
        if current.is_null() {
            return None;
        }
        Some(ContextValue::from_json(current))
    }

    /// Content digest over sorted keys and typed values (version excluded).
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (key, value) in self.entries.iter() {
            hasher.update(&(key.len() as u64).to_le_bytes());
            hasher.update(key.as_bytes());
            hasher.update(value.kind().as_str().as_bytes());
            let body = match value {
                ContextValue::Blob(bytes) => bytes.clone(),
                other => other.to_json().to_string().into_bytes(),
            };
            hasher.update(&(body.len() as u64).to_le_bytes());
            hasher.update(&body);
        }
        hex::encode(hasher.finalize().as_bytes())
    }
}

impl<K: Into<String>, V: Into<ContextValue>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Context::from_entries(iter)
    }
}

mod blob_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded).map_err(serde::de::Error::custom)
    }
}
