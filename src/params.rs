//! Parameter containers and the projection from a container to an identifier.
//!
//! A [`ParamMap`] is an immutable snapshot of keyed route/query state. It is only meaningful at
//! the instant it is emitted; the next emission supersedes it. A [`Transformer`] turns one
//! snapshot into an [`Identifier`], or `None` when the expected key is missing. Absence is passed
//! downstream unchanged: deciding what an absent identifier means is the fetcher's job.
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Opaque key selecting which entity to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// An immutable keyed snapshot of parameter state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamMap {
    entries: BTreeMap<String, String>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Build a snapshot from a JSON object.
    ///
    /// Strings are taken as-is, numbers and booleans are stringified. Nulls, arrays and nested
    /// objects have no parameter form and are skipped. Returns `None` if `value` is not an object.
    pub fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let entries = object
            .iter()
            .filter_map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Null | Value::Array(_) | Value::Object(_) => return None,
                };
                Some((key.clone(), rendered))
            })
            .collect();
        Some(Self { entries })
    }
}

impl<K, V> FromIterator<(K, V)> for ParamMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Pure, synchronous projection from a parameter container to an identifier.
pub trait Transformer: Send + Sync {
    fn project(&self, params: &ParamMap) -> Option<Identifier>;
}

impl<F> Transformer for F
where
    F: Fn(&ParamMap) -> Option<Identifier> + Send + Sync,
{
    fn project(&self, params: &ParamMap) -> Option<Identifier> {
        self(params)
    }
}

/// Projects the value stored under a single key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamKey(pub String);

impl ParamKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl Default for ParamKey {
    fn default() -> Self {
        Self("id".to_string())
    }
}

impl Transformer for ParamKey {
    fn project(&self, params: &ParamMap) -> Option<Identifier> {
        params.get(&self.0).map(Identifier::new)
    }
}
