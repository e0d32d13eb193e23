//! Request parameter encoding and response decoding.
//!
//! Outgoing requests are flat `key=value` maps ([`Params`]). Incoming
//! responses are JSON object trees ([`serde_json::Value`]).
//!
//! # Absent versus present-but-empty
//!
//! The remote API distinguishes a field that is missing from one that is
//! present with no value. Boolean flags in responses are written as
//! `"flag": ""`, so presence is what carries the meaning. On the way out,
//! an empty multi-value parameter is never sent as `key=`; it is dropped
//! entirely so the server applies its default.
//!
//! | Input value | Encoded as |
//! |-------------|------------|
//! | `null` | absent |
//! | `[]` | absent |
//! | `["a", 1]` | `a\|1` |
//! | `true` | `1` |
//! | `false` | absent |
//! | number | decimal text |
//! | string | verbatim |

use std::collections::btree_map;
use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::DecodeError;

/// Separator the remote API uses for multi-value parameters.
pub const MULTI_VALUE_SEPARATOR: &str = "|";

/// A flat, ordered set of request parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Params::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Set a multi-value parameter, joined with `|`.
    ///
    /// An empty collection removes the key instead of sending an empty value.
    pub fn set_list<I>(&mut self, key: impl Into<String>, values: I)
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        let key = key.into();
        let joined: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
        if joined.is_empty() {
            self.0.remove(&key);
        } else {
            self.0.insert(key, joined.join(MULTI_VALUE_SEPARATOR));
        }
    }

    /// Set or clear a boolean parameter. The API treats presence as `true`.
    pub fn set_flag(&mut self, key: impl Into<String>, on: bool) {
        let key = key.into();
        if on {
            self.0.insert(key, "1".into());
        } else {
            self.0.remove(&key);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }

    /// Merge `other` into `self`; keys in `other` win.
    pub fn extend(&mut self, other: &Params) {
        for (k, v) in other.iter() {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// The `(key, value)` pairs handed to the transport.
    pub fn to_payload(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Percent-encoded `k=v&k=v` form, used when logging GET requests.
    pub fn to_query_string(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Encode a structured parameter map into flat request parameters,
/// applying the conventions in the module docs.
pub fn encode(values: &Map<String, Value>) -> Params {
    let mut params = Params::new();
    for (key, value) in values {
        if let Some(text) = encode_value(value) {
            params.set(key.clone(), text);
        }
    }
    params
}

fn encode_value(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Bool(true) => Some("1".into()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(encode_value).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(MULTI_VALUE_SEPARATOR))
            }
        }
        Value::Object(_) => Some(value.to_string()),
    }
}

/// Decode a response body into a response tree.
///
/// The body must be a JSON object; anything else is a [`DecodeError`].
pub fn decode(bytes: &[u8]) -> Result<Value, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }
    Ok(value)
}

/// The value at `key`, treating an explicit `null` as absent.
pub fn field<'a>(node: &'a Value, key: &str) -> Option<&'a Value> {
    node.get(key).filter(|v| !v.is_null())
}

/// Whether a boolean flag is set on `node`.
///
/// Flags are present-but-empty (`"subpages": ""`) when set and missing when
/// not. Newer servers send real booleans, which are honoured as such.
pub fn flag(node: &Value, key: &str) -> bool {
    match field(node, key) {
        Some(Value::Bool(b)) => *b,
        Some(_) => true,
        None => false,
    }
}

/// Read a scalar as text: strings verbatim, numbers in decimal.
pub fn text(node: &Value) -> Option<String> {
    match node {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
