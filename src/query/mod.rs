//! Query-string driven reads.

pub mod allowlist;
pub mod features;

use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use serde_json::{Map, Value};

use crate::error::AppError;

pub use allowlist::filter_fields;
pub use features::QueryFeatures;

/// Parsed query string. `views[gte]=5` becomes `{"views": {"gte": "5"}}`,
/// repeated keys become arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams(Map<String, Value>);

impl QueryParams {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut map = Map::new();
        for (key, value) in pairs {
            let key = key.as_ref();
            let value = Value::String(value.into());
            match split_bracket(key) {
                Some((outer, "")) => append(&mut map, outer, value, true),
                Some((outer, inner)) => {
                    let slot = map
                        .entry(outer.to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if !slot.is_object() {
                        *slot = Value::Object(Map::new());
                    }
                    if let Value::Object(nested) = slot {
                        append(nested, inner, value, false);
                    }
                }
                None => append(&mut map, key, value, false),
            }
        }
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The value as a single string; repeated values are joined with commas.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), Value::String(value.to_string()));
    }

    pub fn set_default(&mut self, key: &str, value: &str) {
        if !self.0.contains_key(key) {
            self.set(key, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

fn split_bracket(key: &str) -> Option<(&str, &str)> {
    let open = key.find('[')?;
    let inner = key[open + 1..].strip_suffix(']')?;
    Some((&key[..open], inner))
}

fn append(map: &mut Map<String, Value>, key: &str, value: Value, force_array: bool) {
    match map.get_mut(key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = std::mem::take(existing);
            *existing = Value::Array(vec![first, value]);
        }
        None if force_array => {
            map.insert(key.to_string(), Value::Array(vec![value]));
        }
        None => {
            map.insert(key.to_string(), value);
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for QueryParams
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(pairs) = Query::<Vec<(String, String)>>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?;
        Ok(Self::from_pairs(pairs))
    }
}
