//! Provide a [`Context`] for the execution of a stitched operation.
//!
//! A single context is created per client operation and handed to every resolver, every
//! delegated request and every fetcher that takes part in answering it.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use serde::Serialize;

use crate::BoxError;
use crate::json_ext::Value;

/// Holds [`Context`] entries.
pub(crate) type Entries = Arc<DashMap<String, Value>>;

/// A map of arbitrary JSON values, shared by everything that takes part in one operation.
///
/// Cloning a context is cheap; clones see each other's writes.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Context {
    entries: Entries,
}

impl Context {
    /// Create a new context.
    pub fn new() -> Self {
        Context::default()
    }

    /// Get a value from the context using the provided key.
    ///
    /// Semantics:
    ///  - If the operation fails, that's because we can't deserialize the value.
    ///  - If the operation succeeds, the value is an [`Option`].
    pub fn get<K, V>(&self, key: K) -> Result<Option<V>, BoxError>
    where
        K: AsRef<str>,
        V: for<'de> serde::Deserialize<'de>,
    {
        self.entries
            .get(key.as_ref())
            .map(|v| serde_json_bytes::from_value(v.value().clone()))
            .transpose()
            .map_err(|e| e.into())
    }

    /// Insert a value int the context using the provided key and value.
    ///
    /// Semantics:
    ///  - If the operation fails, then the pair has not been inserted.
    ///  - If the operation succeeds, the result is the old value as an [`Option`].
    pub fn insert<K, V>(&self, key: K, value: V) -> Result<Option<V>, BoxError>
    where
        K: Into<String>,
        V: for<'de> serde::Deserialize<'de> + Serialize,
    {
        match serde_json_bytes::to_value(value) {
            Ok(value) => self
                .entries
                .insert(key.into(), value)
                .map(serde_json_bytes::from_value)
                .transpose()
                .map_err(|e| e.into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
