use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{Client, CustomRedisError};

/// An in-memory stand-in for redis, keeping real key/value state so that
/// compare-ops behave like the server-side scripts do. TTLs are accepted
/// but not enforced; tests that need expiry delete the key themselves.
#[derive(Clone, Default)]
pub struct MockRedisClient {
    store: Arc<Mutex<HashMap<String, String>>>,
    errors: Arc<Mutex<HashMap<String, CustomRedisError>>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock<'a, T>(m: &'a Arc<Mutex<T>>) -> std::sync::MutexGuard<'a, T> {
        match m.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Pre-seed a key, as if a previous caller had written it.
    pub fn with_value(self, k: impl Into<String>, v: impl Into<String>) -> Self {
        Self::lock(&self.store).insert(k.into(), v.into());
        self
    }

    /// Make the next call to `op` (e.g. "get", "set_nx_ex") fail with `err`.
    pub fn fail_next(&self, op: &str, err: CustomRedisError) {
        Self::lock(&self.errors).insert(op.to_string(), err);
    }

    pub fn current_value(&self, k: &str) -> Option<String> {
        Self::lock(&self.store).get(k).cloned()
    }

    /// The (op, key) pairs observed so far, for call-order assertions.
    pub fn calls(&self) -> Vec<(String, String)> {
        Self::lock(&self.calls).clone()
    }

    fn record(&self, op: &str, k: &str) -> Result<(), CustomRedisError> {
        Self::lock(&self.calls).push((op.to_string(), k.to_string()));
        if let Some(err) = Self::lock(&self.errors).remove(op) {
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl Client for MockRedisClient {
    async fn get(&self, k: String) -> Result<String, CustomRedisError> {
        self.record("get", &k)?;
        Self::lock(&self.store)
            .get(&k)
            .cloned()
            .ok_or(CustomRedisError::NotFound)
    }

    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        self.record("set", &k)?;
        Self::lock(&self.store).insert(k, v);
        Ok(())
    }

    async fn setex(&self, k: String, v: String, _seconds: u64) -> Result<(), CustomRedisError> {
        self.record("setex", &k)?;
        Self::lock(&self.store).insert(k, v);
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        k: String,
        v: String,
        _seconds: u64,
    ) -> Result<bool, CustomRedisError> {
        self.record("set_nx_ex", &k)?;
        let mut store = Self::lock(&self.store);
        if store.contains_key(&k) {
            return Ok(false);
        }
        store.insert(k, v);
        Ok(true)
    }

    async fn set_if_equals(
        &self,
        k: String,
        expected: Option<String>,
        v: String,
    ) -> Result<bool, CustomRedisError> {
        self.record("set_if_equals", &k)?;
        let mut store = Self::lock(&self.store);
        if store.get(&k) == expected.as_ref() {
            store.insert(k, v);
            return Ok(true);
        }
        Ok(false)
    }

    async fn del(&self, k: String) -> Result<(), CustomRedisError> {
        self.record("del", &k)?;
        Self::lock(&self.store).remove(&k);
        Ok(())
    }

    async fn del_if_equals(&self, k: String, expected: String) -> Result<bool, CustomRedisError> {
        self.record("del_if_equals", &k)?;
        let mut store = Self::lock(&self.store);
        if store.get(&k) == Some(&expected) {
            store.remove(&k);
            return Ok(true);
        }
        Ok(false)
    }

    async fn exists(&self, k: String) -> Result<bool, CustomRedisError> {
        self.record("exists", &k)?;
        Ok(Self::lock(&self.store).contains_key(&k))
    }
}
