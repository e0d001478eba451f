use async_trait::async_trait;
use redis::RedisError;
use thiserror::Error;

mod client;
mod mock;

pub use client::RedisClient;
pub use mock::MockRedisClient;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CustomRedisError {
    #[error("Not found in redis")]
    NotFound,
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Redis error: {0}")]
    Other(String),
    #[error("Timeout error")]
    Timeout,
}

impl From<RedisError> for CustomRedisError {
    fn from(err: RedisError) -> Self {
        CustomRedisError::Other(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for CustomRedisError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        CustomRedisError::Timeout
    }
}

impl From<std::string::FromUtf8Error> for CustomRedisError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        CustomRedisError::ParseError(err.to_string())
    }
}

/// The subset of redis the pipeline relies on. Values are UTF-8 strings;
/// structured records are serialized by the caller.
///
/// `set_if_equals` and `del_if_equals` are atomic compare-ops (server-side
/// scripts on the real client). They are the building blocks for the
/// fast-path lock protocol and version compare-and-swap: a key is only
/// written or deleted when its current value is the one the caller last
/// observed, so a slow caller can never clobber a faster one.
#[async_trait]
pub trait Client: Send + Sync {
    async fn get(&self, k: String) -> Result<String, CustomRedisError>;
    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError>;
    async fn setex(&self, k: String, v: String, seconds: u64) -> Result<(), CustomRedisError>;

    /// SET NX EX: returns true when the key was absent and has been set.
    async fn set_nx_ex(&self, k: String, v: String, seconds: u64)
        -> Result<bool, CustomRedisError>;

    /// Atomically set `k` to `v` only if its current value equals `expected`;
    /// `expected = None` requires the key to be absent. Returns whether the
    /// swap happened.
    async fn set_if_equals(
        &self,
        k: String,
        expected: Option<String>,
        v: String,
    ) -> Result<bool, CustomRedisError>;

    async fn del(&self, k: String) -> Result<(), CustomRedisError>;

    /// Atomically delete `k` only if its current value equals `expected`.
    /// Returns whether the key was deleted.
    async fn del_if_equals(&self, k: String, expected: String) -> Result<bool, CustomRedisError>;

    async fn exists(&self, k: String) -> Result<bool, CustomRedisError>;
}
