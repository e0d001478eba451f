use async_trait::async_trait;
use thiserror::Error;

use crate::sync::update::{DocumentUpdate, InvalidEvent};

/// What happened to the document. Stale is a success for callers: a newer
/// event has already advanced the document past this one, and applying is
/// idempotent by version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Stale,
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("document apply timed out")]
    Timeout,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("malformed event: {0}")]
    Malformed(#[from] InvalidEvent),
    #[error("document store unavailable: {0}")]
    Unavailable(String),
}

/// The seam between consumers and the document store, so the sync flow can
/// run against the real store or an in-memory one in tests.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn apply(&self, update: &DocumentUpdate) -> Result<ApplyOutcome, ApplyError>;
}
