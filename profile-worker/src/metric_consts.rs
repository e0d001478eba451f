pub const IMMEDIATE_SYNC_SUCCESS: &str = "immediate.sync.success";
pub const IMMEDIATE_SYNC_FALLBACK: &str = "immediate.sync.fallback";
pub const IMMEDIATE_SYNC_FALLBACK_FAILED: &str = "immediate.sync.fallback_failed";
pub const IMMEDIATE_SYNC_DURATION: &str = "immediate.sync.duration";

pub const BATCH_SYNC_SUCCESS: &str = "batch.sync.success";
pub const BATCH_SYNC_FAILURE: &str = "batch.sync.failure";
pub const BATCH_SYNC_DURATION: &str = "batch.sync.duration";

pub const DOC_UPDATE_APPLIED: &str = "doc.update.applied";
pub const DOC_UPDATE_STALE: &str = "doc.update.stale";
pub const DOC_UPDATE_FAILED: &str = "doc.update.failed";

pub const VERSION_UPDATE_SUCCESS: &str = "version.update.success";
pub const VERSION_UPDATE_CONFLICT: &str = "version.update.conflict";
pub const VERSION_LOCK_FAILED: &str = "version.lock.failed";
