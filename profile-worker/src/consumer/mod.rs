pub mod batch;
pub mod immediate;

use common_kafka::kafka_messages::profile_sync::ProfileSyncEvent;
use tracing::warn;

use crate::metric_consts::{DOC_UPDATE_APPLIED, DOC_UPDATE_FAILED, DOC_UPDATE_STALE};
use crate::sync::update::DocumentUpdate;
use crate::sync::{ApplyError, ApplyOutcome, DocumentStore};
use crate::version_manager::{SafeUpdateOutcome, VersionManager};

/// Run one event through the sync flow: mirror its fields into the
/// fast-path state, then apply it to the aggregated document.
///
/// The mirror is advisory. Lock contention or a fast-path outage is
/// counted and logged but never fails the record; the document apply alone
/// decides the outcome.
pub async fn sync_event(
    store: &dyn DocumentStore,
    versions: &VersionManager,
    event: &ProfileSyncEvent,
    source: &str,
) -> Result<ApplyOutcome, ApplyError> {
    let update = DocumentUpdate::from_event(event).inspect_err(|_| {
        metrics::counter!(DOC_UPDATE_FAILED).increment(1);
    })?;

    let fields = update.flattened_fields();
    if !fields.is_empty() {
        match versions.safe_update(&event.user_id, &fields, source).await {
            Ok(SafeUpdateOutcome::Success { .. }) => {}
            Ok(SafeUpdateOutcome::LockFailed) => {
                warn!(user_id = %event.user_id, "Fast-path lock contended, skipping mirror");
            }
            Err(e) => {
                warn!(user_id = %event.user_id, "Fast-path mirror failed: {}", e);
            }
        }
    }

    let result = store.apply(&update).await;
    match &result {
        Ok(ApplyOutcome::Applied) => metrics::counter!(DOC_UPDATE_APPLIED).increment(1),
        Ok(ApplyOutcome::Stale) => metrics::counter!(DOC_UPDATE_STALE).increment(1),
        Err(_) => metrics::counter!(DOC_UPDATE_FAILED).increment(1),
    }
    result
}
