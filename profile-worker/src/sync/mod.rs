pub mod memory;
pub mod postgres;
pub mod store;
pub mod update;

pub use store::{ApplyError, ApplyOutcome, DocumentStore};
pub use update::{DocumentUpdate, ProfileStatus, SyncMode};
