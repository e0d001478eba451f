pub mod profile_sync;
