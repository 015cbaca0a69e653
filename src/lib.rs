//! s3mirror - Keep a local, versioned mirror of an S3 bucket prefix
//!
//! This library polls a bucket prefix on a fixed interval, downloads objects
//! whose fingerprint changed since the last run, and records what it fetched
//! in a JSON document next to the mirrored files so every cycle is resumable.
//!
//! # Features
//!
//! - **Change Detection**: ETag and timestamp fingerprints, no re-download to compare
//! - **Integrity Checks**: size verification and MD5 recorded for every download
//! - **Automatic Retry**: exponential per-object retry, interval escalation per cycle
//! - **Versioned Backups**: previous copies moved into `.versions/` before overwrite
//! - **Cooperative Stop**: cancellation is honored within one time unit
//!
//! # Example
//!
//! ```no_run
//! use s3mirror::{start_s3, StoreConfig, StoreOverrides, SyncConfig, SyncMode};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = StoreConfig::from_env(StoreOverrides::default())?;
//! let config = SyncConfig {
//!     bucket: "my-bucket".to_string(),
//!     prefix: "Document/".to_string(),
//!     local_root: "./mirror".into(),
//!     interval: 30,
//!     mode: SyncMode::Monitor,
//!     ..SyncConfig::default()
//! };
//!
//! let handle = start_s3(config, &store).await?;
//! // ... later
//! handle.stop();
//! handle.join().await?;
//! # Ok(())
//! # }
//! ```

mod activity;
mod config;
mod control;
mod detect;
mod download;
mod error;
mod metadata;
mod orchestrator;
mod retry;
mod store;
mod types;
mod verify;
mod versioning;

#[cfg(test)]
mod testing;

pub use activity::{SyncStats, TEXT_LOG_FILE};
pub use config::{StoreConfig, StoreOverrides};
pub use control::{start, start_s3, stop, SyncHandle};
pub use detect::{classify, ChangeKind};
pub use download::local_path_for;
pub use error::SyncError;
pub use metadata::{Fingerprint, FingerprintEntry, MetadataDocument, MetadataStore, METADATA_FILE};
pub use retry::{retry_delays, CycleBackoff};
pub use store::{list_objects, normalize_etag, ObjectPage, ObjectStore, S3Store};
pub use types::{
    CycleStats, ModePolicy, RemoteObjectRecord, SchedulerState, SyncConfig, SyncMode,
};
pub use versioning::{archive_existing, VersionSnapshot, VERSIONS_DIR};
