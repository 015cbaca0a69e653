//! Data structures shared by the synchronization engine.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;

/// One object as reported by a bucket listing.
///
/// Produced fresh every cycle and never persisted directly; the metadata
/// store keeps a [`crate::metadata::FingerprintEntry`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObjectRecord {
    /// Full object key, including the prefix.
    pub key: String,
    /// Last modification time reported by the provider.
    pub last_modified: DateTime<Utc>,
    /// Provider ETag with surrounding quotes removed.
    pub etag: String,
    /// Object size in bytes.
    pub size: u64,
}

/// Which policy a running engine follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SyncMode {
    /// Lightweight polling mirror, interval in seconds.
    Monitor,
    /// Versioned, logged archival mirror, interval in minutes.
    Backup,
}

impl SyncMode {
    /// Parameters that differ between the two modes.
    pub fn policy(self) -> ModePolicy {
        match self {
            SyncMode::Monitor => ModePolicy {
                time_unit: Duration::from_secs(1),
                failure_threshold: 5,
                interval_ceiling: 300,
                versioning: false,
                text_log: false,
            },
            SyncMode::Backup => ModePolicy {
                time_unit: Duration::from_secs(60),
                failure_threshold: 3,
                interval_ceiling: 60,
                versioning: true,
                text_log: true,
            },
        }
    }

    /// Unit name used in log lines.
    pub fn unit_name(self) -> &'static str {
        match self {
            SyncMode::Monitor => "seconds",
            SyncMode::Backup => "minutes",
        }
    }
}

/// Per-mode scheduling and archival parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModePolicy {
    /// Length of one interval unit.
    pub time_unit: Duration,
    /// Consecutive failed cycles before the interval is doubled.
    pub failure_threshold: u32,
    /// Upper bound for the escalated interval, in units.
    pub interval_ceiling: u64,
    /// Move existing files into `.versions/` before overwriting them.
    pub versioning: bool,
    /// Append every event to `backup_log.txt`.
    pub text_log: bool,
}

/// Configuration for one mirror task.
///
/// # Example
///
/// ```
/// use s3mirror::{SyncConfig, SyncMode};
///
/// let config = SyncConfig {
///     bucket: "my-bucket".to_string(),
///     prefix: "Document/".to_string(),
///     local_root: "./mirror".into(),
///     interval: 30,
///     mode: SyncMode::Monitor,
///     ..SyncConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Bucket to mirror.
    pub bucket: String,
    /// Key prefix inside the bucket (may be empty).
    pub prefix: String,
    /// Local directory that owns the mirror and its metadata.
    pub local_root: PathBuf,
    /// Delay between cycles, in units of the mode's time unit.
    pub interval: u64,
    /// Monitor or backup policy.
    pub mode: SyncMode,
    /// Log per-object "checked"/"skipped" lines.
    pub verbose: bool,
    /// Only mirror keys with one of these extensions (e.g. `.pdf`), case-insensitive.
    pub allowed_extensions: Option<Vec<String>>,
    /// Compute an MD5 of each downloaded file for the metadata record.
    pub compute_hash: bool,
    /// Attempts per object before it is counted as failed.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each later attempt.
    pub retry_base_delay: Duration,
    /// Override of the mode's time unit (used to run short cycles).
    pub time_unit: Option<Duration>,
    /// Capacity of the in-memory activity channel.
    pub log_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: String::new(),
            local_root: PathBuf::from("./s3_mirror"),
            interval: 30,
            mode: SyncMode::Monitor,
            verbose: false,
            allowed_extensions: None,
            compute_hash: true,
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            time_unit: None,
            log_capacity: 1024,
        }
    }
}

impl SyncConfig {
    /// Mode policy with the time unit override applied.
    pub fn policy(&self) -> ModePolicy {
        let mut policy = self.mode.policy();
        if let Some(unit) = self.time_unit {
            policy.time_unit = unit;
        }
        policy
    }

    /// Rejects settings that would keep the task from ever doing useful work.
    pub fn validate(&self) -> Result<(), crate::SyncError> {
        use crate::SyncError::Configuration;

        if self.bucket.trim().is_empty() {
            return Err(Configuration("bucket name must not be empty".into()));
        }
        if self.interval == 0 {
            return Err(Configuration("interval must be at least 1".into()));
        }
        if self.local_root.as_os_str().is_empty() {
            return Err(Configuration("local directory must not be empty".into()));
        }
        if self.max_attempts == 0 {
            return Err(Configuration("max_attempts must be at least 1".into()));
        }
        if self.log_capacity == 0 {
            return Err(Configuration("log_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

/// Counters for a single cycle; reset every cycle and never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Objects returned by the listing.
    pub files_seen: u64,
    /// Objects classified as new or modified.
    pub files_changed: u64,
    /// Objects downloaded and committed.
    pub files_written: u64,
    /// Objects left alone (unchanged or filtered out).
    pub files_skipped: u64,
    /// Objects that failed after all attempts.
    pub errors: u64,
    /// Bytes written by committed downloads.
    pub bytes_written: u64,
}

/// Lifecycle of the cycle scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Task created, no cycle in flight yet.
    Idle,
    /// A cycle is listing and reconciling objects.
    Running,
    /// Waiting for the next cycle.
    Sleeping,
    /// Stop was requested and the task has exited.
    Stopped,
}
