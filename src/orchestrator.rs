//! Cycle scheduling: list, classify, download, commit, persist, sleep.

use crate::activity::{self, ActivityLog, LogTail, SyncCounters};
use crate::detect::{classify, ChangeKind};
use crate::download::{fetch_object, local_path_for, FetchOptions};
use crate::error::SyncError;
use crate::metadata::MetadataStore;
use crate::retry::{with_retries, CycleBackoff};
use crate::store::{list_objects, ObjectStore};
use crate::types::{CycleStats, ModePolicy, RemoteObjectRecord, SchedulerState, SyncConfig, SyncMode};
use crate::versioning::{archive_existing, VERSIONS_DIR};
use chrono::{Local, Utc};
use futures_util::TryStreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// How a single pass over the listing ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PassOutcome {
    Completed,
    Interrupted,
}

/// Result of one scheduled cycle, after metadata has been persisted.
#[derive(Debug)]
pub(crate) struct CycleReport {
    pub stats: CycleStats,
    pub outcome: Result<PassOutcome, SyncError>,
}

/// One mirror task: owns the store handle, the config and the activity log.
pub(crate) struct SyncTask {
    store: Arc<dyn ObjectStore>,
    config: SyncConfig,
    policy: ModePolicy,
    log: ActivityLog,
    cancel: CancellationToken,
    state: watch::Sender<SchedulerState>,
}

impl SyncTask {
    /// Builds a task together with the foreground ends of its channels.
    pub(crate) fn new(
        store: Arc<dyn ObjectStore>,
        config: SyncConfig,
        cancel: CancellationToken,
    ) -> (Self, LogTail, watch::Receiver<SchedulerState>, Arc<SyncCounters>) {
        let policy = config.policy();
        let counters = Arc::new(SyncCounters::default());
        let label = match config.mode {
            SyncMode::Monitor => "monitor",
            SyncMode::Backup => "backup",
        };
        let text_log_root = policy.text_log.then_some(config.local_root.as_path());
        let (log, tail) =
            activity::channel(label, config.log_capacity, text_log_root, counters.clone());
        let (state, state_rx) = watch::channel(SchedulerState::Idle);

        let task = Self {
            store,
            config,
            policy,
            log,
            cancel,
            state,
        };
        (task, tail, state_rx, counters)
    }

    fn is_backup(&self) -> bool {
        self.config.mode == SyncMode::Backup
    }

    /// Runs cycles until the cancellation token fires.
    pub(crate) async fn run(self) {
        let config = &self.config;
        let mut metadata =
            MetadataStore::load(&config.local_root, &config.bucket, &config.prefix).await;
        let mut backoff = CycleBackoff::new(
            config.interval,
            self.policy.failure_threshold,
            self.policy.interval_ceiling,
        );
        let mut cycle = metadata.document().last_cycle_number();

        if self.is_backup() {
            self.log.info(format!(
                "Started backup from bucket '{}' (prefix: '{}') every {} minutes.",
                config.bucket, config.prefix, config.interval
            ));
            self.log
                .info(format!("Backup folder: {}", config.local_root.display()));
            self.log.info(format!(
                "Log file: {}",
                config.local_root.join(activity::TEXT_LOG_FILE).display()
            ));
        } else {
            self.log.info(format!(
                "Started monitoring bucket '{}' (prefix: '{}') every {} seconds.",
                config.bucket, config.prefix, config.interval
            ));
        }

        while !self.cancel.is_cancelled() {
            cycle += 1;
            let report = self.run_cycle(&mut metadata, &mut backoff, cycle).await;
            if matches!(report.outcome, Ok(PassOutcome::Interrupted)) || self.cancel.is_cancelled()
            {
                break;
            }

            self.state.send_replace(SchedulerState::Sleeping);
            if !sleep_or_cancel(backoff.interval(), self.policy.time_unit, &self.cancel).await {
                break;
            }
        }

        self.state.send_replace(SchedulerState::Stopped);
        if self.is_backup() {
            self.log.info("Stopped backup process.");
        } else {
            self.log.info("Stopped S3 monitoring.");
        }
    }

    /// Executes one pass, persists the document whatever the outcome, and
    /// updates the cycle backoff.
    pub(crate) async fn run_cycle(
        &self,
        metadata: &mut MetadataStore,
        backoff: &mut CycleBackoff,
        cycle: u64,
    ) -> CycleReport {
        self.state.send_replace(SchedulerState::Running);
        let started = Instant::now();
        if self.is_backup() {
            self.log.info(format!("=== Backup #{} started ===", cycle));
        }

        let mut stats = CycleStats::default();
        let outcome = self.run_pass(metadata, &mut stats, cycle).await;

        if let Err(e) = metadata.save(Utc::now()).await {
            self.log.error(format!("Error saving metadata: {}", e));
            self.log.counters().add_error();
        }
        self.log.counters().finish_cycle(Utc::now());

        let unit = self.config.mode.unit_name();
        match &outcome {
            Ok(PassOutcome::Completed) => {
                backoff.record_success();
                self.summarize(cycle, &stats, started.elapsed(), backoff.interval());
            }
            Ok(PassOutcome::Interrupted) => {
                if self.is_backup() {
                    self.log.info("Backup stopped by user request");
                } else {
                    self.log.info("Monitoring stopped by user request");
                }
            }
            Err(e) => {
                self.log.counters().add_error();
                let attempt = backoff.consecutive_failures() + 1;
                let what = if self.is_backup() { "Backup" } else { "Monitor" };
                self.log.error(format!(
                    "✗ {} error ({}/{}): {}",
                    what,
                    attempt,
                    backoff.threshold(),
                    e
                ));
                if let Some(interval) = backoff.record_failure() {
                    self.log.warn(format!(
                        "⚠ Too many errors, increasing interval to {} {}",
                        interval, unit
                    ));
                }
            }
        }

        CycleReport { stats, outcome }
    }

    async fn run_pass(
        &self,
        metadata: &mut MetadataStore,
        stats: &mut CycleStats,
        cycle: u64,
    ) -> Result<PassOutcome, SyncError> {
        let objects = list_objects(self.store.as_ref(), &self.config.bucket, &self.config.prefix);
        futures_util::pin_mut!(objects);

        while let Some(remote) = objects.try_next().await? {
            if self.cancel.is_cancelled() {
                return Ok(PassOutcome::Interrupted);
            }
            stats.files_seen += 1;
            self.log.counters().add_checked();
            self.reconcile(metadata, stats, &remote, cycle).await;
        }
        Ok(PassOutcome::Completed)
    }

    async fn reconcile(
        &self,
        metadata: &mut MetadataStore,
        stats: &mut CycleStats,
        remote: &RemoteObjectRecord,
        cycle: u64,
    ) {
        let config = &self.config;
        if config.verbose && !self.is_backup() {
            self.log.info(format!(
                "Checked: {} (Modified: {}, Size: {})",
                remote.key, remote.last_modified, remote.size
            ));
        }

        let destination = match local_path_for(&config.local_root, &config.prefix, &remote.key) {
            Ok(Some(path)) => path,
            Ok(None) => {
                self.skip(stats);
                return;
            }
            Err(e) => {
                self.log.error(format!("✗ {}", e));
                self.fail(stats);
                return;
            }
        };

        if !extension_allowed(config.allowed_extensions.as_deref(), &remote.key) {
            if config.verbose {
                self.log
                    .info(format!("Skipping {} - unsupported file type", remote.key));
            }
            self.skip(stats);
            return;
        }

        let change = classify(remote, metadata.entry(&remote.key));
        if change == ChangeKind::Unchanged {
            if config.verbose && self.is_backup() {
                self.log.info(format!("Skipped: {} (unchanged)", remote.key));
            }
            self.skip(stats);
            return;
        }
        stats.files_changed += 1;

        if self.policy.versioning {
            self.archive(&destination).await;
        }

        let options = FetchOptions {
            compute_hash: config.compute_hash,
            cycle_number: cycle,
        };
        let max_attempts = config.max_attempts;
        let result = with_retries(
            config.retry_base_delay,
            max_attempts,
            || fetch_object(self.store.as_ref(), &config.bucket, remote, &destination, options),
            |attempt, e| {
                if attempt < max_attempts && e.is_transient() {
                    self.log.warn(format!(
                        "Retry {}/{} for {}: {}",
                        attempt, max_attempts, remote.key, e
                    ));
                }
            },
        )
        .await;

        match result {
            Ok(fingerprint) => {
                let hash = fingerprint
                    .content_hash
                    .as_deref()
                    .map(|h| format!(", Hash: {}...", &h[..h.len().min(8)]))
                    .unwrap_or_default();
                let verb = if self.is_backup() { "Backed up" } else { "Downloaded" };
                self.log.info(format!(
                    "✓ {}: {} -> {} ({}) [Size: {}{}]",
                    verb,
                    remote.key,
                    destination.display(),
                    change.reason(),
                    fingerprint.size,
                    hash
                ));

                stats.files_written += 1;
                stats.bytes_written += fingerprint.size;
                self.log.counters().add_downloaded(fingerprint.size);
                metadata.commit(&remote.key, fingerprint);
            }
            Err(e) if e.is_transient() => {
                self.log.error(format!(
                    "✗ Failed to download {} after {} attempts: {}",
                    remote.key, max_attempts, e
                ));
                self.fail(stats);
            }
            Err(e) => {
                self.log
                    .error(format!("✗ Failed to download {}: {}", remote.key, e));
                self.fail(stats);
            }
        }
    }

    /// Best effort: a failed move is logged and the download goes ahead.
    async fn archive(&self, destination: &Path) {
        let root = &self.config.local_root;
        match archive_existing(root, destination, Local::now()).await {
            Ok(Some(snapshot)) => {
                let name = snapshot
                    .archived_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.log.info(format!(
                    "Versioned backup: {} -> {}/{}",
                    snapshot.original_relative_path.display(),
                    VERSIONS_DIR,
                    name
                ));
            }
            Ok(None) => {}
            Err(e) => {
                let relative = destination.strip_prefix(root).unwrap_or(destination);
                self.log.warn(format!(
                    "Version backup failed for {}: {}",
                    relative.display(),
                    e
                ));
            }
        }
    }

    fn summarize(&self, cycle: u64, stats: &CycleStats, elapsed: Duration, interval: u64) {
        if self.is_backup() {
            let elapsed = Duration::from_millis(elapsed.as_millis() as u64);
            self.log.info(format!("=== Backup #{} completed ===", cycle));
            self.log
                .info(format!("Duration: {}", humantime::format_duration(elapsed)));
            self.log
                .info(format!("Files backed up: {}", stats.files_written));
            self.log.info(format!("Files skipped: {}", stats.files_skipped));
            self.log
                .info(format!("Total size: {} bytes", stats.bytes_written));
            self.log
                .info(format!("Next backup in {} minutes", interval));
        } else if self.config.verbose && stats.files_seen > 0 {
            self.log.info(format!(
                "Scan complete: {} files checked, {} downloaded",
                stats.files_seen, stats.files_written
            ));
        } else {
            tracing::debug!(
                "Cycle {} complete: {} seen, {} downloaded, {} errors",
                cycle,
                stats.files_seen,
                stats.files_written,
                stats.errors
            );
        }
    }

    fn skip(&self, stats: &mut CycleStats) {
        stats.files_skipped += 1;
        self.log.counters().add_skipped();
    }

    fn fail(&self, stats: &mut CycleStats) {
        stats.errors += 1;
        self.log.counters().add_error();
    }
}

fn extension_allowed(allowed: Option<&[String]>, key: &str) -> bool {
    let Some(allowed) = allowed else {
        return true;
    };
    let Some(extension) = Path::new(key).extension() else {
        return false;
    };
    let extension = extension.to_string_lossy();
    allowed
        .iter()
        .any(|a| a.trim_start_matches('.').eq_ignore_ascii_case(&extension))
}

/// Sleeps `units` time units, waking early when `cancel` fires.
///
/// Returns `false` if the sleep was cut short by cancellation.
pub(crate) async fn sleep_or_cancel(units: u64, unit: Duration, cancel: &CancellationToken) -> bool {
    for _ in 0..units {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(unit) => {}
        }
    }
    !cancel.is_cancelled()
}
