//! Activity reporting: tracing events, a bounded log channel for the
//! foreground, the backup text log, and cumulative counters.

use crate::error::SyncError;
use chrono::{DateTime, Local, TimeZone, Utc};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// File name of the append-only backup log inside a mirror root.
pub const TEXT_LOG_FILE: &str = "backup_log.txt";

/// Counters accumulated over the lifetime of a task.
#[derive(Debug, Default)]
pub struct SyncCounters {
    files_checked: AtomicU64,
    files_downloaded: AtomicU64,
    files_skipped: AtomicU64,
    errors: AtomicU64,
    bytes_downloaded: AtomicU64,
    cycles_completed: AtomicU64,
    dropped_log_lines: AtomicU64,
    last_cycle_at: AtomicI64,
}

/// Point-in-time copy of [`SyncCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub files_checked: u64,
    pub files_downloaded: u64,
    pub files_skipped: u64,
    pub errors: u64,
    pub bytes_downloaded: u64,
    pub cycles_completed: u64,
    pub dropped_log_lines: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl SyncCounters {
    pub(crate) fn add_checked(&self) {
        self.files_checked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_downloaded(&self, bytes: u64) {
        self.files_downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn add_skipped(&self) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn finish_cycle(&self, at: DateTime<Utc>) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.last_cycle_at.store(at.timestamp(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncStats {
        let last = self.last_cycle_at.load(Ordering::Relaxed);
        SyncStats {
            files_checked: self.files_checked.load(Ordering::Relaxed),
            files_downloaded: self.files_downloaded.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            dropped_log_lines: self.dropped_log_lines.load(Ordering::Relaxed),
            last_cycle_at: (last > 0)
                .then(|| Utc.timestamp_opt(last, 0).single())
                .flatten(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Level {
    Info,
    Warn,
    Error,
}

/// Append-only text log, opened on first use and kept open.
///
/// A failed write drops the handle so the next line reopens the file.
#[derive(Debug)]
struct TextLog {
    path: PathBuf,
    file: Mutex<Option<LineWriter<File>>>,
}

impl TextLog {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: Mutex::new(None),
        }
    }

    fn append(&self, line: &str) -> Result<(), SyncError> {
        let persist = |source| SyncError::Persistence {
            path: self.path.clone(),
            source,
        };
        let mut guard = self.file.lock().unwrap_or_else(|p| p.into_inner());
        let mut writer = match guard.take() {
            Some(writer) => writer,
            None => {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent).map_err(persist)?;
                }
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .map_err(persist)?;
                LineWriter::new(file)
            }
        };
        writeln!(writer, "{}", line).map_err(persist)?;
        *guard = Some(writer);
        Ok(())
    }
}

/// Engine-side writer. Never blocks on the foreground: a full channel drops
/// the line.
#[derive(Debug)]
pub(crate) struct ActivityLog {
    label: &'static str,
    tx: mpsc::Sender<String>,
    text_log: Option<TextLog>,
    counters: Arc<SyncCounters>,
}

impl ActivityLog {
    pub(crate) fn new(
        label: &'static str,
        tx: mpsc::Sender<String>,
        text_log_root: Option<&Path>,
        counters: Arc<SyncCounters>,
    ) -> Self {
        Self {
            label,
            tx,
            text_log: text_log_root.map(|root| TextLog::new(root.join(TEXT_LOG_FILE))),
            counters,
        }
    }

    pub(crate) fn counters(&self) -> &SyncCounters {
        &self.counters
    }

    pub(crate) fn info(&self, message: impl Into<String>) {
        self.emit(Level::Info, message.into());
    }

    pub(crate) fn warn(&self, message: impl Into<String>) {
        self.emit(Level::Warn, message.into());
    }

    pub(crate) fn error(&self, message: impl Into<String>) {
        self.emit(Level::Error, message.into());
    }

    fn emit(&self, level: Level, message: String) {
        match level {
            Level::Info => info!(mode = self.label, "{}", message),
            Level::Warn => warn!(mode = self.label, "{}", message),
            Level::Error => error!(mode = self.label, "{}", message),
        }

        let line = match &self.text_log {
            Some(text_log) => {
                let line = format!("[{}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), message);
                if let Err(e) = text_log.append(&line) {
                    warn!(mode = self.label, "{}", e);
                    self.push(format!("Log write error: {}", e));
                }
                line
            }
            None => message,
        };
        self.push(line);
    }

    fn push(&self, line: String) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(line) {
            self.counters
                .dropped_log_lines
                .fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Foreground side of the log channel, keeping the most recent lines.
#[derive(Debug)]
pub struct LogTail {
    rx: mpsc::Receiver<String>,
    lines: VecDeque<String>,
    capacity: usize,
}

impl LogTail {
    pub(crate) fn new(rx: mpsc::Receiver<String>, capacity: usize) -> Self {
        Self {
            rx,
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Moves every pending line into the tail and returns the new ones.
    pub fn drain(&mut self) -> Vec<String> {
        let mut fresh = Vec::new();
        while let Ok(line) = self.rx.try_recv() {
            if self.lines.len() == self.capacity {
                self.lines.pop_front();
            }
            self.lines.push_back(line.clone());
            fresh.push(line);
        }
        fresh
    }

    /// Most recent lines, oldest first.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }
}

/// Creates a connected writer/reader pair holding up to `capacity` lines.
pub(crate) fn channel(
    label: &'static str,
    capacity: usize,
    text_log_root: Option<&Path>,
    counters: Arc<SyncCounters>,
) -> (ActivityLog, LogTail) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        ActivityLog::new(label, tx, text_log_root, counters),
        LogTail::new(rx, capacity),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_recent_lines_and_counts_drops() {
        let counters = Arc::new(SyncCounters::default());
        let (log, mut tail) = channel("monitor", 2, None, counters.clone());

        log.info("one");
        log.warn("two");
        log.error("three");

        assert_eq!(tail.drain(), vec!["one", "two"]);
        assert_eq!(counters.snapshot().dropped_log_lines, 1);

        log.info("four");
        tail.drain();
        assert_eq!(tail.lines().collect::<Vec<_>>(), vec!["two", "four"]);
    }

    #[test]
    fn text_log_lines_carry_a_timestamp_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let counters = Arc::new(SyncCounters::default());
        let (log, mut tail) = channel("backup", 8, Some(dir.path()), counters);

        log.info("Backed up a.txt");
        log.info("Backed up b.txt");

        let content = std::fs::read_to_string(dir.path().join(TEXT_LOG_FILE)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            // [YYYY-MM-DD HH:MM:SS] message
            assert_eq!(&line[0..1], "[");
            assert_eq!(&line[20..22], "] ");
            assert!(chrono::NaiveDateTime::parse_from_str(&line[1..20], "%Y-%m-%d %H:%M:%S").is_ok());
        }
        assert!(lines[1].ends_with("Backed up b.txt"));
        assert_eq!(tail.drain().len(), 2);
    }

    #[test]
    fn unwritable_text_log_reports_and_keeps_going() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(TEXT_LOG_FILE)).unwrap();
        let counters = Arc::new(SyncCounters::default());
        let (log, mut tail) = channel("backup", 8, Some(dir.path()), counters);

        log.info("Backed up a.txt");

        let lines = tail.drain();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Log write error:"));
        assert!(lines[1].ends_with("Backed up a.txt"));
    }

    #[test]
    fn snapshot_reflects_counter_updates() {
        let counters = SyncCounters::default();
        assert_eq!(counters.snapshot().last_cycle_at, None);

        counters.add_checked();
        counters.add_downloaded(10);
        counters.add_error();
        counters.finish_cycle(Utc.timestamp_opt(1_700_000_000, 0).unwrap());

        let stats = counters.snapshot();
        assert_eq!(stats.files_checked, 1);
        assert_eq!(stats.files_downloaded, 1);
        assert_eq!(stats.bytes_downloaded, 10);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.cycles_completed, 1);
        assert_eq!(stats.last_cycle_at.map(|t| t.timestamp()), Some(1_700_000_000));
    }
}
