//! In-memory [`ObjectStore`] with failure injection, for engine tests.

use crate::error::SyncError;
use crate::store::{ObjectPage, ObjectStore};
use crate::types::RemoteObjectRecord;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

/// Builds a record with a fixed modification time.
pub(crate) fn object(key: &str, etag: &str, size: u64) -> RemoteObjectRecord {
    object_at(key, etag, size, ts(1_700_000_000))
}

pub(crate) fn object_at(
    key: &str,
    etag: &str,
    size: u64,
    last_modified: DateTime<Utc>,
) -> RemoteObjectRecord {
    RemoteObjectRecord {
        key: key.to_string(),
        last_modified,
        etag: etag.to_string(),
        size,
    }
}

pub(crate) fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, (RemoteObjectRecord, Vec<u8>)>,
    list_failures: u32,
    list_calls: u32,
    failing_list_call: Option<u32>,
    download_failures: HashMap<String, u32>,
    short_writes: HashMap<String, u32>,
    downloads: HashMap<String, u32>,
}

pub(crate) struct MemoryStore {
    page_size: usize,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::with_page_size(1000)
    }

    pub(crate) fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Inserts or replaces an object.
    pub(crate) fn put(&self, record: RemoteObjectRecord, body: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner.objects.insert(record.key.clone(), (record, body));
    }

    /// Makes the next `n` listing calls fail.
    pub(crate) fn fail_next_lists(&self, n: u32) {
        self.inner.lock().unwrap().list_failures = n;
    }

    /// Makes the `n`-th listing call from now fail (1-based).
    pub(crate) fn fail_list_call(&self, n: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.failing_list_call = Some(inner.list_calls + n);
    }

    /// Makes the next `n` downloads of `key` fail outright.
    pub(crate) fn fail_downloads(&self, key: &str, n: u32) {
        self.inner
            .lock()
            .unwrap()
            .download_failures
            .insert(key.to_string(), n);
    }

    /// Makes the next `n` downloads of `key` write one byte less than the body.
    pub(crate) fn truncate_downloads(&self, key: &str, n: u32) {
        self.inner
            .lock()
            .unwrap()
            .short_writes
            .insert(key.to_string(), n);
    }

    /// Download attempts made for `key`, successful or not.
    pub(crate) fn downloads_of(&self, key: &str) -> u32 {
        self.inner
            .lock()
            .unwrap()
            .downloads
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn total_downloads(&self) -> u32 {
        self.inner.lock().unwrap().downloads.values().sum()
    }

    pub(crate) fn list_calls(&self) -> u32 {
        self.inner.lock().unwrap().list_calls
    }
}

fn take_one(counter: Option<&mut u32>) -> bool {
    match counter {
        Some(n) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_page(
        &self,
        _bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ObjectPage, SyncError> {
        let mut inner = self.inner.lock().unwrap();
        inner.list_calls += 1;
        if inner.failing_list_call == Some(inner.list_calls) {
            return Err(SyncError::Network("injected listing failure".into()));
        }
        if inner.list_failures > 0 {
            inner.list_failures -= 1;
            return Err(SyncError::Network("injected listing failure".into()));
        }

        let mut matching = inner
            .objects
            .values()
            .map(|(record, _)| record)
            .filter(|r| r.key.starts_with(prefix))
            .filter(|r| continuation.as_deref().map_or(true, |after| r.key.as_str() > after));

        let objects: Vec<RemoteObjectRecord> =
            matching.by_ref().take(self.page_size).cloned().collect();
        let next_token = match (matching.next(), objects.last()) {
            (Some(_), Some(last)) => Some(last.key.clone()),
            _ => None,
        };

        Ok(ObjectPage {
            objects,
            next_token,
        })
    }

    async fn download_object(
        &self,
        _bucket: &str,
        key: &str,
        destination: &Path,
    ) -> Result<u64, SyncError> {
        let body = {
            let mut inner = self.inner.lock().unwrap();
            *inner.downloads.entry(key.to_string()).or_insert(0) += 1;

            if take_one(inner.download_failures.get_mut(key)) {
                return Err(SyncError::Network(format!("injected failure for {}", key)));
            }
            let truncate = take_one(inner.short_writes.get_mut(key));
            let Some((_, body)) = inner.objects.get(key) else {
                return Err(SyncError::Network(format!("NoSuchKey: {}", key)));
            };
            if truncate {
                body[..body.len().saturating_sub(1)].to_vec()
            } else {
                body.clone()
            }
        };

        tokio::fs::write(destination, &body).await?;
        Ok(body.len() as u64)
    }
}
