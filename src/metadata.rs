//! Persisted per-root fingerprint document (`.backup_metadata.json`).

use crate::error::SyncError;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the metadata document inside a mirror root.
pub const METADATA_FILE: &str = ".backup_metadata.json";

/// Fingerprint recorded after a verified download.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Remote modification time at download.
    #[serde(deserialize_with = "stored_time::required")]
    pub last_modified: DateTime<Utc>,
    /// Remote ETag at download, quotes stripped.
    pub etag: String,
    /// Verified local size in bytes.
    pub size: u64,
    /// MD5 of the downloaded file, if hashing was enabled.
    #[serde(rename = "hash", default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// When the download was committed.
    #[serde(
        alias = "downloaded_at",
        alias = "backed_up_at",
        deserialize_with = "stored_time::required"
    )]
    pub recorded_at: DateTime<Utc>,
    /// Cycle that committed this entry.
    #[serde(default, alias = "backup_count")]
    pub cycle_number: u64,
}

/// Stored state for one object key.
///
/// Older documents stored only the remote timestamp; those entries are kept
/// as [`FingerprintEntry::Legacy`] and compared on timestamp alone.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum FingerprintEntry {
    Full(Fingerprint),
    Legacy(#[serde(deserialize_with = "stored_time::required")] DateTime<Utc>),
}

impl FingerprintEntry {
    pub fn last_modified(&self) -> DateTime<Utc> {
        match self {
            FingerprintEntry::Full(fp) => fp.last_modified,
            FingerprintEntry::Legacy(ts) => *ts,
        }
    }

    pub fn cycle_number(&self) -> u64 {
        match self {
            FingerprintEntry::Full(fp) => fp.cycle_number,
            FingerprintEntry::Legacy(_) => 0,
        }
    }
}

/// On-disk shape of the metadata file.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataDocument {
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(
        rename = "last_backup",
        default,
        deserialize_with = "stored_time::optional"
    )]
    pub last_cycle_at: Option<DateTime<Utc>>,
    #[serde(rename = "files", default)]
    pub entries: BTreeMap<String, FingerprintEntry>,
}

impl MetadataDocument {
    /// Highest cycle number recorded in any entry.
    pub fn last_cycle_number(&self) -> u64 {
        self.entries
            .values()
            .map(FingerprintEntry::cycle_number)
            .max()
            .unwrap_or(0)
    }
}

/// Timestamp parsing for documents written by older tools.
///
/// Accepts RFC 3339, the `YYYY-MM-DD HH:MM:SS+00:00` form, and offset-less
/// ISO 8601 which is read as local time.
mod stored_time {
    use super::*;
    use serde::de::Error;

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
            return Some(t.with_timezone(&Utc));
        }
        if let Ok(t) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
            return Some(t.with_timezone(&Utc));
        }
        let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|t| t.with_timezone(&Utc))
    }

    pub(super) fn required<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("unrecognized timestamp '{}'", raw)))
    }

    pub(super) fn optional<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("unrecognized timestamp '{}'", raw))),
            None => Ok(None),
        }
    }
}

/// Owns the metadata document of one mirror root for the lifetime of a task.
#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    document: MetadataDocument,
}

impl MetadataStore {
    /// Loads the document under `root`.
    ///
    /// A missing or unreadable document yields an empty one; this never fails.
    pub async fn load(root: &Path, bucket: &str, prefix: &str) -> Self {
        let path = root.join(METADATA_FILE);

        let mut document = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<MetadataDocument>(&content) {
                Ok(document) => {
                    info!(
                        "Loaded {} fingerprints from {}",
                        document.entries.len(),
                        path.display()
                    );
                    document
                }
                Err(e) => {
                    warn!("Ignoring malformed metadata {}: {}", path.display(), e);
                    MetadataDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No metadata at {}, starting empty", path.display());
                MetadataDocument::default()
            }
            Err(e) => {
                warn!("Failed to read metadata {}: {}", path.display(), e);
                MetadataDocument::default()
            }
        };

        document.bucket = bucket.to_string();
        document.prefix = prefix.to_string();

        Self { path, document }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &MetadataDocument {
        &self.document
    }

    pub fn entry(&self, key: &str) -> Option<&FingerprintEntry> {
        self.document.entries.get(key)
    }

    /// Records a verified download, replacing any previous entry for `key`.
    pub fn commit(&mut self, key: &str, fingerprint: Fingerprint) {
        self.document
            .entries
            .insert(key.to_string(), FingerprintEntry::Full(fingerprint));
    }

    /// Rewrites the whole document, stamping `last_backup` with `now`.
    ///
    /// The file is written to a temporary sibling and renamed into place.
    pub async fn save(&mut self, now: DateTime<Utc>) -> Result<(), SyncError> {
        self.document.last_cycle_at = Some(now);
        let json = serde_json::to_string_pretty(&self.document)?;

        let persist = |source| SyncError::Persistence {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(persist)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(persist)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(persist)?;

        debug!(
            "Persisted {} fingerprints to {}",
            self.document.entries.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ts;

    fn fingerprint(etag: &str, cycle: u64) -> Fingerprint {
        Fingerprint {
            last_modified: ts(1_700_000_000),
            etag: etag.to_string(),
            size: 42,
            content_hash: Some("d41d8cd98f00b204e9800998ecf8427e".into()),
            recorded_at: ts(1_700_000_100),
            cycle_number: cycle,
        }
    }

    #[tokio::test]
    async fn missing_document_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::load(dir.path(), "bucket", "p/").await;
        assert!(store.document().entries.is_empty());
        assert_eq!(store.document().bucket, "bucket");
        assert_eq!(store.path(), dir.path().join(METADATA_FILE));
    }

    #[tokio::test]
    async fn corrupt_document_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), "{ not json").unwrap();
        let store = MetadataStore::load(dir.path(), "bucket", "").await;
        assert!(store.document().entries.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_preserves_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MetadataStore::load(dir.path(), "bucket", "p/").await;
        store.commit("p/a.txt", fingerprint("e1", 3));
        let mut no_hash = fingerprint("e2", 4);
        no_hash.content_hash = None;
        store.commit("p/b.txt", no_hash);
        store.save(ts(1_700_000_200)).await.unwrap();

        let reloaded = MetadataStore::load(dir.path(), "bucket", "p/").await;
        assert_eq!(reloaded.document(), store.document());
        assert_eq!(reloaded.document().last_cycle_at, Some(ts(1_700_000_200)));
        assert_eq!(reloaded.document().last_cycle_number(), 4);
        assert!(!dir.path().join(".backup_metadata.json.tmp").exists());
    }

    #[test]
    fn document_uses_external_field_names() {
        let mut document = MetadataDocument {
            bucket: "b".into(),
            prefix: "p".into(),
            last_cycle_at: Some(ts(0)),
            entries: BTreeMap::new(),
        };
        document
            .entries
            .insert("k".into(), FingerprintEntry::Full(fingerprint("e", 1)));

        let value: serde_json::Value = serde_json::to_value(&document).unwrap();
        assert!(value.get("last_backup").is_some());
        assert_eq!(value["files"]["k"]["etag"], "e");
        assert_eq!(value["files"]["k"]["hash"], "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn legacy_and_older_field_names_are_accepted() {
        let raw = r#"{
            "bucket": "b",
            "prefix": "",
            "last_backup": "2024-01-01T00:00:00Z",
            "files": {
                "old.txt": "2023-11-14T22:13:20Z",
                "new.txt": {
                    "last_modified": "2023-11-14T22:13:20Z",
                    "etag": "abc",
                    "size": 3,
                    "hash": "900150983cd24fb0d6963f7d28e17f72",
                    "backed_up_at": "2024-01-01T00:00:00Z",
                    "backup_count": 7
                }
            }
        }"#;
        let document: MetadataDocument = serde_json::from_str(raw).unwrap();

        assert_eq!(
            document.entries["old.txt"],
            FingerprintEntry::Legacy(ts(1_700_000_000))
        );
        match &document.entries["new.txt"] {
            FingerprintEntry::Full(fp) => {
                assert_eq!(fp.etag, "abc");
                assert_eq!(fp.cycle_number, 7);
            }
            other => panic!("expected full entry, got {:?}", other),
        }
        assert_eq!(document.last_cycle_number(), 7);
    }

    fn local_to_utc(raw: &str) -> DateTime<Utc> {
        let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").unwrap();
        Local
            .from_local_datetime(&naive)
            .earliest()
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn offsetless_timestamps_from_older_documents_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let raw = r#"{
            "bucket": "b",
            "prefix": "",
            "last_backup": "2024-01-01T12:00:00.123456",
            "files": {
                "report.txt": {
                    "last_modified": "2023-12-31 08:30:00+00:00",
                    "etag": "abc",
                    "size": 3,
                    "hash": "900150983cd24fb0d6963f7d28e17f72",
                    "downloaded_at": "2024-01-01T12:00:00.123456"
                },
                "old.txt": "2023-11-14T22:13:20"
            }
        }"#;
        std::fs::write(dir.path().join(METADATA_FILE), raw).unwrap();

        let store = MetadataStore::load(dir.path(), "b", "").await;
        let document = store.document();

        assert_eq!(document.entries.len(), 2);
        assert_eq!(
            document.last_cycle_at,
            Some(local_to_utc("2024-01-01T12:00:00.123456"))
        );
        match &document.entries["report.txt"] {
            FingerprintEntry::Full(fp) => {
                assert_eq!(fp.etag, "abc");
                assert_eq!(fp.last_modified, Utc.with_ymd_and_hms(2023, 12, 31, 8, 30, 0).unwrap());
                assert_eq!(fp.recorded_at, local_to_utc("2024-01-01T12:00:00.123456"));
                assert_eq!(fp.cycle_number, 0);
            }
            other => panic!("expected full entry, got {:?}", other),
        }
        assert_eq!(
            document.entries["old.txt"],
            FingerprintEntry::Legacy(local_to_utc("2023-11-14T22:13:20"))
        );
    }

    #[test]
    fn unparseable_timestamps_still_make_the_document_malformed() {
        let raw = r#"{"files": {"a": "yesterday"}}"#;
        assert!(serde_json::from_str::<MetadataDocument>(raw).is_err());
    }
}
