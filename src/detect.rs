//! Fingerprint-based change detection.

use crate::metadata::FingerprintEntry;
use crate::types::RemoteObjectRecord;

/// How a listed object relates to what was last downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Never downloaded into this root.
    New,
    /// Timestamp or ETag moved since the last download.
    Modified,
    /// Fingerprint matches; nothing to do.
    Unchanged,
}

impl ChangeKind {
    pub fn needs_download(self) -> bool {
        !matches!(self, ChangeKind::Unchanged)
    }

    pub fn reason(self) -> &'static str {
        match self {
            ChangeKind::New => "new file",
            ChangeKind::Modified => "file modified",
            ChangeKind::Unchanged => "unchanged",
        }
    }
}

/// Classifies `remote` against the stored entry for the same key.
///
/// A divergence in either the timestamp or the ETag counts as a modification.
/// Legacy entries carry no ETag and are compared on the timestamp only.
/// Content hashes are never consulted here.
///
/// # Arguments
///
/// * `remote` - Record from the current listing
/// * `stored` - Entry from the metadata document, if any
///
/// # Returns
///
/// `New` without a stored entry, otherwise `Modified` or `Unchanged`.
pub fn classify(remote: &RemoteObjectRecord, stored: Option<&FingerprintEntry>) -> ChangeKind {
    match stored {
        None => ChangeKind::New,
        Some(FingerprintEntry::Legacy(last_modified)) => {
            if *last_modified != remote.last_modified {
                ChangeKind::Modified
            } else {
                ChangeKind::Unchanged
            }
        }
        Some(FingerprintEntry::Full(fp)) => {
            if fp.last_modified != remote.last_modified || fp.etag != remote.etag {
                ChangeKind::Modified
            } else {
                ChangeKind::Unchanged
            }
        }
    }
}
