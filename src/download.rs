//! Object download, verification and key-to-path mapping.

use crate::activity::TEXT_LOG_FILE;
use crate::error::SyncError;
use crate::metadata::{Fingerprint, METADATA_FILE};
use crate::store::ObjectStore;
use crate::types::RemoteObjectRecord;
use crate::verify::{compute_file_md5, verify_size};
use crate::versioning::VERSIONS_DIR;
use chrono::Utc;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Where a key lands under the mirror root.
///
/// # Arguments
///
/// * `root` - Local mirror directory
/// * `prefix` - Bucket prefix stripped from the key
/// * `key` - Remote object key
///
/// # Returns
///
/// The destination path, `Ok(None)` for keys that are not mirrored (the
/// prefix itself, directory markers ending in `/`, and names the engine
/// keeps for itself at the root), or `UnsafeKey` for keys that would
/// escape the root.
pub fn local_path_for(root: &Path, prefix: &str, key: &str) -> Result<Option<PathBuf>, SyncError> {
    let relative = key.strip_prefix(prefix).unwrap_or(key).trim_start_matches('/');
    if relative.is_empty() || relative.ends_with('/') {
        return Ok(None);
    }

    let mut path = root.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                if depth == 0 && is_reserved(&part.to_string_lossy()) {
                    return Ok(None);
                }
                depth += 1;
                path.push(part)
            }
            Component::CurDir => {}
            _ => return Err(SyncError::UnsafeKey(key.to_string())),
        }
    }
    Ok(Some(path))
}

/// Root-level names owned by the engine: metadata, its temp file, the text
/// log and the archive directory.
fn is_reserved(name: &str) -> bool {
    name == METADATA_FILE
        || name.strip_suffix(".tmp") == Some(METADATA_FILE)
        || name == TEXT_LOG_FILE
        || name == VERSIONS_DIR
}

/// Hidden sibling the body is streamed into before it replaces `destination`.
fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{}.part", name))
}

/// Per-download settings.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FetchOptions {
    pub compute_hash: bool,
    pub cycle_number: u64,
}

/// Downloads one object into `destination` and returns its fingerprint.
///
/// The body goes to a partial file first. It is only renamed over the
/// destination once its size equals `remote.size`; on any failure the
/// partial file is removed and no fingerprint is produced.
///
/// # Arguments
///
/// * `store` - Provider the body is fetched from
/// * `bucket` - Bucket holding the object
/// * `remote` - Listed record; its size is the expected length
/// * `destination` - Final local path
/// * `options` - Hashing switch and the cycle number to record
///
/// # Returns
///
/// The fingerprint to commit, or the first download or verification error.
pub(crate) async fn fetch_object(
    store: &dyn ObjectStore,
    bucket: &str,
    remote: &RemoteObjectRecord,
    destination: &Path,
    options: FetchOptions,
) -> Result<Fingerprint, SyncError> {
    // Create parent directory if needed
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let partial = partial_path(destination);
    let result = write_verified(store, bucket, remote, &partial, options).await;
    let fingerprint = match result {
        Ok(fingerprint) => fingerprint,
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
    };

    tokio::fs::rename(&partial, destination).await?;
    debug!("Committed {} -> {}", remote.key, destination.display());
    Ok(fingerprint)
}

async fn write_verified(
    store: &dyn ObjectStore,
    bucket: &str,
    remote: &RemoteObjectRecord,
    partial: &Path,
    options: FetchOptions,
) -> Result<Fingerprint, SyncError> {
    store.download_object(bucket, &remote.key, partial).await?;
    let size = verify_size(&remote.key, partial, remote.size).await?;

    let content_hash = if options.compute_hash {
        Some(compute_file_md5(partial).await?)
    } else {
        None
    };

    Ok(Fingerprint {
        last_modified: remote.last_modified,
        etag: remote.etag.clone(),
        size,
        content_hash,
        recorded_at: Utc::now(),
        cycle_number: options.cycle_number,
    })
}
