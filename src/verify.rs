//! File verification utilities (size checks and MD5 content hashes).

use crate::error::SyncError;
use std::path::{Path, PathBuf};

/// Computes the MD5 hash of a local file.
///
/// This function reads the file in chunks to avoid loading large files
/// entirely into memory. It runs in a blocking task to avoid blocking
/// the async runtime.
///
/// # Arguments
///
/// * `path` - Path to the file
///
/// # Returns
///
/// The MD5 hash as a lowercase hexadecimal string, or an error.
pub(crate) async fn compute_file_md5(path: &Path) -> Result<String, SyncError> {
    let path: PathBuf = path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        use md5::{Digest, Md5};
        use std::io::Read;

        let file = std::fs::File::open(&path)?;
        let mut reader = std::io::BufReader::with_capacity(1024 * 1024, file);
        let mut hasher = Md5::new();
        let mut buffer = vec![0u8; 1024 * 1024];

        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok::<String, SyncError>(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| SyncError::IoError(std::io::Error::other(format!("Task join error: {}", e))))?
}

/// Checks that the file at `path` is exactly `expected` bytes long.
///
/// # Arguments
///
/// * `key` - Object key, used in the error
/// * `path` - Downloaded file
/// * `expected` - Size reported by the listing
///
/// # Returns
///
/// The size on success; a mismatch is an [`SyncError::Integrity`] error.
pub(crate) async fn verify_size(key: &str, path: &Path, expected: u64) -> Result<u64, SyncError> {
    let actual = tokio::fs::metadata(path).await?.len();
    if actual != expected {
        return Err(SyncError::Integrity {
            key: key.to_string(),
            expected,
            actual,
        });
    }
    Ok(actual)
}
