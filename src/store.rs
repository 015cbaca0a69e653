//! Storage provider boundary and paginated object listing.

use crate::config::StoreConfig;
use crate::error::SyncError;
use crate::types::RemoteObjectRecord;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream, TryStreamExt};
use std::path::Path;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

/// One page of a bucket listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    /// Objects on this page, in provider order.
    pub objects: Vec<RemoteObjectRecord>,
    /// Token for the next page; `None` on the last page.
    pub next_token: Option<String>,
}

/// The operations the engine needs from a storage provider.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches one listing page under `prefix`, continuing from `continuation`.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ObjectPage, SyncError>;

    /// Streams the object body into `destination`, returning the bytes written.
    async fn download_object(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
    ) -> Result<u64, SyncError>;
}

/// Lazily lists every object under `prefix`, fetching pages on demand.
///
/// The stream ends after the page without a continuation token. A failed
/// page request yields one error item; calling again restarts from the top.
pub fn list_objects<'a>(
    store: &'a dyn ObjectStore,
    bucket: &'a str,
    prefix: &'a str,
) -> impl Stream<Item = Result<RemoteObjectRecord, SyncError>> + Send + 'a {
    stream::try_unfold(Some(None::<String>), move |state| async move {
        let Some(token) = state else {
            return Ok(None);
        };
        let page = store.list_page(bucket, prefix, token).await?;
        debug!(
            "Listed {} objects from s3://{}/{}",
            page.objects.len(),
            bucket,
            prefix
        );
        let next_state = page.next_token.map(Some);
        Ok::<_, SyncError>(Some((page.objects, next_state)))
    })
    .map_ok(|objects| stream::iter(objects.into_iter().map(Ok::<_, SyncError>)))
    .try_flatten()
}

/// [`ObjectStore`] backed by the AWS SDK, usable with any S3-compatible endpoint.
#[derive(Clone)]
pub struct S3Store {
    client: S3Client,
}

impl S3Store {
    /// Builds a client from explicit credentials.
    pub async fn connect(config: &StoreConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "s3mirror",
        );

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .endpoint_url(endpoint)
                .force_path_style(config.force_path_style.unwrap_or(true));
        } else if let Some(path_style) = config.force_path_style {
            builder = builder.force_path_style(path_style);
        }

        Self {
            client: S3Client::from_conf(builder.build()),
        }
    }

    /// Wraps an already configured client.
    pub fn from_client(client: S3Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ObjectPage, SyncError> {
        let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
        if let Some(token) = continuation {
            request = request.continuation_token(token);
        }

        let response = request.send().await.map_err(|e| {
            SyncError::Network(format!(
                "listing s3://{}/{} failed: {}",
                bucket,
                prefix,
                DisplayErrorContext(&e)
            ))
        })?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?.to_string();
                let last_modified = obj
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                Some(RemoteObjectRecord {
                    key,
                    last_modified,
                    etag: normalize_etag(obj.e_tag().unwrap_or_default()),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                })
            })
            .collect();

        let next_token = if response.is_truncated() == Some(true) {
            response.next_continuation_token().map(|s| s.to_string())
        } else {
            None
        };

        Ok(ObjectPage {
            objects,
            next_token,
        })
    }

    async fn download_object(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
    ) -> Result<u64, SyncError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                SyncError::Network(format!(
                    "downloading s3://{}/{} failed: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;

        let mut file = BufWriter::new(tokio::fs::File::create(destination).await?);
        let mut body = output.body;
        let mut written = 0u64;

        while let Some(chunk) = body.try_next().await.map_err(|e| {
            SyncError::Network(format!("reading body of s3://{}/{}: {}", bucket, key, e))
        })? {
            written += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(written)
    }
}

/// Strips the quotes S3 puts around ETags.
pub fn normalize_etag(raw: &str) -> String {
    raw.trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{object, MemoryStore};

    #[tokio::test]
    async fn listing_pages_through_every_object_in_order() {
        let store = MemoryStore::with_page_size(2);
        for name in ["p/a", "p/b", "p/c", "p/d", "p/e", "other/x"] {
            store.put(object(name, "etag", 1), b"x".to_vec());
        }

        let keys: Vec<String> = list_objects(&store, "bucket", "p/")
            .map_ok(|record| record.key)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(keys, vec!["p/a", "p/b", "p/c", "p/d", "p/e"]);
        assert_eq!(store.list_calls(), 3);
    }

    #[tokio::test]
    async fn listing_error_surfaces_and_restart_begins_again() {
        let store = MemoryStore::with_page_size(1);
        store.put(object("a", "e", 1), b"x".to_vec());
        store.put(object("b", "e", 1), b"y".to_vec());
        store.fail_next_lists(1);

        let first: Result<Vec<_>, _> = list_objects(&store, "bucket", "").try_collect().await;
        assert!(matches!(first, Err(SyncError::Network(_))));

        let second: Vec<_> = list_objects(&store, "bucket", "")
            .try_collect()
            .await
            .unwrap();
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn etag_quotes_are_removed() {
        assert_eq!(normalize_etag("\"abc-2\""), "abc-2");
        assert_eq!(normalize_etag("plain"), "plain");
    }
}
