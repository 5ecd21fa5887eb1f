//! Append-only raw archive
//!
//! Every fetched page is written here before anything downstream sees it.
//! Objects are write-once, keyed by run and page, and identified by content
//! hash so re-putting identical content is a no-op. The orchestrator treats a
//! page as "fetched" only after the archive acknowledges the write.

use crate::error::{PipelineError, PipelineResult};
use crate::types::SnapshotRef;
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::ArchiveConfig;

/// Durable, content-addressed snapshot storage
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Archive a page payload. Idempotent: identical content for the same
    /// run/page returns the same reference without rewriting.
    async fn put(
        &self,
        run_id: Uuid,
        page_number: u32,
        payload: &[u8],
    ) -> PipelineResult<SnapshotRef>;

    /// Read an archived payload back for replay or debugging
    async fn get(&self, snapshot: &SnapshotRef) -> PipelineResult<Vec<u8>>;

    /// List snapshot references for a run, in page order
    async fn list_run(&self, run_id: Uuid) -> PipelineResult<Vec<SnapshotRef>>;
}

/// S3-backed snapshot store (AWS or MinIO)
#[derive(Clone)]
pub struct S3SnapshotStore {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3SnapshotStore {
    pub async fn new(config: &ArchiveConfig) -> PipelineResult<Self> {
        debug!(bucket = %config.bucket, "Initializing snapshot store");

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "ludex-archive",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style)
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest());

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());

        info!(bucket = %config.bucket, "Snapshot store initialized");

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            prefix: config.key_prefix.clone(),
        })
    }

    fn key(&self, run_id: Uuid, page_number: u32) -> String {
        format!("{}/{}/page-{:05}.json", self.prefix, run_id, page_number)
    }
}

#[async_trait]
impl SnapshotStore for S3SnapshotStore {
    #[instrument(skip(self, payload), fields(bucket = %self.bucket))]
    async fn put(
        &self,
        run_id: Uuid,
        page_number: u32,
        payload: &[u8],
    ) -> PipelineResult<SnapshotRef> {
        let key = self.key(run_id, page_number);
        let sha256 = sha256_hex(payload);

        // Re-putting identical content for the same run/page is a no-op
        if let Ok(head) = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            let existing = head
                .metadata()
                .and_then(|m| m.get("sha256").cloned())
                .unwrap_or_default();
            if existing == sha256 {
                debug!(%key, "Snapshot already archived, skipping write");
                return Ok(SnapshotRef {
                    key,
                    sha256,
                    size: payload.len() as i64,
                });
            }
            return Err(PipelineError::Archive(format!(
                "snapshot {} exists with different content ({} != {})",
                key, existing, sha256
            )));
        }

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("application/json")
            .metadata("sha256", &sha256)
            .body(ByteStream::from(payload.to_vec()))
            .send()
            .await
            .map_err(|e| PipelineError::Archive(format!("failed to archive {}: {}", key, e)))?;

        info!(%key, size = payload.len(), "Archived raw page");

        Ok(SnapshotRef {
            key,
            sha256,
            size: payload.len() as i64,
        })
    }

    #[instrument(skip(self), fields(bucket = %self.bucket, key = %snapshot.key))]
    async fn get(&self, snapshot: &SnapshotRef) -> PipelineResult<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&snapshot.key)
            .send()
            .await
            .map_err(|e| {
                PipelineError::Archive(format!("failed to read {}: {}", snapshot.key, e))
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| {
                PipelineError::Archive(format!("failed to read body of {}: {}", snapshot.key, e))
            })?
            .into_bytes()
            .to_vec();

        // Snapshots are immutable; a digest mismatch means storage corruption
        let actual = sha256_hex(&data);
        if actual != snapshot.sha256 {
            return Err(PipelineError::Archive(format!(
                "snapshot {} digest mismatch: expected {}, got {}",
                snapshot.key, snapshot.sha256, actual
            )));
        }

        Ok(data)
    }

    async fn list_run(&self, run_id: Uuid) -> PipelineResult<Vec<SnapshotRef>> {
        let prefix = format!("{}/{}/", self.prefix, run_id);
        let mut refs = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| {
                PipelineError::Archive(format!("failed to list snapshots for {}: {}", run_id, e))
            })?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                let head = self
                    .client
                    .head_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| {
                        PipelineError::Archive(format!("failed to head {}: {}", key, e))
                    })?;
                refs.push(SnapshotRef {
                    key: key.to_string(),
                    sha256: head
                        .metadata()
                        .and_then(|m| m.get("sha256").cloned())
                        .unwrap_or_default(),
                    size: object.size().unwrap_or(0),
                });
            }

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        // Keys embed zero-padded page numbers, so lexical order is page order
        refs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(refs)
    }
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_is_stable_and_page_ordered() {
        let store = S3SnapshotStore {
            client: Client::from_conf(
                aws_sdk_s3::Config::builder()
                    .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
                    .build(),
            ),
            bucket: "test-bucket".to_string(),
            prefix: "raw".to_string(),
        };

        let run_id = Uuid::nil();
        let k2 = store.key(run_id, 2);
        let k10 = store.key(run_id, 10);
        assert_eq!(
            k2,
            "raw/00000000-0000-0000-0000-000000000000/page-00002.json"
        );
        assert!(k2 < k10);
    }

    #[test]
    fn sha256_hex_known_digest() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
