//! In-memory store implementations for pipeline tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use ludex_common::Fingerprint;
use ludex_ingest::archive::SnapshotStore;
use ludex_ingest::error::{PipelineError, PipelineResult};
use ludex_ingest::store::{CatalogStore, LatestCheckpoint};
use ludex_ingest::types::{
    Checkpoint, GameRecord, IngestionRun, RunKind, RunReport, RunStatus, SnapshotRef,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Snapshot archive backed by a map, same key scheme as the S3 store
#[derive(Default)]
pub struct MemorySnapshotStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn put(&self, run_id: Uuid, page_number: u32, payload: &[u8]) -> PipelineResult<SnapshotRef> {
        let key = format!("raw/{}/page-{:05}.json", run_id, page_number);
        let sha256 = hex::encode(Sha256::digest(payload));

        let mut objects = self.objects.lock().unwrap();
        if let Some(existing) = objects.get(&key) {
            let existing_sha = hex::encode(Sha256::digest(existing));
            if existing_sha != sha256 {
                return Err(PipelineError::Archive(format!(
                    "snapshot {} already exists with different content",
                    key
                )));
            }
        } else {
            objects.insert(key.clone(), payload.to_vec());
        }

        Ok(SnapshotRef {
            key,
            sha256,
            size: payload.len() as i64,
        })
    }

    async fn get(&self, snapshot: &SnapshotRef) -> PipelineResult<Vec<u8>> {
        let objects = self.objects.lock().unwrap();
        let payload = objects
            .get(&snapshot.key)
            .cloned()
            .ok_or_else(|| PipelineError::Archive(format!("missing snapshot {}", snapshot.key)))?;

        let actual = hex::encode(Sha256::digest(&payload));
        if actual != snapshot.sha256 {
            return Err(PipelineError::Archive(format!(
                "digest mismatch for {}",
                snapshot.key
            )));
        }
        Ok(payload)
    }

    async fn list_run(&self, run_id: Uuid) -> PipelineResult<Vec<SnapshotRef>> {
        let prefix = format!("raw/{}/", run_id);
        let objects = self.objects.lock().unwrap();
        let mut refs: Vec<SnapshotRef> = objects
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(key, payload)| SnapshotRef {
                key: key.clone(),
                sha256: hex::encode(Sha256::digest(payload)),
                size: payload.len() as i64,
            })
            .collect();
        refs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(refs)
    }
}

/// A catalog row plus write bookkeeping for assertions
#[derive(Clone)]
pub struct StoredGame {
    pub record: GameRecord,
    /// Logical tick of the first write
    pub first_seen_tick: u64,
    /// Logical tick of the most recent write
    pub last_updated_tick: u64,
    pub last_run_id: Uuid,
}

/// Catalog store backed by maps, mirroring the Postgres semantics the
/// pipeline relies on: keyed upserts, a singleton lease, and checkpoints
/// scoped to their run
#[derive(Default)]
pub struct MemoryCatalogStore {
    games: Mutex<HashMap<i64, StoredGame>>,
    runs: Mutex<Vec<IngestionRun>>,
    checkpoints: Mutex<HashMap<Uuid, Checkpoint>>,
    lease: Mutex<Option<(String, Uuid)>>,
    clock: AtomicU64,
    /// Upserts that fail before any succeed (transient fault injection)
    pub upsert_failures: AtomicU32,
    pub upsert_batches: Mutex<Vec<usize>>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn game(&self, id: i64) -> Option<StoredGame> {
        self.games.lock().unwrap().get(&id).cloned()
    }

    pub fn game_count(&self) -> usize {
        self.games.lock().unwrap().len()
    }

    pub fn fingerprints(&self) -> HashMap<i64, Fingerprint> {
        self.games
            .lock()
            .unwrap()
            .iter()
            .map(|(id, g)| (*id, g.record.content_fingerprint.clone()))
            .collect()
    }

    pub fn runs(&self) -> Vec<IngestionRun> {
        self.runs.lock().unwrap().clone()
    }

    pub fn run(&self, run_id: Uuid) -> Option<IngestionRun> {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == run_id)
            .cloned()
    }

    pub fn checkpoint_for(&self, run_id: Uuid) -> Option<Checkpoint> {
        self.checkpoints.lock().unwrap().get(&run_id).cloned()
    }

    pub fn lease_held(&self) -> bool {
        self.lease.lock().unwrap().is_some()
    }

    pub fn hold_lease(&self, owner: &str) {
        *self.lease.lock().unwrap() = Some((owner.to_string(), Uuid::new_v4()));
    }

    pub fn total_upserted(&self) -> usize {
        self.upsert_batches.lock().unwrap().iter().sum()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn acquire_lease(&self, owner: &str, run_id: Uuid, _ttl_secs: i64) -> PipelineResult<()> {
        let mut lease = self.lease.lock().unwrap();
        if let Some((holder, _)) = lease.as_ref() {
            return Err(PipelineError::RunAlreadyInProgress {
                owner: holder.clone(),
            });
        }
        *lease = Some((owner.to_string(), run_id));
        Ok(())
    }

    async fn renew_lease(&self, _run_id: Uuid, _ttl_secs: i64) -> PipelineResult<()> {
        Ok(())
    }

    async fn release_lease(&self, run_id: Uuid) -> PipelineResult<()> {
        let mut lease = self.lease.lock().unwrap();
        if matches!(lease.as_ref(), Some((_, held)) if *held == run_id) {
            *lease = None;
        }
        Ok(())
    }

    async fn create_run(&self, run_id: Uuid, kind: RunKind) -> PipelineResult<()> {
        self.runs.lock().unwrap().push(IngestionRun {
            id: run_id,
            kind,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            pages_completed: 0,
            records_inserted: 0,
            records_updated: 0,
            records_unchanged: 0,
            defects: 0,
            failure_reason: None,
        });
        Ok(())
    }

    async fn finish_run(&self, report: &RunReport) -> PipelineResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .iter_mut()
            .find(|r| r.id == report.run_id)
            .ok_or_else(|| PipelineError::Store(format!("unknown run {}", report.run_id)))?;
        run.status = report.status;
        run.finished_at = Some(Utc::now());
        run.pages_completed = report.pages_completed as i32;
        run.records_inserted = report.records_inserted as i64;
        run.records_updated = report.records_updated as i64;
        run.records_unchanged = report.records_unchanged as i64;
        run.defects = report.defects as i64;
        run.failure_reason = report.failure_reason.clone();
        Ok(())
    }

    async fn fingerprint_snapshot(&self) -> PipelineResult<HashMap<i64, Fingerprint>> {
        Ok(self.fingerprints())
    }

    async fn upsert_batch(&self, run_id: Uuid, batch: &[GameRecord]) -> PipelineResult<()> {
        if self
            .upsert_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PipelineError::Store("injected upsert failure".to_string()));
        }

        let tick = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        let mut games = self.games.lock().unwrap();
        for record in batch {
            games
                .entry(record.id)
                .and_modify(|existing| {
                    existing.record = record.clone();
                    existing.last_updated_tick = tick;
                    existing.last_run_id = run_id;
                })
                .or_insert_with(|| StoredGame {
                    record: record.clone(),
                    first_seen_tick: tick,
                    last_updated_tick: tick,
                    last_run_id: run_id,
                });
        }
        self.upsert_batches.lock().unwrap().push(batch.len());
        Ok(())
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> PipelineResult<()> {
        self.checkpoints
            .lock()
            .unwrap()
            .insert(checkpoint.run_id, checkpoint.clone());
        Ok(())
    }

    async fn latest_checkpoint(&self) -> PipelineResult<Option<LatestCheckpoint>> {
        let runs = self.runs.lock().unwrap();
        let checkpoints = self.checkpoints.lock().unwrap();
        for run in runs.iter().rev() {
            if let Some(checkpoint) = checkpoints.get(&run.id) {
                return Ok(Some(LatestCheckpoint {
                    status: run.status,
                    checkpoint: checkpoint.clone(),
                }));
            }
        }
        Ok(None)
    }

    async fn last_successful_run(&self) -> PipelineResult<Option<IngestionRun>> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.status == RunStatus::Succeeded)
            .cloned())
    }

    async fn latest_runs(&self, limit: i64) -> PipelineResult<Vec<IngestionRun>> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
