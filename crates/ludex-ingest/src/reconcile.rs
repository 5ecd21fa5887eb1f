//! Reconciler
//!
//! Applies classified changes to the canonical store in bounded batches.
//! Upserts are keyed by game id, so reapplying a batch (after a retry or a
//! replayed snapshot) converges to the same catalog state.

use crate::error::{PipelineError, PipelineResult};
use crate::retry::RetryPolicy;
use crate::store::CatalogStore;
use crate::types::GameRecord;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct Reconciler {
    store: Arc<dyn CatalogStore>,
    batch_size: usize,
    retry_policy: RetryPolicy,
}

impl Reconciler {
    pub fn new(store: Arc<dyn CatalogStore>, batch_size: usize, retry_policy: RetryPolicy) -> Self {
        Self {
            store,
            batch_size,
            retry_policy,
        }
    }

    /// Upsert all changed records for one page. Each batch commits or rolls
    /// back as a unit; a batch that exhausts its retry budget fails the run
    /// with the pages before it already applied.
    pub async fn apply(&self, run_id: Uuid, records: &[GameRecord]) -> PipelineResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        for batch in records.chunks(self.batch_size) {
            self.apply_batch(run_id, batch).await?;
        }

        info!(count = records.len(), "Reconciled changed records");
        Ok(())
    }

    async fn apply_batch(&self, run_id: Uuid, batch: &[GameRecord]) -> PipelineResult<()> {
        let mut delays = self.retry_policy.delays();

        loop {
            match self.store.upsert_batch(run_id, batch).await {
                Ok(()) => return Ok(()),
                Err(err @ PipelineError::Store(_)) => match delays.next() {
                    Some(delay) => {
                        warn!(error = %err, delay_ms = delay.as_millis() as u64, "Batch upsert failed, retrying");
                        tokio::time::sleep(self.retry_policy.with_jitter(delay)).await;
                    }
                    None => {
                        return Err(PipelineError::Reconciliation(format!(
                            "batch upsert exhausted {} attempts: {}",
                            self.retry_policy.max_attempts,
                            err
                        )))
                    }
                },
                Err(err) => return Err(err),
            }
        }
    }
}
