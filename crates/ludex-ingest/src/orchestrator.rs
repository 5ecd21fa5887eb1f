//! Run orchestrator
//!
//! Sequences one end-to-end pipeline run: lease, cursor resolution, the
//! fetch / archive / normalize / classify / reconcile / checkpoint loop,
//! and terminal bookkeeping. Checkpoints are written only after a page has
//! been archived and reconciled, so a resumed run never skips work it has
//! not durably finished.

use crate::archive::SnapshotStore;
use crate::classify::FingerprintIndex;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::normalize::normalize_page;
use crate::rawg::RawgClient;
use crate::reconcile::Reconciler;
use crate::store::CatalogStore;
use crate::types::{Checkpoint, PageCursor, RunKind, RunReport, RunStatus};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Tallies accumulated across the page loop
#[derive(Debug, Default)]
struct RunCounters {
    pages_completed: u32,
    records_seen: u64,
    records_inserted: u64,
    records_updated: u64,
    records_unchanged: u64,
    defects: u64,
}

pub struct Orchestrator {
    client: RawgClient,
    archive: Arc<dyn SnapshotStore>,
    store: Arc<dyn CatalogStore>,
    reconciler: Reconciler,
    pipeline: PipelineConfig,
    max_pages: u32,
    owner: String,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        client: RawgClient,
        archive: Arc<dyn SnapshotStore>,
        store: Arc<dyn CatalogStore>,
        reconciler: Reconciler,
        pipeline: PipelineConfig,
        max_pages: u32,
        owner: String,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            archive,
            store,
            reconciler,
            pipeline,
            max_pages,
            owner,
            cancel,
        }
    }

    /// Execute one run to a terminal status.
    ///
    /// Succeeded and Partial runs are returned as `Ok`; everything else is
    /// recorded as Failed and surfaced as the underlying error. The lease is
    /// released on every path.
    #[instrument(skip(self), fields(kind = kind.as_str()))]
    pub async fn run(&self, kind: RunKind) -> PipelineResult<RunReport> {
        let run_id = Uuid::new_v4();

        self.store
            .acquire_lease(&self.owner, run_id, self.pipeline.lease_ttl_secs)
            .await?;

        self.store.create_run(run_id, kind).await?;
        info!(%run_id, "Ingestion run started");

        let mut counters = RunCounters::default();
        let outcome = self.run_inner(run_id, kind, &mut counters).await;
        self.settle(run_id, kind, counters, outcome).await
    }

    /// Re-apply the archived snapshots of a past run against the current
    /// catalog. No upstream calls; useful after normalizer fixes.
    #[instrument(skip(self))]
    pub async fn replay(&self, archived_run_id: Uuid) -> PipelineResult<RunReport> {
        let run_id = Uuid::new_v4();

        self.store
            .acquire_lease(&self.owner, run_id, self.pipeline.lease_ttl_secs)
            .await?;

        self.store.create_run(run_id, RunKind::Full).await?;
        info!(%run_id, %archived_run_id, "Replay run started");

        let mut counters = RunCounters::default();
        let outcome = self
            .replay_inner(run_id, archived_run_id, &mut counters)
            .await;
        self.settle(run_id, RunKind::Full, counters, outcome).await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        kind: RunKind,
        counters: &mut RunCounters,
    ) -> PipelineResult<()> {
        let mut cursor = Some(self.start_cursor(kind).await?);
        let index = FingerprintIndex::new(self.store.fingerprint_snapshot().await?);

        while let Some(current) = cursor {
            if counters.pages_completed >= self.max_pages {
                warn!(max_pages = self.max_pages, "Page cap reached, stopping");
                break;
            }
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let Some(fetched) = self.client.fetch_page(&current).await? else {
                info!(page = current.page, "End of pagination");
                break;
            };

            self.apply_page(run_id, current.page, &fetched.payload, &index, counters)
                .await?;

            self.store
                .save_checkpoint(&Checkpoint {
                    run_id,
                    last_completed_page: current.page,
                    cursor: current,
                })
                .await?;
            self.store
                .renew_lease(run_id, self.pipeline.lease_ttl_secs)
                .await?;

            cursor = fetched.next;
        }

        Ok(())
    }

    async fn replay_inner(
        &self,
        run_id: Uuid,
        archived_run_id: Uuid,
        counters: &mut RunCounters,
    ) -> PipelineResult<()> {
        let snapshots = self.archive.list_run(archived_run_id).await?;
        if snapshots.is_empty() {
            return Err(PipelineError::Archive(format!(
                "no snapshots archived for run {}",
                archived_run_id
            )));
        }

        let index = FingerprintIndex::new(self.store.fingerprint_snapshot().await?);

        for (page, snapshot) in snapshots.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let payload = self.archive.get(snapshot).await?;
            self.apply_page(run_id, page as u32 + 1, &payload, &index, counters)
                .await?;
        }

        Ok(())
    }

    /// Archive, normalize, classify, and reconcile one page payload
    async fn apply_page(
        &self,
        run_id: Uuid,
        page: u32,
        payload: &[u8],
        index: &FingerprintIndex,
        counters: &mut RunCounters,
    ) -> PipelineResult<()> {
        self.archive.put(run_id, page, payload).await?;

        let normalized = normalize_page(payload)?;
        counters.defects += normalized.defects;
        if counters.defects > self.pipeline.defect_cap {
            return Err(PipelineError::DataQualityCapExceeded {
                defects: counters.defects,
                cap: self.pipeline.defect_cap,
            });
        }

        counters.records_seen += normalized.records.len() as u64;

        let (changed, changes) = crate::classify::partition_changed(index, normalized.records);
        counters.records_inserted += changes.new;
        counters.records_updated += changes.updated;
        counters.records_unchanged += changes.unchanged;

        self.reconciler.apply(run_id, &changed).await?;

        counters.pages_completed += 1;
        info!(
            page,
            new = changes.new,
            updated = changes.updated,
            unchanged = changes.unchanged,
            defects = normalized.defects,
            "Page reconciled"
        );

        Ok(())
    }

    /// Where a run begins.
    ///
    /// Full runs always start at page 1 with no window. Incremental runs
    /// resume the latest checkpoint when its run did not complete, and
    /// otherwise open a fresh changed-since window from the last successful
    /// run's start date to today.
    async fn start_cursor(&self, kind: RunKind) -> PipelineResult<PageCursor> {
        if kind == RunKind::Full {
            return Ok(PageCursor::first());
        }

        if let Some(latest) = self.store.latest_checkpoint().await? {
            if !matches!(latest.status, RunStatus::Succeeded | RunStatus::Partial) {
                let cursor = latest.checkpoint.resume_cursor();
                info!(
                    resumed_run = %latest.checkpoint.run_id,
                    page = cursor.page,
                    "Resuming interrupted run from checkpoint"
                );
                return Ok(cursor);
            }
        }

        match self.store.last_successful_run().await? {
            Some(run) => {
                let window = format!(
                    "{},{}",
                    run.started_at.date_naive(),
                    Utc::now().date_naive()
                );
                info!(%window, "Incremental run over changed-since window");
                Ok(PageCursor::changed_since(window))
            }
            None => {
                info!("No prior successful run, falling back to a full scan");
                Ok(PageCursor::first())
            }
        }
    }

    /// Persist the terminal status, release the lease, and return either the
    /// report or the error that ended the run.
    ///
    /// A Failed run keeps the counters it accumulated before the failure, so
    /// `status` output reflects the pages that did land.
    async fn settle(
        &self,
        run_id: Uuid,
        kind: RunKind,
        counters: RunCounters,
        outcome: PipelineResult<()>,
    ) -> PipelineResult<RunReport> {
        let (status, failure_reason) = match &outcome {
            Ok(()) => {
                if counters.defects == 0 {
                    (RunStatus::Succeeded, None)
                } else {
                    (RunStatus::Partial, None)
                }
            }
            Err(err) => {
                error!(%run_id, error = %err, "Ingestion run failed");
                (RunStatus::Failed, Some(err.to_string()))
            }
        };

        let report = RunReport {
            run_id,
            kind,
            status,
            pages_completed: counters.pages_completed,
            records_seen: counters.records_seen,
            records_inserted: counters.records_inserted,
            records_updated: counters.records_updated,
            records_unchanged: counters.records_unchanged,
            defects: counters.defects,
            failure_reason,
        };

        if let Err(err) = self.store.finish_run(&report).await {
            error!(%run_id, error = %err, "Failed to record run outcome");
        }
        if let Err(err) = self.store.release_lease(run_id).await {
            error!(%run_id, error = %err, "Failed to release run lease");
        }

        outcome.map(|_| report)
    }
}
