//! Canonical catalog store
//!
//! The Reconciler is the only write path into the `games` table. Run
//! metadata, checkpoints, and the run-exclusivity lease live next to the
//! catalog so orchestration state survives process restarts.

use crate::config::DatabaseConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::types::{Checkpoint, GameRecord, IngestionRun, PageCursor, RunKind, RunReport, RunStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ludex_common::Fingerprint;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Notification channel downstream consumers listen on
pub const COMPLETION_CHANNEL: &str = "ludex_ingest_completed";

/// The checkpoint of the most recent run, with that run's status
#[derive(Debug, Clone)]
pub struct LatestCheckpoint {
    pub status: RunStatus,
    pub checkpoint: Checkpoint,
}

/// Persistence seam for the pipeline
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Acquire the singleton run lease. Fails with `RunAlreadyInProgress`
    /// when an unexpired lease is held by someone else.
    async fn acquire_lease(&self, owner: &str, run_id: Uuid, ttl_secs: i64) -> PipelineResult<()>;

    /// Extend the lease while a run is making progress
    async fn renew_lease(&self, run_id: Uuid, ttl_secs: i64) -> PipelineResult<()>;

    /// Release the lease at run end (safe to call on failure paths too)
    async fn release_lease(&self, run_id: Uuid) -> PipelineResult<()>;

    async fn create_run(&self, run_id: Uuid, kind: RunKind) -> PipelineResult<()>;

    /// Record the terminal status and counters, and emit the completion
    /// signal for successful runs
    async fn finish_run(&self, report: &RunReport) -> PipelineResult<()>;

    /// Read-only fingerprint snapshot taken at run start
    async fn fingerprint_snapshot(&self) -> PipelineResult<HashMap<i64, Fingerprint>>;

    /// Idempotent batched upsert keyed by game id. All-or-nothing: a failed
    /// batch leaves the store untouched.
    async fn upsert_batch(&self, run_id: Uuid, batch: &[GameRecord]) -> PipelineResult<()>;

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> PipelineResult<()>;

    /// Checkpoint of the most recent run that has one.
    /// Returns `CheckpointCorruption` when the stored cursor is unreadable.
    async fn latest_checkpoint(&self) -> PipelineResult<Option<LatestCheckpoint>>;

    /// Most recent SUCCEEDED run, for the changed-since watermark
    async fn last_successful_run(&self) -> PipelineResult<Option<IngestionRun>>;

    async fn latest_runs(&self, limit: i64) -> PipelineResult<Vec<IngestionRun>>;
}

/// Postgres-backed catalog store
#[derive(Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    /// Connect, run migrations, and wrap the pool
    pub async fn connect(config: &DatabaseConfig) -> PipelineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .map_err(|e| PipelineError::Store(format!("migration failed: {}", e)))?;

        info!("Catalog store connected, migrations applied");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert_one(
        tx: &mut Transaction<'_, Postgres>,
        run_id: Uuid,
        record: &GameRecord,
    ) -> PipelineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO games (
                id, slug, name, released, updated,
                metacritic, rating, rating_top, ratings_count,
                reviews_text_count, added, suggestions_count,
                reddit_count, twitch_count, youtube_count,
                platforms, metacritic_platforms, esrb_rating, added_by_status,
                website, background_image, background_image_additional,
                content_fingerprint, first_seen_at, last_updated_at, last_run_id
            )
            VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8, $9,
                $10, $11, $12,
                $13, $14, $15,
                $16, $17, $18, $19,
                $20, $21, $22,
                $23, NOW(), NOW(), $24
            )
            ON CONFLICT (id) DO UPDATE SET
                slug = EXCLUDED.slug,
                name = EXCLUDED.name,
                released = EXCLUDED.released,
                updated = EXCLUDED.updated,
                metacritic = EXCLUDED.metacritic,
                rating = EXCLUDED.rating,
                rating_top = EXCLUDED.rating_top,
                ratings_count = EXCLUDED.ratings_count,
                reviews_text_count = EXCLUDED.reviews_text_count,
                added = EXCLUDED.added,
                suggestions_count = EXCLUDED.suggestions_count,
                reddit_count = EXCLUDED.reddit_count,
                twitch_count = EXCLUDED.twitch_count,
                youtube_count = EXCLUDED.youtube_count,
                platforms = EXCLUDED.platforms,
                metacritic_platforms = EXCLUDED.metacritic_platforms,
                esrb_rating = EXCLUDED.esrb_rating,
                added_by_status = EXCLUDED.added_by_status,
                website = EXCLUDED.website,
                background_image = EXCLUDED.background_image,
                background_image_additional = EXCLUDED.background_image_additional,
                content_fingerprint = EXCLUDED.content_fingerprint,
                last_updated_at = NOW(),
                last_run_id = EXCLUDED.last_run_id
            "#,
        )
        .bind(record.id)
        .bind(&record.slug)
        .bind(&record.name)
        .bind(record.released)
        .bind(record.updated)
        .bind(record.metacritic)
        .bind(record.rating)
        .bind(record.rating_top)
        .bind(record.ratings_count)
        .bind(record.reviews_text_count)
        .bind(record.added)
        .bind(record.suggestions_count)
        .bind(record.reddit_count)
        .bind(record.twitch_count)
        .bind(record.youtube_count)
        .bind(&record.platforms)
        .bind(&record.metacritic_platforms)
        .bind(&record.esrb_rating)
        .bind(&record.added_by_status)
        .bind(&record.website)
        .bind(&record.background_image)
        .bind(&record.background_image_additional)
        .bind(record.content_fingerprint.as_str())
        .bind(run_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| PipelineError::Reconciliation(e.to_string()))?;

        Ok(())
    }
}

type RunRow = (
    Uuid,
    String,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    i32,
    i64,
    i64,
    i64,
    i64,
    Option<String>,
);

fn run_from_row(row: RunRow) -> IngestionRun {
    let (
        id,
        kind,
        status,
        started_at,
        finished_at,
        pages_completed,
        records_inserted,
        records_updated,
        records_unchanged,
        defects,
        failure_reason,
    ) = row;
    IngestionRun {
        id,
        kind: RunKind::from(kind),
        status: RunStatus::from(status),
        started_at,
        finished_at,
        pages_completed,
        records_inserted,
        records_updated,
        records_unchanged,
        defects,
        failure_reason,
    }
}

const RUN_COLUMNS: &str = "id, kind, status, started_at, finished_at, pages_completed, \
     records_inserted, records_updated, records_unchanged, defects, failure_reason";

#[async_trait]
impl CatalogStore for PgCatalogStore {
    #[instrument(skip(self))]
    async fn acquire_lease(&self, owner: &str, run_id: Uuid, ttl_secs: i64) -> PipelineResult<()> {
        let acquired: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO ingestion_lease (id, owner, run_id, acquired_at, expires_at)
            VALUES (1, $1, $2, NOW(), NOW() + make_interval(secs => $3::double precision))
            ON CONFLICT (id) DO UPDATE SET
                owner = EXCLUDED.owner,
                run_id = EXCLUDED.run_id,
                acquired_at = NOW(),
                expires_at = EXCLUDED.expires_at
            WHERE ingestion_lease.expires_at < NOW()
            RETURNING owner
            "#,
        )
        .bind(owner)
        .bind(run_id)
        .bind(ttl_secs)
        .fetch_optional(&self.pool)
        .await?;

        if acquired.is_some() {
            debug!(%owner, %run_id, "Run lease acquired");
            return Ok(());
        }

        let holder: Option<(String,)> =
            sqlx::query_as("SELECT owner FROM ingestion_lease WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        Err(PipelineError::RunAlreadyInProgress {
            owner: holder.map(|(o,)| o).unwrap_or_else(|| "unknown".to_string()),
        })
    }

    async fn renew_lease(&self, run_id: Uuid, ttl_secs: i64) -> PipelineResult<()> {
        sqlx::query(
            r#"
            UPDATE ingestion_lease
            SET expires_at = NOW() + make_interval(secs => $2::double precision)
            WHERE id = 1 AND run_id = $1
            "#,
        )
        .bind(run_id)
        .bind(ttl_secs)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn release_lease(&self, run_id: Uuid) -> PipelineResult<()> {
        sqlx::query("UPDATE ingestion_lease SET expires_at = NOW() WHERE id = 1 AND run_id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await?;

        debug!(%run_id, "Run lease released");
        Ok(())
    }

    async fn create_run(&self, run_id: Uuid, kind: RunKind) -> PipelineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_runs (id, kind, status, started_at)
            VALUES ($1, $2, 'running', NOW())
            "#,
        )
        .bind(run_id)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, report), fields(run_id = %report.run_id, status = report.status.as_str()))]
    async fn finish_run(&self, report: &RunReport) -> PipelineResult<()> {
        sqlx::query(
            r#"
            UPDATE ingestion_runs
            SET status = $2,
                finished_at = NOW(),
                pages_completed = $3,
                records_inserted = $4,
                records_updated = $5,
                records_unchanged = $6,
                defects = $7,
                failure_reason = $8
            WHERE id = $1
            "#,
        )
        .bind(report.run_id)
        .bind(report.status.as_str())
        .bind(report.pages_completed as i32)
        .bind(report.records_inserted as i64)
        .bind(report.records_updated as i64)
        .bind(report.records_unchanged as i64)
        .bind(report.defects as i64)
        .bind(&report.failure_reason)
        .execute(&self.pool)
        .await?;

        // Downstream consumers (prediction API, analytics) poll or LISTEN for
        // completed runs
        if matches!(report.status, RunStatus::Succeeded | RunStatus::Partial) {
            sqlx::query("SELECT pg_notify($1, $2)")
                .bind(COMPLETION_CHANNEL)
                .bind(report.run_id.to_string())
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    async fn fingerprint_snapshot(&self) -> PipelineResult<HashMap<i64, Fingerprint>> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, content_fingerprint FROM games")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(id, fp)| (id, Fingerprint::from_hex(fp)))
            .collect())
    }

    #[instrument(skip(self, batch), fields(batch_len = batch.len()))]
    async fn upsert_batch(&self, run_id: Uuid, batch: &[GameRecord]) -> PipelineResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PipelineError::Reconciliation(e.to_string()))?;

        for record in batch {
            Self::upsert_one(&mut tx, run_id, record).await?;
        }

        tx.commit()
            .await
            .map_err(|e| PipelineError::Reconciliation(e.to_string()))?;

        debug!(count = batch.len(), "Batch upsert committed");
        Ok(())
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> PipelineResult<()> {
        let cursor_token = serde_json::to_value(&checkpoint.cursor)?;

        sqlx::query(
            r#"
            INSERT INTO ingestion_checkpoints (run_id, last_completed_page, cursor_token, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (run_id) DO UPDATE SET
                last_completed_page = EXCLUDED.last_completed_page,
                cursor_token = EXCLUDED.cursor_token,
                updated_at = NOW()
            "#,
        )
        .bind(checkpoint.run_id)
        .bind(checkpoint.last_completed_page as i32)
        .bind(cursor_token)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_checkpoint(&self) -> PipelineResult<Option<LatestCheckpoint>> {
        let row = sqlx::query(
            r#"
            SELECT c.run_id, c.last_completed_page, c.cursor_token, r.status
            FROM ingestion_checkpoints c
            JOIN ingestion_runs r ON r.id = c.run_id
            ORDER BY r.started_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let run_id: Uuid = row.try_get("run_id")?;
        let last_completed_page: i32 = row.try_get("last_completed_page")?;
        let cursor_token: serde_json::Value = row.try_get("cursor_token")?;
        let status: String = row.try_get("status")?;

        let cursor: PageCursor = serde_json::from_value(cursor_token).map_err(|e| {
            PipelineError::CheckpointCorruption(format!(
                "unreadable cursor for run {}: {}",
                run_id, e
            ))
        })?;

        if last_completed_page < 0 {
            return Err(PipelineError::CheckpointCorruption(format!(
                "negative page counter for run {}",
                run_id
            )));
        }

        Ok(Some(LatestCheckpoint {
            status: RunStatus::from(status),
            checkpoint: Checkpoint {
                run_id,
                last_completed_page: last_completed_page as u32,
                cursor,
            },
        }))
    }

    async fn last_successful_run(&self) -> PipelineResult<Option<IngestionRun>> {
        let row: Option<RunRow> = sqlx::query_as(&format!(
            "SELECT {} FROM ingestion_runs WHERE status = 'succeeded' \
             ORDER BY started_at DESC LIMIT 1",
            RUN_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(run_from_row))
    }

    async fn latest_runs(&self, limit: i64) -> PipelineResult<Vec<IngestionRun>> {
        let rows: Vec<RunRow> = sqlx::query_as(&format!(
            "SELECT {} FROM ingestion_runs ORDER BY started_at DESC LIMIT $1",
            RUN_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(run_from_row).collect())
    }
}
