//! Configuration management
//!
//! All settings are env-driven with named defaults, loaded once at startup
//! and validated before any connection is opened.

use serde::{Deserialize, Serialize};

// ============================================================================
// Upstream (RAWG) defaults
// ============================================================================

/// Default RAWG API base URL.
pub const DEFAULT_API_URL: &str = "https://api.rawg.io/api";

/// Default upstream page size (RAWG maximum).
pub const DEFAULT_PAGE_SIZE: u32 = 40;

/// Default cap on pages fetched per run.
pub const DEFAULT_MAX_PAGES: u32 = 70;

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Retry defaults
// ============================================================================

/// Default retry attempts for transient network / 5xx failures.
pub const DEFAULT_TRANSIENT_MAX_ATTEMPTS: u32 = 3;

/// Default retry attempts for upstream rate-limit (429) responses.
pub const DEFAULT_RATE_LIMIT_MAX_ATTEMPTS: u32 = 5;

/// Default base backoff delay in milliseconds (doubles per attempt).
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;

/// Default backoff cap in milliseconds.
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

// ============================================================================
// Pipeline defaults
// ============================================================================

/// Default upsert batch size per reconciliation transaction.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default retries of a failed reconciliation batch before failing the run.
pub const DEFAULT_BATCH_MAX_RETRIES: u32 = 3;

/// Default cap on dropped malformed records before the run fails outright.
pub const DEFAULT_DEFECT_CAP: u64 = 100;

/// Default run-exclusivity lease time-to-live in seconds.
pub const DEFAULT_LEASE_TTL_SECS: i64 = 900;

// ============================================================================
// Database defaults
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/ludex";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Archive defaults
// ============================================================================

/// Default object-key prefix for raw page snapshots.
pub const DEFAULT_ARCHIVE_PREFIX: &str = "raw";

/// Default S3 region.
pub const DEFAULT_ARCHIVE_REGION: &str = "us-east-1";

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub upstream: UpstreamConfig,
    pub retry: RetryConfig,
    pub pipeline: PipelineConfig,
    pub database: DatabaseConfig,
    pub archive: ArchiveConfig,
}

/// Upstream catalog API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub api_url: String,
    /// API keys rotated across requests (RAWG allows several per account)
    pub api_keys: Vec<String>,
    pub page_size: u32,
    pub max_pages: u32,
    pub request_timeout_secs: u64,
    /// Fetch `/games/{id}` detail for each list row (slower, richer rows)
    pub fetch_details: bool,
}

/// Backoff / retry budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub transient_max_attempts: u32,
    pub rate_limit_max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

/// Reconciliation and run-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub batch_max_retries: u32,
    pub defect_cap: u64,
    pub lease_ttl_secs: i64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Raw archive (S3-compatible) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Custom endpoint for MinIO / localstack
    pub endpoint: Option<String>,
    /// Path-style addressing, required by MinIO
    pub path_style: bool,
    pub key_prefix: String,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl IngestConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        // Keys come either comma-separated or as numbered variables, matching
        // how deployments tend to provision them.
        let mut api_keys: Vec<String> = std::env::var("RAWG_API_KEYS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        for i in 1..=5 {
            if let Ok(key) = std::env::var(format!("RAWG_API_KEY_{}", i)) {
                let key = key.trim().to_string();
                if !key.is_empty() {
                    api_keys.push(key);
                }
            }
        }

        let config = IngestConfig {
            upstream: UpstreamConfig {
                api_url: std::env::var("RAWG_API_URL")
                    .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
                api_keys,
                page_size: env_or("RAWG_PAGE_SIZE", DEFAULT_PAGE_SIZE),
                max_pages: env_or("RAWG_MAX_PAGES", DEFAULT_MAX_PAGES),
                request_timeout_secs: env_or(
                    "RAWG_REQUEST_TIMEOUT_SECS",
                    DEFAULT_REQUEST_TIMEOUT_SECS,
                ),
                fetch_details: env_or("RAWG_FETCH_DETAILS", false),
            },
            retry: RetryConfig {
                transient_max_attempts: env_or(
                    "RETRY_TRANSIENT_MAX_ATTEMPTS",
                    DEFAULT_TRANSIENT_MAX_ATTEMPTS,
                ),
                rate_limit_max_attempts: env_or(
                    "RETRY_RATE_LIMIT_MAX_ATTEMPTS",
                    DEFAULT_RATE_LIMIT_MAX_ATTEMPTS,
                ),
                backoff_base_ms: env_or("RETRY_BACKOFF_BASE_MS", DEFAULT_BACKOFF_BASE_MS),
                backoff_max_ms: env_or("RETRY_BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            },
            pipeline: PipelineConfig {
                batch_size: env_or("RECONCILE_BATCH_SIZE", DEFAULT_BATCH_SIZE),
                batch_max_retries: env_or("RECONCILE_BATCH_MAX_RETRIES", DEFAULT_BATCH_MAX_RETRIES),
                defect_cap: env_or("PIPELINE_DEFECT_CAP", DEFAULT_DEFECT_CAP),
                lease_ttl_secs: env_or("PIPELINE_LEASE_TTL_SECS", DEFAULT_LEASE_TTL_SECS),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
            },
            archive: ArchiveConfig {
                bucket: std::env::var("ARCHIVE_BUCKET").unwrap_or_default(),
                region: std::env::var("ARCHIVE_REGION")
                    .unwrap_or_else(|_| DEFAULT_ARCHIVE_REGION.to_string()),
                access_key: std::env::var("ARCHIVE_ACCESS_KEY").unwrap_or_default(),
                secret_key: std::env::var("ARCHIVE_SECRET_KEY").unwrap_or_default(),
                endpoint: std::env::var("ARCHIVE_ENDPOINT").ok(),
                path_style: env_or("ARCHIVE_PATH_STYLE", false),
                key_prefix: std::env::var("ARCHIVE_PREFIX")
                    .unwrap_or_else(|_| DEFAULT_ARCHIVE_PREFIX.to_string()),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.upstream.api_keys.is_empty() {
            anyhow::bail!("No RAWG API keys configured (RAWG_API_KEYS or RAWG_API_KEY_1..5)");
        }

        if self.upstream.page_size == 0 || self.upstream.page_size > 40 {
            anyhow::bail!(
                "Upstream page size must be between 1 and 40, got {}",
                self.upstream.page_size
            );
        }

        if self.pipeline.batch_size == 0 {
            anyhow::bail!("Reconcile batch size must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.archive.bucket.is_empty() {
            anyhow::bail!("Archive bucket cannot be empty (ARCHIVE_BUCKET)");
        }

        if self.retry.backoff_base_ms > self.retry.backoff_max_ms {
            anyhow::bail!(
                "Backoff base ({}ms) cannot exceed backoff cap ({}ms)",
                self.retry.backoff_base_ms,
                self.retry.backoff_max_ms
            );
        }

        Ok(())
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig {
                api_url: DEFAULT_API_URL.to_string(),
                api_keys: Vec::new(),
                page_size: DEFAULT_PAGE_SIZE,
                max_pages: DEFAULT_MAX_PAGES,
                request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
                fetch_details: false,
            },
            retry: RetryConfig::default(),
            pipeline: PipelineConfig::default(),
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            archive: ArchiveConfig {
                bucket: String::new(),
                region: DEFAULT_ARCHIVE_REGION.to_string(),
                access_key: String::new(),
                secret_key: String::new(),
                endpoint: None,
                path_style: false,
                key_prefix: DEFAULT_ARCHIVE_PREFIX.to_string(),
            },
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            transient_max_attempts: DEFAULT_TRANSIENT_MAX_ATTEMPTS,
            rate_limit_max_attempts: DEFAULT_RATE_LIMIT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_max_retries: DEFAULT_BATCH_MAX_RETRIES,
            defect_cap: DEFAULT_DEFECT_CAP,
            lease_ttl_secs: DEFAULT_LEASE_TTL_SECS,
        }
    }
}
