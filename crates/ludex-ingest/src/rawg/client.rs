//! Rate-limited RAWG client
//!
//! One in-flight request at a time, bounded retries with exponential backoff
//! and jitter, API-key rotation, and explicit cursor-based pagination. A 404
//! past the last page is treated as end-of-listing, matching how RAWG
//! paginates `updated` windows.

use crate::config::{RetryConfig, UpstreamConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::retry::RetryPolicy;
use crate::types::PageCursor;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::models::GamesPage;

/// A fetched page, ready for archiving
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub cursor: PageCursor,
    /// Canonical serialization of the fetched page document
    pub payload: Vec<u8>,
    pub record_count: usize,
    /// Cursor for the following page; `None` when the listing is exhausted
    pub next: Option<PageCursor>,
}

/// How a single request attempt failed
enum FetchFailure {
    RateLimited,
    Transient(String),
}

/// Client for the RAWG paginated catalog API
pub struct RawgClient {
    http: reqwest::Client,
    games_url: String,
    api_keys: Vec<String>,
    key_cursor: AtomicUsize,
    page_size: u32,
    fetch_details: bool,
    transient_policy: RetryPolicy,
    rate_limit_policy: RetryPolicy,
}

impl RawgClient {
    pub fn new(upstream: &UpstreamConfig, retry: &RetryConfig) -> PipelineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(upstream.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            games_url: games_url(&upstream.api_url),
            api_keys: upstream.api_keys.clone(),
            key_cursor: AtomicUsize::new(0),
            page_size: upstream.page_size,
            fetch_details: upstream.fetch_details,
            transient_policy: RetryPolicy::transient(retry),
            rate_limit_policy: RetryPolicy::rate_limit(retry),
        })
    }

    /// Fetch the page at `cursor`. `Ok(None)` means the listing is exhausted.
    ///
    /// The fetch is all-or-nothing: a page is returned fully materialized
    /// (including detail enrichment when enabled) or not at all.
    pub async fn fetch_page(&self, cursor: &PageCursor) -> PipelineResult<Option<FetchedPage>> {
        let url = self.page_url(cursor);
        debug!(page = cursor.page, "Fetching catalog page");

        let Some(body) = self.get_with_retry(&url).await? else {
            // 404 past the last page of an updated window
            debug!(page = cursor.page, "Pagination past last page, listing exhausted");
            return Ok(None);
        };

        let mut page: GamesPage = serde_json::from_value(body)?;

        if page.is_empty() {
            debug!(page = cursor.page, "Empty page, listing exhausted");
            return Ok(None);
        }

        if self.fetch_details {
            page.results = self.enrich_with_details(page.results).await?;
        }

        let next = page.next.as_ref().map(|_| cursor.next());
        let record_count = page.results.len();
        let payload = serde_json::to_vec(&page)?;

        Ok(Some(FetchedPage {
            cursor: cursor.clone(),
            payload,
            record_count,
            next,
        }))
    }

    /// Replace list rows with full `/games/{id}` detail documents
    async fn enrich_with_details(&self, results: Vec<Value>) -> PipelineResult<Vec<Value>> {
        let mut detailed = Vec::with_capacity(results.len());
        for row in results {
            let Some(id) = row.get("id").and_then(Value::as_i64) else {
                // Row without an id is a downstream data-quality concern
                detailed.push(row);
                continue;
            };
            let url = format!("{}/{}?key={}", self.games_url, id, self.next_key());
            match self.get_with_retry(&url).await? {
                Some(detail) => detailed.push(detail),
                // Detail withdrawn between list and fetch; keep the list row
                None => detailed.push(row),
            }
        }
        Ok(detailed)
    }

    /// GET a JSON document with both retry budgets applied.
    ///
    /// `Ok(None)` maps a 404 response; rate-limit and transient budgets are
    /// tracked independently across attempts for the same URL.
    async fn get_with_retry(&self, url: &str) -> PipelineResult<Option<Value>> {
        let mut transient_delays = self.transient_policy.delays();
        let mut rate_delays = self.rate_limit_policy.delays();
        let mut rate_attempts = 0u32;

        loop {
            match self.try_get(url).await {
                Ok(outcome) => return Ok(outcome),
                Err(FetchFailure::RateLimited) => {
                    rate_attempts += 1;
                    match rate_delays.next() {
                        Some(delay) => {
                            let delay = self.rate_limit_policy.with_jitter(delay);
                            warn!(
                                attempt = rate_attempts,
                                delay_ms = delay.as_millis() as u64,
                                "Upstream rate limit hit, backing off"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            return Err(PipelineError::RateLimitExceeded {
                                attempts: rate_attempts,
                            })
                        }
                    }
                }
                Err(FetchFailure::Transient(reason)) => match transient_delays.next() {
                    Some(delay) => {
                        let delay = self.transient_policy.with_jitter(delay);
                        warn!(
                            %reason,
                            delay_ms = delay.as_millis() as u64,
                            "Transient upstream failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(PipelineError::TransientUpstream(reason)),
                },
            }
        }
    }

    /// One request attempt, classified
    async fn try_get(&self, url: &str) -> Result<Option<Value>, FetchFailure> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FetchFailure::Transient(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchFailure::RateLimited);
        }
        if !status.is_success() {
            return Err(FetchFailure::Transient(format!(
                "upstream returned {}",
                status
            )));
        }

        response
            .json::<Value>()
            .await
            .map(Some)
            .map_err(|e| FetchFailure::Transient(format!("invalid JSON body: {}", e)))
    }

    fn page_url(&self, cursor: &PageCursor) -> String {
        let mut url = format!(
            "{}?key={}&page={}&page_size={}",
            self.games_url,
            self.next_key(),
            cursor.page,
            self.page_size
        );
        if let Some(range) = &cursor.updated_range {
            url.push_str("&updated=");
            url.push_str(range);
        }
        url
    }

    /// Round-robin over the configured API keys
    fn next_key(&self) -> &str {
        let idx = self.key_cursor.fetch_add(1, Ordering::Relaxed);
        &self.api_keys[idx % self.api_keys.len()]
    }
}

/// Accept either `.../api` or `.../api/games` and always return the games
/// endpoint, the way deployments configure it
fn games_url(api_url: &str) -> String {
    let base = api_url.trim().trim_end_matches('/');
    if base.ends_with("/games") {
        base.to_string()
    } else {
        format!("{}/games", base)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{RetryConfig, UpstreamConfig};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> (UpstreamConfig, RetryConfig) {
        let upstream = UpstreamConfig {
            api_url: base_url.to_string(),
            api_keys: vec!["key-a".to_string(), "key-b".to_string()],
            page_size: 2,
            max_pages: 10,
            request_timeout_secs: 5,
            fetch_details: false,
        };
        // Millisecond backoff keeps the retry tests fast
        let retry = RetryConfig {
            transient_max_attempts: 3,
            rate_limit_max_attempts: 3,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
        };
        (upstream, retry)
    }

    fn listing(next: Option<&str>, ids: &[i64]) -> serde_json::Value {
        json!({
            "count": ids.len(),
            "next": next,
            "results": ids.iter().map(|id| json!({"id": id, "slug": format!("game-{id}"), "name": format!("Game {id}")})).collect::<Vec<_>>()
        })
    }

    #[test]
    fn games_url_accepts_both_forms() {
        assert_eq!(games_url("https://api.rawg.io/api"), "https://api.rawg.io/api/games");
        assert_eq!(
            games_url("https://api.rawg.io/api/games/"),
            "https://api.rawg.io/api/games"
        );
    }

    #[tokio::test]
    async fn fetches_page_and_reports_next() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/games"))
            .and(query_param("page", "1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(listing(Some("http://next"), &[1, 2])),
            )
            .mount(&server)
            .await;

        let (upstream, retry) = test_config(&server.uri());
        let client = RawgClient::new(&upstream, &retry).unwrap();
        let page = client.fetch_page(&PageCursor::first()).await.unwrap().unwrap();

        assert_eq!(page.record_count, 2);
        assert_eq!(page.next, Some(PageCursor { page: 2, updated_range: None }));
    }

    #[tokio::test]
    async fn not_found_past_last_page_means_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/games"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (upstream, retry) = test_config(&server.uri());
        let client = RawgClient::new(&upstream, &retry).unwrap();
        let outcome = client
            .fetch_page(&PageCursor { page: 9, updated_range: None })
            .await
            .unwrap();

        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn empty_results_mean_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/games"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(None, &[])))
            .mount(&server)
            .await;

        let (upstream, retry) = test_config(&server.uri());
        let client = RawgClient::new(&upstream, &retry).unwrap();
        assert!(client.fetch_page(&PageCursor::first()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/games"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/games"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(None, &[7])))
            .mount(&server)
            .await;

        let (upstream, retry) = test_config(&server.uri());
        let client = RawgClient::new(&upstream, &retry).unwrap();
        let page = client.fetch_page(&PageCursor::first()).await.unwrap().unwrap();
        assert_eq!(page.record_count, 1);
    }

    #[tokio::test]
    async fn exhausted_transient_budget_escalates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/games"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let (upstream, retry) = test_config(&server.uri());
        let client = RawgClient::new(&upstream, &retry).unwrap();
        let err = client.fetch_page(&PageCursor::first()).await.unwrap_err();
        assert!(matches!(err, PipelineError::TransientUpstream(_)));
    }

    #[tokio::test]
    async fn exhausted_rate_limit_budget_escalates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/games"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let (upstream, retry) = test_config(&server.uri());
        let client = RawgClient::new(&upstream, &retry).unwrap();
        let err = client.fetch_page(&PageCursor::first()).await.unwrap_err();
        assert!(matches!(err, PipelineError::RateLimitExceeded { attempts: 3 }));
    }

    #[tokio::test]
    async fn detail_enrichment_replaces_list_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/games"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(None, &[1, 2])))
            .mount(&server)
            .await;
        for id in [1i64, 2] {
            Mock::given(method("GET"))
                .and(path(format!("/games/{id}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "id": id,
                    "slug": format!("game-{id}"),
                    "name": format!("Game {id}"),
                    "description_raw": format!("Full detail for game {id}")
                })))
                .expect(1)
                .mount(&server)
                .await;
        }

        let (mut upstream, retry) = test_config(&server.uri());
        upstream.fetch_details = true;
        let client = RawgClient::new(&upstream, &retry).unwrap();
        let page = client.fetch_page(&PageCursor::first()).await.unwrap().unwrap();

        let archived: GamesPage = serde_json::from_slice(&page.payload).unwrap();
        assert_eq!(archived.results.len(), 2);
        assert!(archived
            .results
            .iter()
            .all(|row| row.get("description_raw").is_some()));
    }

    #[tokio::test]
    async fn withdrawn_detail_keeps_the_list_row() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/games"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(None, &[5])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/games/5"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (mut upstream, retry) = test_config(&server.uri());
        upstream.fetch_details = true;
        let client = RawgClient::new(&upstream, &retry).unwrap();
        let page = client.fetch_page(&PageCursor::first()).await.unwrap().unwrap();

        let archived: GamesPage = serde_json::from_slice(&page.payload).unwrap();
        assert_eq!(archived.results.len(), 1);
        assert_eq!(archived.results[0].get("slug"), Some(&json!("game-5")));
        assert!(archived.results[0].get("description_raw").is_none());
    }

    #[tokio::test]
    async fn updated_window_is_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/games"))
            .and(query_param("updated", "2026-08-27,2026-08-28"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(None, &[3])))
            .mount(&server)
            .await;

        let (upstream, retry) = test_config(&server.uri());
        let client = RawgClient::new(&upstream, &retry).unwrap();
        let cursor = PageCursor::changed_since("2026-08-27,2026-08-28");
        let page = client.fetch_page(&cursor).await.unwrap().unwrap();
        assert_eq!(page.record_count, 1);
    }
}
