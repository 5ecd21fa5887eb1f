//! Wire types for the RAWG games endpoint

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One page of the paginated `/games` listing.
///
/// Individual results stay as raw JSON; normalization happens downstream so
/// the archive keeps exactly what upstream sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GamesPage {
    #[serde(default)]
    pub count: Option<i64>,
    /// URL of the next page; `None` means the listing is exhausted
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub results: Vec<Value>,
}

impl GamesPage {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_listing_page() {
        let body = r#"{
            "count": 2,
            "next": "https://api.rawg.io/api/games?page=2",
            "previous": null,
            "results": [{"id": 1, "slug": "portal"}, {"id": 2, "slug": "half-life"}]
        }"#;
        let page: GamesPage = serde_json::from_str(body).unwrap();
        assert_eq!(page.count, Some(2));
        assert!(page.next.is_some());
        assert_eq!(page.results.len(), 2);
    }

    #[test]
    fn tolerates_missing_fields() {
        let page: GamesPage = serde_json::from_str("{}").unwrap();
        assert!(page.is_empty());
        assert!(page.next.is_none());
    }
}
