//! Normalizer: raw page payloads to canonical game records
//!
//! Accepts the shapes the archive actually contains: a bare array of rows, a
//! `{"results": [...]}` listing page, a `{"data": [...]}` bulk export, or a
//! single detail document. A record missing its natural key (or slug/name) is
//! dropped and counted as a data-quality defect; it never aborts the page.
//!
//! Fingerprints are computed over the normalized attribute set with a fixed
//! field order and explicit absent markers, so attribute ordering or
//! whitespace differences upstream never look like changes.

use crate::error::PipelineResult;
use crate::types::GameRecord;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use ludex_common::Fingerprint;
use serde_json::{json, Value};
use tracing::warn;

/// Outcome of normalizing one archived page
#[derive(Debug, Clone)]
pub struct NormalizedPage {
    pub records: Vec<GameRecord>,
    /// Rows dropped for data-quality reasons
    pub defects: u64,
}

/// Normalize an archived payload into candidate records
pub fn normalize_page(payload: &[u8]) -> PipelineResult<NormalizedPage> {
    let doc: Value = serde_json::from_slice(payload)?;
    let rows = extract_rows(&doc);

    let mut records = Vec::with_capacity(rows.len());
    let mut defects = 0u64;

    for row in rows {
        match normalize_record(row) {
            Some(record) => records.push(record),
            None => {
                warn!(
                    id = ?row.get("id"),
                    slug = ?row.get("slug"),
                    "Dropping malformed record (missing id, slug, or name)"
                );
                defects += 1;
            }
        }
    }

    Ok(NormalizedPage { records, defects })
}

/// Pull game rows out of whatever container shape the payload uses
fn extract_rows(doc: &Value) -> Vec<&Value> {
    match doc {
        Value::Array(rows) => rows.iter().collect(),
        Value::Object(map) => {
            if let Some(Value::Array(rows)) = map.get("results") {
                rows.iter().collect()
            } else if let Some(Value::Array(rows)) = map.get("data") {
                rows.iter().collect()
            } else if map.contains_key("id") {
                vec![doc]
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}

/// Normalize a single raw row. `None` means a data-quality defect.
pub fn normalize_record(raw: &Value) -> Option<GameRecord> {
    let id = raw.get("id").and_then(as_int)?;
    let slug = nonempty_string(raw.get("slug"))?;
    let name = nonempty_string(raw.get("name"))?;

    let released = raw.get("released").and_then(as_date);
    let updated = raw.get("updated").and_then(as_timestamp);
    let metacritic = raw.get("metacritic").and_then(as_int32);
    let rating = raw.get("rating").and_then(Value::as_f64);
    let rating_top = raw.get("rating_top").and_then(as_int32);
    let ratings_count = raw.get("ratings_count").and_then(as_int32);
    let reviews_text_count = raw.get("reviews_text_count").and_then(as_int32);
    let added = raw.get("added").and_then(as_int32);
    let suggestions_count = raw.get("suggestions_count").and_then(as_int32);
    let reddit_count = raw.get("reddit_count").and_then(as_int32);
    let twitch_count = raw.get("twitch_count").and_then(as_int32);
    let youtube_count = raw.get("youtube_count").and_then(as_int32);

    // Bulk exports carry these pre-serialized as *_json string columns
    let platforms = json_blob(raw, "platforms", "platforms_json");
    let metacritic_platforms = json_blob(raw, "metacritic_platforms", "metacritic_platforms_json");
    let esrb_rating = json_blob(raw, "esrb_rating", "esrb_rating_json");
    let added_by_status = json_blob(raw, "added_by_status", "added_by_status_json");

    let website = nonempty_string(raw.get("website"));
    let background_image = nonempty_string(raw.get("background_image"));
    let background_image_additional = nonempty_string(raw.get("background_image_additional"));

    let content_fingerprint = fingerprint_of(&[
        ("id", Some(json!(id))),
        ("slug", Some(json!(slug))),
        ("name", Some(json!(name))),
        ("released", released.map(|d| json!(d.to_string()))),
        ("updated", updated.map(|t| json!(t.to_rfc3339()))),
        ("metacritic", metacritic.map(|v| json!(v))),
        ("rating", rating.map(|v| json!(v))),
        ("rating_top", rating_top.map(|v| json!(v))),
        ("ratings_count", ratings_count.map(|v| json!(v))),
        ("reviews_text_count", reviews_text_count.map(|v| json!(v))),
        ("added", added.map(|v| json!(v))),
        ("suggestions_count", suggestions_count.map(|v| json!(v))),
        ("reddit_count", reddit_count.map(|v| json!(v))),
        ("twitch_count", twitch_count.map(|v| json!(v))),
        ("youtube_count", youtube_count.map(|v| json!(v))),
        ("platforms", platforms.clone()),
        ("metacritic_platforms", metacritic_platforms.clone()),
        ("esrb_rating", esrb_rating.clone()),
        ("added_by_status", added_by_status.clone()),
        ("website", website.as_ref().map(|v| json!(v))),
        ("background_image", background_image.as_ref().map(|v| json!(v))),
        (
            "background_image_additional",
            background_image_additional.as_ref().map(|v| json!(v)),
        ),
    ]);

    Some(GameRecord {
        id,
        slug,
        name,
        released,
        updated,
        metacritic,
        rating,
        rating_top,
        ratings_count,
        reviews_text_count,
        added,
        suggestions_count,
        reddit_count,
        twitch_count,
        youtube_count,
        platforms,
        metacritic_platforms,
        esrb_rating,
        added_by_status,
        website,
        background_image,
        background_image_additional,
        content_fingerprint,
    })
}

/// Fingerprint over named fields in fixed order
fn fingerprint_of(fields: &[(&str, Option<Value>)]) -> Fingerprint {
    let refs: Vec<(&str, Option<&Value>)> = fields
        .iter()
        .map(|(name, value)| (*name, value.as_ref()))
        .collect();
    Fingerprint::of_fields(&refs)
}

fn as_int(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn as_int32(value: &Value) -> Option<i32> {
    as_int(value).and_then(|v| i32::try_from(v).ok())
}

fn nonempty_string(value: Option<&Value>) -> Option<String> {
    let s = value?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Upstream sends "" and "0000-00-00" for unknown dates
fn as_date(value: &Value) -> Option<NaiveDate> {
    let s = value.as_str()?.trim();
    if s.is_empty() || s == "0000-00-00" {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // RAWG's `updated` has no timezone suffix
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// A structured field that may arrive as a JSON value or a pre-serialized
/// `*_json` string column
fn json_blob(raw: &Value, field: &str, json_field: &str) -> Option<Value> {
    match raw.get(field) {
        Some(v @ (Value::Object(_) | Value::Array(_))) => return Some(v.clone()),
        Some(Value::String(s)) if !s.trim().is_empty() => {
            if let Ok(parsed) = serde_json::from_str(s) {
                return Some(parsed);
            }
        }
        _ => {}
    }
    match raw.get(json_field) {
        Some(v @ (Value::Object(_) | Value::Array(_))) => Some(v.clone()),
        Some(Value::String(s)) if !s.trim().is_empty() => serde_json::from_str(s).ok(),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample_row() -> Value {
        json!({
            "id": 3498,
            "slug": "grand-theft-auto-v",
            "name": "Grand Theft Auto V",
            "released": "2013-09-17",
            "updated": "2026-08-20T11:30:02",
            "metacritic": 92,
            "rating": 4.47,
            "rating_top": 5,
            "ratings_count": 6040,
            "added": 19000,
            "platforms": [{"platform": {"id": 4, "name": "PC"}}],
            "esrb_rating": {"id": 4, "name": "Mature"},
            "website": "https://www.rockstargames.com/V/"
        })
    }

    #[test]
    fn normalizes_listing_page() {
        let payload = json!({"results": [sample_row()]}).to_string();
        let page = normalize_page(payload.as_bytes()).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.defects, 0);

        let record = &page.records[0];
        assert_eq!(record.id, 3498);
        assert_eq!(record.slug, "grand-theft-auto-v");
        assert_eq!(record.released, NaiveDate::from_ymd_opt(2013, 9, 17));
        assert_eq!(record.metacritic, Some(92));
        assert!(record.platforms.is_some());
    }

    #[test]
    fn missing_natural_key_is_a_defect_not_a_failure() {
        let payload = json!({"results": [
            sample_row(),
            {"slug": "no-id", "name": "No Id"},
            {"id": 7, "slug": "", "name": "Blank Slug"}
        ]})
        .to_string();
        let page = normalize_page(payload.as_bytes()).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.defects, 2);
    }

    #[test]
    fn fingerprint_ignores_attribute_order_and_whitespace() {
        let a = r#"{"id": 1, "slug": "portal", "name": "Portal", "metacritic": 90}"#;
        let b = r#"{
            "metacritic":   90,
            "name": "Portal",
            "id": 1,
            "slug": "portal"
        }"#;
        let ra = normalize_record(&serde_json::from_str(a).unwrap()).unwrap();
        let rb = normalize_record(&serde_json::from_str(b).unwrap()).unwrap();
        assert_eq!(ra.content_fingerprint, rb.content_fingerprint);
    }

    #[test]
    fn fingerprint_changes_when_an_attribute_changes() {
        let mut row = sample_row();
        let before = normalize_record(&row).unwrap();
        row["metacritic"] = json!(93);
        let after = normalize_record(&row).unwrap();
        assert_ne!(before.content_fingerprint, after.content_fingerprint);
    }

    #[test]
    fn accepts_bulk_export_shape() {
        let payload = json!({"data": [{
            "id": 11,
            "slug": "stray",
            "name": "Stray",
            "platforms_json": "[{\"platform\": {\"id\": 187, \"name\": \"PlayStation 5\"}}]"
        }]})
        .to_string();
        let page = normalize_page(payload.as_bytes()).unwrap();
        assert_eq!(page.records.len(), 1);
        assert!(page.records[0].platforms.as_ref().unwrap().is_array());
    }

    #[test]
    fn unknown_dates_are_absent() {
        let row = json!({"id": 5, "slug": "tba", "name": "TBA", "released": "0000-00-00"});
        let record = normalize_record(&row).unwrap();
        assert!(record.released.is_none());
    }

    #[test]
    fn single_detail_document_is_one_row() {
        let payload = sample_row().to_string();
        let page = normalize_page(payload.as_bytes()).unwrap();
        assert_eq!(page.records.len(), 1);
    }
}
