use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{json, Value};

use crate::models::Metadata;

/// Age at which validity has decayed to 1/e.
pub const VALIDITY_DECAY_DAYS: f64 = 730.0;
/// Score used when no usable date is present.
pub const UNKNOWN_VALIDITY: f64 = 0.5;
const OUTDATED_BELOW: f64 = 0.35;

/// Parse an ISO-8601 date or datetime. Naive values are taken as UTC.
fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// `exp(-age_days / 730)` measured at `now`. Missing or unparseable dates
/// score 0.5; dates in the future score 1.0.
pub fn validity_score_at(date: Option<&str>, now: DateTime<Utc>) -> f64 {
    let Some(parsed) = date.and_then(parse_date) else {
        return UNKNOWN_VALIDITY;
    };
    let age_days = (now - parsed).num_days().max(0) as f64;
    (-age_days / VALIDITY_DECAY_DAYS).exp()
}

pub fn validity_score(date: Option<&str>) -> f64 {
    validity_score_at(date, Utc::now())
}

/// Add `validity_score` and, when absent, a `status` to legal document metadata.
///
/// The date is taken from `date_updated`, falling back to `date_filed`.
pub fn enrich_legal_metadata(meta: &mut Metadata) {
    enrich_legal_metadata_at(meta, Utc::now());
}

pub fn enrich_legal_metadata_at(meta: &mut Metadata, now: DateTime<Utc>) {
    let date = ["date_updated", "date_filed"]
        .iter()
        .filter_map(|key| meta.get(*key).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
        .map(str::to_string);

    let score = validity_score_at(date.as_deref(), now);
    meta.insert("validity_score".to_string(), json!(score));

    let has_status = meta
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    if !has_status {
        let status = if score < OUTDATED_BELOW { "outdated" } else { "active" };
        meta.insert("status".to_string(), json!(status));
    }
}
