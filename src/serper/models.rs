//! Response models and record extraction for the `/places` endpoint.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The structured fields we understand in a place record.
///
/// Extraction keeps the record's original JSON text alongside this
/// projection, so fields the API adds later are never lost even though
/// they don't appear here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacePayload {
    pub position: Option<i32>,
    pub title: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub rating: Option<f64>,
    pub rating_count: Option<i64>,
    pub category: Option<String>,
    pub phone_number: Option<String>,
    pub website: Option<String>,
    pub place_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub cid: Option<String>,
}

/// One extracted search result.
#[derive(Debug, Clone)]
pub struct FetchedPlace {
    /// Stable identifier from the API (`placeId`, falling back to `cid`).
    pub place_uid: String,
    /// Structured projection; `None` when typed parsing rejected the record.
    pub payload: Option<Value>,
    /// The record's JSON text, kept verbatim.
    pub payload_raw: String,
}

/// The result of one successful search call.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub places: Vec<FetchedPlace>,
    pub credits: i64,
    pub api_status: u16,
    pub elapsed_ms: i64,
    /// Records whose typed parse failed (still ingested, payload NULL).
    pub parse_failures: usize,
    /// Records dropped for lacking any stable identifier.
    pub dropped: usize,
}

/// Pull the place records out of a parsed response body.
///
/// Records without a `placeId` or `cid` are dropped, never synthesized.
pub fn extract_places(body: &Value) -> (Vec<FetchedPlace>, usize, usize) {
    let mut places = Vec::new();
    let mut parse_failures = 0;
    let mut dropped = 0;

    let records = body
        .get("places")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for record in records {
        let Some(place_uid) = record_uid(record) else {
            dropped += 1;
            continue;
        };
        let payload = match typed_payload(record) {
            Some(value) => Some(value),
            None => {
                parse_failures += 1;
                None
            }
        };
        places.push(FetchedPlace {
            place_uid,
            payload,
            payload_raw: record.to_string(),
        });
    }

    (places, parse_failures, dropped)
}

/// Credits billed for the call, 0 when the field is absent.
pub fn extract_credits(body: &Value) -> i64 {
    body.get("credits").and_then(Value::as_i64).unwrap_or(0)
}

/// `placeId ?? cid`; `cid` may arrive as a string or a bare number.
fn record_uid(record: &Value) -> Option<String> {
    if let Some(id) = record.get("placeId").and_then(Value::as_str) {
        if !id.is_empty() {
            return Some(id.to_owned());
        }
    }
    match record.get("cid") {
        Some(Value::String(cid)) if !cid.is_empty() => Some(cid.clone()),
        Some(Value::Number(cid)) => Some(cid.to_string()),
        _ => None,
    }
}

/// Parse the typed projection; `None` on any type mismatch.
fn typed_payload(record: &Value) -> Option<Value> {
    let payload: PlacePayload = serde_path_to_error::deserialize(record)
        .map_err(|err| {
            tracing::debug!(path = %err.path(), error = %err.inner(), "place payload parse failed");
            err
        })
        .ok()?;
    serde_json::to_value(payload).ok()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Null) | None => None,
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "expected string or number for cid, got {other}"
            )));
        }
    })
}
