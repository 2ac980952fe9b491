//! Record Normalizer: converts raw upstream feed records into canonical
//! [`Event`] entities.
//!
//! The upstream payload is loosely shaped: GPS coordinates arrive as a
//! JSON-encoded string nested inside location rows, categorical fields may be
//! arrays or comma-joined strings, and price fields may be strings, numbers
//! or null. Each record either parses to an `Event` or is rejected with an
//! explicit reason; a bad record never aborts the batch.

use serde_json::Value;
use tracing::{debug, warn};

use crate::constants::TORONTO_IMAGE_BASE;
use crate::domain::{Event, EventPartnership, Location};
use crate::observability;

/// Raw event record as it appears in the upstream feed's `value` array.
pub type RawEventRecord = Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingId,
    MissingName,
    NoUsableGps,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingId => "missing_id",
            RejectReason::MissingName => "missing_name",
            RejectReason::NoUsableGps => "no_usable_gps",
        }
    }
}

/// Outcome of normalizing one raw record: either a canonical event or an
/// explicit rejection. There is no "partially parsed" state.
#[derive(Debug)]
pub enum ParseOutcome {
    Parsed(Box<Event>),
    Rejected { name: String, reason: RejectReason },
}

#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub events: Vec<Event>,
    pub rejected: Vec<(String, RejectReason)>,
}

/// Normalize a whole feed batch. Rejections are logged and counted but the
/// batch always completes.
pub fn normalize_batch(rows: &[RawEventRecord]) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    for row in rows {
        match normalize_record(row) {
            ParseOutcome::Parsed(event) => {
                observability::normalize::record_parsed();
                batch.events.push(*event);
            }
            ParseOutcome::Rejected { name, reason } => {
                warn!(record = %name, reason = reason.as_str(), "Dropping unparsable feed record");
                observability::normalize::record_rejected(reason.as_str());
                batch.rejected.push((name, reason));
            }
        }
    }
    observability::normalize::batch_processed(rows.len());
    debug!(
        parsed = batch.events.len(),
        rejected = batch.rejected.len(),
        "Normalized feed batch"
    );
    batch
}

/// Normalize a single raw record.
pub fn normalize_record(raw: &RawEventRecord) -> ParseOutcome {
    let display_name = raw["event_name"].as_str().unwrap_or("<unnamed>").to_string();

    let id = match non_empty_str(&raw["id"]) {
        Some(id) => id,
        None => {
            return ParseOutcome::Rejected {
                name: display_name,
                reason: RejectReason::MissingId,
            }
        }
    };
    let name = match non_empty_str(&raw["event_name"]) {
        Some(name) => name,
        None => {
            return ParseOutcome::Rejected {
                name: display_name,
                reason: RejectReason::MissingName,
            }
        }
    };

    // First sub-location with parseable GPS wins; none at all means the record
    // is dropped rather than pinned to a fallback location.
    let located = raw["event_locations"]
        .as_array()
        .into_iter()
        .flatten()
        .find_map(|loc| parse_gps(&loc["location_gps"]).map(|gps| (loc, gps)));
    let (location_row, gps) = match located {
        Some(found) => found,
        None => {
            return ParseOutcome::Rejected {
                name: display_name,
                reason: RejectReason::NoUsableGps,
            }
        }
    };

    let price_low = parse_price_value(&raw["event_price_low"]);
    let price_high = parse_price_value(&raw["event_price_high"]);
    let price = non_empty_str(&raw["event_price"]).or_else(|| format_price_range(price_low, price_high));

    let event = Event {
        id,
        name,
        short_name: non_empty_str(&raw["short_name"]),
        description: raw["event_description"].as_str().unwrap_or_default().to_string(),
        short_description: non_empty_str(&raw["short_description"]),
        location: gps,
        location_name: location_row["location_name"].as_str().unwrap_or_default().to_string(),
        location_address: location_row["location_address"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        categories: parse_string_list(&raw["event_category"]),
        themes: parse_string_list(&raw["event_theme"]),
        features: parse_string_list(&raw["event_features"]),
        start_date: raw["event_startdate"].as_str().unwrap_or_default().to_string(),
        end_date: raw["event_enddate"].as_str().unwrap_or_default().to_string(),
        is_free: is_yes(&raw["free_event"]),
        is_accessible: is_yes(&raw["accessible_event"]),
        reservations_required: is_yes(&raw["reservations_required"]),
        price,
        price_low,
        price_high,
        partnerships: parse_partnerships(&raw["partnerships"]),
        website: non_empty_str(&raw["event_website"]),
        email: non_empty_str(&raw["event_email"]),
        telephone: non_empty_str(&raw["event_telephone"]),
        image_url: image_url(&raw["event_image"]),
    };

    ParseOutcome::Parsed(Box::new(event))
}

fn non_empty_str(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn is_yes(value: &Value) -> bool {
    value.as_str() == Some("Yes")
}

/// A coordinate may be encoded as a JSON number or a numeric string.
fn coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `location_gps` is itself a JSON document embedded in a string, e.g.
/// `[{"gps_lat":"43.59","gps_lng":-79.51}]`.
fn parse_gps(value: &Value) -> Option<Location> {
    let raw = value.as_str()?.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed: Value = serde_json::from_str(raw).ok()?;
    let first = parsed.as_array()?.first()?;
    let lat = coordinate(&first["gps_lat"])?;
    let lng = coordinate(&first["gps_lng"])?;
    Some(Location { lat, lng })
}

/// Tolerates both list and comma-separated-string encodings.
fn parse_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Strings are stripped down to digits and dots before parsing; anything that
/// still does not parse yields `None`.
fn parse_price_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => {
            let cleaned: String = s.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
            cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
        }
        _ => None,
    }
}

fn format_price_range(low: Option<f64>, high: Option<f64>) -> Option<String> {
    match (low, high) {
        (Some(low), Some(high)) if low == high => Some(format!("${low:.2}")),
        (Some(low), Some(high)) => Some(format!("${low:.2} - ${high:.2}")),
        (Some(value), None) | (None, Some(value)) => Some(format!("${value:.2}")),
        (None, None) => None,
    }
}

fn partnership_role(code: Option<&str>) -> &'static str {
    match code {
        Some("event_presented_by") => "Presented by",
        Some("event_sponsored_by") => "Sponsored by",
        Some("event_supported_by") => "Supported by",
        _ => "Partner",
    }
}

fn parse_partnerships(value: &Value) -> Vec<EventPartnership> {
    value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|partner| {
            let name = non_empty_str(&partner["text"])?;
            Some(EventPartnership {
                role: partnership_role(partner["value"].as_str()).to_string(),
                name,
            })
        })
        .collect()
}

fn image_url(value: &Value) -> Option<String> {
    let bin_id = value.as_array()?.first().and_then(|img| non_empty_str(&img["bin_id"]))?;
    Some(format!("{TORONTO_IMAGE_BASE}/{bin_id}"))
}
