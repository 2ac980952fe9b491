use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// GPS coordinates. Every canonical event carries one; records without a
/// resolvable location never make it past normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPartnership {
    pub role: String,
    pub name: String,
}

/// Canonical event entity, immutable once constructed by the normalizer.
///
/// `start_date`/`end_date` are kept as the upstream ISO-8601 strings; they may
/// be unparsable and every consumer goes through [`parse_event_date`] instead
/// of assuming validity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_description: Option<String>,
    pub location: Location,
    pub location_name: String,
    pub location_address: String,
    pub categories: Vec<String>,
    pub themes: Vec<String>,
    pub features: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    pub is_free: bool,
    pub is_accessible: bool,
    pub reservations_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_high: Option<f64>,
    pub partnerships: Vec<EventPartnership>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telephone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl Event {
    pub fn parsed_start(&self) -> Option<NaiveDateTime> {
        parse_event_date(&self.start_date)
    }

    pub fn parsed_end(&self) -> Option<NaiveDateTime> {
        parse_event_date(&self.end_date)
    }

    /// Compact one-line summary ("Name (Jun 1 - Jun 3) at Venue (Free) [Music]")
    /// used as language-model context and in CLI output.
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = vec![self.name.clone()];

        match (self.parsed_start(), self.parsed_end()) {
            (Some(start), Some(end)) => {
                let start_str = start.format("%b %-d").to_string();
                if start == end {
                    parts.push(format!("({start_str})"));
                } else {
                    parts.push(format!("({start_str} - {})", end.format("%b %-d")));
                }
            }
            _ => {} // unparsable dates are simply omitted
        }

        parts.push(format!("at {}", self.location_name));

        if self.is_free {
            parts.push("(Free)".to_string());
        } else if let Some(price) = &self.price {
            parts.push(format!("({price})"));
        }

        if let Some(category) = self.categories.first() {
            parts.push(format!("[{category}]"));
        }

        parts.join(" ")
    }
}

/// Tolerant ISO-8601 parse: RFC 3339, naive datetime, or bare date.
/// Returns `None` for anything else; callers must treat that as "unknown",
/// never as an error worth aborting a batch over.
pub fn parse_event_date(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_local());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt);
    }
    if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(d.and_time(NaiveTime::MIN));
    }
    None
}

/// Filter criteria extracted from a natural-language query. Constructed fresh
/// per search request.
///
/// `is_free`/`is_accessible` are tri-state: `Some(true)`/`Some(false)` are
/// hard constraints, `None` means no preference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractedFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_end: Option<String>,
    pub is_free: Option<bool>,
    pub is_accessible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub themes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
}

impl ExtractedFilters {
    /// True when no criterion at all is active. The reconciler guarantees a
    /// real query never yields this silently (it synthesizes keywords first).
    pub fn is_unconstrained(&self) -> bool {
        self.date_start.is_none()
            && self.date_end.is_none()
            && self.is_free.is_none()
            && self.is_accessible.is_none()
            && self.themes.as_ref().map_or(true, |v| v.is_empty())
            && self.categories.as_ref().map_or(true, |v| v.is_empty())
            && self.keywords.as_ref().map_or(true, |v| v.is_empty())
    }

    /// Keyword-only filter derived from the raw query, used as the universal
    /// fallback when extraction fails.
    pub fn keyword_fallback(query: &str) -> Self {
        Self {
            keywords: Some(fallback_keywords(query)),
            ..Default::default()
        }
    }
}

/// Words longer than 2 characters from the raw query.
pub fn fallback_keywords(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .filter(|w| w.chars().count() > 2)
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One turn of prior conversation forwarded with a search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        Event {
            id: "ev-1".to_string(),
            name: "Jazz Fest".to_string(),
            short_name: None,
            description: "Live jazz on the waterfront".to_string(),
            short_description: None,
            location: Location { lat: 43.65, lng: -79.38 },
            location_name: "Harbourfront Centre".to_string(),
            location_address: "235 Queens Quay W".to_string(),
            categories: vec!["Music".to_string()],
            themes: vec![],
            features: vec![],
            start_date: "2025-06-01T10:00:00".to_string(),
            end_date: "2025-06-03T22:00:00".to_string(),
            is_free: true,
            is_accessible: true,
            reservations_required: false,
            price: None,
            price_low: None,
            price_high: None,
            partnerships: vec![],
            website: None,
            email: None,
            telephone: None,
            image_url: None,
        }
    }

    #[test]
    fn parses_naive_datetime_and_bare_date() {
        assert!(parse_event_date("2025-06-01T10:00:00").is_some());
        assert!(parse_event_date("2025-06-01").is_some());
        assert!(parse_event_date("2025-06-01T10:00:00-04:00").is_some());
        assert!(parse_event_date("not a date").is_none());
        assert!(parse_event_date("").is_none());
    }

    #[test]
    fn summary_includes_range_venue_and_category() {
        let summary = sample_event().summary();
        assert!(summary.starts_with("Jazz Fest (Jun 1 - Jun 3)"));
        assert!(summary.contains("at Harbourfront Centre"));
        assert!(summary.contains("(Free)"));
        assert!(summary.ends_with("[Music]"));
    }

    #[test]
    fn unconstrained_detection() {
        assert!(ExtractedFilters::default().is_unconstrained());
        let keywords = ExtractedFilters::keyword_fallback("free jazz tonight");
        assert!(!keywords.is_unconstrained());
        assert_eq!(
            keywords.keywords.unwrap(),
            vec!["free".to_string(), "jazz".to_string(), "tonight".to_string()]
        );
    }

    #[test]
    fn fallback_keywords_skip_short_words() {
        assert_eq!(fallback_keywords("is it on at the park"), vec!["the", "park"]);
    }
}
