//! Constraint Filter: applies an [`ExtractedFilters`] against a candidate set.
//!
//! Hard constraints (dates, free/paid, accessibility) exclude on mismatch.
//! Soft constraints (themes, categories, keywords) OR-match within their own
//! dimension. Constraints are independent and conjunctive; with nothing
//! active the filter is a passthrough.

use chrono::{NaiveDateTime, NaiveTime};

use crate::domain::{parse_event_date, Event, ExtractedFilters};

fn start_of_day(raw: &str) -> Option<NaiveDateTime> {
    parse_event_date(raw).map(|dt| dt.date().and_time(NaiveTime::MIN))
}

fn end_of_day(raw: &str) -> Option<NaiveDateTime> {
    parse_event_date(raw).and_then(|dt| dt.date().and_hms_milli_opt(23, 59, 59, 999))
}

/// Date overlap against the filter's explicit boundaries. While a date
/// constraint is active, events whose own dates do not parse are excluded.
fn passes_date_constraint(event: &Event, filters: &ExtractedFilters) -> bool {
    if filters.date_start.is_none() && filters.date_end.is_none() {
        return true;
    }
    let start_boundary = filters.date_start.as_deref().and_then(start_of_day);
    let end_boundary = filters.date_end.as_deref().and_then(end_of_day);

    let (event_start, event_end) = match (event.parsed_start(), event.parsed_end()) {
        (Some(start), Some(end)) => (start, end),
        _ => return false,
    };

    if let Some(boundary) = start_boundary {
        if event_end < boundary {
            return false;
        }
    }
    if let Some(boundary) = end_boundary {
        if event_start > boundary {
            return false;
        }
    }
    true
}

fn passes_keyword_constraint(event: &Event, keywords: &[String]) -> bool {
    let searchable = [
        Some(event.name.as_str()),
        Some(event.description.as_str()),
        event.short_description.as_deref(),
        Some(event.location_name.as_str()),
    ]
    .into_iter()
    .flatten()
    .map(str::to_string)
    .chain(event.themes.iter().cloned())
    .chain(event.categories.iter().cloned())
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase();

    keywords
        .iter()
        .any(|keyword| searchable.contains(&keyword.to_lowercase()))
}

fn matches(event: &Event, filters: &ExtractedFilters) -> bool {
    if !passes_date_constraint(event, filters) {
        return false;
    }

    if let Some(wants_free) = filters.is_free {
        if event.is_free != wants_free {
            return false;
        }
    }

    if let Some(wants_accessible) = filters.is_accessible {
        if event.is_accessible != wants_accessible {
            return false;
        }
    }

    if let Some(themes) = filters.themes.as_ref().filter(|t| !t.is_empty()) {
        if !event.themes.iter().any(|theme| themes.contains(theme)) {
            return false;
        }
    }

    if let Some(categories) = filters.categories.as_ref().filter(|c| !c.is_empty()) {
        if !event.categories.iter().any(|category| categories.contains(category)) {
            return false;
        }
    }

    if let Some(keywords) = filters.keywords.as_ref().filter(|k| !k.is_empty()) {
        if !passes_keyword_constraint(event, keywords) {
            return false;
        }
    }

    true
}

/// Filter a candidate set, preserving input order among survivors.
pub fn filter_events(events: &[Event], filters: &ExtractedFilters) -> Vec<Event> {
    events
        .iter()
        .filter(|event| matches(event, filters))
        .cloned()
        .collect()
}
