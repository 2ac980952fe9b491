//! Dedup & Window Filter: restricts a corpus to a rolling time window and
//! collapses duplicate events by normalized name.
//!
//! The window filter is generic over the item type via start/end accessors so
//! it stays reusable for other windowed datasets.

use std::collections::HashMap;

use chrono::{Duration, Months, NaiveDateTime};

use crate::domain::Event;

/// The rolling time range used to decide which events are "current" enough
/// to serve. Boundaries are inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl EventWindow {
    /// Window from `now` to one calendar month out, the default serving horizon.
    pub fn next_month_from(now: NaiveDateTime) -> Self {
        let end = now
            .checked_add_months(Months::new(1))
            .unwrap_or(now + Duration::days(31));
        Self { start: now, end }
    }
}

fn effective_start(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> NaiveDateTime {
    start.or(end).unwrap_or(NaiveDateTime::UNIX_EPOCH)
}

/// A missing boundary is treated as equal to the present one; an item with
/// neither boundary cannot overlap anything and is excluded.
fn falls_within(
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    window: &EventWindow,
) -> bool {
    match (start.or(end), end.or(start)) {
        (Some(start), Some(end)) => end >= window.start && start <= window.end,
        _ => false,
    }
}

/// Retain items whose `[start, end]` interval overlaps the window (inclusive),
/// sorted ascending by effective start (start, else end, else epoch).
pub fn filter_within_window<T>(
    items: Vec<T>,
    window: &EventWindow,
    get_start: impl Fn(&T) -> Option<NaiveDateTime>,
    get_end: impl Fn(&T) -> Option<NaiveDateTime>,
) -> Vec<T> {
    let mut kept: Vec<T> = items
        .into_iter()
        .filter(|item| falls_within(get_start(item), get_end(item), window))
        .collect();
    kept.sort_by_key(|item| effective_start(get_start(item), get_end(item)));
    kept
}

/// Collapse duplicates by trimmed, lowercased name, keeping the instance with
/// the earliest valid start. An entry with an unparsable start never replaces
/// an existing one; a valid start always replaces an unparsable one. Ties are
/// broken first-seen. Output is re-sorted ascending by start.
pub fn dedupe_events_by_name(events: Vec<Event>) -> Vec<Event> {
    let mut first_seen: Vec<String> = Vec::new();
    let mut by_name: HashMap<String, Event> = HashMap::new();

    for event in events {
        let key = event.name.trim().to_lowercase();
        match by_name.get(&key) {
            None => {
                first_seen.push(key.clone());
                by_name.insert(key, event);
            }
            Some(existing) => {
                let keep_candidate = match (existing.parsed_start(), event.parsed_start()) {
                    (None, Some(_)) => true,
                    (Some(existing_start), Some(candidate_start)) => {
                        candidate_start < existing_start
                    }
                    _ => false,
                };
                if keep_candidate {
                    by_name.insert(key, event);
                }
            }
        }
    }

    let mut deduped: Vec<Event> = first_seen
        .iter()
        .filter_map(|key| by_name.remove(key))
        .collect();
    deduped.sort_by_key(|e| effective_start(e.parsed_start(), e.parsed_end()));
    deduped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Location;
    use chrono::NaiveDate;

    fn at(date: &str) -> NaiveDateTime {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn event(name: &str, start: &str, end: &str) -> Event {
        Event {
            id: name.to_string(),
            name: name.to_string(),
            short_name: None,
            description: String::new(),
            short_description: None,
            location: Location { lat: 43.65, lng: -79.38 },
            location_name: String::new(),
            location_address: String::new(),
            categories: vec![],
            themes: vec![],
            features: vec![],
            start_date: start.to_string(),
            end_date: end.to_string(),
            is_free: false,
            is_accessible: false,
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

    fn window() -> EventWindow {
        EventWindow {
            start: at("2025-06-01"),
            end: at("2025-07-01"),
        }
    }

    fn run_window(events: Vec<Event>) -> Vec<Event> {
        filter_within_window(events, &window(), Event::parsed_start, Event::parsed_end)
    }

    #[test]
    fn boundary_events_are_inclusive() {
        let ends_at_window_start = event("a", "2025-05-20", "2025-06-01");
        let starts_at_window_end = event("b", "2025-07-01", "2025-07-10");
        let fully_before = event("c", "2025-05-01", "2025-05-30");
        let kept = run_window(vec![ends_at_window_start, starts_at_window_end, fully_before]);
        let names: Vec<&str> = kept.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn missing_boundary_falls_back_to_the_other() {
        let only_start = event("a", "2025-06-15", "");
        let only_end = event("b", "", "2025-06-20");
        let neither = event("c", "", "");
        let kept = run_window(vec![only_start, only_end, neither]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn output_sorted_ascending_by_effective_start() {
        let kept = run_window(vec![
            event("late", "2025-06-20", "2025-06-21"),
            event("early", "2025-06-05", "2025-06-06"),
            event("end-only", "", "2025-06-10"),
        ]);
        let names: Vec<&str> = kept.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["early", "end-only", "late"]);
    }

    #[test]
    fn dedup_keeps_earliest_start_across_casing_and_whitespace() {
        let later = event("Jazz Fest", "2025-06-01", "2025-06-01");
        let earlier = event("jazz fest ", "2025-05-20", "2025-05-20");
        let deduped = dedupe_events_by_name(vec![later, earlier]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].start_date, "2025-05-20");
    }

    #[test]
    fn unparsable_start_never_replaces_valid_one() {
        let valid = event("Fair", "2025-06-10", "2025-06-10");
        let broken = event("fair", "not a date", "also bad");
        let deduped = dedupe_events_by_name(vec![valid, broken]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].start_date, "2025-06-10");
    }

    #[test]
    fn valid_start_replaces_unparsable_one() {
        let broken = event("Fair", "garbage", "garbage");
        let valid = event("fair", "2025-06-10", "2025-06-10");
        let deduped = dedupe_events_by_name(vec![broken, valid]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].start_date, "2025-06-10");
    }

    #[test]
    fn dedup_is_idempotent() {
        let input = vec![
            event("A", "2025-06-02", "2025-06-02"),
            event("a", "2025-06-01", "2025-06-03"),
            event("B", "2025-06-05", "2025-06-06"),
        ];
        let once = dedupe_events_by_name(input);
        let twice = dedupe_events_by_name(once.clone());
        let once_ids: Vec<&str> = once.iter().map(|e| e.id.as_str()).collect();
        let twice_ids: Vec<&str> = twice.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(once_ids, twice_ids);
    }
}
