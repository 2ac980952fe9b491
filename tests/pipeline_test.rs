//! End-to-end pipeline tests: raw feed records through normalization,
//! windowing, dedup, constraint filtering and ranking.

use chrono::NaiveDate;
use serde_json::json;

use event_scout::cache::build_corpus;
use event_scout::domain::{ExtractedFilters, Location};
use event_scout::filter::filter_events;
use event_scout::normalize::RawEventRecord;
use event_scout::rank::{rank_and_limit, DEFAULT_TIE_THRESHOLD};
use event_scout::window::EventWindow;

fn raw_record(
    id: &str,
    name: &str,
    start: &str,
    end: &str,
    lat: f64,
    free: bool,
    category: &str,
) -> RawEventRecord {
    json!({
        "id": id,
        "event_name": name,
        "event_description": format!("{name} in the city"),
        "event_locations": [{
            "location_name": "City Venue",
            "location_address": "100 Queen St W",
            "location_gps": format!("[{{\"gps_lat\":{lat},\"gps_lng\":-79.3832}}]"),
        }],
        "event_startdate": start,
        "event_enddate": end,
        "event_category": category,
        "event_theme": "Culture",
        "free_event": if free { "Yes" } else { "No" },
        "accessible_event": "No",
    })
}

fn serving_window() -> EventWindow {
    EventWindow {
        start: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        end: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
    }
}

#[test]
fn free_music_search_over_a_mixed_corpus() {
    // ten in-window events, three of which are free music
    let mut records = vec![
        raw_record("1", "Free Jazz Night", "2025-06-05", "2025-06-05", 43.6540, true, "Music"),
        raw_record("2", "Free Choir Concert", "2025-06-08", "2025-06-08", 43.6700, true, "Music"),
        raw_record("3", "Free Drum Circle", "2025-06-10", "2025-06-10", 43.7000, true, "Music"),
        raw_record("4", "Free Food Market", "2025-06-06", "2025-06-06", 43.6540, true, "Food"),
        raw_record("5", "Free Art Walk", "2025-06-07", "2025-06-07", 43.6540, true, "Art"),
    ];
    for i in 6..=10 {
        records.push(raw_record(
            &i.to_string(),
            &format!("Paid Gig {i}"),
            "2025-06-09",
            "2025-06-09",
            43.6540,
            false,
            "Music",
        ));
    }

    let corpus = build_corpus(&records, &serving_window());
    assert_eq!(corpus.events.len(), 10);

    let filters = ExtractedFilters {
        is_free: Some(true),
        categories: Some(vec!["Music".to_string()]),
        ..Default::default()
    };
    let matched = filter_events(&corpus.events, &filters);
    assert_eq!(matched.len(), 3);

    let now = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_hms_opt(12, 0, 0).unwrap();
    let reference = Location { lat: 43.6532, lng: -79.3832 };
    let ranked = rank_and_limit(&matched, 20, reference, now, DEFAULT_TIE_THRESHOLD);
    assert_eq!(ranked.len(), 3);
    // all three start within a week, so proximity decides
    assert_eq!(ranked[0].event.name, "Free Jazz Night");
    for scored in &ranked {
        assert!(scored.event.is_free);
        assert!(scored.event.categories.contains(&"Music".to_string()));
    }
}

#[test]
fn corpus_build_windows_dedupes_and_harvests_vocabulary() {
    let records = vec![
        raw_record("1", "Summer Fair", "2025-06-10", "2025-06-12", 43.66, true, "Family"),
        // same event re-listed with different casing and a later start
        raw_record("2", "summer fair ", "2025-06-15", "2025-06-16", 43.66, true, "Family"),
        // outside the serving window entirely
        raw_record("3", "Winter Market", "2025-12-01", "2025-12-02", 43.66, false, "Shopping"),
        // unusable record: no GPS anywhere
        json!({
            "id": "4",
            "event_name": "Phantom Event",
            "event_locations": [{ "location_name": "X", "location_gps": "" }],
            "event_startdate": "2025-06-20",
            "event_enddate": "2025-06-20",
        }),
    ];

    let corpus = build_corpus(&records, &serving_window());
    assert_eq!(corpus.events.len(), 1);
    assert_eq!(corpus.events[0].id, "1");
    assert_eq!(corpus.categories, vec!["Family"]);
    assert_eq!(corpus.themes, vec!["Culture"]);
}

#[test]
fn date_constrained_search_respects_day_boundaries() {
    let records = vec![
        raw_record("1", "Early Show", "2025-06-02", "2025-06-02", 43.66, false, "Music"),
        raw_record("2", "Weekend Show", "2025-06-07", "2025-06-08", 43.66, false, "Music"),
        raw_record("3", "Late Show", "2025-06-20", "2025-06-20", 43.66, false, "Music"),
    ];
    let corpus = build_corpus(&records, &serving_window());

    let filters = ExtractedFilters {
        date_start: Some("2025-06-07".to_string()),
        date_end: Some("2025-06-08".to_string()),
        ..Default::default()
    };
    let matched = filter_events(&corpus.events, &filters);
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].name, "Weekend Show");
}
