//! Ranker: scores candidate events by distance, recency and price preference
//! and returns the top N.
//!
//! Scoring follows a fixed recipe: distance contributes
//! `0.4 * max(0, 100 - miles * 10)`, recency adds -50/+30/+15/0 depending on
//! how far out the start is, and free events get +5. Events whose scores fall
//! within a small threshold of each other are treated as tied and ordered by
//! ascending distance instead.

use std::cmp::Ordering;

use chrono::NaiveDateTime;

use crate::domain::{Event, Location};
use crate::geo::distance_miles;

/// Default score gap under which two events count as tied. Carried over from
/// the source system; overridable through `search.tie_break_threshold`.
pub const DEFAULT_TIE_THRESHOLD: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct ScoredEvent {
    pub event: Event,
    pub score: f64,
    pub distance_miles: f64,
}

fn score_event(event: &Event, reference: Location, now: NaiveDateTime) -> (f64, f64) {
    let distance = distance_miles(reference, event.location);
    let mut score = 0.0;

    // 10 miles out scores zero, right here scores 100
    let distance_score = (100.0 - distance * 10.0).max(0.0);
    score += distance_score * 0.4;

    // An unparsable start gets no recency adjustment either way.
    if let Some(start) = event.parsed_start() {
        let days_until_start = (start - now).num_seconds() as f64 / 86_400.0;
        if days_until_start < 0.0 {
            score -= 50.0;
        } else if days_until_start <= 7.0 {
            score += 30.0;
        } else if days_until_start <= 30.0 {
            score += 15.0;
        }
    }

    if event.is_free {
        score += 5.0;
    }

    (score, distance)
}

/// Rank candidates and truncate to the top `max_results`.
///
/// Output is descending by score except inside tie clusters: a run of events
/// whose scores sit within `tie_threshold` of the cluster's best score is
/// ordered by ascending distance. Deterministic for identical inputs.
pub fn rank_and_limit(
    events: &[Event],
    max_results: usize,
    reference: Location,
    now: NaiveDateTime,
    tie_threshold: f64,
) -> Vec<ScoredEvent> {
    let mut scored: Vec<ScoredEvent> = events
        .iter()
        .map(|event| {
            let (score, distance) = score_event(event, reference, now);
            ScoredEvent {
                event: event.clone(),
                score,
                distance_miles: distance,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(
                a.distance_miles
                    .partial_cmp(&b.distance_miles)
                    .unwrap_or(Ordering::Equal),
            )
    });

    let mut ranked: Vec<ScoredEvent> = Vec::with_capacity(scored.len());
    let mut i = 0;
    while i < scored.len() {
        let head_score = scored[i].score;
        let mut j = i + 1;
        while j < scored.len() && (head_score - scored[j].score) <= tie_threshold {
            j += 1;
        }
        let mut cluster: Vec<ScoredEvent> = scored[i..j].to_vec();
        cluster.sort_by(|a, b| {
            a.distance_miles
                .partial_cmp(&b.distance_miles)
                .unwrap_or(Ordering::Equal)
        });
        ranked.extend(cluster);
        i = j;
    }

    ranked.truncate(max_results);
    ranked
}
