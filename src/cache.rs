//! Corpus cache: the normalized, windowed, deduplicated event set every
//! request is served from.
//!
//! Reads never block behind a refresh. When the cached corpus has expired,
//! exactly one task performs the fetch while concurrent requests keep getting
//! the previous copy; an upstream failure also degrades to the stale copy
//! when one exists.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::domain::Event;
use crate::error::Result;
use crate::feed::FeedClient;
use crate::normalize::{normalize_batch, RawEventRecord};
use crate::observability;
use crate::window::{dedupe_events_by_name, filter_within_window, EventWindow};

/// One immutable snapshot of the serving corpus, shared across requests.
#[derive(Debug)]
pub struct Corpus {
    pub events: Vec<Event>,
    /// Sorted unique theme names present in `events`.
    pub themes: Vec<String>,
    /// Sorted unique category names present in `events`.
    pub categories: Vec<String>,
    pub fetched_at: Instant,
}

/// Run the full ingest pipeline over a raw feed batch: normalize, restrict to
/// the serving window, collapse duplicates, then derive the filter
/// vocabularies from what survived.
pub fn build_corpus(records: &[RawEventRecord], window: &EventWindow) -> Corpus {
    let batch = normalize_batch(records);
    let windowed = filter_within_window(batch.events, window, Event::parsed_start, Event::parsed_end);
    let events = dedupe_events_by_name(windowed);

    let themes: BTreeSet<String> = events.iter().flat_map(|e| e.themes.iter().cloned()).collect();
    let categories: BTreeSet<String> = events
        .iter()
        .flat_map(|e| e.categories.iter().cloned())
        .collect();

    Corpus {
        events,
        themes: themes.into_iter().collect(),
        categories: categories.into_iter().collect(),
        fetched_at: Instant::now(),
    }
}

pub struct CorpusCache {
    feed: FeedClient,
    revalidate: Duration,
    current: RwLock<Option<Arc<Corpus>>>,
    refresh_lock: Mutex<()>,
}

impl CorpusCache {
    pub fn new(feed: FeedClient, revalidate: Duration) -> Self {
        Self {
            feed,
            revalidate,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Get a corpus snapshot, refreshing when expired. Errors only when there
    /// is no cached copy at all and the upstream fetch fails.
    pub async fn snapshot(&self) -> Result<Arc<Corpus>> {
        if let Some(corpus) = self.cached(true).await {
            return Ok(corpus);
        }

        match self.refresh_lock.try_lock() {
            Ok(_guard) => {
                // another task may have refreshed between our check and the lock
                if let Some(corpus) = self.cached(true).await {
                    return Ok(corpus);
                }
                match self.refresh().await {
                    Ok(corpus) => Ok(corpus),
                    Err(err) => match self.cached(false).await {
                        Some(stale) => {
                            warn!(error = %err, "Feed refresh failed, serving stale corpus");
                            observability::corpus::stale_read();
                            Ok(stale)
                        }
                        None => Err(err),
                    },
                }
            }
            // a refresh is already in flight; hand out the old copy rather
            // than queueing the request behind the fetch
            Err(_) => match self.cached(false).await {
                Some(stale) => {
                    observability::corpus::stale_read();
                    Ok(stale)
                }
                None => {
                    let _guard = self.refresh_lock.lock().await;
                    match self.cached(false).await {
                        Some(corpus) => Ok(corpus),
                        None => self.refresh().await,
                    }
                }
            },
        }
    }

    async fn cached(&self, must_be_fresh: bool) -> Option<Arc<Corpus>> {
        let guard = self.current.read().await;
        guard
            .as_ref()
            .filter(|corpus| !must_be_fresh || corpus.fetched_at.elapsed() < self.revalidate)
            .cloned()
    }

    async fn refresh(&self) -> Result<Arc<Corpus>> {
        let records = self.feed.fetch_raw_records().await?;
        let window = EventWindow::next_month_from(Local::now().naive_local());
        let corpus = Arc::new(build_corpus(&records, &window));
        info!(
            events = corpus.events.len(),
            themes = corpus.themes.len(),
            categories = corpus.categories.len(),
            "Corpus refreshed"
        );
        observability::corpus::refreshed(corpus.events.len());

        let mut guard = self.current.write().await;
        *guard = Some(corpus.clone());
        Ok(corpus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn raw_event(name: &str, start: &str, end: &str, theme: &str, category: &str) -> RawEventRecord {
        json!({
            "id": name,
            "event_name": name,
            "event_description": "d",
            "event_locations": [{
                "location_name": "Venue",
                "location_address": "1 Main St",
                "location_gps": "[{\"gps_lat\":43.65,\"gps_lng\":-79.38}]",
            }],
            "event_startdate": start,
            "event_enddate": end,
            "event_theme": theme,
            "event_category": category,
            "free_event": "Yes",
        })
    }

    fn window() -> EventWindow {
        EventWindow {
            start: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn corpus_vocabularies_are_sorted_and_deduplicated() {
        let records = vec![
            raw_event("A", "2025-06-10", "2025-06-11", "Culture", "Music"),
            raw_event("B", "2025-06-12", "2025-06-13", "Culture", "Art"),
            raw_event("C", "2025-06-14", "2025-06-15", "Family", "Music"),
        ];
        let corpus = build_corpus(&records, &window());
        assert_eq!(corpus.events.len(), 3);
        assert_eq!(corpus.themes, vec!["Culture", "Family"]);
        assert_eq!(corpus.categories, vec!["Art", "Music"]);
    }

    #[test]
    fn corpus_drops_out_of_window_events_and_duplicates() {
        let records = vec![
            raw_event("Jazz Fest", "2025-06-10", "2025-06-11", "Culture", "Music"),
            raw_event("jazz fest ", "2025-06-05", "2025-06-06", "Culture", "Music"),
            raw_event("Old Fair", "2025-01-01", "2025-01-02", "Family", "Art"),
        ];
        let corpus = build_corpus(&records, &window());
        assert_eq!(corpus.events.len(), 1);
        assert_eq!(corpus.events[0].start_date, "2025-06-05");
        // vocabulary reflects surviving events only
        assert_eq!(corpus.themes, vec!["Culture"]);
    }
}
