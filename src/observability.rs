//! Metrics for the event discovery pipeline, following Prometheus naming
//! conventions. Rendered by the `/metrics` route when serving.

use std::fmt;
use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::warn;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder for in-process rendering. Idempotent;
/// metrics emitted before this call are dropped by the `metrics` facade.
pub fn init_metrics() {
    if HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = HANDLE.set(handle);
        }
        Err(err) => warn!(error = %err, "Failed to install metrics recorder"),
    }
}

/// Render the current metrics snapshot in Prometheus text exposition format.
pub fn render_metrics() -> String {
    HANDLE.get().map(PrometheusHandle::render).unwrap_or_default()
}

/// All metric names used in the system, so call sites never carry magic strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Feed metrics
    FeedFetchSuccess,
    FeedFetchError,
    FeedFetchTimeout,
    FeedFetchDuration,
    FeedRecordsFetched,

    // Normalize metrics
    NormalizeRecordsParsed,
    NormalizeRecordsRejected,
    NormalizeBatchSize,

    // Corpus metrics
    CorpusRefreshes,
    CorpusStaleReads,
    CorpusSize,

    // Search metrics
    SearchRequests,
    SearchToolCalls,
    SearchDirectReplies,
    SearchFallbacks,
    SearchRateLimited,
    SearchModelDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::FeedFetchSuccess => "scout_feed_fetch_success_total",
            MetricName::FeedFetchError => "scout_feed_fetch_error_total",
            MetricName::FeedFetchTimeout => "scout_feed_fetch_timeout_total",
            MetricName::FeedFetchDuration => "scout_feed_fetch_duration_seconds",
            MetricName::FeedRecordsFetched => "scout_feed_records_fetched_total",

            MetricName::NormalizeRecordsParsed => "scout_normalize_records_parsed_total",
            MetricName::NormalizeRecordsRejected => "scout_normalize_records_rejected_total",
            MetricName::NormalizeBatchSize => "scout_normalize_batch_size",

            MetricName::CorpusRefreshes => "scout_corpus_refreshes_total",
            MetricName::CorpusStaleReads => "scout_corpus_stale_reads_total",
            MetricName::CorpusSize => "scout_corpus_size",

            MetricName::SearchRequests => "scout_search_requests_total",
            MetricName::SearchToolCalls => "scout_search_tool_calls_total",
            MetricName::SearchDirectReplies => "scout_search_direct_replies_total",
            MetricName::SearchFallbacks => "scout_search_fallbacks_total",
            MetricName::SearchRateLimited => "scout_search_rate_limited_total",
            MetricName::SearchModelDuration => "scout_search_model_duration_seconds",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub mod feed {
    use super::MetricName;

    pub fn fetch_success(record_count: usize) {
        ::metrics::counter!(MetricName::FeedFetchSuccess.as_str()).increment(1);
        ::metrics::counter!(MetricName::FeedRecordsFetched.as_str())
            .increment(record_count as u64);
    }

    pub fn fetch_error() {
        ::metrics::counter!(MetricName::FeedFetchError.as_str()).increment(1);
    }

    pub fn fetch_timeout() {
        ::metrics::counter!(MetricName::FeedFetchTimeout.as_str()).increment(1);
    }

    pub fn fetch_duration(secs: f64) {
        ::metrics::histogram!(MetricName::FeedFetchDuration.as_str()).record(secs);
    }
}

pub mod normalize {
    use super::MetricName;

    pub fn record_parsed() {
        ::metrics::counter!(MetricName::NormalizeRecordsParsed.as_str()).increment(1);
    }

    pub fn record_rejected(reason: &'static str) {
        ::metrics::counter!(MetricName::NormalizeRecordsRejected.as_str(), "reason" => reason)
            .increment(1);
    }

    pub fn batch_processed(size: usize) {
        ::metrics::histogram!(MetricName::NormalizeBatchSize.as_str()).record(size as f64);
    }
}

pub mod corpus {
    use super::MetricName;

    pub fn refreshed(size: usize) {
        ::metrics::counter!(MetricName::CorpusRefreshes.as_str()).increment(1);
        ::metrics::gauge!(MetricName::CorpusSize.as_str()).set(size as f64);
    }

    pub fn stale_read() {
        ::metrics::counter!(MetricName::CorpusStaleReads.as_str()).increment(1);
    }
}

pub mod search {
    use super::MetricName;

    pub fn request_received() {
        ::metrics::counter!(MetricName::SearchRequests.as_str()).increment(1);
    }

    pub fn tool_call_extracted() {
        ::metrics::counter!(MetricName::SearchToolCalls.as_str()).increment(1);
    }

    pub fn direct_reply() {
        ::metrics::counter!(MetricName::SearchDirectReplies.as_str()).increment(1);
    }

    pub fn fallback_used(reason: &'static str) {
        ::metrics::counter!(MetricName::SearchFallbacks.as_str(), "reason" => reason).increment(1);
    }

    pub fn rate_limited() {
        ::metrics::counter!(MetricName::SearchRateLimited.as_str()).increment(1);
    }

    pub fn model_duration(secs: f64) {
        ::metrics::histogram!(MetricName::SearchModelDuration.as_str()).record(secs);
    }
}
