//! Upstream feed client for the Toronto open-data festivals and events
//! document. The feed is a single JSON object with a `value` array of raw
//! records; everything past the array boundary is the normalizer's problem.

use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, warn};

use crate::constants::TORONTO_EVENTS_ENDPOINT;
use crate::error::{Result, ScoutError};
use crate::normalize::RawEventRecord;
use crate::observability;

const FETCH_TIMEOUT_SECONDS: u64 = 30;

pub struct FeedClient {
    client: reqwest::Client,
    endpoint: String,
}

impl Default for FeedClient {
    fn default() -> Self {
        Self::new(TORONTO_EVENTS_ENDPOINT.to_string())
    }
}

impl FeedClient {
    pub fn new(endpoint: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECONDS))
            .build()
            .unwrap_or_default();
        Self { client, endpoint }
    }

    /// Fetch the raw record array. A slow upstream surfaces as
    /// [`ScoutError::FeedTimeout`] so the serving layer can report it
    /// distinctly from a hard failure.
    pub async fn fetch_raw_records(&self) -> Result<Vec<RawEventRecord>> {
        info!(endpoint = %self.endpoint, "Fetching events feed");
        let started = Instant::now();

        let response = match self.client.get(&self.endpoint).send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                observability::feed::fetch_timeout();
                return Err(ScoutError::FeedTimeout {
                    seconds: FETCH_TIMEOUT_SECONDS,
                });
            }
            Err(err) => {
                observability::feed::fetch_error();
                return Err(err.into());
            }
        };

        let status = response.status();
        if !status.is_success() {
            observability::feed::fetch_error();
            return Err(ScoutError::Feed {
                message: format!("feed returned status {status}"),
            });
        }

        let payload: Value = match response.json().await {
            Ok(payload) => payload,
            Err(err) if err.is_timeout() => {
                observability::feed::fetch_timeout();
                return Err(ScoutError::FeedTimeout {
                    seconds: FETCH_TIMEOUT_SECONDS,
                });
            }
            Err(err) => {
                observability::feed::fetch_error();
                return Err(err.into());
            }
        };
        observability::feed::fetch_duration(started.elapsed().as_secs_f64());

        // The document is either {"value": [...]} or a bare array.
        let records = match payload {
            Value::Array(rows) => rows,
            Value::Object(mut map) => match map.remove("value") {
                Some(Value::Array(rows)) => rows,
                _ => {
                    warn!("Feed document has no value array");
                    observability::feed::fetch_error();
                    return Err(ScoutError::Feed {
                        message: "feed document has no value array".to_string(),
                    });
                }
            },
            _ => {
                observability::feed::fetch_error();
                return Err(ScoutError::Feed {
                    message: "feed document is not JSON".to_string(),
                });
            }
        };

        info!(count = records.len(), "Fetched raw event records");
        observability::feed::fetch_success(records.len());
        Ok(records)
    }
}
