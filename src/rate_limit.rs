//! In-memory fixed-window rate limiter keyed by client identifier.
//!
//! State lives in the process; limits reset on restart and are per-instance.
//! Expired windows are swept opportunistically on a small fraction of checks
//! instead of by a background task.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;

use crate::config::RateLimitConfig;

const CLEANUP_PROBABILITY: f64 = 0.01;

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    /// Window expiry as epoch milliseconds.
    reset_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch milliseconds at which the current window resets.
    pub reset_at: i64,
    /// Populated only on denial.
    pub retry_after: Option<Duration>,
}

pub struct RateLimiter {
    max_requests: u32,
    window_ms: i64,
    windows: Mutex<HashMap<String, WindowEntry>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window_ms: config.window_ms as i64,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request for `client` and decide whether it is allowed.
    pub fn check(&self, client: &str) -> RateLimitDecision {
        let now = Utc::now().timestamp_millis();
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if rand::thread_rng().gen::<f64>() < CLEANUP_PROBABILITY {
            windows.retain(|_, entry| entry.reset_at > now);
        }

        let entry = windows.entry(client.to_string()).or_insert(WindowEntry {
            count: 0,
            reset_at: now + self.window_ms,
        });
        if entry.reset_at <= now {
            entry.count = 0;
            entry.reset_at = now + self.window_ms;
        }

        if entry.count >= self.max_requests {
            let wait_ms = (entry.reset_at - now).max(0) as u64;
            return RateLimitDecision {
                allowed: false,
                limit: self.max_requests,
                remaining: 0,
                reset_at: entry.reset_at,
                retry_after: Some(Duration::from_millis(wait_ms)),
            };
        }

        entry.count += 1;
        RateLimitDecision {
            allowed: true,
            limit: self.max_requests,
            remaining: self.max_requests - entry.count,
            reset_at: entry.reset_at,
            retry_after: None,
        }
    }

    /// Inspect the current window for `client` without consuming a request.
    pub fn status(&self, client: &str) -> RateLimitDecision {
        let now = Utc::now().timestamp_millis();
        let windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match windows.get(client).filter(|entry| entry.reset_at > now) {
            Some(entry) => RateLimitDecision {
                allowed: entry.count < self.max_requests,
                limit: self.max_requests,
                remaining: self.max_requests.saturating_sub(entry.count),
                reset_at: entry.reset_at,
                retry_after: None,
            },
            None => RateLimitDecision {
                allowed: true,
                limit: self.max_requests,
                remaining: self.max_requests,
                reset_at: now + self.window_ms,
                retry_after: None,
            },
        }
    }
}

/// Resolve the client identifier from proxy headers, in trust order. Behind
/// no proxy at all every client shares the "unknown" bucket.
pub fn client_id_from_headers(headers: &axum::http::HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next().map(str::trim).filter(|s| !s.is_empty()) {
            return first.to_string();
        }
    }
    for header in ["x-real-ip", "cf-connecting-ip"] {
        if let Some(ip) = headers
            .get(header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return ip.to_string();
        }
    }
    "unknown".to_string()
}
