//! Runtime configuration: `config.toml` when present, built-in defaults
//! otherwise, with environment variables taking precedence for deployment
//! overrides.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::constants::{TORONTO_CENTER_LAT, TORONTO_CENTER_LNG, TORONTO_EVENTS_ENDPOINT};
use crate::error::{Result, ScoutError};
use crate::rank::DEFAULT_TIE_THRESHOLD;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub feed: FeedConfig,
    pub search: SearchConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub allowed_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            allowed_origin: "*".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub endpoint: String,
    /// How long a fetched corpus stays fresh before the next request triggers
    /// a background refresh.
    pub revalidate_seconds: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: TORONTO_EVENTS_ENDPOINT.to_string(),
            revalidate_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_results: usize,
    pub tie_break_threshold: f64,
    pub reference_lat: f64,
    pub reference_lng: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 20,
            tie_break_threshold: DEFAULT_TIE_THRESHOLD,
            reference_lat: TORONTO_CENTER_LAT,
            reference_lng: TORONTO_CENTER_LNG,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 4,
            window_ms: 120_000,
        }
    }
}

impl Config {
    /// Load `config.toml` from the working directory, falling back to the
    /// built-in defaults when the file is absent, then apply environment
    /// overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                ScoutError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
            })?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(value = %port, "Ignoring unparsable PORT override"),
            }
        }
        if let Ok(origin) = std::env::var("ALLOWED_ORIGIN") {
            if !origin.trim().is_empty() {
                self.server.allowed_origin = origin;
            }
        }
        if let Ok(raw) = std::env::var("AI_SEARCH_RATE_LIMIT") {
            match raw.parse() {
                Ok(max) => self.rate_limit.max_requests = max,
                Err(_) => warn!(value = %raw, "Ignoring unparsable AI_SEARCH_RATE_LIMIT override"),
            }
        }
        if let Ok(raw) = std::env::var("AI_SEARCH_RATE_LIMIT_WINDOW_MS") {
            match raw.parse() {
                Ok(window) => self.rate_limit.window_ms = window,
                Err(_) => {
                    warn!(value = %raw, "Ignoring unparsable AI_SEARCH_RATE_LIMIT_WINDOW_MS override")
                }
            }
        }
    }
}
