use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScoutError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream feed error: {message}")]
    Feed { message: String },

    // Kept separate from Feed so callers can tell "took too long"
    // apart from "unavailable".
    #[error("Upstream feed timed out after {seconds}s")]
    FeedTimeout { seconds: u64 },

    #[error("Language model error: {message}")]
    Model { message: String },
}

pub type Result<T> = std::result::Result<T, ScoutError>;
