use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Authentication error: {0}")]
    AuthMissing(String),

    #[error("Rate limit still in effect for {url} after {attempts} attempts")]
    RateLimited { url: String, attempts: u32 },

    #[error("Server error {status} for {url} persisted after {attempts} attempts")]
    TransientServerError {
        url: String,
        status: u16,
        attempts: u32,
    },

    #[error("Request failed with status {status}: {url}")]
    RequestFailed { url: String, status: u16 },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HarvestError>;
