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

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Fetch failed for {url}: status {status}")]
    FetchStatus { url: String, status: u16 },

    #[error("Fetch timed out for {0}")]
    FetchTimeout(String),

    #[error("Headless render timed out for {0}")]
    RenderTimeout(String),

    #[error("Render backend error for {url}: {message}")]
    Render { url: String, message: String },

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ScoutError {
    /// Whether this error class is expected to clear on its own soon.
    /// Drives the circuit breaker's cool-down selection.
    pub fn error_kind(&self) -> crate::types::ErrorKind {
        use crate::types::ErrorKind;
        match self {
            ScoutError::Http(_)
            | ScoutError::FetchTimeout(_)
            | ScoutError::RenderTimeout(_)
            | ScoutError::FetchStatus { .. }
            | ScoutError::Storage(_) => ErrorKind::Transient,
            _ => ErrorKind::Persistent,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScoutError>;
