use thiserror::Error;

/// Spider errors
///
/// These abort a crawl before it starts (or a report after it ends). Failures
/// of individual pages never surface here, they end up in the page records.
#[derive(Error, Debug)]
pub enum SpiderError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid exclusion pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Invalid crawl state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome classification of a single failed fetch attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connection, DNS or timeout failure, or a status configured as
    /// retryable. Worth another attempt.
    #[error("{detail}")]
    Transient { status: Option<u16>, detail: String },

    /// The server answered definitively (or the request can never succeed).
    #[error("{detail}")]
    Permanent { status: Option<u16>, detail: String },
}

impl FetchError {
    /// A transport failure where the server never answered
    pub fn transient(detail: impl Into<String>) -> Self {
        FetchError::Transient {
            status: None,
            detail: detail.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    /// HTTP status carried by the error, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Transient { status, .. } | FetchError::Permanent { status, .. } => *status,
        }
    }
}
