use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConciergeError>;

#[derive(Error, Debug)]
pub enum ConciergeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error ({kind:?}, status {status:?}): {message}")]
    Provider {
        kind: ProviderErrorKind,
        status: Option<u16>,
        message: String,
    },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode provider payload: {0}")]
    Decode(String),

    #[error("Structured extraction failed: {0}")]
    Extraction(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why an upstream call failed, derived from the HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// 401/403
    Auth,
    /// 404 or unknown model
    NotFound,
    /// 429
    RateLimit,
    /// 5xx
    ServerError,
    Unknown,
}

const MAX_ERROR_BODY: usize = 300;

impl ConciergeError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => ProviderErrorKind::Auth,
            404 => ProviderErrorKind::NotFound,
            429 => ProviderErrorKind::RateLimit,
            500..=599 => ProviderErrorKind::ServerError,
            _ => ProviderErrorKind::Unknown,
        };
        let message = if body.chars().count() > MAX_ERROR_BODY {
            let truncated: String = body.chars().take(MAX_ERROR_BODY).collect();
            format!("{truncated}...")
        } else {
            body.to_string()
        };
        Self::Provider {
            kind,
            status: Some(status),
            message,
        }
    }
}

impl From<serde_json::Error> for ConciergeError {
    fn from(err: serde_json::Error) -> Self {
        ConciergeError::Decode(err.to_string())
    }
}
