//! Error types for the Yomu client.
//!
//! Uses `thiserror` for structured error definitions that preserve
//! the upstream status code and message wherever one exists.

use thiserror::Error;

/// Main error type for API operations against the library server.
#[derive(Error, Debug)]
pub enum ApiError {
    /// No server base URL has been stored; checked before any network call.
    #[error("server URL not configured")]
    MissingBaseUrl,

    /// No API key has been stored.
    #[error("API key not configured")]
    MissingApiKey,

    /// Transport-level failure (DNS, connect, timeout, malformed response).
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-2xx status.
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Binary image data could not be converted to a displayable URI.
    #[error("failed to decode image data: {0}")]
    Decode(String),

    /// Web platform only: the relay proxy failed its health check and all
    /// authenticated calls are blocked until it passes again.
    #[error("relay proxy unavailable")]
    ProxyUnavailable,

    /// The response body did not match the expected shape.
    #[error("unexpected response body: {0}")]
    UnexpectedBody(String),

    /// The credential store could not be read or written.
    #[error("credential store error: {0}")]
    Credential(#[from] CredentialError),
}

impl ApiError {
    /// Returns the upstream HTTP status, if this error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for errors that cannot be fixed by retrying (missing config).
    pub fn is_configuration(&self) -> bool {
        matches!(self, ApiError::MissingBaseUrl | ApiError::MissingApiKey)
    }
}

/// Error type for credential store operations.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Failed to read or write the backing file.
    #[error("failed to access credential store: {0}")]
    Io(#[from] std::io::Error),

    /// Backing file exists but could not be parsed.
    #[error("failed to parse credential store: {0}")]
    Parse(String),

    /// Could not determine the platform config directory.
    #[error("could not determine config directory")]
    NoConfigDir,

    /// A connect-time bootstrap URL was malformed.
    #[error("invalid OPDS URL: {0}")]
    InvalidOpdsUrl(String),
}

/// Result type alias using anyhow for application-level error handling.
pub type Result<T> = anyhow::Result<T>;
