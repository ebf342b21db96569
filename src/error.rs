use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by any API call.
///
/// Transport failures, non-2xx statuses, and contract violations in the
/// responses all propagate directly to the caller; nothing is retried.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Login was rejected by the server (non-2xx on the login endpoint)
    #[error("Login rejected: status {0}")]
    Authentication(u16),
    /// HTTP response with non-2xx status code on an authenticated call
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body was missing or lacked a field the contract requires
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    /// The details endpoint returned no item for the requested id
    #[error("Item {0} not found")]
    NotFound(String),
    /// A listing kept returning continuation cursors past the page cap
    #[error("Listing exceeded {0} pages")]
    PageLimitExceeded(u32),
    /// A base or endpoint URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}
