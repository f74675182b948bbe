//! Gate error types.
//!
//! Every kind resolves to a deny at the HTTP boundary; the calling proxy
//! has no remediation path besides not issuing a certificate, so nothing
//! more specific than "denied" crosses the wire.

use std::time::Duration;
use thiserror::Error;

/// Admission gate errors
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Malformed hostname: {0}")]
    MalformedHostname(String),

    #[error("Policy store unavailable: {0}")]
    PolicyStoreUnavailable(String),

    #[error("Rate limit exceeded for client '{client}'")]
    RateLimitExceeded { client: String },

    #[error("Internal timeout after {0:?}")]
    InternalTimeout(Duration),
}
