//! Transport error types

use thiserror::Error;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur in transport operations
///
/// Transport-level *outcomes* (network failure, cancellation) are not errors;
/// they are reported through [`ErrorCode`](crate::ErrorCode) and the send
/// future still resolves. The variants here are misuse and construction
/// failures the caller must fix rather than retry.
#[derive(Debug, Error)]
pub enum TransportError {
    /// `send` called a second time on a single-use connection
    #[error("cannot send more than once on a connection")]
    AlreadySent,

    /// Outcome accessor called before `send`
    #[error("cannot {operation} before sending")]
    NotYetSent {
        /// What was attempted too early
        operation: &'static str,
    },

    /// Method string is not a valid HTTP method token
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// URL failed to parse
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The URL as given by the caller
        url: String,
        /// Parser diagnostic
        reason: String,
    },

    /// Header name or value is not representable on the wire
    #[error("invalid header {name}: {reason}")]
    InvalidHeader {
        /// Header name as given by the caller
        name: String,
        /// Validation diagnostic
        reason: String,
    },

    /// The underlying HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

impl TransportError {
    pub(crate) fn not_yet_sent(operation: &'static str) -> Self {
        Self::NotYetSent { operation }
    }

    pub(crate) fn invalid_header(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidHeader {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}
