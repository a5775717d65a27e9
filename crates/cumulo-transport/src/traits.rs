//! Connection trait and exchange data types
//!
//! Defines the single-exchange contract every transport backend implements,
//! together with the types that cross it: outcome codes, header mappings,
//! request bodies, and upload progress callbacks.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Sentinel reported by [`Connection::status`] when no HTTP status can be
/// read: the exchange is still in flight, was aborted, or failed at the
/// transport level.
pub const STATUS_UNAVAILABLE: i32 = -1;

/// Transport-level classification of an exchange.
///
/// An HTTP error status (4xx/5xx) still classifies as [`ErrorCode::NoError`]:
/// the transport delivered a response, and interpreting the status belongs to
/// the protocol layer above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The exchange completed with a response, whatever its HTTP status
    NoError,
    /// Transport-level failure: DNS, connectivity, TLS
    NetworkError,
    /// The exchange was cancelled before completion
    Abort,
}

/// Request header mapping.
///
/// Distinguishes *own* entries, set deliberately for one exchange, from
/// *ambient* entries inherited from a wider scope (client-level defaults
/// merged in for inspection). Only own entries go on the wire; an inherited
/// entry is never transmitted, so a default can ride along without leaking
/// into a request the caller did not shape.
///
/// Values are coerced to their textual representation at insertion.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    own: BTreeMap<String, String>,
    ambient: BTreeMap<String, String>,
}

impl Headers {
    /// Create an empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header for this exchange
    pub fn set(&mut self, name: impl Into<String>, value: impl ToString) {
        self.own.insert(name.into(), value.to_string());
    }

    /// Builder-style [`set`](Self::set)
    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.set(name, value);
        self
    }

    /// Record an inherited default, visible to [`get`](Self::get) but never
    /// forwarded as a wire header
    pub fn set_ambient(&mut self, name: impl Into<String>, value: impl ToString) {
        self.ambient.insert(name.into(), value.to_string());
    }

    /// Builder-style [`set_ambient`](Self::set_ambient)
    pub fn with_ambient(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.set_ambient(name, value);
        self
    }

    /// Look up a header by name, case-insensitively. Own entries shadow
    /// ambient ones.
    pub fn get(&self, name: &str) -> Option<&str> {
        lookup(&self.own, name).or_else(|| lookup(&self.ambient, name))
    }

    /// Iterate the entries that are forwarded on the wire
    pub fn own_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.own.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True if no own entry is present
    pub fn is_empty(&self) -> bool {
        self.own.is_empty()
    }
}

fn lookup<'a>(map: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Owned request payload: binary, blob-like, or text
#[derive(Debug, Clone, Default)]
pub struct RequestBody(Bytes);

impl RequestBody {
    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for a zero-length payload
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume into the raw bytes
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Self(Bytes::from(text.into_bytes()))
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        Self(Bytes::copy_from_slice(text.as_bytes()))
    }
}

/// Snapshot of upload progress delivered to listeners.
///
/// `bytes_sent` is cumulative and non-decreasing across the notifications of
/// one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    /// Bytes handed to the transport so far
    pub bytes_sent: u64,
    /// Total bytes the body will transmit
    pub total_bytes: u64,
}

/// Callback observing upload progress for one exchange
pub type ProgressListener = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// Handle identifying a registered progress listener.
///
/// Closures are not comparable, so removal is by the id returned at
/// registration. Ids are never reused within a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// A single HTTP exchange.
///
/// Instances come from a [`ConnectionFactory`], carry exactly one `send`, and
/// become read-only once a terminal event settles them. The future returned
/// by [`send`](Connection::send) is the completion signal: it resolves
/// exactly once, on the first terminal event, whatever the outcome class.
/// Read [`error_code`](Connection::error_code) for the classification;
/// network failure is an outcome here, not an error.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open and transmit the exchange, resolving when the first terminal
    /// event (completion, network failure, abort) settles it.
    ///
    /// Only the own entries of `headers` are applied to the wire.
    ///
    /// # Errors
    ///
    /// Fails with [`AlreadySent`](crate::TransportError::AlreadySent) on a
    /// second call, leaving the first exchange undisturbed, or with a
    /// construction error if the method, URL, or a header cannot be put on
    /// the wire.
    async fn send(
        &self,
        url: &str,
        method: &str,
        body: Option<RequestBody>,
        headers: Option<&Headers>,
    ) -> Result<()>;

    /// Transport-level classification of the exchange so far.
    ///
    /// [`ErrorCode::NoError`] until a failing terminal event is observed.
    ///
    /// # Errors
    ///
    /// Fails with [`NotYetSent`](crate::TransportError::NotYetSent) before
    /// `send`.
    fn error_code(&self) -> Result<ErrorCode>;

    /// Numeric HTTP status of the response.
    ///
    /// Reports [`STATUS_UNAVAILABLE`] whenever no status can be read: still
    /// in flight, after an abort, or after a network failure. Never fails
    /// once sent.
    ///
    /// # Errors
    ///
    /// Fails with [`NotYetSent`](crate::TransportError::NotYetSent) before
    /// `send`.
    fn status(&self) -> Result<i32>;

    /// Response body decoded as text; empty until a completed response
    /// supplies one.
    ///
    /// # Errors
    ///
    /// Fails with [`NotYetSent`](crate::TransportError::NotYetSent) before
    /// `send`.
    fn response_text(&self) -> Result<String>;

    /// Look up a response header by name, case-insensitively.
    ///
    /// Callable in any state; `None` before completion and for absent names.
    fn response_header(&self, name: &str) -> Option<String>;

    /// Request cooperative cancellation of the exchange.
    ///
    /// Idempotent; a no-op before `send` and after settlement. An unsettled
    /// in-flight exchange settles with [`ErrorCode::Abort`].
    fn abort(&self);

    /// Register a listener for upload progress during body transmission.
    ///
    /// Listeners run synchronously within the turn that delivers the
    /// underlying progress notification, in registration order.
    fn add_upload_progress_listener(&self, listener: ProgressListener) -> ListenerId;

    /// Unregister a progress listener, stopping further delivery even
    /// mid-exchange. Unknown ids are ignored.
    fn remove_upload_progress_listener(&self, id: ListenerId);
}

/// Produces a fresh [`Connection`] per exchange.
///
/// Connections are single-use: a settled instance is never reused, and the
/// factory is the sanctioned construction path.
pub trait ConnectionFactory: Send + Sync {
    /// Mint a new, unsent connection
    fn create_connection(&self) -> Box<dyn Connection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_own_shadow_ambient() {
        let headers = Headers::new()
            .with_ambient("X-Scope", "ambient")
            .with("X-Scope", "own");

        assert_eq!(headers.get("X-Scope"), Some("own"));
        assert_eq!(headers.get("x-scope"), Some("own"));
    }

    #[test]
    fn headers_ambient_visible_but_not_on_wire() {
        let headers = Headers::new()
            .with("Content-Type", "text/plain")
            .with_ambient("X-Client-Version", "cumulo/0.1");

        assert_eq!(headers.get("x-client-version"), Some("cumulo/0.1"));

        let wire: Vec<_> = headers.own_entries().collect();
        assert_eq!(wire, vec![("Content-Type", "text/plain")]);
    }

    #[test]
    fn headers_values_coerced_to_text() {
        let headers = Headers::new().with("Content-Length", 42);
        assert_eq!(headers.get("content-length"), Some("42"));
    }

    #[test]
    fn headers_absent_name_is_none() {
        let headers = Headers::new().with("A", "1");
        assert_eq!(headers.get("B"), None);
    }

    #[test]
    fn request_body_conversions() {
        assert_eq!(RequestBody::from("payload").as_bytes(), b"payload");
        assert_eq!(RequestBody::from(String::from("p")).len(), 1);
        assert_eq!(RequestBody::from(vec![1u8, 2, 3]).len(), 3);
        assert!(RequestBody::from("").is_empty());
    }
}
