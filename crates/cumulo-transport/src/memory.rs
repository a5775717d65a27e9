//! In-process connection backend
//!
//! Never touches the network: `send` records the outgoing request and parks
//! on the completion signal, and the embedding code delivers terminal and
//! progress events by hand. Settlement rules are identical to the HTTP
//! backend because both ride the same exchange core, which makes this the
//! backend of choice for deterministic tests of transport consumers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::Result;
use crate::exchange::{lock, Exchange, Outcome};
use crate::traits::{
    Connection, ConnectionFactory, ErrorCode, Headers, ListenerId, ProgressListener, RequestBody,
    UploadProgress,
};

/// The request captured by a [`MemoryConnection`] send
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// URL as given by the caller
    pub url: String,
    /// Method as given by the caller
    pub method: String,
    /// Body bytes, if a body was supplied
    pub body: Option<Vec<u8>>,
    /// Headers that would go on the wire (own entries only)
    pub wire_headers: Vec<(String, String)>,
}

/// A single in-process exchange.
///
/// Clones share the same exchange, so a test can hold one clone while the
/// code under test drives the other.
#[derive(Clone, Default)]
pub struct MemoryConnection {
    exchange: Arc<Exchange>,
    recorded: Arc<Mutex<Option<RecordedRequest>>>,
}

impl MemoryConnection {
    /// Create a fresh, unsent connection
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a completed response. Header names are lowercased for
    /// case-insensitive lookup, as on the wire.
    pub fn complete(&self, status: u16, body: impl Into<String>, headers: &[(&str, &str)]) {
        let headers: HashMap<String, String> = headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), (*value).to_string()))
            .collect();
        self.exchange
            .settle(Outcome::completed(status, body.into(), headers));
    }

    /// Deliver a transport-level failure
    pub fn fail(&self) {
        self.exchange.settle(Outcome::network_error());
    }

    /// Deliver an upload progress notification to registered listeners
    pub fn emit_progress(&self, bytes_sent: u64, total_bytes: u64) {
        self.exchange.notify_progress(UploadProgress {
            bytes_sent,
            total_bytes,
        });
    }

    /// The request recorded by `send`, if one was made
    pub fn request(&self) -> Option<RecordedRequest> {
        lock(&self.recorded).clone()
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(
        &self,
        url: &str,
        method: &str,
        body: Option<RequestBody>,
        headers: Option<&Headers>,
    ) -> Result<()> {
        self.exchange.mark_sent()?;

        let wire_headers = headers
            .map(|headers| {
                headers
                    .own_entries()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        *lock(&self.recorded) = Some(RecordedRequest {
            url: url.to_string(),
            method: method.to_string(),
            body: body.map(|body| body.as_bytes().to_vec()),
            wire_headers,
        });

        self.exchange.settled().await;
        Ok(())
    }

    fn error_code(&self) -> Result<ErrorCode> {
        self.exchange.error_code()
    }

    fn status(&self) -> Result<i32> {
        self.exchange.status()
    }

    fn response_text(&self) -> Result<String> {
        self.exchange.response_text()
    }

    fn response_header(&self, name: &str) -> Option<String> {
        self.exchange.response_header(name)
    }

    fn abort(&self) {
        if self.exchange.is_in_flight() {
            self.exchange.settle(Outcome::aborted());
        }
    }

    fn add_upload_progress_listener(&self, listener: ProgressListener) -> ListenerId {
        self.exchange.add_listener(listener)
    }

    fn remove_upload_progress_listener(&self, id: ListenerId) {
        self.exchange.remove_listener(id)
    }
}

/// Factory handing out [`MemoryConnection`]s and retaining a driving handle
/// for each, so a test can settle exchanges the code under test opened.
#[derive(Clone, Default)]
pub struct MemoryConnectionFactory {
    created: Arc<Mutex<Vec<MemoryConnection>>>,
}

impl MemoryConnectionFactory {
    /// Create an empty factory
    pub fn new() -> Self {
        Self::default()
    }

    /// Driving handles for every connection handed out so far, in creation
    /// order
    pub fn connections(&self) -> Vec<MemoryConnection> {
        lock(&self.created).clone()
    }
}

impl ConnectionFactory for MemoryConnectionFactory {
    fn create_connection(&self) -> Box<dyn Connection> {
        let connection = MemoryConnection::new();
        lock(&self.created).push(connection.clone());
        Box::new(connection)
    }
}
