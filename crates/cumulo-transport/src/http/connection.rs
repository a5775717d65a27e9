//! Connection backend over reqwest

use std::collections::HashMap;
use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use tokio::sync::Notify;
use tracing::debug;
use url::Url;

use crate::error::{Result, TransportError};
use crate::exchange::{Exchange, Outcome};
use crate::traits::{
    Connection, ErrorCode, Headers, ListenerId, ProgressListener, RequestBody, UploadProgress,
};

/// One HTTP exchange over a shared pooled client.
///
/// Created by [`HttpConnectionFactory`](super::HttpConnectionFactory) and
/// single-use. The exchange runs on its own driver task: dropping the send
/// future does not cancel the request, only [`abort`](Connection::abort)
/// does.
pub struct HttpConnection {
    client: reqwest::Client,
    progress_chunk_size: usize,
    exchange: Arc<Exchange>,
    abort_signal: Arc<Notify>,
}

impl HttpConnection {
    pub(crate) fn new(client: reqwest::Client, progress_chunk_size: usize) -> Self {
        Self {
            client,
            progress_chunk_size,
            exchange: Arc::new(Exchange::new()),
            abort_signal: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn send(
        &self,
        url: &str,
        method: &str,
        body: Option<RequestBody>,
        headers: Option<&Headers>,
    ) -> Result<()> {
        self.exchange.mark_sent()?;

        let method = Method::from_str(method.to_uppercase().as_str())
            .map_err(|_| TransportError::InvalidMethod(method.to_string()))?;
        let url = Url::parse(url).map_err(|e| TransportError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let header_map = match headers {
            Some(headers) => wire_headers(headers)?,
            None => HeaderMap::new(),
        };

        debug!(
            method = %method,
            url = %url,
            body_bytes = body.as_ref().map(RequestBody::len),
            "opening exchange"
        );

        let mut request = self.client.request(method, url).headers(header_map);
        if let Some(body) = body {
            request = request.body(progress_body(
                body,
                self.progress_chunk_size,
                self.exchange.clone(),
            ));
        }

        let exchange = self.exchange.clone();
        let abort_signal = self.abort_signal.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = abort_signal.notified() => Outcome::aborted(),
                outcome = perform(request) => outcome,
            };
            exchange.settle(outcome);
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
            self.abort_signal.notify_one();
        }
    }

    fn add_upload_progress_listener(&self, listener: ProgressListener) -> ListenerId {
        self.exchange.add_listener(listener)
    }

    fn remove_upload_progress_listener(&self, id: ListenerId) {
        self.exchange.remove_listener(id)
    }
}

/// Build the wire header map from the caller's own entries; ambient entries
/// stay behind.
fn wire_headers(headers: &Headers) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers.own_entries() {
        let header_name = HeaderName::from_str(name)
            .map_err(|e| TransportError::invalid_header(name, e))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::invalid_header(name, e))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// Wrap the payload in a chunked stream reporting cumulative bytes handed to
/// the transport.
fn progress_body(
    body: RequestBody,
    chunk_size: usize,
    exchange: Arc<Exchange>,
) -> reqwest::Body {
    let total_bytes = body.len() as u64;
    let stream = stream::unfold(
        (body.into_bytes(), 0u64),
        move |(mut remaining, sent)| {
            let exchange = exchange.clone();
            async move {
                if remaining.is_empty() {
                    return None;
                }
                let take = remaining.len().min(chunk_size);
                let chunk = remaining.split_to(take);
                let sent = sent + take as u64;
                exchange.notify_progress(UploadProgress {
                    bytes_sent: sent,
                    total_bytes,
                });
                Some((Ok::<Bytes, Infallible>(chunk), (remaining, sent)))
            }
        },
    );
    reqwest::Body::wrap_stream(stream)
}

/// Drive the request to its terminal classification. Any reqwest failure,
/// including a body-read failure after the status line, classifies as a
/// network error.
async fn perform(request: reqwest::RequestBuilder) -> Outcome {
    let response = match request.send().await {
        Ok(response) => response,
        Err(error) => {
            debug!(error = %error, "exchange failed at transport level");
            return Outcome::network_error();
        }
    };

    let status = response.status().as_u16();
    let mut headers = HashMap::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_ascii_lowercase(), value.to_owned());
        }
    }

    match response.text().await {
        Ok(body) => Outcome::completed(status, body, headers),
        Err(error) => {
            debug!(error = %error, "response body read failed");
            Outcome::network_error()
        }
    }
}
