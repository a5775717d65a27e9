//! Factory and configuration for HTTP connections

use std::time::Duration;

use super::connection::HttpConnection;
use crate::error::{Result, TransportError};
use crate::traits::{Connection, ConnectionFactory};

/// Configuration for the pooled client behind a factory.
///
/// No overall request deadline exists at this layer; a caller-side deadline
/// is enforced by calling [`Connection::abort`].
#[derive(Clone, Debug)]
pub struct HttpConfig {
    /// Connection-establishment timeout
    pub connect_timeout: Duration,

    /// Maximum idle pooled connections per host
    pub pool_max_idle_per_host: usize,

    /// `User-Agent` sent when the caller does not set one
    pub user_agent: String,

    /// Upload chunk granularity for progress reporting, in bytes
    pub progress_chunk_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 10,
            user_agent: concat!("cumulo-transport/", env!("CARGO_PKG_VERSION")).to_string(),
            progress_chunk_size: 16 * 1024,
        }
    }
}

/// Mints single-use [`HttpConnection`]s over one pooled reqwest client.
#[derive(Clone)]
pub struct HttpConnectionFactory {
    client: reqwest::Client,
    progress_chunk_size: usize,
}

impl HttpConnectionFactory {
    /// Create a factory with default configuration
    ///
    /// # Errors
    ///
    /// Fails with [`TransportError::ClientBuild`] if the underlying client
    /// cannot be constructed.
    pub fn new() -> Result<Self> {
        Self::with_config(HttpConfig::default())
    }

    /// Create a factory with custom configuration
    ///
    /// # Errors
    ///
    /// Fails with [`TransportError::ClientBuild`] if the underlying client
    /// cannot be constructed.
    pub fn with_config(config: HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;
        Ok(Self {
            client,
            progress_chunk_size: config.progress_chunk_size.max(1),
        })
    }

    /// Wrap an existing reqwest client the caller configured elsewhere
    pub fn from_client(client: reqwest::Client) -> Self {
        Self {
            client,
            progress_chunk_size: HttpConfig::default().progress_chunk_size,
        }
    }

    /// Mint a fresh, unsent connection
    pub fn create(&self) -> HttpConnection {
        HttpConnection::new(self.client.clone(), self.progress_chunk_size)
    }
}

impl ConnectionFactory for HttpConnectionFactory {
    fn create_connection(&self) -> Box<dyn Connection> {
        Box::new(self.create())
    }
}
