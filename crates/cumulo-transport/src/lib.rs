//! Single-exchange HTTP transport layer for the cumulo object-storage client
//!
//! Each [`Connection`] performs exactly one HTTP exchange and classifies its
//! outcome with a transport-level [`ErrorCode`]: completed, network failure,
//! or aborted. HTTP statuses are reported as data, never as errors; retry and
//! backoff policy belong to the protocol layer that consumes this crate.
//!
//! # Architecture
//!
//! - **Connection trait**: the single-exchange contract (send, outcome
//!   accessors, abort, upload progress)
//! - **HTTP backend**: concrete connection over reqwest
//! - **Memory backend**: in-process connection for tests and embedding
//! - **Factories**: mint a fresh single-use connection per exchange

#![deny(unsafe_code)]
#![warn(missing_docs)]

//! # Usage
//!
//! ```ignore
//! use cumulo_transport::{Connection, ConnectionFactory, ErrorCode, HttpConnectionFactory};
//!
//! let factory = HttpConnectionFactory::new()?;
//! let connection = factory.create_connection();
//! connection
//!     .send("https://storage.example.com/b/bucket/o/key", "GET", None, None)
//!     .await?;
//! assert_eq!(connection.error_code()?, ErrorCode::NoError);
//! let body = connection.response_text()?;
//! ```

pub mod error;
pub mod http;
pub mod memory;
pub mod traits;

mod exchange;

// Re-export commonly used types
pub use error::{Result, TransportError};
pub use http::{HttpConfig, HttpConnection, HttpConnectionFactory};
pub use memory::{MemoryConnection, MemoryConnectionFactory, RecordedRequest};
pub use traits::{
    Connection, ConnectionFactory, ErrorCode, Headers, ListenerId, ProgressListener, RequestBody,
    UploadProgress, STATUS_UNAVAILABLE,
};
