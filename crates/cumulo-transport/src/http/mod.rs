//! HTTP transport backend
//!
//! Binds the connection contract to reqwest: one driver task per exchange,
//! abort raced against the request, upload progress counted as body chunks
//! are handed to the transport.

pub mod connection;
pub mod factory;

pub use connection::HttpConnection;
pub use factory::{HttpConfig, HttpConnectionFactory};
