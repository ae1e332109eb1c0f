//! A connection-layer core for AMQP 0-9-1: transport, the open-connection
//! handshake, frame multiplexing, and channel-zero RPC.
//!
//! This crate stops at the connection boundary: exchanges, queues,
//! consumers, and publisher confirms are channel-level concerns left to
//! callers that implement [`connection::ChannelHandle`].
//!
//! ```rust,no_run
//! use amqp_core::connection::{Connection, ConnectionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::builder()
//!         .credentials("guest", "guest")
//!         .vhost("/")
//!         .build();
//!     let connection = Connection::connect("localhost:5672", "localhost", config).await?;
//!     connection.close().await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod connection;
pub mod frame;
pub mod method;
pub mod table;
pub mod transport;
pub mod uri;

pub use connection::{Connection, ConnectionConfig, Error, Result};
