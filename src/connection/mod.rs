//! Connection management for memcache servers.
//!
//! This module provides:
//! - One worker thread per server that owns the connection's state
//! - Lazy connect with backoff after connect failures
//! - Blocking (and, with the `tokio` feature, async) command handles
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use memcache_conn::connection::{CacheConnection, ConnectionConfig};
//! use memcache_conn::ServerIdentity;
//!
//! let config = Arc::new(
//!     ConnectionConfig::default()
//!         .with_read_timeout(Duration::from_millis(500))
//!         .with_retry_delay(Duration::from_secs(2)),
//! );
//!
//! let conn = CacheConnection::new(ServerIdentity::new("127.0.0.1", 11211), config).unwrap();
//!
//! conn.set("greeting", "hello", 0, 0).unwrap();
//! let value = conn.lookup("greeting").unwrap();
//! assert_eq!(value.unwrap().data.as_ref(), b"hello");
//!
//! conn.shutdown();
//! ```

mod client;
mod command;
mod config;
mod state;
mod worker;

pub(crate) use command::Inbound;

pub use client::CacheConnection;
pub use config::{BackoffStrategy, ConnectionConfig, DEFAULT_RETRY_DELAY};
pub use state::{ConnectionState, ConnectionStats};

// Async variant (requires tokio feature)
#[cfg(feature = "tokio")]
mod client_async;

#[cfg(feature = "tokio")]
pub use client_async::AsyncCacheConnection;
