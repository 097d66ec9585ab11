//! Per-server connection manager for the memcache text protocol.
//!
//! This crate keeps one logical connection per backend server and runs
//! every command on it through a dedicated worker thread. The worker owns
//! the socket, connects lazily, backs off after connect failures, applies a
//! read timeout to outstanding requests and aggregates multi-value replies.
//! Callers get a small blocking API (and an async one with the `tokio`
//! feature).
//!
//! # Features
//!
//! - Single-key and multi-key lookups
//! - `set`, `add`, `replace`, `append` and `prepend`
//! - Strict FIFO execution of commands from any number of threads
//! - Typed errors separating offline, timeout, protocol and fatal failures
//! - Pluggable transport; plain TCP by default
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use memcache_conn::{CacheConnection, ConnectionConfig, ServerIdentity};
//!
//! let conn = CacheConnection::new(
//!     ServerIdentity::new("127.0.0.1", memcache_conn::DEFAULT_PORT),
//!     Arc::new(ConnectionConfig::default()),
//! )
//! .unwrap();
//!
//! conn.set("user:1", "alice", 0, 300).unwrap();
//! let users = conn.lookup_many(&["user:1", "user:2"]).unwrap();
//! println!("found {} users", users.len());
//! ```
//!
//! # Protocol Overview
//!
//! Requests and responses are CRLF-terminated text lines; values travel as
//! length-prefixed data blocks:
//!
//! ```text
//! get <key>*\r\n
//! <verb> <key> <flags> <exptime> <bytes>\r\n<data>\r\n
//!
//! VALUE <key> <flags> <bytes>\r\n<data>\r\n ... END\r\n
//! STORED\r\n | NOT_STORED\r\n
//! ERROR\r\n | CLIENT_ERROR <msg>\r\n | SERVER_ERROR <msg>\r\n
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod transport;
pub mod types;

// Re-export commonly used types at the crate root
pub use codec::ResponseToken;
pub use connection::{CacheConnection, ConnectionConfig, ConnectionState, ConnectionStats};
pub use error::{CacheError, Result};
pub use types::{DEFAULT_PORT, ServerIdentity, StoreVerb, Value};

#[cfg(feature = "tokio")]
pub use connection::AsyncCacheConnection;
