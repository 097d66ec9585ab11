//! Async command API for one server connection.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::{CacheError, Result};
use crate::transport::Connector;
use crate::types::{ServerIdentity, StoreVerb, Value, validate_key};

use super::client::CacheConnection;
use super::command::{Command, ReplyTo, StoreRequest};
use super::config::ConnectionConfig;
use super::state::{ConnectionState, ConnectionStats};

/// An async handle to a connection worker.
///
/// The worker is the same thread-based control loop [`CacheConnection`]
/// uses; only the way callers wait for replies differs.
///
/// Dropping the handle stops the worker in the background. Call
/// [`shutdown`](Self::shutdown) first to wait until the session is closed.
#[derive(Debug)]
pub struct AsyncCacheConnection {
    inner: CacheConnection,
}

impl AsyncCacheConnection {
    /// Create a connection that talks TCP.
    pub fn new(identity: ServerIdentity, config: Arc<ConnectionConfig>) -> io::Result<Self> {
        Ok(Self {
            inner: CacheConnection::new(identity, config)?,
        })
    }

    /// Create a connection over a custom transport.
    pub fn with_connector(
        identity: ServerIdentity,
        config: Arc<ConnectionConfig>,
        connector: Arc<dyn Connector>,
    ) -> io::Result<Self> {
        Ok(Self {
            inner: CacheConnection::with_connector(identity, config, connector)?,
        })
    }

    /// Get the server identity.
    pub fn identity(&self) -> &ServerIdentity {
        self.inner.identity()
    }

    /// Fetch a single key.
    pub async fn lookup(&self, key: &str) -> Result<Option<Value>> {
        validate_key(key)?;
        let key = key.to_string();
        self.call(|reply| Command::Lookup { key, reply }).await
    }

    /// Fetch several keys in one round trip.
    pub async fn lookup_many<S: AsRef<str>>(&self, keys: &[S]) -> Result<HashMap<String, Value>> {
        let keys = keys
            .iter()
            .map(|key| {
                let key = key.as_ref();
                validate_key(key).map(|()| key.to_string())
            })
            .collect::<Result<Vec<_>>>()?;
        self.call(|reply| Command::LookupMany { keys, reply }).await
    }

    /// Run a storage command. Returns whether the server stored the value.
    pub async fn store(
        &self,
        verb: StoreVerb,
        key: &str,
        value: impl Into<Bytes>,
        flags: u32,
        expiry: u32,
    ) -> Result<bool> {
        validate_key(key)?;
        let request = StoreRequest {
            verb,
            key: key.to_string(),
            flags,
            expiry,
            data: value.into(),
        };
        self.call(|reply| Command::Store { request, reply }).await
    }

    /// Store unconditionally.
    pub async fn set(&self, key: &str, value: impl Into<Bytes>, flags: u32, expiry: u32) -> Result<bool> {
        self.store(StoreVerb::Set, key, value, flags, expiry).await
    }

    /// Get connection statistics.
    pub async fn stats(&self) -> Result<ConnectionStats> {
        self.call(|reply| Command::Stats { reply }).await
    }

    /// Get the current connection state.
    pub async fn state(&self) -> Result<ConnectionState> {
        self.stats().await.map(|stats| stats.state)
    }

    /// Close the session and stop the worker. Idempotent.
    ///
    /// Prefer awaiting this over dropping the handle: a drop only signals
    /// the worker and does not wait for the session to close.
    pub async fn shutdown(&self) {
        let Some(handle) = self.inner.take_worker() else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        let ack = Some(ReplyTo::Async(tx));
        if self.inner.submit(Command::Shutdown { ack }).is_ok() {
            let _ = rx.await;
        }
        let _ = tokio::task::spawn_blocking(move || handle.join()).await;
    }

    async fn call<T>(&self, build: impl FnOnce(ReplyTo<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.inner.submit(build(ReplyTo::Async(tx)))?;
        rx.await.map_err(|_| CacheError::Shutdown)?
    }
}

impl Drop for AsyncCacheConnection {
    fn drop(&mut self) {
        // Never block the runtime here; the inner handle then has nothing
        // left to join.
        self.inner.detach();
    }
}
