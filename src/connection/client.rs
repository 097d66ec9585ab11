//! Blocking command API for one server connection.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use bytes::Bytes;

use crate::error::{CacheError, Result};
use crate::transport::{Connector, TcpConnector};
use crate::types::{ServerIdentity, StoreVerb, Value, validate_key};

use super::command::{Command, Inbound, ReplyTo, StoreRequest};
use super::config::ConnectionConfig;
use super::state::{ConnectionState, ConnectionStats};
use super::worker;

/// A connection to one memcache server.
///
/// Every call is handed to the connection's worker thread and blocks until
/// the worker replies. Calls from several threads are served one at a time
/// in the order they were submitted. Share the connection with `Arc`.
///
/// Network failures are never retried here: a failed connect puts the
/// connection into backoff and returns [`CacheError::ConnectionOffline`],
/// a read timeout drops the session and returns [`CacheError::Timeout`].
/// The connection stays usable after any error.
pub struct CacheConnection {
    identity: ServerIdentity,
    inbox: Sender<Inbound>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CacheConnection {
    /// Create a connection that talks TCP.
    ///
    /// No network activity happens until the first command.
    pub fn new(identity: ServerIdentity, config: Arc<ConnectionConfig>) -> io::Result<Self> {
        Self::with_connector(identity, config, Arc::new(TcpConnector::new()))
    }

    /// Create a connection over a custom transport.
    pub fn with_connector(
        identity: ServerIdentity,
        config: Arc<ConnectionConfig>,
        connector: Arc<dyn Connector>,
    ) -> io::Result<Self> {
        let (inbox, handle) = worker::spawn(identity.clone(), config, connector)?;
        Ok(Self {
            identity,
            inbox,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Get the server identity.
    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// Fetch a single key.
    ///
    /// Returns `Ok(None)` when the key is missing. More than one value for
    /// the key is reported as [`CacheError::InvariantViolation`].
    pub fn lookup(&self, key: &str) -> Result<Option<Value>> {
        validate_key(key)?;
        self.call(|reply| Command::Lookup {
            key: key.to_string(),
            reply,
        })
    }

    /// Fetch several keys in one round trip.
    ///
    /// Missing keys are absent from the map. An empty key list returns an
    /// empty map without touching the network, unless the connection is
    /// offline, in which case it reports so.
    pub fn lookup_many<S: AsRef<str>>(&self, keys: &[S]) -> Result<HashMap<String, Value>> {
        let keys = keys
            .iter()
            .map(|key| {
                let key = key.as_ref();
                validate_key(key).map(|()| key.to_string())
            })
            .collect::<Result<Vec<_>>>()?;
        self.call(|reply| Command::LookupMany { keys, reply })
    }

    /// Run a storage command. Returns whether the server stored the value.
    pub fn store(
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
        self.call(|reply| Command::Store { request, reply })
    }

    /// Store unconditionally.
    pub fn set(&self, key: &str, value: impl Into<Bytes>, flags: u32, expiry: u32) -> Result<bool> {
        self.store(StoreVerb::Set, key, value, flags, expiry)
    }

    /// Store only if the key is absent.
    pub fn add(&self, key: &str, value: impl Into<Bytes>, flags: u32, expiry: u32) -> Result<bool> {
        self.store(StoreVerb::Add, key, value, flags, expiry)
    }

    /// Store only if the key is present.
    pub fn replace(&self, key: &str, value: impl Into<Bytes>, flags: u32, expiry: u32) -> Result<bool> {
        self.store(StoreVerb::Replace, key, value, flags, expiry)
    }

    /// Append to an existing value.
    pub fn append(&self, key: &str, value: impl Into<Bytes>, flags: u32, expiry: u32) -> Result<bool> {
        self.store(StoreVerb::Append, key, value, flags, expiry)
    }

    /// Prepend to an existing value.
    pub fn prepend(&self, key: &str, value: impl Into<Bytes>, flags: u32, expiry: u32) -> Result<bool> {
        self.store(StoreVerb::Prepend, key, value, flags, expiry)
    }

    /// Get connection statistics.
    ///
    /// The snapshot is taken in command order, after everything submitted
    /// before it has completed.
    pub fn stats(&self) -> Result<ConnectionStats> {
        self.call(|reply| Command::Stats { reply })
    }

    /// Get the current connection state.
    pub fn state(&self) -> Result<ConnectionState> {
        self.stats().map(|stats| stats.state)
    }

    /// Close the session and stop the worker.
    ///
    /// Commands submitted earlier complete first. Calling this again, or on
    /// a connection whose worker already stopped, does nothing.
    pub fn shutdown(&self) {
        let Some(handle) = self.take_worker() else {
            return;
        };
        // A failed send means the worker is already gone.
        let _ = self.submit(Command::Shutdown { ack: None });
        let _ = handle.join();
    }

    /// Ask the worker to stop without waiting for it.
    ///
    /// Commands submitted earlier still complete; the thread exits on its
    /// own afterwards.
    #[cfg(feature = "tokio")]
    pub(crate) fn detach(&self) {
        if self.take_worker().is_some() {
            let _ = self.submit(Command::Shutdown { ack: None });
        }
    }

    pub(crate) fn submit(&self, command: Command) -> Result<()> {
        self.inbox
            .send(Inbound::Command(command))
            .map_err(|_| CacheError::Shutdown)
    }

    pub(crate) fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn call<T>(&self, build: impl FnOnce(ReplyTo<T>) -> Command) -> Result<T> {
        let (reply, rx) = ReplyTo::blocking();
        self.submit(build(reply))?;
        rx.recv().map_err(|_| CacheError::Shutdown)?
    }
}

impl Drop for CacheConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for CacheConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConnection")
            .field("identity", &self.identity)
            .finish()
    }
}
