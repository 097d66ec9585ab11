//! Core memcache types and constants.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::{CacheError, Result};

/// Default TCP port for memcache servers.
pub const DEFAULT_PORT: u16 = 11211;

/// Maximum key length accepted by the text protocol.
pub const MAX_KEY_LENGTH: usize = 250;

/// Identity of the backend server a connection talks to.
///
/// The weight is carried for the benefit of whatever distributes keys
/// across servers; a single connection never looks at it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerIdentity {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Relative weight within a server pool.
    pub weight: u32,
}

impl ServerIdentity {
    /// Create an identity with weight 1.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            weight: 1,
        }
    }

    /// Set the weight.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A value returned by a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    /// The key the server returned the value under.
    pub key: String,
    /// Opaque client flags stored alongside the value.
    pub flags: u32,
    /// Raw payload.
    pub data: Bytes,
}

impl Value {
    /// Create a new value.
    pub fn new(key: impl Into<String>, flags: u32, data: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            flags,
            data: data.into(),
        }
    }
}

/// Storage command verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreVerb {
    /// Store unconditionally.
    Set,
    /// Store only if the key does not exist.
    Add,
    /// Store only if the key already exists.
    Replace,
    /// Append data to an existing value.
    Append,
    /// Prepend data to an existing value.
    Prepend,
}

impl StoreVerb {
    /// The verb as written on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Append => "append",
            Self::Prepend => "prepend",
        }
    }
}

impl fmt::Display for StoreVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreVerb {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "set" => Ok(Self::Set),
            "add" => Ok(Self::Add),
            "replace" => Ok(Self::Replace),
            "append" => Ok(Self::Append),
            "prepend" => Ok(Self::Prepend),
            other => Err(CacheError::protocol(format!("unknown store verb: {other}"))),
        }
    }
}

/// Check that a key can be sent over the text protocol.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("empty key".into()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidKey(format!(
            "key is {} bytes, maximum is {MAX_KEY_LENGTH}",
            key.len()
        )));
    }
    if key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(CacheError::InvalidKey(format!("{key:?} contains whitespace or control characters")));
    }
    Ok(())
}
