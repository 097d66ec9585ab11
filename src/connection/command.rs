//! Messages exchanged between connection handles and the worker.

use std::collections::HashMap;
use std::sync::mpsc;

use bytes::Bytes;

use crate::error::Result;
use crate::transport::TransportEvent;
use crate::types::{StoreVerb, Value};

use super::state::ConnectionStats;

/// Everything the worker's inbox carries, in arrival order.
#[derive(Debug)]
pub(crate) enum Inbound {
    Command(Command),
    Transport { generation: u64, event: TransportEvent },
}

/// A caller request. Every variant except `Shutdown` owes exactly one reply.
#[derive(Debug)]
pub(crate) enum Command {
    Lookup {
        key: String,
        reply: ReplyTo<Option<Value>>,
    },
    LookupMany {
        keys: Vec<String>,
        reply: ReplyTo<HashMap<String, Value>>,
    },
    Store {
        request: StoreRequest,
        reply: ReplyTo<bool>,
    },
    Stats {
        reply: ReplyTo<ConnectionStats>,
    },
    Shutdown {
        ack: Option<ReplyTo<()>>,
    },
}

#[derive(Debug)]
pub(crate) struct StoreRequest {
    pub verb: StoreVerb,
    pub key: String,
    pub flags: u32,
    pub expiry: u32,
    pub data: Bytes,
}

/// Where a reply goes.
#[derive(Debug)]
pub(crate) enum ReplyTo<T> {
    Blocking(mpsc::SyncSender<Result<T>>),
    #[cfg(feature = "tokio")]
    Async(tokio::sync::oneshot::Sender<Result<T>>),
}

impl<T> ReplyTo<T> {
    /// A reply slot for a caller that blocks on the returned receiver.
    pub(crate) fn blocking() -> (Self, mpsc::Receiver<Result<T>>) {
        let (tx, rx) = mpsc::sync_channel(1);
        (ReplyTo::Blocking(tx), rx)
    }

    /// Deliver the reply. A caller that stopped waiting is not an error.
    pub(crate) fn send(self, reply: Result<T>) {
        match self {
            ReplyTo::Blocking(tx) => {
                let _ = tx.send(reply);
            }
            #[cfg(feature = "tokio")]
            ReplyTo::Async(tx) => {
                let _ = tx.send(reply);
            }
        }
    }
}
