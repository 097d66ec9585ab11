//! Transport layer for cache connections.
//!
//! A [`Connector`] opens a [`Session`] to one server. Once open, the session
//! accepts writes and reports everything that happens on the wire as
//! [`TransportEvent`]s pushed into the [`EventSink`] it was given at connect
//! time. The connection worker is the only holder of the receiving end.

pub mod tcp;

use std::fmt;
use std::io;
use std::sync::mpsc::Sender;
use std::time::Duration;

use crate::codec::ResponseToken;
use crate::connection::Inbound;

pub use tcp::{TcpConnector, TcpSession};

/// Something that happened on an open session.
#[derive(Debug)]
pub enum TransportEvent {
    /// The session finished opening.
    Opened,
    /// A write was handed to the socket.
    Sent,
    /// A response token was decoded.
    Message(ResponseToken),
    /// The session failed.
    Exception(TransportFault),
    /// The peer closed the session.
    Closed,
}

/// Cause of a session failure.
#[derive(Debug)]
pub enum TransportFault {
    /// Socket-level failure.
    Io(io::Error),
    /// The inbound byte stream could not be decoded.
    Decode(String),
}

impl TransportFault {
    /// Check if this is a socket-level failure.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

impl fmt::Display for TransportFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Decode(msg) => write!(f, "decode error: {msg}"),
        }
    }
}

/// Delivery handle for the events of one session.
///
/// Every event carries the generation of the session it belongs to, so the
/// worker can tell late events of a closed session from those of the
/// current one.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: Sender<Inbound>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: Sender<Inbound>) -> Self {
        Self { generation, tx }
    }

    /// The generation of the session this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver an event to the connection worker.
    ///
    /// Returns `false` once the worker has gone away.
    pub fn deliver(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Inbound::Transport {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// An open transport session to one server.
pub trait Session: Send {
    /// Write an encoded request.
    fn write(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Close the session. Further events from it are irrelevant.
    fn close(&mut self);
}

/// Factory for transport sessions.
pub trait Connector: Send + Sync {
    /// Open a session to `host:port`, delivering its events to `sink`.
    fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
        sink: EventSink,
    ) -> io::Result<Box<dyn Session>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_classification() {
        let fault = TransportFault::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(fault.is_io());
        assert!(!TransportFault::Decode("bad".into()).is_io());
        assert_eq!(
            TransportFault::Decode("bad".into()).to_string(),
            "decode error: bad"
        );
    }

    #[test]
    fn test_event_sink_tags_generation() {
        let (tx, rx) = std::sync::mpsc::channel();
        let sink = EventSink::new(7, tx);
        assert!(sink.deliver(TransportEvent::Closed));

        match rx.recv().unwrap() {
            Inbound::Transport { generation, event } => {
                assert_eq!(generation, 7);
                assert!(matches!(event, TransportEvent::Closed));
            }
            Inbound::Command(_) => panic!("expected transport event"),
        }

        drop(rx);
        assert!(!sink.deliver(TransportEvent::Opened));
    }
}
