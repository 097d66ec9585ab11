//! The per-connection control loop.
//!
//! One worker thread owns everything mutable about a connection: the link
//! (and with it the session), the backoff deadline, and the response being
//! aggregated. Caller commands and transport events arrive through a single
//! ordered inbox, so nothing here needs a lock.
//!
//! Commands run strictly one at a time. While a request is outstanding the
//! worker only consumes transport events; commands that arrive meanwhile
//! are deferred and served afterwards in arrival order.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::codec::{self, ResponseToken};
use crate::error::{CacheError, Result};
use crate::transport::{Connector, EventSink, TransportEvent, TransportFault};
use crate::types::{ServerIdentity, Value};

use super::command::{Command, Inbound, StoreRequest};
use super::config::ConnectionConfig;
use super::state::{ConnectionStats, Link};

/// Outcome of feeding one token to an aggregation state.
enum Flow<T> {
    /// Keep waiting for tokens.
    Wait,
    /// The reply is complete.
    Done(Result<T>),
    /// The token cannot belong to the outstanding request; the stream is
    /// out of step and the session must be dropped.
    Desync(String),
}

/// Aggregation state of a request that is waiting for tokens.
trait Awaiting {
    type Output;

    fn accept(&mut self, token: ResponseToken) -> Flow<Self::Output>;
}

/// A retrieval collecting `VALUE` tokens until `END`.
struct AwaitingValues {
    single: bool,
    buffer: Vec<Value>,
}

impl AwaitingValues {
    fn new(single: bool) -> Self {
        Self {
            single,
            buffer: Vec::new(),
        }
    }
}

impl Awaiting for AwaitingValues {
    type Output = Vec<Value>;

    fn accept(&mut self, token: ResponseToken) -> Flow<Vec<Value>> {
        match token {
            ResponseToken::Value(value) => {
                self.buffer.push(value);
                Flow::Wait
            }
            ResponseToken::End if self.single && self.buffer.len() > 1 => {
                Flow::Done(Err(CacheError::InvariantViolation(format!(
                    "{} values returned for single-key lookup of {}",
                    self.buffer.len(),
                    self.buffer[0].key
                ))))
            }
            ResponseToken::End => Flow::Done(Ok(std::mem::take(&mut self.buffer))),
            ResponseToken::Stored | ResponseToken::NotStored => {
                Flow::Desync(format!("unexpected {token:?} in retrieval response"))
            }
            error => Flow::Done(Err(CacheError::Protocol(
                error.error_description().unwrap_or_default(),
            ))),
        }
    }
}

/// A storage command waiting for its single status token.
struct AwaitingStoreResult;

impl Awaiting for AwaitingStoreResult {
    type Output = bool;

    fn accept(&mut self, token: ResponseToken) -> Flow<bool> {
        match token {
            ResponseToken::Stored => Flow::Done(Ok(true)),
            ResponseToken::NotStored => Flow::Done(Ok(false)),
            ResponseToken::Value(_) | ResponseToken::End => {
                Flow::Desync(format!("unexpected {token:?} in storage response"))
            }
            error => Flow::Done(Err(CacheError::Protocol(
                error.error_description().unwrap_or_default(),
            ))),
        }
    }
}

/// Start a worker thread for one server.
///
/// Returns the sending side of the worker's inbox and its join handle.
pub(crate) fn spawn(
    identity: ServerIdentity,
    config: Arc<ConnectionConfig>,
    connector: Arc<dyn Connector>,
) -> io::Result<(Sender<Inbound>, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel();
    let worker = Worker {
        identity,
        config,
        connector,
        inbox: rx,
        sink_tx: tx.clone(),
        link: Link::NotConnected,
        next_generation: 1,
        deferred: VecDeque::new(),
        stats: ConnectionStats::default(),
    };
    let handle = thread::Builder::new()
        .name(format!("memcache-conn-{}", worker.identity))
        .spawn(move || worker.run())?;
    Ok((tx, handle))
}

struct Worker {
    identity: ServerIdentity,
    config: Arc<ConnectionConfig>,
    connector: Arc<dyn Connector>,
    inbox: Receiver<Inbound>,
    /// Handed to each new session so its events land in `inbox`.
    sink_tx: Sender<Inbound>,
    link: Link,
    next_generation: u64,
    deferred: VecDeque<Command>,
    stats: ConnectionStats,
}

impl Worker {
    fn run(mut self) {
        debug!(server = %self.identity, "connection worker started");

        loop {
            let inbound = match self.deferred.pop_front() {
                Some(command) => Inbound::Command(command),
                None => match self.inbox.recv() {
                    Ok(inbound) => inbound,
                    Err(_) => break,
                },
            };

            match inbound {
                Inbound::Command(Command::Shutdown { ack }) => {
                    self.disconnect();
                    if let Some(ack) = ack {
                        ack.send(Ok(()));
                    }
                    break;
                }
                Inbound::Command(Command::Lookup { key, reply }) => {
                    let result = self
                        .retrieve(std::slice::from_ref(&key), true)
                        .map(|mut values| values.pop());
                    reply.send(result);
                }
                Inbound::Command(Command::LookupMany { keys, reply }) => {
                    let result = self.retrieve(&keys, false).map(|values| {
                        values
                            .into_iter()
                            .map(|value| (value.key.clone(), value))
                            .collect::<HashMap<_, _>>()
                    });
                    reply.send(result);
                }
                Inbound::Command(Command::Store { request, reply }) => {
                    let result = self.store(&request);
                    reply.send(result);
                }
                Inbound::Command(Command::Stats { reply }) => {
                    reply.send(Ok(self.snapshot()));
                }
                Inbound::Transport { generation, event } => self.on_idle_event(generation, event),
            }
        }

        // Commands still deferred are dropped here; their callers see
        // `CacheError::Shutdown`.
        debug!(
            server = %self.identity,
            dropped = self.deferred.len(),
            "connection worker stopped"
        );
    }

    fn retrieve(&mut self, keys: &[String], single: bool) -> Result<Vec<Value>> {
        self.ensure_connected()?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.write(&codec::encode_get(keys))?;
        self.await_reply(AwaitingValues::new(single))
    }

    fn store(&mut self, request: &StoreRequest) -> Result<bool> {
        self.ensure_connected()?;
        let frame = codec::encode_store(
            request.verb,
            &request.key,
            request.flags,
            request.expiry,
            &request.data,
        );
        self.write(&frame)?;
        self.await_reply(AwaitingStoreResult)
    }

    /// Make sure a session is open, connecting if allowed.
    fn ensure_connected(&mut self) -> Result<()> {
        match self.link {
            Link::Connected { .. } => return Ok(()),
            Link::BackingOff { retry_at } if Instant::now() < retry_at => {
                return Err(CacheError::ConnectionOffline);
            }
            _ => {}
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let sink = EventSink::new(generation, self.sink_tx.clone());

        match self.connector.connect(
            &self.identity.host,
            self.identity.port,
            self.config.connect_timeout,
            sink,
        ) {
            Ok(session) => {
                info!(server = %self.identity, generation, "connected");
                self.link = Link::Connected {
                    session,
                    generation,
                };
                self.stats.record_connect();
                Ok(())
            }
            Err(e) => {
                let delay = self
                    .config
                    .backoff
                    .delay_for_attempt(self.stats.consecutive_failures);
                warn!(
                    server = %self.identity,
                    error = %e,
                    retry_in = ?delay,
                    "connect failed, backing off"
                );
                self.stats.record_failure();
                self.link = Link::BackingOff {
                    retry_at: Instant::now() + delay,
                };
                Err(CacheError::ConnectionOffline)
            }
        }
    }

    fn write(&mut self, frame: &[u8]) -> Result<()> {
        let Link::Connected { session, .. } = &mut self.link else {
            return Err(CacheError::ConnectionOffline);
        };
        if let Err(e) = session.write(frame) {
            warn!(server = %self.identity, error = %e, "write failed");
            self.disconnect();
            return Err(CacheError::ConnectionLost(e));
        }
        self.stats.record_send(frame.len());
        Ok(())
    }

    fn await_reply<A: Awaiting>(&mut self, mut state: A) -> Result<A::Output> {
        loop {
            let token = self.next_token()?;
            match state.accept(token) {
                Flow::Wait => {}
                Flow::Done(reply) => return reply,
                Flow::Desync(msg) => {
                    warn!(server = %self.identity, "{msg}, dropping session");
                    self.disconnect();
                    return Err(CacheError::Protocol(msg));
                }
            }
        }
    }

    /// Wait for the next response token of the current session.
    ///
    /// The read timeout applies to each token separately.
    fn next_token(&mut self) -> Result<ResponseToken> {
        let Some(current) = self.link.generation() else {
            return Err(CacheError::ConnectionOffline);
        };
        let deadline = Instant::now() + self.config.read_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let inbound = match self.inbox.recv_timeout(remaining) {
                Ok(inbound) => inbound,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        server = %self.identity,
                        timeout = ?self.config.read_timeout,
                        "request timed out, dropping session"
                    );
                    self.stats.record_timeout();
                    self.disconnect();
                    return Err(CacheError::Timeout);
                }
                Err(RecvTimeoutError::Disconnected) => return Err(CacheError::Shutdown),
            };

            let event = match inbound {
                Inbound::Command(command) => {
                    self.deferred.push_back(command);
                    continue;
                }
                Inbound::Transport { generation, event } if generation == current => event,
                Inbound::Transport { generation, .. } => {
                    trace!(server = %self.identity, generation, "event from stale session");
                    continue;
                }
            };

            match event {
                TransportEvent::Opened | TransportEvent::Sent => {}
                TransportEvent::Message(token) => {
                    self.stats.tokens_received += 1;
                    return Ok(token);
                }
                TransportEvent::Closed => {
                    warn!(server = %self.identity, "server closed session mid-request");
                    self.disconnect();
                    return Err(CacheError::ConnectionLost(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by server",
                    )));
                }
                TransportEvent::Exception(fault) => {
                    warn!(server = %self.identity, %fault, "session failed mid-request");
                    self.disconnect();
                    return Err(match fault {
                        TransportFault::Io(e) => CacheError::ConnectionLost(e),
                        TransportFault::Decode(msg) => CacheError::Protocol(msg),
                    });
                }
            }
        }
    }

    /// Handle a transport event while no request is outstanding.
    fn on_idle_event(&mut self, generation: u64, event: TransportEvent) {
        if self.link.generation() != Some(generation) {
            trace!(server = %self.identity, generation, "event from stale session");
            return;
        }

        match event {
            TransportEvent::Opened | TransportEvent::Sent => {}
            TransportEvent::Message(token) => {
                warn!(server = %self.identity, ?token, "dropping unsolicited response");
                self.stats.unsolicited_events += 1;
            }
            TransportEvent::Closed => {
                debug!(server = %self.identity, "server closed idle session");
                self.disconnect();
            }
            TransportEvent::Exception(fault) => {
                warn!(server = %self.identity, %fault, "idle session failed");
                self.disconnect();
            }
        }
    }

    /// Close the session, if any. Never applies a backoff.
    fn disconnect(&mut self) {
        match std::mem::replace(&mut self.link, Link::NotConnected) {
            Link::Connected {
                mut session,
                generation,
            } => {
                debug!(server = %self.identity, generation, "disconnected");
                session.close();
                self.stats.record_disconnect();
            }
            other => self.link = other,
        }
    }

    fn snapshot(&self) -> ConnectionStats {
        let mut stats = self.stats.clone();
        stats.state = self.link.state();
        stats
    }
}
