//! TCP transport for memcache servers.

use std::io::{self, BufWriter, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

use crate::codec::TokenReader;
use crate::error::CacheError;

use super::{Connector, EventSink, Session, TransportEvent, TransportFault};

/// Opens plain TCP sessions.
///
/// Each session gets a reader thread that decodes inbound bytes into
/// response tokens and pushes them into the session's event sink.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    nodelay: bool,
}

impl TcpConnector {
    /// Create a connector with `TCP_NODELAY` enabled.
    pub fn new() -> Self {
        Self { nodelay: true }
    }

    /// Set the `TCP_NODELAY` option applied to new sessions.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for TcpConnector {
    fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
        sink: EventSink,
    ) -> io::Result<Box<dyn Session>> {
        let mut last_err = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    let session = TcpSession::open(stream, addr, self.nodelay, sink)?;
                    return Ok(Box::new(session));
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "No address resolved")
        }))
    }
}

/// An open TCP session.
#[derive(Debug)]
pub struct TcpSession {
    writer: BufWriter<TcpStream>,
    peer_addr: SocketAddr,
    sink: EventSink,
}

impl TcpSession {
    fn open(
        stream: TcpStream,
        peer_addr: SocketAddr,
        nodelay: bool,
        sink: EventSink,
    ) -> io::Result<Self> {
        stream.set_nodelay(nodelay)?;
        let reader = stream.try_clone()?;

        // Opened must precede anything the reader thread delivers.
        sink.deliver(TransportEvent::Opened);
        let reader_sink = sink.clone();
        thread::Builder::new()
            .name(format!("memcache-reader-{peer_addr}"))
            .spawn(move || read_loop(reader, reader_sink))?;

        Ok(Self {
            writer: BufWriter::new(stream),
            peer_addr,
            sink,
        })
    }

    /// Get the peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl Session for TcpSession {
    fn write(&mut self, frame: &[u8]) -> io::Result<()> {
        self.writer.write_all(frame)?;
        self.writer.flush()?;
        self.sink.deliver(TransportEvent::Sent);
        Ok(())
    }

    fn close(&mut self) {
        // Unblocks the reader thread, which then exits.
        let _ = self.writer.get_ref().shutdown(Shutdown::Both);
    }
}

impl Drop for TcpSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_loop(mut stream: TcpStream, sink: EventSink) {
    let mut reader = TokenReader::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => {
                trace!(generation = sink.generation(), "peer closed session");
                sink.deliver(TransportEvent::Closed);
                return;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                sink.deliver(TransportEvent::Exception(TransportFault::Io(e)));
                return;
            }
        };

        reader.feed(&buf[..n]);
        loop {
            match reader.try_next() {
                Ok(Some(token)) => {
                    if !sink.deliver(TransportEvent::Message(token)) {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "undecodable response stream");
                    let msg = match e {
                        CacheError::Protocol(msg) => msg,
                        other => other.to_string(),
                    };
                    sink.deliver(TransportEvent::Exception(TransportFault::Decode(msg)));
                    return;
                }
            }
        }
    }
}
