//! Connection state tracking.

use std::time::Instant;

use crate::transport::Session;

/// Observable state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session; the next command will try to connect.
    #[default]
    NotConnected,
    /// The last connect failed; commands fail fast until `retry_at`.
    BackingOff {
        /// Earliest time of the next connect attempt.
        retry_at: Instant,
    },
    /// A session is open.
    Connected,
}

impl ConnectionState {
    /// Check if a session is open.
    pub fn is_connected(&self) -> bool {
        *self == ConnectionState::Connected
    }

    /// Check if the connection is waiting out a backoff deadline.
    pub fn is_backing_off(&self) -> bool {
        matches!(self, ConnectionState::BackingOff { .. })
    }
}

/// The worker's own link record. The session lives here and nowhere else.
pub(crate) enum Link {
    NotConnected,
    BackingOff {
        retry_at: Instant,
    },
    Connected {
        session: Box<dyn Session>,
        generation: u64,
    },
}

impl Link {
    pub(crate) fn state(&self) -> ConnectionState {
        match self {
            Link::NotConnected => ConnectionState::NotConnected,
            Link::BackingOff { retry_at } => ConnectionState::BackingOff {
                retry_at: *retry_at,
            },
            Link::Connected { .. } => ConnectionState::Connected,
        }
    }

    /// Generation of the open session, if any.
    pub(crate) fn generation(&self) -> Option<u64> {
        match self {
            Link::Connected { generation, .. } => Some(*generation),
            _ => None,
        }
    }
}

/// Connection statistics.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    /// State at the time the snapshot was taken.
    pub state: ConnectionState,
    /// Number of successful connects.
    pub connect_count: u64,
    /// Number of failed connects.
    pub failure_count: u64,
    /// Consecutive connect failures since the last success.
    pub consecutive_failures: u32,
    /// Number of sessions torn down after an error, close, or timeout.
    pub disconnect_count: u64,
    /// Number of requests that timed out.
    pub timeout_count: u64,
    /// Number of requests written to the server.
    pub requests_written: u64,
    /// Total request bytes written.
    pub bytes_sent: u64,
    /// Number of response tokens consumed.
    pub tokens_received: u64,
    /// Events dropped because no request was outstanding.
    pub unsolicited_events: u64,
    /// Time of last successful connection.
    pub last_connected: Option<Instant>,
    /// Time of last disconnect.
    pub last_disconnected: Option<Instant>,
    /// Time of last error.
    pub last_error: Option<Instant>,
}

impl ConnectionStats {
    pub(crate) fn record_connect(&mut self) {
        self.connect_count += 1;
        self.consecutive_failures = 0;
        self.last_connected = Some(Instant::now());
    }

    pub(crate) fn record_failure(&mut self) {
        self.failure_count += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(Instant::now());
    }

    pub(crate) fn record_disconnect(&mut self) {
        self.disconnect_count += 1;
        self.last_disconnected = Some(Instant::now());
    }

    pub(crate) fn record_timeout(&mut self) {
        self.timeout_count += 1;
        self.last_error = Some(Instant::now());
    }

    pub(crate) fn record_send(&mut self, bytes: usize) {
        self.requests_written += 1;
        self.bytes_sent += bytes as u64;
    }

    /// Time since the last successful connect.
    pub fn uptime(&self) -> Option<std::time::Duration> {
        if self.state.is_connected() {
            self.last_connected.map(|t| t.elapsed())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::NotConnected.is_connected());
        let backing_off = ConnectionState::BackingOff {
            retry_at: Instant::now(),
        };
        assert!(backing_off.is_backing_off());
        assert!(!backing_off.is_connected());
        assert_eq!(ConnectionState::default(), ConnectionState::NotConnected);
    }

    #[test]
    fn test_connection_stats() {
        let mut stats = ConnectionStats::default();

        stats.record_failure();
        stats.record_failure();
        assert_eq!(stats.failure_count, 2);
        assert_eq!(stats.consecutive_failures, 2);
        assert!(stats.last_error.is_some());

        stats.record_connect();
        assert_eq!(stats.connect_count, 1);
        assert_eq!(stats.consecutive_failures, 0);

        stats.record_send(100);
        assert_eq!(stats.requests_written, 1);
        assert_eq!(stats.bytes_sent, 100);

        assert!(stats.uptime().is_none());
        stats.state = ConnectionState::Connected;
        assert!(stats.uptime().is_some());
    }
}
