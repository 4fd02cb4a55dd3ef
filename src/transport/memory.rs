//! In-memory transport.
//!
//! A process-local broker standing in for the database: `notify` delivers to every
//! open connection listening on the channel. Intended for embedded use and tests,
//! and as a reference implementation of the transport contract.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use super::{Connection, Notification, Transport, MAX_PAYLOAD_BYTES};
use crate::error::TransportError;

/// Default per-connection event buffer.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

#[derive(Debug)]
struct ConnectionEntry {
    channels: BTreeSet<String>,
    tx: Sender<Notification>,
}

#[derive(Debug, Default)]
struct BrokerState {
    next_id: u64,
    connections: HashMap<u64, ConnectionEntry>,
    fail_next_connect: Option<String>,
    fail_listen: HashSet<String>,
}

#[derive(Debug)]
struct Broker {
    state: Mutex<BrokerState>,
    capacity: usize,
    connects: AtomicU64,
    dropped: AtomicU64,
}

impl Broker {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-local notification broker.
///
/// Cloning yields another handle to the same broker.
#[derive(Debug, Clone)]
pub struct InMemoryTransport {
    broker: Arc<Broker>,
}

impl InMemoryTransport {
    /// Creates a broker with the default event buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_BUFFER)
    }

    /// Creates a broker whose connections buffer up to `capacity` undelivered events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            broker: Arc::new(Broker {
                state: Mutex::new(BrokerState::default()),
                capacity: capacity.max(1),
                connects: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Publishes a notification. Returns the number of connections it reached.
    ///
    /// Never blocks: a connection whose buffer is full misses the event and the
    /// drop is counted.
    pub fn notify(&self, channel: &str, payload: &str, pid: i32) -> Result<usize, TransportError> {
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                limit: MAX_PAYLOAD_BYTES,
            });
        }

        let state = self.broker.lock();
        let mut delivered = 0;
        for entry in state.connections.values().filter(|e| e.channels.contains(channel)) {
            match entry.tx.try_send(Notification::new(channel, payload, pid)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                    self.broker.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(delivered)
    }

    /// Total successful connects so far.
    #[must_use]
    pub fn connect_count(&self) -> u64 {
        self.broker.connects.load(Ordering::Relaxed)
    }

    /// Number of connections currently open.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.broker.lock().connections.len()
    }

    /// Listen sets of the currently open connections.
    #[must_use]
    pub fn listening(&self) -> Vec<BTreeSet<String>> {
        self.broker
            .lock()
            .connections
            .values()
            .map(|e| e.channels.clone())
            .collect()
    }

    /// Events dropped because a connection's buffer was full.
    #[must_use]
    pub fn dropped_notifications(&self) -> u64 {
        self.broker.dropped.load(Ordering::Relaxed)
    }

    /// Makes the next `connect` fail with `message`.
    pub fn fail_next_connect(&self, message: impl Into<String>) {
        self.broker.lock().fail_next_connect = Some(message.into());
    }

    /// Makes every `listen` on `channel` fail until cleared.
    pub fn fail_listen_on(&self, channel: impl Into<String>) {
        self.broker.lock().fail_listen.insert(channel.into());
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        let mut state = self.broker.lock();
        state.fail_next_connect = None;
        state.fail_listen.clear();
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for InMemoryTransport {
    fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        let (tx, rx) = bounded(self.broker.capacity);
        let id = {
            let mut state = self.broker.lock();
            if let Some(message) = state.fail_next_connect.take() {
                return Err(TransportError::ConnectionFailed { message });
            }
            let id = state.next_id;
            state.next_id += 1;
            state.connections.insert(
                id,
                ConnectionEntry {
                    channels: BTreeSet::new(),
                    tx,
                },
            );
            id
        };
        self.broker.connects.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(MemoryConnection {
            id,
            broker: Arc::clone(&self.broker),
            events: Some(rx),
            closed: false,
        }))
    }
}

#[derive(Debug)]
struct MemoryConnection {
    id: u64,
    broker: Arc<Broker>,
    events: Option<Receiver<Notification>>,
    closed: bool,
}

impl Connection for MemoryConnection {
    fn listen(&mut self, channel: &str) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        if state.fail_listen.contains(channel) {
            return Err(TransportError::ListenFailed {
                channel: channel.to_string(),
                message: "injected failure".to_string(),
            });
        }
        let entry = state.connections.get_mut(&self.id).ok_or(TransportError::Closed)?;
        entry.channels.insert(channel.to_string());
        Ok(())
    }

    fn events(&mut self) -> Result<Receiver<Notification>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.events.take().ok_or(TransportError::EventsTaken)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            // Dropping the sender disconnects the receiver held by the dispatcher.
            self.broker.lock().connections.remove(&self.id);
        }
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_notify_reaches_listening_connections_only() {
        let transport = InMemoryTransport::new();
        let mut a = transport.connect().unwrap();
        let mut b = transport.connect().unwrap();
        a.listen("orders").unwrap();
        b.listen("users").unwrap();
        let a_rx = a.events().unwrap();
        let b_rx = b.events().unwrap();

        assert_eq!(transport.notify("orders", "1", 7).unwrap(), 1);

        let got = a_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(got, Notification::new("orders", "1", 7));
        assert!(b_rx.try_recv().is_err());
        assert_eq!(transport.connect_count(), 2);
    }

    #[test]
    fn test_close_disconnects_receiver() {
        let transport = InMemoryTransport::new();
        let mut conn = transport.connect().unwrap();
        conn.listen("orders").unwrap();
        let rx = conn.events().unwrap();

        conn.close().unwrap();
        conn.close().unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(1)).is_err());
        assert_eq!(transport.open_connections(), 0);
        assert!(matches!(conn.listen("orders"), Err(TransportError::Closed)));
    }

    #[test]
    fn test_events_taken_once() {
        let transport = InMemoryTransport::new();
        let mut conn = transport.connect().unwrap();
        let _rx = conn.events().unwrap();
        assert!(matches!(conn.events(), Err(TransportError::EventsTaken)));
    }

    #[test]
    fn test_payload_limit() {
        let transport = InMemoryTransport::new();
        let big = "x".repeat(MAX_PAYLOAD_BYTES + 1);
        assert!(matches!(
            transport.notify("orders", &big, 1),
            Err(TransportError::PayloadTooLarge { .. })
        ));
        let exact = "x".repeat(MAX_PAYLOAD_BYTES);
        assert_eq!(transport.notify("orders", &exact, 1).unwrap(), 0);
    }

    #[test]
    fn test_full_buffer_counts_drops() {
        let transport = InMemoryTransport::with_capacity(1);
        let mut conn = transport.connect().unwrap();
        conn.listen("orders").unwrap();
        let _rx = conn.events().unwrap();

        assert_eq!(transport.notify("orders", "1", 1).unwrap(), 1);
        assert_eq!(transport.notify("orders", "2", 1).unwrap(), 0);
        assert_eq!(transport.dropped_notifications(), 1);
    }

    #[test]
    fn test_injected_failures() {
        let transport = InMemoryTransport::new();
        transport.fail_next_connect("refused");
        assert!(matches!(
            transport.connect().err(),
            Some(TransportError::ConnectionFailed { .. })
        ));
        assert_eq!(transport.connect_count(), 0);

        transport.fail_listen_on("orders");
        let mut conn = transport.connect().unwrap();
        assert!(matches!(
            conn.listen("orders"),
            Err(TransportError::ListenFailed { .. })
        ));
        conn.listen("users").unwrap();

        transport.clear_failures();
        conn.listen("orders").unwrap();
        assert_eq!(transport.listening()[0].len(), 2);
    }

    #[test]
    fn test_drop_closes_connection() {
        let transport = InMemoryTransport::new();
        {
            let _conn = transport.connect().unwrap();
            assert_eq!(transport.open_connections(), 1);
        }
        assert_eq!(transport.open_connections(), 0);
    }
}
