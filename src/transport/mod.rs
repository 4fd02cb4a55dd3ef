//! Upstream notification transports.
//!
//! A [`Transport`] opens [`Connection`]s. The listener issues one `listen` per
//! monitored channel right after connecting, then hands the connection's event
//! receiver to the dispatcher thread. Closing the connection disconnects that
//! receiver, which is how a running dispatcher is unblocked on stop.
//!
//! A connection's listen set is fixed once events are being consumed; changing
//! the monitored channels always means a new connection.

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// In-process broker transport.
pub mod memory;

/// PostgreSQL LISTEN/NOTIFY transport.
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{InMemoryTransport, DEFAULT_EVENT_BUFFER};

#[cfg(feature = "postgres")]
pub use postgres::{PgConfig, PgTransport};

/// Upstream limit on notification payload size, in bytes.
///
/// PostgreSQL rejects larger NOTIFY payloads in its default configuration.
pub const MAX_PAYLOAD_BYTES: usize = 8000;

/// One notification received from upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Channel the notification was sent on.
    pub channel: String,
    /// Raw, undecoded payload.
    pub payload: String,
    /// Process id of the notifying server session.
    pub pid: i32,
}

impl Notification {
    /// Creates a notification.
    #[must_use]
    pub fn new(channel: impl Into<String>, payload: impl Into<String>, pid: i32) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
            pid,
        }
    }
}

/// Opens connections to the upstream notification source.
pub trait Transport: Send + Sync {
    /// Open a new connection.
    fn connect(&self) -> Result<Box<dyn Connection>, TransportError>;
}

/// An open upstream connection, exclusively owned by the listener for one
/// running period.
pub trait Connection: Send {
    /// Start receiving notifications for `channel`.
    fn listen(&mut self, channel: &str) -> Result<(), TransportError>;

    /// Take the blocking event receiver. Can be called once per connection.
    ///
    /// The receiver disconnects once the connection is closed.
    fn events(&mut self) -> Result<Receiver<Notification>, TransportError>;

    /// Close the connection. Idempotent.
    fn close(&mut self) -> Result<(), TransportError>;
}
