//! # pgnotifier - one notification stream, many subscribers
//!
//! pgnotifier lets independent in-process subscribers share a single upstream
//! LISTEN/NOTIFY connection. Subscribers register callbacks on named channels; a
//! background dispatcher decodes each incoming payload and fans it out to every
//! callback currently subscribed to its channel.
//!
//! ## Core Concepts
//!
//! - **Channel**: a named notification channel, mutable independently of its subscribers
//! - **Subscription**: a (channel, subscriber) edge with its own mute flag
//! - **Valid set**: the channels that currently need monitoring, plus a reserved
//!   system channel
//! - **Listener**: one upstream connection plus its dispatcher thread, rebuilt only
//!   when the valid set changes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pgnotifier::{InMemoryTransport, Notifier, Value};
//!
//! let transport = InMemoryTransport::new();
//! let notifier: Notifier = Notifier::new(transport.clone());
//!
//! notifier.subscribe("audit".to_string(), "orders", |id, channel, payload, pid| {
//!     println!("{id} <- {channel} from {pid}: {payload}");
//! })?;
//!
//! transport.notify("orders", "{'id': 42, 'status': 'paid'}", 1234)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod decode;
pub mod error;
pub mod notifier;
pub mod transport;
pub mod value;

// Re-export primary types at crate root for convenience
pub use config::NotifierConfig;
pub use decode::{Decoder, JsonDecoder, LiteralDecoder};
pub use error::{DecodeError, NotifierError, NotifierResult, TransportError};
pub use notifier::{
    valid_set, Callback, ChannelState, Notifier, Registry, SubscriptionState, SYSTEM_CHANNEL,
};
pub use transport::{Connection, InMemoryTransport, Notification, Transport, MAX_PAYLOAD_BYTES};
pub use value::Value;

#[cfg(feature = "postgres")]
pub use transport::{PgConfig, PgTransport};
