//! Dispatcher worker.
//!
//! Runs on its own thread for one listening period, blocked on the connection's
//! event receiver. Each event is decoded, then delivered to every unmuted
//! subscription on its channel as registered at delivery time.

use std::any::Any;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crossbeam_channel::{select, Receiver, TryRecvError};

use super::evaluator::SYSTEM_CHANNEL;
use super::registry::Registry;
use crate::decode::Decoder;
use crate::error::DecodeError;
use crate::transport::Notification;

/// Why a dispatch loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchExit {
    Cancelled,
    StreamClosed,
}

pub(crate) struct Dispatcher<K> {
    registry: Arc<RwLock<Registry<K>>>,
    decoder: Arc<dyn Decoder>,
    last_error: Arc<Mutex<Option<DecodeError>>>,
}

impl<K> Dispatcher<K>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn new(
        registry: Arc<RwLock<Registry<K>>>,
        decoder: Arc<dyn Decoder>,
        last_error: Arc<Mutex<Option<DecodeError>>>,
    ) -> Self {
        Self {
            registry,
            decoder,
            last_error,
        }
    }

    /// Receive loop. Returns when cancelled, when the event stream disconnects,
    /// or with the first payload that fails to decode.
    pub(crate) fn run(
        &self,
        events: &Receiver<Notification>,
        cancel: &Receiver<()>,
    ) -> Result<DispatchExit, DecodeError> {
        loop {
            // Cancellation wins over events already buffered.
            match cancel.try_recv() {
                Err(TryRecvError::Empty) => {}
                Ok(()) | Err(TryRecvError::Disconnected) => return Ok(DispatchExit::Cancelled),
            }

            select! {
                recv(cancel) -> _ => return Ok(DispatchExit::Cancelled),
                recv(events) -> msg => match msg {
                    Ok(notification) => {
                        self.dispatch(&notification)?;
                    }
                    Err(_) => return Ok(DispatchExit::StreamClosed),
                },
            }
        }
    }

    /// Decodes one notification and fans it out. Returns how many callbacks
    /// completed.
    pub(crate) fn dispatch(&self, notification: &Notification) -> Result<usize, DecodeError> {
        let value = match self.decoder.decode(&notification.payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(
                    channel = %notification.channel,
                    pid = notification.pid,
                    error = %e,
                    "failed to decode notification payload, stopping dispatcher"
                );
                *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(e.clone());
                return Err(e);
            }
        };

        if notification.channel == SYSTEM_CHANNEL {
            tracing::debug!(pid = notification.pid, payload = %value, "system channel notification");
            return Ok(0);
        }

        // Resolve targets under the read lock, invoke without it so callbacks may
        // mutate the notifier.
        let targets = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .delivery_targets(&notification.channel);

        let mut delivered = 0;
        for (id, callback) in &targets {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                callback(id, &notification.channel, &value, notification.pid);
            }));
            match outcome {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    tracing::warn!(
                        channel = %notification.channel,
                        pid = notification.pid,
                        panic = %panic_message(panic.as_ref()),
                        "subscriber callback panicked"
                    );
                }
            }
        }

        tracing::trace!(
            channel = %notification.channel,
            targets = targets.len(),
            delivered,
            "dispatched notification"
        );
        Ok(delivered)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
