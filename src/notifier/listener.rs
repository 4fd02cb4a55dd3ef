//! Listener lifecycle.
//!
//! Owns the upstream connection and the dispatcher thread for one running period.
//! The connection's listen set cannot be edited while events are being read, so
//! any change to the valid set is applied as stop + reconnect + start.

use std::collections::BTreeSet;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use super::dispatcher::{DispatchExit, Dispatcher};
use super::evaluator::valid_set;
use super::registry::Registry;
use crate::config::NotifierConfig;
use crate::decode::Decoder;
use crate::error::{DecodeError, NotifierError, NotifierResult, TransportError};
use crate::transport::{Connection, Transport};

/// Listener state readable without the control lock.
///
/// Each running period gets a generation number. `live` holds the generation of the
/// dispatcher currently running, or 0; the dispatcher thread clears it on exit, so a
/// dispatcher that died on its own reads as stopped right away.
#[derive(Debug, Default)]
pub(crate) struct ListenerStatus {
    live: AtomicU64,
    next_generation: AtomicU64,
    active: RwLock<(u64, BTreeSet<String>)>,
    last_error: Arc<Mutex<Option<DecodeError>>>,
}

impl ListenerStatus {
    pub(crate) fn is_running(&self) -> bool {
        self.live.load(Ordering::Acquire) != 0
    }

    pub(crate) fn active_channels(&self) -> BTreeSet<String> {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        if active.0 != 0 && self.live.load(Ordering::Acquire) == active.0 {
            active.1.clone()
        } else {
            BTreeSet::new()
        }
    }

    pub(crate) fn last_error(&self) -> Option<DecodeError> {
        self.last_error.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn is_live(&self, generation: u64) -> bool {
        self.live.load(Ordering::Acquire) == generation
    }

    fn publish(&self, channels: &BTreeSet<String>) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = (generation, channels.clone());
        self.live.store(generation, Ordering::Release);
        generation
    }

    fn clear(&self) {
        self.live.store(0, Ordering::Release);
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = (0, BTreeSet::new());
    }
}

/// Held by the dispatcher thread for its whole life.
struct LiveGuard {
    status: Arc<ListenerStatus>,
    generation: u64,
    // Dropped after `drop` below runs; `stop` waits on it.
    _done: Sender<()>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let _ = self
            .status
            .live
            .compare_exchange(self.generation, 0, Ordering::AcqRel, Ordering::Acquire);
    }
}

struct Running {
    generation: u64,
    active: BTreeSet<String>,
    connection: Box<dyn Connection>,
    cancel_tx: Sender<()>,
    done_rx: Receiver<()>,
    join: JoinHandle<Result<DispatchExit, DecodeError>>,
}

enum State {
    Stopped,
    Running(Running),
}

pub(crate) struct Listener<K> {
    state: State,
    registry: Arc<RwLock<Registry<K>>>,
    transport: Arc<dyn Transport>,
    decoder: Arc<dyn Decoder>,
    status: Arc<ListenerStatus>,
    config: NotifierConfig,
}

impl<K> Listener<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        registry: Arc<RwLock<Registry<K>>>,
        transport: Arc<dyn Transport>,
        decoder: Arc<dyn Decoder>,
        config: NotifierConfig,
    ) -> Self {
        Self {
            state: State::Stopped,
            registry,
            transport,
            decoder,
            status: Arc::new(ListenerStatus::default()),
            config,
        }
    }

    /// Shared view of the running state, for readers that must not take the
    /// control lock.
    pub(crate) fn status(&self) -> Arc<ListenerStatus> {
        Arc::clone(&self.status)
    }

    /// Running with a live dispatcher. A dispatcher that ended on its own (decode
    /// failure, upstream closed) counts as stopped.
    pub(crate) fn is_running(&self) -> bool {
        matches!(&self.state, State::Running(r) if self.status.is_live(r.generation))
    }

    /// Channels passed to `listen` for the current running period.
    pub(crate) fn active_channels(&self) -> BTreeSet<String> {
        match &self.state {
            State::Running(r) if self.status.is_live(r.generation) => r.active.clone(),
            _ => BTreeSet::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn last_error(&self) -> Option<DecodeError> {
        self.status.last_error()
    }

    fn current_valid_set(&self) -> BTreeSet<String> {
        valid_set(&self.registry.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn start(&mut self) -> NotifierResult<()> {
        if self.is_running() {
            return Ok(());
        }
        // Reap a dispatcher that already exited.
        self.stop();
        let valid = self.current_valid_set();
        self.start_with(valid)
    }

    fn start_with(&mut self, channels: BTreeSet<String>) -> NotifierResult<()> {
        let mut connection = self.transport.connect()?;

        if let Err(e) = listen_all(connection.as_mut(), &channels) {
            close_quietly(connection.as_mut());
            return Err(e.into());
        }
        let events = match connection.events() {
            Ok(rx) => rx,
            Err(e) => {
                close_quietly(connection.as_mut());
                return Err(e.into());
            }
        };

        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.decoder),
            Arc::clone(&self.status.last_error),
        );

        let generation = self.status.publish(&channels);
        let guard = LiveGuard {
            status: Arc::clone(&self.status),
            generation,
            _done: done_tx,
        };
        let spawned = thread::Builder::new()
            .name(self.config.dispatcher_thread_name.clone())
            .spawn(move || {
                // Dropped on exit, panic included.
                let _guard = guard;
                dispatcher.run(&events, &cancel_rx)
            });
        let join = match spawned {
            Ok(join) => join,
            Err(e) => {
                self.status.clear();
                close_quietly(connection.as_mut());
                return Err(NotifierError::internal(format!("failed to spawn dispatcher thread: {e}")));
            }
        };

        tracing::info!(channels = ?channels, "listener started");
        self.state = State::Running(Running {
            generation,
            active: channels,
            connection,
            cancel_tx,
            done_rx,
            join,
        });
        Ok(())
    }

    pub(crate) fn stop(&mut self) {
        let State::Running(running) = std::mem::replace(&mut self.state, State::Stopped) else {
            return;
        };
        self.status.clear();
        let Running {
            generation: _,
            active,
            mut connection,
            cancel_tx,
            done_rx,
            join,
        } = running;

        let _ = cancel_tx.try_send(());
        drop(cancel_tx);
        close_quietly(connection.as_mut());

        if join.thread().id() == thread::current().id() {
            // Reached from a callback on the dispatcher thread itself; it exits
            // once the callback returns.
            tracing::debug!("listener stopped from dispatcher thread, detaching");
            return;
        }

        match done_rx.recv_timeout(self.config.stop_timeout()) {
            Err(RecvTimeoutError::Disconnected) | Ok(()) => match join.join() {
                Ok(Ok(exit)) => tracing::debug!(?exit, "dispatcher exited"),
                Ok(Err(e)) => tracing::debug!(error = %e, "dispatcher had stopped on decode failure"),
                Err(_) => tracing::error!("dispatcher thread panicked"),
            },
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    timeout_ms = self.config.stop_timeout_ms,
                    "dispatcher still busy in a callback, detaching"
                );
            }
        }
        tracing::info!(channels = ?active, "listener stopped");
    }

    pub(crate) fn restart(&mut self) -> NotifierResult<()> {
        self.stop();
        let valid = self.current_valid_set();
        self.start_with(valid)
    }

    /// Restarts only if the valid set differs from what is being listened to.
    /// Returns whether a restart happened.
    pub(crate) fn maybe_restart(&mut self) -> NotifierResult<bool> {
        let valid = self.current_valid_set();
        if valid == self.active_channels() {
            return Ok(false);
        }
        tracing::debug!(channels = ?valid, "valid set changed, restarting listener");
        self.stop();
        self.start_with(valid)?;
        Ok(true)
    }
}

impl<K> Drop for Listener<K> {
    fn drop(&mut self) {
        if let State::Running(running) = std::mem::replace(&mut self.state, State::Stopped) {
            self.status.clear();
            let _ = running.cancel_tx.try_send(());
            let mut connection = running.connection;
            close_quietly(connection.as_mut());
            if running.join.thread().id() != thread::current().id() {
                let _ = running.done_rx.recv_timeout(self.config.stop_timeout());
            }
        }
    }
}

fn listen_all(connection: &mut dyn Connection, channels: &BTreeSet<String>) -> Result<(), TransportError> {
    for channel in channels {
        connection.listen(channel)?;
    }
    Ok(())
}

fn close_quietly(connection: &mut dyn Connection) {
    if let Err(e) = connection.close() {
        tracing::warn!(error = %e, "failed to close connection");
    }
}
