//! Typed publish/subscribe for lifecycle events
//!
//! Every [`Service`](crate::Service) owns an [`EventBus`]. Listeners come in
//! two flavours:
//!
//! - **Handlers** registered with [`EventBus::subscribe`] run synchronously
//!   inside [`EventBus::publish`], in subscription order.
//! - **Channels** created with [`EventBus::listen`] receive a clone of every
//!   event on an unbounded `async_channel`, for consumers that need to await
//!   work in response (e.g. pushing configuration into a service).
//!
//! Publishing snapshots the listener list before delivering, so a handler
//! may subscribe or unsubscribe without deadlocking the bus.

use crate::error::{Error, Operation};
use crate::log::LogLevel;
use crate::state::ServiceState;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Identifier returned by [`EventBus::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

enum Sink<E> {
    Handler(Handler<E>),
    Channel(async_channel::Sender<E>),
}

impl<E> Clone for Sink<E> {
    fn clone(&self) -> Self {
        match self {
            Sink::Handler(handler) => Sink::Handler(handler.clone()),
            Sink::Channel(tx) => Sink::Channel(tx.clone()),
        }
    }
}

/// Multi-listener event bus
pub struct EventBus<E> {
    listeners: Mutex<Vec<(SubscriptionId, Sink<E>)>>,
    next_id: AtomicU64,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Sink<E>)>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, sink: Sink<E>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners().push((id, sink));
        id
    }

    /// Register a synchronous handler for every event
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.add(Sink::Handler(Arc::new(handler)))
    }

    /// Open an unbounded channel receiving every subsequent event
    ///
    /// The channel closes when the bus is cleared or dropped.
    pub fn listen(&self) -> async_channel::Receiver<E> {
        self.listen_with_id().1
    }

    /// Like [`listen`](Self::listen), also returning the id that
    /// [`unsubscribe`](Self::unsubscribe) takes to close the channel
    pub fn listen_with_id(&self) -> (SubscriptionId, async_channel::Receiver<E>) {
        let (tx, rx) = async_channel::unbounded();
        (self.add(Sink::Channel(tx)), rx)
    }

    /// Remove a listener. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(listener, _)| *listener != id);
        listeners.len() != before
    }

    /// Deliver an event to every listener
    pub fn publish(&self, event: &E) {
        let snapshot: Vec<(SubscriptionId, Sink<E>)> = self.listeners().clone();
        let mut closed = Vec::new();

        for (id, sink) in snapshot {
            match sink {
                Sink::Handler(handler) => handler(event),
                Sink::Channel(tx) => {
                    if tx.try_send(event.clone()).is_err() {
                        closed.push(id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            self.listeners().retain(|(id, _)| !closed.contains(id));
        }
    }

    /// Detach every listener, closing all channels
    pub fn clear(&self) {
        self.listeners().clear();
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Named event channels of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// [`ServiceEvent::StateChanged`]
    StateChanged,
    /// [`ServiceEvent::HealthChanged`]
    HealthChanged,
    /// [`ServiceEvent::Error`]
    Error,
    /// [`ServiceEvent::Log`]
    Log,
}

/// Event emitted by a service
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// Every state transition
    StateChanged {
        /// State before the transition
        old_state: ServiceState,
        /// State after the transition
        new_state: ServiceState,
    },
    /// Health flipped
    HealthChanged {
        /// New health value
        healthy: bool,
        /// Previous health value
        was_healthy: bool,
    },
    /// A lifecycle operation failed
    Error {
        /// Failing operation
        operation: Operation,
        /// The failure
        error: Error,
    },
    /// A log record that passed the service's level filter
    Log {
        /// Record level
        level: LogLevel,
        /// Record message
        message: String,
    },
}

impl ServiceEvent {
    /// Channel this event is published on
    pub fn kind(&self) -> EventKind {
        match self {
            ServiceEvent::StateChanged { .. } => EventKind::StateChanged,
            ServiceEvent::HealthChanged { .. } => EventKind::HealthChanged,
            ServiceEvent::Error { .. } => EventKind::Error,
            ServiceEvent::Log { .. } => EventKind::Log,
        }
    }
}
