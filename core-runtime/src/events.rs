//! # Event Bus System
//!
//! Named-event publish/subscribe for cross-cutting notifications such as
//! logout and unauthorized responses.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: Strongly-typed enum hierarchies for different domains
//! - **EventBus**: Listener registry keyed by event name, plus a broadcast mirror
//! - **EventStream**: Wrapper for consuming mirrored events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     emit      ┌────────────┐   on(name, fn)   ┌──────────────┐
//! │ Auth Manager ├──────────────>│            ├─────────────────>│ Listener     │
//! └──────────────┘               │  EventBus  │                  └──────────────┘
//!                                │            │
//! ┌──────────────┐     emit      │ (listeners │    subscribe     ┌──────────────┐
//! │ Api Client   ├──────────────>│ + channel) ├─────────────────>│ EventStream  │
//! └──────────────┘               └────────────┘                  └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Registering Listeners
//!
//! ```rust
//! use std::sync::Arc;
//! use core_runtime::events::{AuthEvent, CoreEvent, EventBus, Listener};
//!
//! let bus = EventBus::new(16);
//! let listener: Listener = Arc::new(|event: &CoreEvent| {
//!     println!("{}", event.description());
//! });
//!
//! let id = bus.on("logout", listener);
//! bus.emit(CoreEvent::Auth(AuthEvent::Logout));
//! bus.off("logout", id);
//! ```
//!
//! ### Subscribing Asynchronously
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut stream = bus.stream().filter(|event| matches!(event, CoreEvent::Auth(_)));
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = stream.recv().await {
//!         println!("Auth event: {:?}", event);
//!     }
//! });
//! # }
//! ```
//!
//! ## Listener Isolation
//!
//! `emit` invokes listeners synchronously in registration order. Each call runs
//! inside `catch_unwind`; a panicking listener is logged and skipped, and the
//! remaining listeners and the emitter carry on.
//!
//! ## Error Handling
//!
//! The broadcast mirror uses `tokio::sync::broadcast`, which can produce two types of errors:
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, error};

// Re-export commonly used types
pub use tokio::sync::broadcast::error::RecvError;
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the broadcast mirror.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Credential lifecycle events
    Auth(AuthEvent),
    /// Request lifecycle events
    Request(RequestEvent),
}

impl CoreEvent {
    /// Name listeners register under.
    pub fn name(&self) -> &'static str {
        match self {
            CoreEvent::Auth(e) => e.name(),
            CoreEvent::Request(e) => e.name(),
        }
    }

    /// Get a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Request(e) => e.description(),
        }
    }

    /// Get the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::RefreshFailed { .. }) => EventSeverity::Error,
            CoreEvent::Request(RequestEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Auth(AuthEvent::Unauthorized) => EventSeverity::Warning,
            CoreEvent::Request(RequestEvent::Retrying { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(_) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

/// Events related to credential state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// A token was stored and the client is authenticated.
    TokenUpdated,
    /// Credentials were cleared.
    Logout,
    /// The backend rejected the current credentials.
    Unauthorized,
    /// A refresh completed and the new token is active.
    TokenRefreshed,
    /// A refresh attempt failed; credentials have been cleared.
    RefreshFailed { message: String },
}

impl AuthEvent {
    pub const TOKEN_UPDATED: &'static str = "token-updated";
    pub const LOGOUT: &'static str = "logout";
    pub const UNAUTHORIZED: &'static str = "unauthorized";
    pub const TOKEN_REFRESHED: &'static str = "token-refreshed";
    pub const REFRESH_FAILED: &'static str = "refresh-failed";

    fn name(&self) -> &'static str {
        match self {
            AuthEvent::TokenUpdated => Self::TOKEN_UPDATED,
            AuthEvent::Logout => Self::LOGOUT,
            AuthEvent::Unauthorized => Self::UNAUTHORIZED,
            AuthEvent::TokenRefreshed => Self::TOKEN_REFRESHED,
            AuthEvent::RefreshFailed { .. } => Self::REFRESH_FAILED,
        }
    }

    fn description(&self) -> &str {
        match self {
            AuthEvent::TokenUpdated => "Access token updated",
            AuthEvent::Logout => "Credentials cleared",
            AuthEvent::Unauthorized => "Request rejected as unauthorized",
            AuthEvent::TokenRefreshed => "Token refreshed successfully",
            AuthEvent::RefreshFailed { .. } => "Token refresh failed",
        }
    }
}

// ============================================================================
// Request Events
// ============================================================================

/// Events describing the lifecycle of a single request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RequestEvent {
    /// A failed attempt will be retried after `delay_ms`.
    Retrying {
        request_id: String,
        attempt: u32,
        delay_ms: u64,
        kind: String,
    },
    /// The request completed, from the network or from the cache.
    Completed {
        request_id: String,
        method: String,
        path: String,
        status: u16,
        duration_ms: u64,
        cached: bool,
    },
    /// The request ended with a classified error.
    Failed {
        request_id: String,
        method: String,
        path: String,
        kind: String,
        status: Option<u16>,
    },
}

impl RequestEvent {
    fn name(&self) -> &'static str {
        match self {
            RequestEvent::Retrying { .. } => "request:retrying",
            RequestEvent::Completed { .. } => "request:completed",
            RequestEvent::Failed { .. } => "request:failed",
        }
    }

    fn description(&self) -> &str {
        match self {
            RequestEvent::Retrying { .. } => "Retrying request",
            RequestEvent::Completed { .. } => "Request completed",
            RequestEvent::Failed { .. } => "Request failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// A registered event handler.
///
/// Identity is the `Arc` allocation: registering a clone of the same `Arc`
/// under the same event name is a no-op.
pub type Listener = Arc<dyn Fn(&CoreEvent) + Send + Sync>;

/// Handle returned by [`EventBus::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    listener: Listener,
    once: bool,
}

struct BusInner {
    listeners: Mutex<HashMap<String, Vec<Registration>>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<CoreEvent>,
}

/// Central event bus.
///
/// Cheap to clone; clones share listeners and the broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a new event bus whose broadcast mirror buffers `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                sender,
            }),
        }
    }

    /// Registers `listener` for events named `event`.
    ///
    /// Returns the existing id when the same listener is already registered
    /// under that name.
    pub fn on(&self, event: &str, listener: Listener) -> ListenerId {
        self.register(event, listener, false)
    }

    /// Registers a listener that is removed after its first invocation.
    pub fn once(&self, event: &str, listener: Listener) -> ListenerId {
        self.register(event, listener, true)
    }

    fn register(&self, event: &str, listener: Listener, once: bool) -> ListenerId {
        let mut listeners = self.lock();
        let entries = listeners.entry(event.to_string()).or_default();

        if let Some(existing) = entries
            .iter()
            .find(|entry| Arc::ptr_eq(&entry.listener, &listener))
        {
            return existing.id;
        }

        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        entries.push(Registration { id, listener, once });
        debug!(event, listener = id.0, "Registered event listener");
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let Some(entries) = listeners.get_mut(event) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;

        if entries.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Clears listeners for one event name, or for every event when `None`.
    pub fn remove_all_listeners(&self, event: Option<&str>) {
        let mut listeners = self.lock();
        match event {
            Some(name) => {
                listeners.remove(name);
            }
            None => listeners.clear(),
        }
    }

    /// Number of listeners registered under `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.lock().get(event).map_or(0, Vec::len)
    }

    /// Delivers `event` to every listener registered under its name.
    ///
    /// Listeners run synchronously in registration order. A panic inside a
    /// listener is caught and logged. The event is then mirrored to
    /// broadcast subscribers.
    ///
    /// Returns the number of listeners that were invoked.
    pub fn emit(&self, event: CoreEvent) -> usize {
        let name = event.name();

        // Snapshot so listeners may call back into the bus.
        let snapshot: Vec<(ListenerId, Listener)> = {
            let mut listeners = self.lock();
            match listeners.get_mut(name) {
                Some(entries) => {
                    let snapshot = entries
                        .iter()
                        .map(|entry| (entry.id, Arc::clone(&entry.listener)))
                        .collect();
                    entries.retain(|entry| !entry.once);
                    if entries.is_empty() {
                        listeners.remove(name);
                    }
                    snapshot
                }
                None => Vec::new(),
            }
        };

        for (id, listener) in &snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(&event)));
            if let Err(payload) = outcome {
                error!(
                    event = name,
                    listener = id.0,
                    panic = %panic_message(payload.as_ref()),
                    "Event listener panicked"
                );
            }
        }

        // No subscribers is fine.
        let _ = self.inner.sender.send(event);

        snapshot.len()
    }

    /// Subscribe to the broadcast mirror of every emitted event.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.inner.sender.subscribe()
    }

    /// Subscribe and wrap the receiver in an [`EventStream`].
    pub fn stream(&self) -> EventStream {
        EventStream::new(self.subscribe())
    }

    /// Number of active broadcast subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Registration>>> {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.lock().values().map(Vec::len).sum::<usize>();
        f.debug_struct("EventBus")
            .field("listeners", &listeners)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Wrapper around a broadcast receiver with optional filtering.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only yield events matching `predicate`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receive the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
