//! # Event Bus System
//!
//! Typed events broadcast over `tokio::sync::broadcast` so hosts can observe
//! authentication, synchronization progress and library changes without
//! coupling to the engine's internals.
//!
//! ## Overview
//!
//! - **Event Types**: one enum per domain wrapped in [`CoreEvent`]
//! - **EventBus**: cloneable broadcast sender
//! - **EventStream**: receiver wrapper with optional filtering
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::PhaseChanged {
//!         wave_id: 1,
//!         from: "artists".to_string(),
//!         to: "albums".to_string(),
//!     }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Sync(_)));
//! # }
//! ```
//!
//! ## Event Types
//!
//! ### Authentication Events
//! - `SigningIn`, `SignedIn`, `SignedOut`, `AuthError`
//!
//! ### Sync Events
//! - `WaveStarted` / `WaveResumed`: a full synchronization began
//! - `PhaseChanged`: the wave moved to its next phase
//! - `Progress`: entities decoded so far for one kind
//! - `Completed` / `Interrupted`: terminal outcome of an operation
//! - `RemoteFault`: the server answered with an error envelope
//!
//! ### Library Events
//! - `EntitiesDeleted`: reconciliation marked entities as remotely deleted
//! - `PlaylistUpdated`: a playlist was downloaded or a local change uploaded
//!
//! ## Error Handling
//!
//! Subscribers that fall behind get `RecvError::Lagged(n)` and can keep
//! reading. `RecvError::Closed` means every sender was dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
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
    /// Session-related events
    Auth(AuthEvent),
    /// Synchronization events
    Sync(SyncEvent),
    /// Local library changes caused by synchronization
    Library(LibraryEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::AuthError { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::RemoteFault { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Interrupted { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(AuthEvent::SignedIn { .. }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::WaveStarted { .. })
            | CoreEvent::Sync(SyncEvent::WaveResumed { .. })
            | CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
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

/// Events emitted by the session manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// Handshake in progress.
    SigningIn {
        /// Server base URL.
        server_url: String,
        username: String,
    },
    /// Handshake succeeded and a session is held.
    SignedIn {
        username: String,
        /// Numeric server API version (e.g. 440001).
        api_version: u32,
    },
    /// Session discarded.
    SignedOut {
        username: Option<String>,
    },
    /// Handshake failed; the session was cleared.
    AuthError {
        /// Remote fault code when the server answered with an error envelope.
        code: Option<u32>,
        /// Human-readable error message.
        message: String,
        /// Whether retrying later may succeed (transport problems).
        recoverable: bool,
    },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::SigningIn { .. } => "Authentication in progress",
            AuthEvent::SignedIn { .. } => "Signed in successfully",
            AuthEvent::SignedOut { .. } => "Signed out",
            AuthEvent::AuthError { .. } => "Authentication error",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events related to synchronization with the remote catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A new sync wave was created.
    WaveStarted {
        wave_id: i64,
        /// "normal" or "migration".
        kind: String,
        /// Whether pagination is restricted to entities added since the previous wave.
        delta: bool,
    },
    /// An unfinished wave was picked up again.
    WaveResumed {
        wave_id: i64,
        phase: String,
        cursor: u64,
    },
    /// The wave advanced to its next phase; the cursor was reset.
    PhaseChanged {
        wave_id: i64,
        from: String,
        to: String,
    },
    /// Entities decoded so far for one kind within an operation.
    Progress {
        /// Entity kind being decoded (e.g. "artist").
        kind: String,
        items_processed: u64,
        /// Remote count for the kind, when the session reported one.
        total_items: Option<u64>,
    },
    /// An operation finished.
    Completed {
        /// Operation name (e.g. "full_sync", "artist", "favorites").
        operation: String,
        wave_id: Option<i64>,
        items_processed: u64,
        items_deleted: u64,
        duration_ms: u64,
    },
    /// An operation stopped early; a full sync leaves its wave resumable.
    Interrupted {
        operation: String,
        wave_id: Option<i64>,
        reason: String,
    },
    /// The server answered a request with an error envelope.
    RemoteFault {
        action: String,
        code: u32,
        message: String,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::WaveStarted { .. } => "Sync wave started",
            SyncEvent::WaveResumed { .. } => "Sync wave resumed",
            SyncEvent::PhaseChanged { .. } => "Sync phase changed",
            SyncEvent::Progress { .. } => "Sync in progress",
            SyncEvent::Completed { .. } => "Sync completed",
            SyncEvent::Interrupted { .. } => "Sync interrupted",
            SyncEvent::RemoteFault { .. } => "Remote fault reported",
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

/// Events related to library content changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    /// Reconciliation marked entities as deleted remotely.
    EntitiesDeleted {
        /// Entity kind (e.g. "album").
        kind: String,
        /// Remote ids marked deleted.
        ids: Vec<String>,
    },
    /// Playlist modified.
    PlaylistUpdated {
        playlist_id: String,
        /// What changed (e.g. "downloaded", "songs_added", "renamed").
        change_type: String,
    },
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::EntitiesDeleted { .. } => "Entities deleted remotely",
            LibraryEvent::PlaylistUpdated { .. } => "Playlist updated",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus yields another producer for the same channel. Each
/// `subscribe()` call creates an independent receiver that only sees events
/// emitted after it was created.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// A subscriber that falls more than `capacity` events behind receives
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// when nobody is listening. Publishers in this workspace ignore that error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
    ///
    /// let event_bus = EventBus::new(100);
    /// let event = CoreEvent::Auth(AuthEvent::SignedIn {
    ///     username: "alice".to_string(),
    ///     api_version: 440001,
    /// });
    ///
    /// assert!(event_bus.emit(event).is_err());
    /// ```
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver that skips events rejected by its filter
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let library_changes = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Library(_)));
/// ```
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

    /// Replace the filter; only events matching `predicate` are returned
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Only pass events at or above the given severity
    pub fn min_severity(self, level: EventSeverity) -> Self {
        self.filter(move |event| event.severity() >= level)
    }

    fn passes(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Next matching event
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` when `n` events were dropped for this subscriber,
    /// `RecvError::Closed` once every sender is gone.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.passes(&event) {
                return Ok(event);
            }
        }
    }

    /// Next matching event already buffered, or `None`
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        use broadcast::error::TryRecvError;

        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.passes(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(n)) => return Some(Err(RecvError::Lagged(n))),
                Err(TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
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
