//! # Event Bus System
//!
//! Typed, broadcast-based events shared by the mirror engine, the access
//! reconciler and the host integration layer.
//!
//! ## Overview
//!
//! - **Event Types**: [`MirrorEvent`] (sync lifecycle and orphan cleanup),
//!   [`AccessEvent`] (reconciliation and assignment changes) and [`HostEvent`]
//!   (notifications pushed in by the host: libraries removed, users created or
//!   deleted)
//! - **EventBus**: central `tokio::sync::broadcast` channel
//! - **EventStream**: receiver wrapper with an optional filter
//!
//! ```text
//! ┌──────────────┐  emit  ┌──────────┐ subscribe ┌──────────────────┐
//! │ MirrorEngine ├───────>│          ├──────────>│ PolyglotService  │
//! └──────────────┘        │ EventBus │           │   (event loop)   │
//! ┌──────────────┐  emit  │          │ subscribe ┌──────────────────┐
//! │ Host adapter ├───────>│          ├──────────>│ UI / API layer   │
//! └──────────────┘        └──────────┘           └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, HostEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut subscriber = bus.subscribe();
//!
//! bus.emit(CoreEvent::Host(HostEvent::LibraryRemoved {
//!     library_id: "lib-1".to_string(),
//! }))
//! .ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Host(_)));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events. Non-fatal.
//! - **`RecvError::Closed`**: all senders dropped. Treat as shutdown.
//!
//! `emit` fails only when nobody is subscribed; publishers ignore that case.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that fall further behind receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the [`EventBus`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Mirror synchronization and cleanup
    Mirror(MirrorEvent),
    /// User access reconciliation and language assignment
    Access(AccessEvent),
    /// Notifications from the host media server
    Host(HostEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Mirror(e) => e.description(),
            CoreEvent::Access(e) => e.description(),
            CoreEvent::Host(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Mirror(MirrorEvent::SyncFailed { .. }) => EventSeverity::Error,
            CoreEvent::Mirror(MirrorEvent::SyncCompleted { failed_files, .. })
                if *failed_files > 0 =>
            {
                EventSeverity::Warning
            }
            CoreEvent::Mirror(MirrorEvent::OrphanCleaned { .. }) => EventSeverity::Warning,
            CoreEvent::Mirror(MirrorEvent::SyncCompleted { .. })
            | CoreEvent::Mirror(MirrorEvent::Deleted { .. })
            | CoreEvent::Access(AccessEvent::AssignmentChanged { .. }) => EventSeverity::Info,
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
// Mirror Events
// ============================================================================

/// Why an orphaned mirror was cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrphanReason {
    /// The source library no longer exists; mirror record, library and files were removed.
    SourceDeleted,
    /// The mirror's own library was removed; the mirror was reset to pending.
    TargetDeleted,
}

impl OrphanReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrphanReason::SourceDeleted => "source deleted",
            OrphanReason::TargetDeleted => "target deleted",
        }
    }
}

impl fmt::Display for OrphanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by the mirror synchronization engine and orphan detector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum MirrorEvent {
    /// A create or incremental sync started.
    SyncStarted {
        mirror_id: String,
        alternative_id: String,
        source_library_id: String,
        /// `true` for the initial full walk, `false` for an incremental pass
        is_full_sync: bool,
    },
    /// Progress update, 0 to 100.
    Progress { mirror_id: String, percent: u8 },
    /// Sync finished. `failed_files > 0` means the mirror ended in `Error`.
    SyncCompleted {
        mirror_id: String,
        target_library_id: Option<String>,
        files_linked: u64,
        files_removed: u64,
        failed_files: u64,
        duration_ms: u64,
    },
    /// Sync aborted before or during the walk.
    SyncFailed { mirror_id: String, message: String },
    /// Mirror record removed.
    Deleted {
        mirror_id: String,
        library_deleted: bool,
        files_deleted: bool,
    },
    /// Drift detected and handled by the orphan detector.
    OrphanCleaned {
        mirror_id: String,
        source_library_id: String,
        reason: OrphanReason,
    },
}

impl MirrorEvent {
    fn description(&self) -> &str {
        match self {
            MirrorEvent::SyncStarted { .. } => "Mirror sync started",
            MirrorEvent::Progress { .. } => "Mirror sync in progress",
            MirrorEvent::SyncCompleted { .. } => "Mirror sync completed",
            MirrorEvent::SyncFailed { .. } => "Mirror sync failed",
            MirrorEvent::Deleted { .. } => "Mirror deleted",
            MirrorEvent::OrphanCleaned { .. } => "Orphaned mirror cleaned up",
        }
    }
}

// ============================================================================
// Access Events
// ============================================================================

/// Events emitted by the access reconciler and assignment service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AccessEvent {
    /// A user's permission set was rewritten.
    UserReconciled {
        user_id: String,
        added: usize,
        removed: usize,
    },
    /// A user's language assignment changed.
    AssignmentChanged {
        user_id: String,
        /// `None` means the default (source) libraries
        alternative_id: Option<String>,
        /// `Manual`, `Group` or `AutoDefault`
        set_by: String,
    },
}

impl AccessEvent {
    fn description(&self) -> &str {
        match self {
            AccessEvent::UserReconciled { .. } => "User access reconciled",
            AccessEvent::AssignmentChanged { .. } => "Language assignment changed",
        }
    }
}

// ============================================================================
// Host Events
// ============================================================================

/// Notifications the host pushes into the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum HostEvent {
    LibraryRemoved { library_id: String },
    UserCreated { user_id: String },
    UserDeleted { user_id: String },
}

impl HostEvent {
    fn description(&self) -> &str {
        match self {
            HostEvent::LibraryRemoved { .. } => "Library removed",
            HostEvent::UserCreated { .. } => "User created",
            HostEvent::UserDeleted { .. } => "User deleted",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning is cheap: all clones share the same underlying channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
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

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(100);
/// let host_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Host(_)));
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

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without waiting.
    ///
    /// Returns `None` if no matching events are currently buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
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
