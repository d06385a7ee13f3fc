//! # Host Bridge Traits
//!
//! Capability traits that the media host must implement for the language
//! mirror core.
//!
//! ## Overview
//!
//! This crate defines the contract between the core engines and the host
//! media server. The core never reaches into host internals directly: every
//! library lookup, permission change and filesystem operation goes through
//! one of the traits below, which keeps the engines testable with in-memory
//! fakes and lets alternative hosts plug in their own adapters.
//!
//! ## Traits
//!
//! ### Host Managers
//! - [`LibraryDirectory`](library::LibraryDirectory) - Enumerate, create and delete libraries
//! - [`UserDirectory`](users::UserDirectory) - Enumerate host users
//! - [`PermissionStore`](permissions::PermissionStore) - Per-user accessible library sets
//!
//! ### Storage
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Directory listing, hardlinks, removal
//! - [`ConfigurationPersistence`](storage::ConfigurationPersistence) - Durable config blob
//!
//! ### Optional Capabilities
//! - [`GroupMembershipProvider`](groups::GroupMembershipProvider) - Directory group lookup
//!   (e.g. LDAP). Injected only when the host has it; the core never probes for it.
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Adapters
//! should map host failures onto it and keep the distinct variants intact:
//! in particular a hardlink across filesystems must surface as
//! [`BridgeError::CrossDevice`] so the sync engine can fail before doing work.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single adapter can be shared
//! across concurrently running mirror syncs and reconciliation passes.

pub mod error;
pub mod groups;
pub mod library;
pub mod permissions;
pub mod storage;
pub mod time;
pub mod users;

pub use error::BridgeError;

// Re-export commonly used types
pub use groups::{GroupMembership, GroupMembershipProvider};
pub use library::{CreateLibraryRequest, LibraryDirectory, LibraryInfo};
pub use permissions::{PermissionStore, UserAccess};
pub use storage::{ConfigurationPersistence, DirectoryEntry, FileIdentity, FileSystemAccess};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
pub use users::{UserDirectory, UserInfo};
