//! # Core Library
//!
//! Persistent model of the language mirror system.
//!
//! ## Overview
//!
//! - [`models`] - alternatives, mirrors, user assignments, classification sets
//!   and the mirror state machine
//! - [`store`] - [`ConfigurationStore`], the snapshot-read / copy-mutate-swap
//!   holder of the whole [`PluginConfiguration`]
//! - [`alternatives`] - administrative create/update/delete of alternatives
//!   and mirror records
//!
//! No filesystem or host library work happens here; see `core-sync` and
//! `core-access` for the engines that act on this model.

pub mod alternatives;
pub mod error;
pub mod models;
pub mod store;

pub use alternatives::{AlternativeRepository, AlternativeUpdate, NewAlternative};
pub use error::{LibraryError, Result};
pub use models::{
    AlternativeId, AssignmentSource, FileClassificationSettings, GroupMapping,
    LanguageAlternative, LibraryMirror, MirrorId, MirrorStatus, PluginConfiguration,
    UserLanguageConfig,
};
pub use store::ConfigurationStore;
