//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the language mirror core:
//! - Logging and tracing infrastructure
//! - Runtime configuration and bridge wiring
//! - Event bus system
//!
//! ## Overview
//!
//! Every other core crate depends on this one for its logging conventions,
//! the typed events it publishes and the validated [`CoreConfig`](config::CoreConfig)
//! it is constructed from.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
