//! Workspace placeholder crate.
//!
//! This crate exists so host applications can depend on a single package and
//! pick up the service facade together with the desktop adapters through the
//! `desktop-shims` feature, without wiring each workspace crate individually.

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop;
#[cfg(feature = "desktop-shims")]
pub use core_service;
