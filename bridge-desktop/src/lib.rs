//! # Desktop Bridge Implementations
//!
//! Default implementations of the storage bridge traits for hosts running on
//! a regular desktop or server operating system (Linux, macOS, Windows).
//!
//! ## Overview
//!
//! - `FileSystemAccess` using `tokio::fs`, with real hardlinks and inode
//!   identity on Unix
//! - `ConfigurationPersistence` as a JSON file replaced atomically
//!
//! Library, user and permission bridges are always host specific and are not
//! provided here.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{JsonFileConfigurationPersistence, TokioFileSystem};
//!
//! let fs = TokioFileSystem::new();
//! let persistence = JsonFileConfigurationPersistence::default_location();
//! ```

mod config_file;
mod filesystem;

pub use config_file::JsonFileConfigurationPersistence;
pub use filesystem::TokioFileSystem;
