//! # Mirror Sync Module
//!
//! Keeps per-language mirrors of host libraries in step with their sources.
//!
//! ## Overview
//!
//! A mirror is a directory tree of hardlinks to the media files of a source
//! library. The host scans it as a separate library with its own metadata
//! language, so users assigned to a language alternative see titles and
//! artwork in that language while the bytes on disk are shared.
//!
//! ## Components
//!
//! - **File Classifier** (`classifier`): decides which paths are linked, skipped or force-linked
//! - **Link Operator** (`linker`): hardlink primitives, cross-device probe and classified tree scans
//! - **Mirror Sync Engine** (`engine`): create, incremental sync, delete and sync-all with per-mirror serialization
//! - **Orphan Detector** (`orphan`): repairs mirrors whose source or target library disappeared
//! - **Sync Results** (`job`): reports, counters and progress
//! - **Progress** (`progress`): fail-safe 0-100 progress sinks

pub mod classifier;
pub mod engine;
pub mod error;
pub mod job;
pub mod linker;
pub mod orphan;
pub mod progress;

pub use classifier::{Classification, FileClassifier};
pub use engine::MirrorSyncEngine;
pub use error::{Result, SyncError};
pub use job::{
    FileFailure, MirrorFailure, SyncAllSummary, SyncKind, SyncProgress, SyncReport, SyncStats,
};
pub use linker::{LinkOperator, LinkOutcome};
pub use orphan::{
    classify_orphans, CleanedMirror, FailedCleanup, MirrorCleaner, OrphanCleanupResult,
    OrphanDetector, OrphanedMirror,
};
pub use progress::{EventBusProgressSink, ProgressSink};
