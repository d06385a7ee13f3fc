//! # Access Module
//!
//! Decides which libraries each user can open and keeps host permissions in
//! line with their language assignment.
//!
//! ## Components
//!
//! - **Expected Access** (`expected`): pure resolution of the managed libraries a user should see
//! - **Access Reconciler** (`reconciler`): applies that set to the host permission store
//! - **Assignment Service** (`assignment`): manual, group-driven and default language assignment
//!
//! ## Managed Users
//!
//! Only users with a language record that has `is_plugin_managed` set are
//! ever touched. For everyone else the expected set is empty, which means
//! "not managed", never "revoke everything".

pub mod assignment;
pub mod error;
pub mod expected;
pub mod reconciler;

pub use assignment::{GroupSyncOutcome, LanguageAssignmentService};
pub use error::{AccessError, Result};
pub use expected::resolve_expected_access;
pub use reconciler::{AccessReconciler, ReconcileSummary, UserFailure, DEFAULT_RECONCILE_CONCURRENCY};
