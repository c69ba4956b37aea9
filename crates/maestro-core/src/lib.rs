//! Core error definitions for the Maestro orchestration workspace.
//!
//! Every library crate in the workspace returns [`MaestroResult`]. Errors that
//! reach an execution record are reduced to a stable [`ErrorCategory`] plus a
//! human-readable message so that clients can branch on the category without
//! parsing text.
//!
//! # Main types
//!
//! - [`MaestroError`] — Unified error enum for all Maestro subsystems.
//! - [`MaestroResult`] — Convenience alias for `Result<T, MaestroError>`.
//! - [`ErrorCategory`] — Stable, serializable classification of an error.

/// Error enum and category mapping.
pub mod error;

pub use error::{ErrorCategory, MaestroError, MaestroResult};
