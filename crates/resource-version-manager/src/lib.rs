//! # resource-version-manager
//!
//! an in-process coordination layer combining optimistic cache-version
//! checking with read/write/delete mutual exclusion for named hierarchical
//! resources. reads short-circuit when the caller is already up to date;
//! writes are rejected when the caller isn't. nothing here waits: every
//! lock acquisition either succeeds immediately or fails immediately, and
//! callers retry or serialize themselves upstream.

pub mod error;
mod manager;

pub use error::{Error, Result};
pub use manager::{Guard, ResourcePath, ResourceVersionManager};
