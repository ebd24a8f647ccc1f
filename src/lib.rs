//! Workspace placeholder crate.
//!
//! This crate exists to expose a single feature flag that maps to the
//! `core-service` crate. Hosts can depend on `tutor-sync-workspace` and get the
//! wired sync runtime without naming each workspace crate individually.

#[cfg(feature = "server")]
pub use core_service::{SyncDependencies, SyncRuntime};
