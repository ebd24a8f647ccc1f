//! Sync runtime and admin surface.
//!
//! [`SyncRuntime`] assembles the triggered gate, the background scheduler, the
//! change listener and session cleanup on top of one exporter, and owns the
//! tasks they spawn. The [`http`] module exposes the runtime over an axum
//! router; [`bootstrap`] builds the production adapters from a
//! [`ServiceConfig`](core_runtime::config::ServiceConfig).

pub mod bootstrap;
pub mod error;
pub mod http;
pub mod runtime;

pub use error::{CoreError, Result};
pub use runtime::{SyncDependencies, SyncRuntime};
