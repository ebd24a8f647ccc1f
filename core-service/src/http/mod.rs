//! Admin HTTP surface over a shared [`SyncRuntime`](crate::SyncRuntime).

mod controllers;
pub mod dto;
mod error;
mod middleware;
mod router;

pub use error::ApiError;
pub use middleware::{RequestPriorityLayer, RequestPriorityService, SLOW_REQUEST_THRESHOLD};
pub use router::{build_router, serve};
