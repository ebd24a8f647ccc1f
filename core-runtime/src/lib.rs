//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the sync subsystem:
//! - Logging and tracing infrastructure
//! - Configuration management (runtime-mutable sync settings and
//!   start-up service identity)
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the sync services and the
//! admin surface depend on. It establishes the logging conventions, the
//! configuration store, and the event broadcasting mechanism used throughout
//! the system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
