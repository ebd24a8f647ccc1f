//! # Supabase Provider
//!
//! Implements the `RowSource` trait over the Supabase PostgREST API.
//!
//! ## Features
//!
//! - Filter encoding for equality, range and empty-array predicates
//! - Transparent paging of unbounded selects
//! - Counted deletes via `Prefer: return=representation`
//! - Service-role key authentication

pub mod client;
pub mod error;
pub mod query;

pub use client::SupabaseRowSource;
pub use error::{Result, SupabaseError};
