//! Shared types, adapter traits, and core utilities for the Drawbridge
//! security cache layer.
//!
//! This crate contains the foundational types that are shared between the
//! core crate and all adapter implementations. Extracting these into a
//! separate crate allows adapter crates to compile in parallel with the
//! feature modules.

pub mod cache_adapter;
pub mod error;
pub mod prelude;
pub mod store_adapter;
pub mod types;
pub mod utils;

// vim: ts=4
