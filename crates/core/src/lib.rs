//! Core types and utilities for the price watcher
//!
//! This crate provides shared types used across all components:
//! - Price update events and price table entries
//! - On-chain watch targets and chain identifiers
//! - Source configuration
//! - Error taxonomy

pub mod types;
pub mod config;
pub mod errors;

pub use types::*;
pub use config::*;
pub use errors::*;
