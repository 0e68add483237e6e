//! # bale-test
//!
//! Integration tests for Bale.
//!
//! This crate contains:
//! - Record format round-trip and merge tests
//! - Controller scenarios against in-memory and file sources
//! - Expansion policy equivalence tests
//! - Concurrency tests for agent locking and growth

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Record and controller fixtures
pub mod fixtures;

/// Multi-threaded workload helpers
pub mod workload;
