//! Configuration for Bale.
//!
//! This module provides configuration structures for the record controller.

mod controller;

pub use controller::{ControllerConfig, ExpansionPolicy};
