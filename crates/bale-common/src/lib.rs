//! # bale-common
//!
//! Common types, errors, and configuration for Bale.
//!
//! This crate provides the foundational types shared by every Bale crate:
//!
//! - **Types**: identity newtypes for records (`ClassId`, `GroupId`,
//!   `InstanceId`, `ReferenceId`, ...) and controllers (`ControllerId`)
//! - **Errors**: the `BaleError` taxonomy and the `BaleResult` alias
//! - **Config**: `ControllerConfig` and the `ExpansionPolicy` selector
//! - **Constants**: wire-format sizes, reserved type tags, and magic values
//!
//! ## Example
//!
//! ```rust
//! use bale_common::types::{GroupId, InstanceId, ReferenceId};
//! use bale_common::error::BaleResult;
//!
//! fn example() -> BaleResult<()> {
//!     let group = GroupId::new(0);
//!     let instance = InstanceId::new(7);
//!     let reference = ReferenceId::new(1);
//!     assert!(reference.is_valid());
//!     let _ = (group, instance);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::{ControllerConfig, ExpansionPolicy};
pub use constants::*;
pub use error::{BaleError, BaleResult, ErrorCode};
pub use types::{
    ClassId, ControlGroupId, ControllerId, GroupId, InstanceId, InterfaceId, ReferenceId,
    StorageSlot,
};
