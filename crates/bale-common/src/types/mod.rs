//! Type definitions for Bale.
//!
//! This module contains the identity types shared across the workspace.

mod ids;

pub use ids::{
    ClassId, ControlGroupId, ControllerId, GroupId, InstanceId, InterfaceId, ReferenceId,
    StorageSlot,
};
