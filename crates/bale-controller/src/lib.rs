//! # bale-controller
//!
//! Registry and lifecycle manager of managed records.
//!
//! A [`RecordController`] owns every registered record (an *agent*):
//!
//! - **Registration**: reference ids are unique per controller; records
//!   without one get the next free id
//! - **Loading**: envelopes are read from per-group [`StorageSource`]s on
//!   demand and attached to the registry
//! - **Expansion**: records grow from slack in place, or physically under
//!   one of three [`ExpansionPolicy`] strategies
//! - **Saving**: dirty storage slots are rewritten one envelope per slot
//! - **Locking**: per-agent exclusion through an [`AccessCoordinator`]
//!
//! ## Example
//!
//! ```rust
//! use bale_common::config::{ControllerConfig, ExpansionPolicy};
//! use bale_controller::{Growth, RecordController};
//! use bale_record::{ManagedRecord, RecordType};
//!
//! let config = ControllerConfig::default().with_expansion_policy(ExpansionPolicy::Single);
//! let controller = RecordController::new(config).unwrap();
//!
//! let record = ManagedRecord::builder(RecordType::new(1).unwrap())
//!     .data(vec![0; 4])
//!     .slack(8)
//!     .build()
//!     .unwrap();
//! let id = controller.add_agent(record).unwrap();
//!
//! assert_eq!(controller.expand_data(id, 4).unwrap(), Growth::InPlace);
//! assert_eq!(controller.expand_data(id, 16).unwrap(), Growth::Spliced);
//! ```
//!
//! [`StorageSource`]: bale_storage::StorageSource
//! [`ExpansionPolicy`]: bale_common::config::ExpansionPolicy
//! [`AccessCoordinator`]: bale_sync::AccessCoordinator

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod agent;
mod controller;
pub mod envelope;
mod expansion;
mod factory;
mod load;
mod pattern;
mod registry;
mod save;
mod state;

pub use agent::{Agent, AgentGuard};
pub use controller::{ControllerStats, RecordController};
pub use envelope::{Envelope, EnvelopeHeader};
pub use expansion::Growth;
pub use factory::{AgentObject, ClassFactory, RecordFactory};
pub use load::LoadStats;
pub use pattern::HeaderPattern;
pub use registry::{AgentId, AgentState, HeaderEntry};
pub use save::SaveStats;
