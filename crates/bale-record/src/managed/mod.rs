//! Managed records.
//!
//! A managed record is a binary record whose payload starts with an
//! identity and sizing header:
//!
//! ```text
//! +-------------+----------------+------+-------+
//! | Static (36) | Dynamic header | Data | Slack |
//! +-------------+----------------+------+-------+
//! ```
//!
//! The data region grows into the slack first; only a shortfall needs the
//! backing bytes to move. Managed records carry no trailer.

mod header;
mod record;
mod view;

pub use header::{offsets, ManagedHeader};
pub use record::{AgentLink, ManagedRecord, ManagedRecordBuilder};
pub use view::{GrowthPlan, ManagedView, ManagedViewMut};
