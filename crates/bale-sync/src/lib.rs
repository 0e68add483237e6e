//! # bale-sync
//!
//! Blocking mutual exclusion keyed by record identity.
//!
//! Records are plain byte regions in an arena, so they carry no monitor of
//! their own. [`AccessCoordinator`] provides one per key on demand: the
//! first thread takes the key at once, later threads queue and park until
//! the holder hands the key to them in arrival order.
//!
//! ## Example
//!
//! ```rust
//! use bale_sync::AccessCoordinator;
//!
//! let coordinator = AccessCoordinator::new();
//! {
//!     let _guard = coordinator.lock(42u32);
//!     assert!(coordinator.is_locked(&42));
//! }
//! assert!(!coordinator.is_locked(&42));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod coordinator;

pub use coordinator::{AccessCoordinator, CoordinatorGuard, CoordinatorStats};
