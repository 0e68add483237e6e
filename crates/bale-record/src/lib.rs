//! # bale-record
//!
//! The Bale binary record format.
//!
//! A record is a tagged, length-delimited byte region:
//!
//! ```text
//! +--------+---------+----------+---------+-------------------------------------+
//! | Type 1 | Flags 1 | Length 2 | Payload | Trailer: [ver 2][intra 1][m 1][n 2] |
//! +--------+---------+----------+---------+-------------------------------------+
//! ```
//!
//! Records live in a [`BufferArena`] and are addressed by `(buffer, offset)`
//! handles, so a parsed stream is a set of views over one shared buffer
//! rather than a copy per record. A record may own or alias an ordered list
//! of sub-records; shared sub-trees and true cycles survive
//! [`RecordStore::serialize`] / [`RecordStore::deserialize`] through
//! back-reference markers.
//!
//! [`managed::ManagedRecord`] extends the base header with an identity and
//! sizing header and the data/slack regions a controller grows in place.
//!
//! # Example
//!
//! ```rust
//! use bale_record::{RecordStore, RecordType};
//!
//! let mut store = RecordStore::new();
//! let root = store.create(RecordType::new(5).unwrap(), 16).unwrap();
//! let values = store.create_literal_array(&[1, 2, 3]).unwrap();
//! store.add_sub(root, values).unwrap();
//! store.view_mut(root).unwrap().write_uint(0, 2, 0x1234).unwrap();
//!
//! let bytes = store.serialize(root).unwrap();
//! let copy = store.deserialize(&bytes).unwrap();
//! assert!(store.equals_content(root, &store, copy).unwrap());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod array;
mod clone;
mod compare;
pub mod field;
mod header;
mod indirect;
pub mod managed;
pub mod merge;
mod serialize;
mod store;
mod types;
mod view;

pub use arena::{BackingIdentity, BufferArena, BufferHandle, BufferId};
pub use header::RecordHeader;
pub use indirect::IndirectValue;
pub use managed::{
    AgentLink, GrowthPlan, ManagedHeader, ManagedRecord, ManagedRecordBuilder, ManagedView,
    ManagedViewMut,
};
pub use merge::{LiteralArrayMerge, MergeRegistry, NonZeroBytesMerge, TypeMergeHandler};
pub use serialize::FlatEntry;
pub use store::{RecordId, RecordStore, SubLink};
pub use types::{RecordFlags, RecordType};
pub use view::{BinaryRecord, BinaryRecordMut};
