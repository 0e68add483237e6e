//! Core identifier types for Bale.
//!
//! These types provide type-safe wrappers around the 16-bit identity fields
//! of a managed record header, preventing accidental misuse of one id kind
//! where another is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

macro_rules! header_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(u16);

        impl $name {
            /// The zero id; a wildcard in header patterns.
            pub const NONE: Self = Self(0);

            /// Creates an id from its raw value.
            #[inline]
            #[must_use]
            pub const fn new(id: u16) -> Self {
                Self(id)
            }

            /// Returns the raw value.
            #[inline]
            #[must_use]
            pub const fn as_u16(self) -> u16 {
                self.0
            }

            /// Converts to bytes (big-endian).
            #[inline]
            #[must_use]
            pub const fn to_be_bytes(self) -> [u8; 2] {
                self.0.to_be_bytes()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u16> for $name {
            #[inline]
            fn from(id: u16) -> Self {
                Self::new(id)
            }
        }

        impl From<$name> for u16 {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

header_id! {
    /// Interface identifier, handed to record factories at instantiation.
    InterfaceId
}

header_id! {
    /// Class identifier of a managed record.
    ClassId
}

header_id! {
    /// Storage group: selects the storage source a record's bytes live in.
    GroupId
}

header_id! {
    /// Instance within a storage group: selects one envelope of that source.
    InstanceId
}

header_id! {
    /// Control group identifier, used by applications to cluster agents.
    ControlGroupId
}

header_id! {
    /// Reference identifier, unique within one controller.
    ///
    /// Zero is reserved as "unassigned"; the controller assigns the next free
    /// id when a record is registered with reference zero.
    ReferenceId
}

impl ReferenceId {
    /// Largest reference id.
    pub const MAX: Self = Self(u16::MAX);

    /// Returns true if this id has been assigned.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Returns the next reference id, or `None` when the id space is exhausted.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }
}

/// A (group, instance) pair: one envelope slot of one storage source.
///
/// This is the save granularity: every record sharing a slot is written
/// together.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorageSlot {
    /// Storage group.
    pub group: GroupId,
    /// Instance within the group.
    pub instance: InstanceId,
}

impl StorageSlot {
    /// Creates a storage slot.
    #[inline]
    #[must_use]
    pub const fn new(group: GroupId, instance: InstanceId) -> Self {
        Self { group, instance }
    }
}

impl fmt::Debug for StorageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageSlot({}, {})", self.group, self.instance)
    }
}

impl fmt::Display for StorageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.group, self.instance)
    }
}

/// Controller identifier, unique within a process.
///
/// Records remember the controller that owns them so that a second
/// controller can refuse to adopt them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ControllerId(u32);

static NEXT_CONTROLLER_ID: AtomicU32 = AtomicU32::new(1);

impl ControllerId {
    /// Allocates a fresh process-unique controller id.
    #[must_use]
    pub fn allocate() -> Self {
        Self(NEXT_CONTROLLER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ControllerId({})", self.0)
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_id() {
        assert!(!ReferenceId::NONE.is_valid());
        assert!(ReferenceId::new(1).is_valid());
        assert_eq!(ReferenceId::new(1).next(), Some(ReferenceId::new(2)));
        assert_eq!(ReferenceId::MAX.next(), None);
    }

    #[test]
    fn test_id_formatting() {
        assert_eq!(format!("{:?}", ClassId::new(7)), "ClassId(7)");
        assert_eq!(format!("{}", GroupId::new(3)), "3");
        let slot = StorageSlot::new(GroupId::new(1), InstanceId::new(2));
        assert_eq!(format!("{slot}"), "(1, 2)");
    }

    #[test]
    fn test_controller_ids_are_unique() {
        let a = ControllerId::allocate();
        let b = ControllerId::allocate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_storage_slot_ordering() {
        let a = StorageSlot::new(GroupId::new(0), InstanceId::new(5));
        let b = StorageSlot::new(GroupId::new(1), InstanceId::new(0));
        assert!(a < b);
    }
}
