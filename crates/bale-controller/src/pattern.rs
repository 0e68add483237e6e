//! Header patterns for agent lookup.

use bale_common::types::{
    ClassId, ControlGroupId, GroupId, InstanceId, InterfaceId, ReferenceId,
};
use bale_record::ManagedHeader;

/// Match against the identity fields of a managed header.
///
/// Zero fields are wildcards; the default pattern matches every record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderPattern {
    /// Record type tag.
    pub record_type: u8,
    /// Interface id.
    pub interface_id: InterfaceId,
    /// Class id.
    pub class_id: ClassId,
    /// Storage group.
    pub group_id: GroupId,
    /// Instance within the group.
    pub instance_id: InstanceId,
    /// Reference id.
    pub reference_id: ReferenceId,
    /// Control group.
    pub control_group_id: ControlGroupId,
}

impl HeaderPattern {
    /// Creates a pattern matching everything.
    pub fn any() -> Self {
        Self::default()
    }

    /// Requires a record type.
    pub fn record_type(mut self, tag: u8) -> Self {
        self.record_type = tag;
        self
    }

    /// Requires an interface id.
    pub fn interface(mut self, id: InterfaceId) -> Self {
        self.interface_id = id;
        self
    }

    /// Requires a class id.
    pub fn class(mut self, id: ClassId) -> Self {
        self.class_id = id;
        self
    }

    /// Requires a storage group.
    pub fn group(mut self, id: GroupId) -> Self {
        self.group_id = id;
        self
    }

    /// Requires an instance.
    pub fn instance(mut self, id: InstanceId) -> Self {
        self.instance_id = id;
        self
    }

    /// Requires a reference id.
    pub fn reference(mut self, id: ReferenceId) -> Self {
        self.reference_id = id;
        self
    }

    /// Requires a control group.
    pub fn control_group(mut self, id: ControlGroupId) -> Self {
        self.control_group_id = id;
        self
    }

    /// Returns true if every non-zero field equals the header's.
    pub fn matches(&self, header: &ManagedHeader) -> bool {
        fn field(pattern: u16, value: u16) -> bool {
            pattern == 0 || pattern == value
        }

        (self.record_type == 0 || self.record_type == header.record_type.as_u8())
            && field(self.interface_id.as_u16(), header.interface_id.as_u16())
            && field(self.class_id.as_u16(), header.class_id.as_u16())
            && field(self.group_id.as_u16(), header.group_id.as_u16())
            && field(self.instance_id.as_u16(), header.instance_id.as_u16())
            && field(self.reference_id.as_u16(), header.reference_id.as_u16())
            && field(
                self.control_group_id.as_u16(),
                header.control_group_id.as_u16(),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bale_record::RecordType;

    fn header() -> ManagedHeader {
        let mut header = ManagedHeader::new(RecordType::new(12).unwrap());
        header.class_id = ClassId::new(3);
        header.group_id = GroupId::new(1);
        header.reference_id = ReferenceId::new(40);
        header
    }

    #[test]
    fn test_wildcards() {
        assert!(HeaderPattern::any().matches(&header()));
        assert!(HeaderPattern::any().class(ClassId::new(3)).matches(&header()));
        assert!(!HeaderPattern::any().class(ClassId::new(4)).matches(&header()));
    }

    #[test]
    fn test_all_fields_must_match() {
        let pattern = HeaderPattern::any()
            .record_type(12)
            .group(GroupId::new(1))
            .reference(ReferenceId::new(40));
        assert!(pattern.matches(&header()));
        assert!(!pattern.record_type(13).matches(&header()));
        assert!(!pattern.control_group(ControlGroupId::new(2)).matches(&header()));
    }
}
