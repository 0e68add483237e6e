//! Detached managed records.

use bale_common::error::{BaleError, BaleResult};
use bale_common::types::{
    ClassId, ControlGroupId, ControllerId, GroupId, InstanceId, InterfaceId, ReferenceId,
    StorageSlot,
};

use crate::managed::header::ManagedHeader;
use crate::managed::view::{GrowthPlan, ManagedView, ManagedViewMut};
use crate::store::{RecordId, RecordStore};
use crate::types::{RecordFlags, RecordType};

/// Runtime-only linkage of a managed record to its controller.
///
/// Never serialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentLink {
    /// Owning controller, if registered.
    pub controller: Option<ControllerId>,
    /// Registry slot within the owning controller.
    pub slot: Option<usize>,
    /// Storage (group, instance) the record is saved to.
    pub storage: StorageSlot,
    /// Held by a thread through the access coordinator.
    pub locked: bool,
    /// Bytes match the last save or load.
    pub synced: bool,
    /// Designated root of its controller.
    pub root: bool,
}

/// A managed record owning its bytes.
///
/// This is the form a record takes before registration and after removal.
/// While registered, its bytes live in the controller's arena and growth
/// goes through the controller's expansion policy; a record carrying a
/// controller link refuses local growth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedRecord {
    bytes: Vec<u8>,
    link: AgentLink,
}

impl ManagedRecord {
    /// Starts building a record of `record_type`.
    pub fn builder(record_type: RecordType) -> ManagedRecordBuilder {
        ManagedRecordBuilder::new(record_type)
    }

    /// Parses a record, validating magic and lengths. The input must hold
    /// exactly one record.
    pub fn parse(bytes: Vec<u8>) -> BaleResult<Self> {
        let total = ManagedView::new(&bytes)?.header().total_length as usize;
        if total != bytes.len() {
            return Err(BaleError::corrupt_data(format!(
                "managed record of {total} bytes followed by {} extra bytes",
                bytes.len() - total
            )));
        }
        let mut record = Self {
            bytes,
            link: AgentLink::default(),
        };
        record.link.storage = record.header()?.storage();
        Ok(record)
    }

    pub(crate) fn from_parts(bytes: Vec<u8>, link: AgentLink) -> Self {
        Self { bytes, link }
    }

    /// Returns the record bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the record, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Splits the record into its bytes and runtime link.
    pub fn into_parts(self) -> (Vec<u8>, AgentLink) {
        (self.bytes, self.link)
    }

    /// Returns the runtime link.
    pub fn link(&self) -> &AgentLink {
        &self.link
    }

    /// Returns the runtime link for update.
    pub fn link_mut(&mut self) -> &mut AgentLink {
        &mut self.link
    }

    /// Clears the controller link.
    pub fn unlink(&mut self) {
        self.link.controller = None;
        self.link.slot = None;
        self.link.locked = false;
    }

    /// Returns true if the record is linked to a controller.
    pub fn is_linked(&self) -> bool {
        self.link.controller.is_some()
    }

    /// Decodes the header.
    pub fn header(&self) -> BaleResult<ManagedHeader> {
        Ok(*self.view()?.header())
    }

    /// Returns a validated read view.
    pub fn view(&self) -> BaleResult<ManagedView<'_>> {
        ManagedView::new(&self.bytes)
    }

    /// Returns a validated write view.
    pub fn view_mut(&mut self) -> BaleResult<ManagedViewMut<'_>> {
        ManagedViewMut::new(&mut self.bytes)
    }

    /// Returns the data region.
    pub fn data(&self) -> BaleResult<&[u8]> {
        Ok(self.view()?.data())
    }

    /// Returns the reference id.
    pub fn reference_id(&self) -> BaleResult<ReferenceId> {
        Ok(self.header()?.reference_id)
    }

    fn grow_locally(&mut self, plan: &GrowthPlan) -> BaleResult<()> {
        if let Some(controller) = self.link.controller {
            return Err(BaleError::illegal_state(format!(
                "record is owned by controller {controller}; grow it through the controller"
            )));
        }
        plan.apply(&mut self.bytes)
    }

    /// Grows the data region by `n` bytes, from slack when possible.
    pub fn expand_data(&mut self, n: usize) -> BaleResult<()> {
        let plan = GrowthPlan::expand_data(&self.header()?, n, 0)?;
        self.grow_locally(&plan)
    }

    /// Adds `n` bytes of slack.
    pub fn expand_buffer(&mut self, n: usize) -> BaleResult<()> {
        let plan = GrowthPlan::expand_buffer(&self.header()?, n)?;
        self.grow_locally(&plan)
    }

    /// Removes all slack.
    pub fn buffer_trim(&mut self) -> BaleResult<()> {
        let plan = GrowthPlan::trim(&self.header()?);
        self.grow_locally(&plan)
    }

    /// Replaces the data region with `n` zeroed bytes and drops the slack.
    pub fn expand_reset_array_data(&mut self, n: usize) -> BaleResult<()> {
        let plan = GrowthPlan::reset_data(&self.header()?, n)?;
        self.grow_locally(&plan)
    }

    /// Stores the serialized tree under `root` as the data region.
    pub fn set_content(&mut self, store: &RecordStore, root: RecordId) -> BaleResult<()> {
        let bytes = store.serialize(root)?;
        self.expand_reset_array_data(bytes.len())?;
        self.view_mut()?.write_bytes(0, &bytes)
    }

    /// Parses the data region as a serialized record tree into `store`.
    pub fn content(&self, store: &mut RecordStore) -> BaleResult<RecordId> {
        store.deserialize(self.data()?)
    }

    /// Zeroes every identity field and drops the controller link.
    pub fn clear_identity(&mut self) -> BaleResult<()> {
        self.view_mut()?.clear_identity();
        self.unlink();
        self.link.storage = StorageSlot::default();
        Ok(())
    }
}

/// Builder for [`ManagedRecord`].
#[derive(Debug, Clone)]
pub struct ManagedRecordBuilder {
    header: ManagedHeader,
    dynamic: Vec<u8>,
    data: Vec<u8>,
    slack: usize,
    root: bool,
}

impl ManagedRecordBuilder {
    /// Creates a builder for an empty record.
    pub fn new(record_type: RecordType) -> Self {
        Self {
            header: ManagedHeader::new(record_type),
            dynamic: Vec::new(),
            data: Vec::new(),
            slack: 0,
            root: false,
        }
    }

    /// Sets the interface id.
    pub fn interface(mut self, id: InterfaceId) -> Self {
        self.header.interface_id = id;
        self
    }

    /// Sets the class id.
    pub fn class(mut self, id: ClassId) -> Self {
        self.header.class_id = id;
        self
    }

    /// Sets the storage slot.
    pub fn storage(mut self, group: GroupId, instance: InstanceId) -> Self {
        self.header.group_id = group;
        self.header.instance_id = instance;
        self
    }

    /// Sets the reference id; zero lets the controller assign one.
    pub fn reference(mut self, id: ReferenceId) -> Self {
        self.header.reference_id = id;
        self
    }

    /// Sets the control group id.
    pub fn control_group(mut self, id: ControlGroupId) -> Self {
        self.header.control_group_id = id;
        self
    }

    /// Sets base flags.
    pub fn flags(mut self, flags: RecordFlags) -> Self {
        self.header.flags = flags;
        self
    }

    /// Sets the dynamic header bytes.
    pub fn dynamic_header(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.dynamic = bytes.into();
        self
    }

    /// Sets the data region bytes.
    pub fn data(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.data = bytes.into();
        self
    }

    /// Sets a zeroed data region of `len` bytes.
    pub fn data_len(mut self, len: usize) -> Self {
        self.data = vec![0; len];
        self
    }

    /// Sets the slack length.
    pub fn slack(mut self, len: usize) -> Self {
        self.slack = len;
        self
    }

    /// Asks to be its controller's root.
    pub fn root(mut self, root: bool) -> Self {
        self.root = root;
        self
    }

    /// Builds the record.
    pub fn build(self) -> BaleResult<ManagedRecord> {
        let mut header = self.header;
        if header.flags.intersects(RecordFlags::TRAILERS | RecordFlags::HAS_SUBS) {
            return Err(BaleError::illegal_argument(format!(
                "flags {:?} are not valid on a managed record",
                header.flags
            )));
        }
        header.dynamic_length = u16::try_from(self.dynamic.len()).map_err(|_| {
            BaleError::illegal_argument(format!(
                "dynamic header of {} bytes too long",
                self.dynamic.len()
            ))
        })?;
        let too_long = |what: &str, len: usize| {
            BaleError::illegal_argument(format!("{what} of {len} bytes too long"))
        };
        header.data_length =
            u32::try_from(self.data.len()).map_err(|_| too_long("data region", self.data.len()))?;
        header.buffer_length =
            u32::try_from(self.slack).map_err(|_| too_long("slack region", self.slack))?;
        header.total_length = u32::try_from(header.computed_total())
            .map_err(|_| too_long("managed record", header.computed_total() as usize))?;

        let mut bytes = Vec::with_capacity(header.total_length as usize);
        header.serialize(&mut bytes);
        bytes.extend_from_slice(&self.dynamic);
        bytes.extend_from_slice(&self.data);
        bytes.resize(header.total_length as usize, 0);

        Ok(ManagedRecord::from_parts(
            bytes,
            AgentLink {
                storage: header.storage(),
                root: self.root,
                ..AgentLink::default()
            },
        ))
    }
}
