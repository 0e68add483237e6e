//! Application object factories.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bale_common::types::{ClassId, InterfaceId};
use bale_record::ManagedHeader;

use crate::controller::RecordController;

/// Object bound to an instantiated agent.
pub type AgentObject = Arc<dyn Any + Send + Sync>;

/// Turns a parsed record header into an application object.
///
/// Factories are consulted in registration order; returning `None` passes
/// the record on to the next factory.
pub trait RecordFactory: Send + Sync {
    /// Creates the object for a record, or `None` if this factory does not
    /// handle it.
    fn create_object(
        &self,
        header: &ManagedHeader,
        interface_id: InterfaceId,
        controller: &RecordController,
    ) -> Option<AgentObject>;
}

/// Factory building objects for one class id from a constructor function.
pub struct ClassFactory<F> {
    class_id: ClassId,
    build: F,
}

impl<F> ClassFactory<F>
where
    F: Fn(&ManagedHeader) -> AgentObject + Send + Sync,
{
    /// Creates a factory answering for `class_id`.
    pub fn new(class_id: ClassId, build: F) -> Self {
        Self { class_id, build }
    }
}

impl<F> RecordFactory for ClassFactory<F>
where
    F: Fn(&ManagedHeader) -> AgentObject + Send + Sync,
{
    fn create_object(
        &self,
        header: &ManagedHeader,
        _interface_id: InterfaceId,
        _controller: &RecordController,
    ) -> Option<AgentObject> {
        (header.class_id == self.class_id).then(|| (self.build)(header))
    }
}

impl<F> fmt::Debug for ClassFactory<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassFactory")
            .field("class_id", &self.class_id)
            .finish()
    }
}
