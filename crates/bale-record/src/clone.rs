//! Record cloning.

use std::collections::HashMap;

use bale_common::constants::SERIAL_TRAILER_SIZE;
use bale_common::error::BaleResult;

use crate::header::RecordHeader;
use crate::serialize::FlatEntry;
use crate::store::{RecordId, RecordStore, SubLink};
use crate::types::RecordFlags;

impl RecordStore {
    /// Full clone through a serialize/deserialize round-trip.
    ///
    /// The copy is a tree of views sharing one fresh buffer, with the same
    /// sharing and cycles as the original.
    pub fn deep_clone(&mut self, id: RecordId) -> BaleResult<RecordId> {
        let bytes = self.serialize(id)?;
        self.parse(bytes)
    }

    /// Clones the record alone into a private buffer, dropping sub-records
    /// and the serialization trailer.
    pub fn clone_header(&mut self, id: RecordId) -> BaleResult<RecordId> {
        let mut header = self.header(id)?;
        let mut bytes = self.bytes(id)?.to_vec();
        if header.flags.contains(RecordFlags::SERIALIZED) {
            bytes.truncate(bytes.len() - SERIAL_TRAILER_SIZE);
        }
        header.flags.remove(RecordFlags::SERIALIZED | RecordFlags::HAS_SUBS);
        header.length = bytes.len() as u16;
        bytes[..RecordHeader::SIZE].copy_from_slice(&header.to_bytes());
        self.adopt(bytes)
    }

    /// Clones the record and everything reachable from it.
    ///
    /// Each record's bytes are copied exactly into a private buffer; owned
    /// and aliased links are reproduced between the copies, so sharing and
    /// cycles survive.
    pub fn clone_with_copied_subs(&mut self, id: RecordId) -> BaleResult<RecordId> {
        let mut copies: HashMap<RecordId, RecordId> = HashMap::new();
        let mut order = Vec::new();
        for entry in self.flatten(id)? {
            if let FlatEntry::Record(original) = entry {
                let bytes = self.bytes(original)?.to_vec();
                copies.insert(original, self.adopt(bytes)?);
                order.push(original);
            }
        }

        for original in order {
            let links: Vec<SubLink> = self
                .subs(original)?
                .iter()
                .map(|link| SubLink {
                    id: copies.get(&link.id).copied().unwrap_or(link.id),
                    aliased: link.aliased,
                })
                .collect();
            if let Some(copy) = copies.get(&original) {
                self.node_mut(*copy)?.subs = links;
            }
        }

        Ok(copies.get(&id).copied().unwrap_or(id))
    }

    /// Clones the record's bytes and aliases the original sub-records.
    pub fn clone_with_aliased_subs(&mut self, id: RecordId) -> BaleResult<RecordId> {
        let bytes = self.bytes(id)?.to_vec();
        let links = self
            .subs(id)?
            .iter()
            .map(|link| SubLink::aliased(link.id))
            .collect();
        let copy = self.adopt(bytes)?;
        self.node_mut(copy)?.subs = links;
        Ok(copy)
    }
}
