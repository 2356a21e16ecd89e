//! Fixed-capacity registry of attached input interfaces
//!
//! One [`SessionEntry`] exists per interface that has completed bring-up: it owns the
//! interface's [`FieldMap`] and the endpoint handles the transport opened for it. Slots
//! are statically allocated; when the table is full, additional devices are ignored
//! rather than evicting anything.

use crate::descriptor::FieldMap;
use crate::types::{DeviceIdentity, Endpoints, InterfaceKey};

pub struct SessionEntry {
    pub identity: DeviceIdentity,
    pub endpoints: Endpoints,
    pub field_map: FieldMap,
}

pub struct SessionTable<const N: usize = 8> {
    entries: [Option<SessionEntry>; N],
}

impl<const N: usize> SessionTable<N> {
    pub fn new() -> Self {
        Self {
            entries: core::array::from_fn(|_| None),
        }
    }

    /// Claim a slot for `identity`.
    ///
    /// Returns `false` if the table is full or an entry for the same key already
    /// exists. A duplicate register is rejected rather than overwritten, so a late
    /// completion callback racing a re-mount cannot corrupt a live entry.
    pub fn register(&mut self, identity: DeviceIdentity, field_map: FieldMap, endpoints: Endpoints) -> bool {
        if self.lookup(identity.key).is_some() {
            return false;
        }
        match self.entries.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(SessionEntry { identity, endpoints, field_map });
                true
            }
            None => false,
        }
    }

    pub fn lookup(&self, key: InterfaceKey) -> Option<&SessionEntry> {
        self.entries
            .iter()
            .flatten()
            .find(|entry| entry.identity.key == key)
    }

    /// Release the slot held for `key`. No-op if the key is not registered.
    pub fn unregister(&mut self, key: InterfaceKey) {
        for slot in self.entries.iter_mut() {
            if matches!(slot, Some(entry) if entry.identity.key == key) {
                slot.take();
            }
        }
    }
}
