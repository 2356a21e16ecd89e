//! Quirk adapters for controllers that need a vendor handshake
//!
//! Some controllers enumerate as HID devices but stay silent until the host walks them
//! through a vendor-specific bring-up sequence. A quirk adapter owns such a device from
//! mount until the handshake finishes: it issues the bring-up commands through the
//! [`CommandSequencer`], advances one stage per completion notification, and decides for
//! every raw report whether it is protocol chatter to swallow or real input to pass on.
//!
//! When the final stage completes, the adapter publishes a synthetic report descriptor
//! for the device family; from there the device takes the same registration path as any
//! well-behaved HID controller.
//!
//! ## Walkthrough for a quirk device
//!
//! 1. The transport reports a mount; [`AdapterPool::claim`] matches the vendor/product
//!    identity against the known families and takes a slot.
//! 2. Once the input-report channel is confirmed open, the mount path calls
//!    [`AdapterPool::begin`]. The handshake is deliberately *not* started inside the
//!    mount callback itself: the transport may not accept an outbound transfer yet. If
//!    the first command cannot be issued, the key is parked in a pending-start slot and
//!    retried on the next [`AdapterPool::tick`].
//! 3. Each completion notification advances the state machine by exactly one stage and
//!    issues exactly one new command. A failed transfer leaves the adapter where it is:
//!    there is no automatic retry, so a misbehaving device cannot provoke a command
//!    storm. [`AdapterPool::retry`] exists for an external supervisor that wants to
//!    nudge a stalled handshake.
//! 4. Completion of the final stage yields a [`Publish`]: the synthetic descriptor plus
//!    the identity and endpoints to register it under. The adapter stays allocated at
//!    `Ready` so [`AdapterPool::is_ready`] keeps answering until unmount.
//!
//! Adapter state never survives a disconnect: [`AdapterPool::reset`] discards the slot
//! and a re-mount starts from scratch.
//!
//! Families are a closed set: one enum variant per supported controller line, held in a
//! fixed slot pool. Adding a family means extending the enum, not loading anything at
//! runtime.

pub mod switch_pro;

use crate::command::CommandSequencer;
use crate::transport::Transport;
use crate::types::{DeviceIdentity, Endpoints, InterfaceKey};

/// Classification of a raw report by the owning adapter.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Verdict {
    /// Protocol chatter; consume it without further processing.
    Swallow,
    /// Real input; hand it to normal dispatch.
    Pass,
}

/// Outcome of one state-machine step.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Step {
    /// Entered the next stage and issued its command.
    Advanced,
    /// The final stage completed; the synthetic descriptor is ready to publish.
    Finished,
    /// Nothing advanced: the transfer failed, or the next command could not be issued.
    Stalled,
    /// The notification did not belong to a pending stage.
    Ignored,
}

/// Synthetic descriptor published by an adapter that reached `Ready`.
pub struct Publish {
    pub identity: DeviceIdentity,
    pub endpoints: Endpoints,
    pub descriptor: &'static [u8],
}

#[derive(Clone, Copy)]
enum Family {
    SwitchPro(switch_pro::SwitchPro),
}

impl Family {
    fn probe(identity: &DeviceIdentity) -> Option<Family> {
        if switch_pro::SwitchPro::matches(identity.vid_pid) {
            Some(Family::SwitchPro(switch_pro::SwitchPro::new()))
        } else {
            None
        }
    }

    fn start<T: Transport, const N: usize>(
        &mut self,
        key: InterfaceKey,
        commands: &mut CommandSequencer<N>,
        transport: &mut T,
    ) -> bool {
        match self {
            Family::SwitchPro(adapter) => adapter.start(key, commands, transport),
        }
    }

    fn command_complete<T: Transport, const N: usize>(
        &mut self,
        key: InterfaceKey,
        success: bool,
        commands: &mut CommandSequencer<N>,
        transport: &mut T,
    ) -> Step {
        match self {
            Family::SwitchPro(adapter) => adapter.command_complete(key, success, commands, transport),
        }
    }

    fn retry<T: Transport, const N: usize>(
        &mut self,
        key: InterfaceKey,
        commands: &mut CommandSequencer<N>,
        transport: &mut T,
    ) -> Step {
        match self {
            Family::SwitchPro(adapter) => adapter.retry(key, commands, transport),
        }
    }

    fn intercept(&self, report_id: u8, data: &[u8]) -> Verdict {
        match self {
            Family::SwitchPro(adapter) => adapter.intercept(report_id, data),
        }
    }

    fn is_ready(&self) -> bool {
        match self {
            Family::SwitchPro(adapter) => adapter.is_ready(),
        }
    }

    fn descriptor(&self) -> &'static [u8] {
        match self {
            Family::SwitchPro(_) => switch_pro::REPORT_DESCRIPTOR,
        }
    }
}

#[derive(Clone, Copy)]
struct Slot {
    identity: DeviceIdentity,
    endpoints: Endpoints,
    family: Family,
}

pub struct AdapterPool<const N: usize = 8> {
    slots: [Option<Slot>; N],
    pending_start: Option<InterfaceKey>,
}

impl<const N: usize> AdapterPool<N> {
    pub fn new() -> Self {
        Self {
            slots: [None; N],
            pending_start: None,
        }
    }

    /// Allocate an adapter for `identity` if it matches a known quirk family.
    ///
    /// Returns `true` when an adapter now owns the interface. When the pool is full the
    /// device is left unclaimed (and will simply never produce input), never evicting
    /// an existing adapter.
    pub fn claim(&mut self, identity: DeviceIdentity, endpoints: Endpoints) -> bool {
        let Some(family) = Family::probe(&identity) else {
            return false;
        };
        if self.find(identity.key).is_some() {
            return false;
        }
        let Some(slot) = self.slots.iter_mut().find(|slot| slot.is_none()) else {
            #[cfg(feature = "defmt")]
            defmt::warn!("adapter pool full, ignoring {}", identity.key);
            return false;
        };
        *slot = Some(Slot { identity, endpoints, family });
        true
    }

    pub fn owns(&self, key: InterfaceKey) -> bool {
        self.find(key).is_some()
    }

    pub fn is_ready(&self, key: InterfaceKey) -> bool {
        self.find(key).is_some_and(|slot| slot.family.is_ready())
    }

    /// Start the handshake for `key`.
    ///
    /// If the first command cannot be issued yet, the key is parked in the
    /// pending-start slot and retried on the next [`tick`](AdapterPool::tick). The slot
    /// holds a single key; a second deferred begin is dropped and must be re-invoked by
    /// its caller.
    pub fn begin<T: Transport, const M: usize>(
        &mut self,
        key: InterfaceKey,
        commands: &mut CommandSequencer<M>,
        transport: &mut T,
    ) {
        let started = match self.find_mut(key) {
            Some(slot) => slot.family.start(key, commands, transport),
            None => return,
        };
        if started {
            if self.pending_start == Some(key) {
                self.pending_start = None;
            }
        } else if self.pending_start.is_none() {
            self.pending_start = Some(key);
        }
    }

    /// Drain the pending-start slot. Called from the cooperative idle path.
    pub fn tick<T: Transport, const M: usize>(
        &mut self,
        commands: &mut CommandSequencer<M>,
        transport: &mut T,
    ) {
        let Some(key) = self.pending_start else {
            return;
        };
        let started = match self.find_mut(key) {
            Some(slot) => slot.family.start(key, commands, transport),
            None => {
                // device went away while parked
                self.pending_start = None;
                return;
            }
        };
        if started {
            self.pending_start = None;
        }
    }

    /// Classify a raw report for `key`. Interfaces without an adapter always pass.
    pub fn intercept(&self, key: InterfaceKey, report_id: u8, data: &[u8]) -> Verdict {
        match self.find(key) {
            Some(slot) => slot.family.intercept(report_id, data),
            None => Verdict::Pass,
        }
    }

    /// Deliver a transfer-completion notification to the adapter owning `key`.
    ///
    /// Returns a [`Publish`] when this completion finished the handshake.
    pub fn command_complete<T: Transport, const M: usize>(
        &mut self,
        key: InterfaceKey,
        success: bool,
        commands: &mut CommandSequencer<M>,
        transport: &mut T,
    ) -> Option<Publish> {
        let slot = self.find_mut(key)?;
        match slot.family.command_complete(key, success, commands, transport) {
            Step::Finished => Some(Publish {
                identity: slot.identity,
                endpoints: slot.endpoints,
                descriptor: slot.family.descriptor(),
            }),
            _ => None,
        }
    }

    /// Explicit external retry for an adapter whose last stage entry failed to issue
    /// its command. The framework never retries on its own.
    pub fn retry<T: Transport, const M: usize>(
        &mut self,
        key: InterfaceKey,
        commands: &mut CommandSequencer<M>,
        transport: &mut T,
    ) -> Option<Publish> {
        let slot = self.find_mut(key)?;
        match slot.family.retry(key, commands, transport) {
            Step::Finished => Some(Publish {
                identity: slot.identity,
                endpoints: slot.endpoints,
                descriptor: slot.family.descriptor(),
            }),
            _ => None,
        }
    }

    /// Discard all adapter state for `key`. A re-mounted device starts a fresh
    /// handshake from the beginning.
    pub fn reset(&mut self, key: InterfaceKey) {
        if self.pending_start == Some(key) {
            self.pending_start = None;
        }
        for slot in self.slots.iter_mut() {
            if matches!(slot, Some(s) if s.identity.key == key) {
                slot.take();
            }
        }
    }

    fn find(&self, key: InterfaceKey) -> Option<&Slot> {
        self.slots
            .iter()
            .flatten()
            .find(|slot| slot.identity.key == key)
    }

    fn find_mut(&mut self, key: InterfaceKey) -> Option<&mut Slot> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|slot| slot.identity.key == key)
    }
}
