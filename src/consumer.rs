//! Interface for the downstream input consumer
//!
//! Whatever sits behind this core (typically the remap stage that turns canonical input
//! into output-device semantics) receives normalized data through the [`Consumer`] trait.

use crate::command::CommandKind;
use crate::types::{CanonicalValue, DeviceIdentity, InterfaceKey};

pub trait Consumer {
    /// A raw input report was decoded against the device's field map.
    ///
    /// `values` holds one entry per non-padding field, in descriptor order. Padding
    /// fields are skipped but have already been accounted for in the bit offsets, so
    /// the values line up with what the device actually sent.
    fn canonical_input(&mut self, key: InterfaceKey, values: &[CanonicalValue]);

    /// A command enqueued outside any quirk-adapter flow has completed.
    ///
    /// Commands owned by a quirk adapter are routed to the adapter instead and never
    /// arrive here.
    fn command_complete(&mut self, _key: InterfaceKey, _report_id: u8, _kind: CommandKind, _success: bool) {}

    /// Response data for an earlier GET_FEATURE command.
    fn feature_report(&mut self, _key: InterfaceKey, _report_id: u8, _data: &[u8]) {}

    /// A device finished bring-up: its field map is built and registered, and raw
    /// reports for it will now produce canonical input.
    fn device_connected(&mut self, _identity: &DeviceIdentity) {}

    /// A registered device was disconnected.
    fn device_disconnected(&mut self, _key: InterfaceKey) {}
}
