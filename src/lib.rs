#![no_std]

//! Input-normalization and device-adaptation core for host-side game controller firmware.
//!
//! This crate sits between a USB host transport and a downstream input consumer. It
//! accepts raw, heterogeneous per-device input reports and produces a canonical,
//! device-independent stream of field values, while also driving any vendor-specific
//! bring-up sequence a controller needs before it will emit usable reports.
//!
//! Three pieces do the work:
//!
//! - [`descriptor`] parses a HID report descriptor into a [`FieldMap`](descriptor::FieldMap)
//!   describing every addressable field of every report shape, for *any* device,
//!   without per-device code.
//! - [`adapter`] hosts quirk adapters: small state machines that walk non-conformant
//!   controllers through their vendor handshake and gate their reports until then.
//! - [`command`] serializes host-to-device commands, one in flight per interface.
//!
//! [`Normalizer`] glues them together and is the single entry point the transport calls
//! into. Everything is synchronous, single-context and statically allocated: no entry
//! point blocks, and no memory is allocated after construction.
//!
//! ## Walkthrough for a newly connected device
//!
//! 1. The transport finishes enumeration and calls [`Normalizer::device_mounted`]. If
//!    the vendor/product identity matches a quirk family, an adapter claims the device.
//! 2. For a well-behaved device, the transport hands the vendor report descriptor to
//!    [`Normalizer::descriptor_available`]; the field map is built and the device is
//!    registered. From now on raw reports decode into canonical values.
//! 3. For a quirk device, the mount path calls [`Normalizer::begin_adaptation`] once the
//!    input channel is open. The adapter issues its bring-up commands one per
//!    completion notification ([`Normalizer::command_transfer_complete`]), swallowing
//!    protocol chatter seen on the input channel along the way. When the last stage
//!    completes it publishes a synthetic descriptor, which takes the same registration
//!    path as step 2.
//! 4. [`Normalizer::raw_report`] decodes each arriving report against the field map and
//!    emits the values to the [`Consumer`](consumer::Consumer); reports for devices
//!    still in bring-up are dropped or swallowed.
//! 5. On disconnect, [`Normalizer::device_unmounted`] releases command, adapter and
//!    session state, in that order.
//!
//! No failure here is fatal: a device that cannot be parsed, adapted or stored simply
//! never produces input, without disturbing other attached devices.

pub mod types;
pub mod transport;
pub mod consumer;
pub mod descriptor;
pub mod session;
pub mod command;
pub mod adapter;

use adapter::{AdapterPool, Verdict};
use command::{CommandSequencer, OutputCommand, Rejected};
use consumer::Consumer;
use descriptor::MAX_FIELDS;
use session::SessionTable;
use transport::Transport;
use types::{CanonicalValue, DeviceIdentity, Endpoints, InterfaceKey};

/// The normalization dispatch: one instance owns all per-device state of the core.
///
/// `MAX_DEVICES` bounds the number of concurrently attached interfaces (sessions,
/// adapters and in-flight commands alike). Devices beyond the bound are accepted by the
/// transport but produce no input.
pub struct Normalizer<const MAX_DEVICES: usize = 8> {
    sessions: SessionTable<MAX_DEVICES>,
    adapters: AdapterPool<MAX_DEVICES>,
    commands: CommandSequencer<MAX_DEVICES>,
}

impl<const MAX_DEVICES: usize> Normalizer<MAX_DEVICES> {
    pub fn new() -> Self {
        Self {
            sessions: SessionTable::new(),
            adapters: AdapterPool::new(),
            commands: CommandSequencer::new(),
        }
    }

    /// A device interface was mounted.
    ///
    /// Returns `true` when a quirk adapter claimed the interface; the caller must then
    /// invoke [`begin_adaptation`](Self::begin_adaptation) once the transport is ready
    /// to accept outbound transfers.
    pub fn device_mounted(&mut self, identity: DeviceIdentity, endpoints: Endpoints) -> bool {
        self.adapters.claim(identity, endpoints)
    }

    /// A device interface was unmounted. Safe to call for unknown interfaces.
    pub fn device_unmounted<C: Consumer>(&mut self, key: InterfaceKey, consumer: &mut C) {
        // order matters: in-flight bookkeeping first, then the adapter, then the slot,
        // so nothing ends up referencing freed state
        self.commands.cancel(key);
        self.adapters.reset(key);
        self.sessions.unregister(key);
        consumer.device_disconnected(key);
    }

    /// Start the bring-up handshake for a claimed quirk device.
    ///
    /// Deliberately separate from [`device_mounted`](Self::device_mounted): the
    /// transport may not be ready for an outbound transfer inside its own mount
    /// callback. If the start cannot be issued yet it is parked and retried on the
    /// next [`tick`](Self::tick).
    pub fn begin_adaptation<T: Transport>(&mut self, key: InterfaceKey, transport: &mut T) {
        self.adapters.begin(key, &mut self.commands, transport);
    }

    /// Cooperative idle step: drains a parked adaptation start.
    pub fn tick<T: Transport>(&mut self, transport: &mut T) {
        self.adapters.tick(&mut self.commands, transport);
    }

    /// Externally requested retry for an adapter stalled on command issuance.
    pub fn retry_adaptation<T: Transport, C: Consumer>(
        &mut self,
        key: InterfaceKey,
        transport: &mut T,
        consumer: &mut C,
    ) {
        if let Some(publish) = self.adapters.retry(key, &mut self.commands, transport) {
            self.install(publish.identity, publish.endpoints, publish.descriptor, transport, consumer);
        }
    }

    /// Whether a quirk device has finished its handshake.
    pub fn is_adapter_ready(&self, key: InterfaceKey) -> bool {
        self.adapters.is_ready(key)
    }

    /// A report descriptor became available for `identity`, either vendor-supplied or
    /// synthesized by an adapter that finished its handshake.
    ///
    /// On a parse failure the device is not registered and will produce no input.
    pub fn descriptor_available<T: Transport, C: Consumer>(
        &mut self,
        identity: DeviceIdentity,
        endpoints: Endpoints,
        bytes: &[u8],
        transport: &mut T,
        consumer: &mut C,
    ) {
        // A quirk device's vendor descriptor does not describe what it will actually
        // send; the adapter publishes the authoritative one when it reaches ready.
        if self.adapters.owns(identity.key) && !self.adapters.is_ready(identity.key) {
            return;
        }
        self.install(identity, endpoints, bytes, transport, consumer);
    }

    /// A raw input report arrived for `key`.
    ///
    /// `report_id` is the leading report-id byte, or 0 for devices that declare none;
    /// `data` is the full report as received, including that byte.
    pub fn raw_report<T: Transport, C: Consumer>(
        &mut self,
        key: InterfaceKey,
        report_id: u8,
        data: &[u8],
        transport: &mut T,
        consumer: &mut C,
    ) {
        if self.adapters.intercept(key, report_id, data) == Verdict::Pass {
            // absent map: the device is still in its bring-up window, drop silently
            if let Some(entry) = self.sessions.lookup(key) {
                let mut values = [CanonicalValue { usage_page: 0, usage: 0, value: 0 }; MAX_FIELDS];
                let n = entry.field_map.decode_into(report_id, data, &mut values);
                if n > 0 {
                    consumer.canonical_input(key, &values[..n]);
                }
            }
        }
        transport.receive_reports(key);
    }

    /// The transport finished (or failed) the in-flight command for `key`.
    ///
    /// Exactly one listener is notified: the quirk adapter owning the interface, or
    /// else the consumer's generic completion callback. Completions with no pending
    /// command are dropped.
    pub fn command_transfer_complete<T: Transport, C: Consumer>(
        &mut self,
        key: InterfaceKey,
        report_id: u8,
        success: bool,
        transport: &mut T,
        consumer: &mut C,
    ) {
        let Some(command) = self.commands.complete(key) else {
            return;
        };
        if self.adapters.owns(key) {
            if let Some(publish) =
                self.adapters.command_complete(key, success, &mut self.commands, transport)
            {
                self.install(publish.identity, publish.endpoints, publish.descriptor, transport, consumer);
            }
        } else {
            consumer.command_complete(key, report_id, command.kind, success);
        }
    }

    /// Response data for a GET_FEATURE command issued through
    /// [`queue_command`](Self::queue_command).
    pub fn feature_report<C: Consumer>(
        &mut self,
        key: InterfaceKey,
        report_id: u8,
        data: &[u8],
        consumer: &mut C,
    ) {
        consumer.feature_report(key, report_id, data);
    }

    /// Send a command to a device, subject to the one-in-flight-per-interface rule.
    pub fn queue_command<T: Transport>(
        &mut self,
        command: OutputCommand,
        transport: &mut T,
    ) -> Result<(), Rejected> {
        self.commands.enqueue(command, transport)
    }

    fn install<T: Transport, C: Consumer>(
        &mut self,
        identity: DeviceIdentity,
        endpoints: Endpoints,
        bytes: &[u8],
        transport: &mut T,
        consumer: &mut C,
    ) {
        match descriptor::build_field_map(bytes) {
            Ok(field_map) => {
                if self.sessions.register(identity, field_map, endpoints) {
                    consumer.device_connected(&identity);
                    transport.receive_reports(identity.key);
                } else {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("no session slot for {}", identity.key);
                }
            }
            Err(_error) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("report descriptor rejected for {}: {}", identity.key, _error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::switch_pro;
    use crate::command::CommandKind;
    use crate::transport::WouldBlock;
    use crate::types::{DeviceAddress, VidPid};

    fn identity(addr: u8, vid_pid: VidPid) -> DeviceIdentity {
        DeviceIdentity {
            key: InterfaceKey {
                address: DeviceAddress::new(addr).unwrap(),
                interface: 0,
            },
            vid_pid,
        }
    }

    fn pro_controller(addr: u8) -> DeviceIdentity {
        identity(addr, VidPid(switch_pro::VENDOR_ID_NINTENDO, switch_pro::PRODUCT_ID_PRO_CONTROLLER))
    }

    fn endpoints() -> Endpoints {
        Endpoints { interrupt_in: 0x81, interrupt_out: 0x01 }
    }

    struct FakeTransport {
        sent: [Option<(u8, u8)>; 8],
        sent_len: usize,
        rearmed: usize,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self { sent: [None; 8], sent_len: 0, rearmed: 0 }
        }
    }

    impl Transport for FakeTransport {
        fn send_command(&mut self, command: &OutputCommand) -> Result<(), WouldBlock> {
            let first = command.payload().first().copied().unwrap_or(0);
            self.sent[self.sent_len] = Some((command.report_id, first));
            self.sent_len += 1;
            Ok(())
        }

        fn receive_reports(&mut self, _key: InterfaceKey) {
            self.rearmed += 1;
        }
    }

    struct RecordingConsumer {
        values: [CanonicalValue; MAX_FIELDS],
        values_len: usize,
        reports: usize,
        connected: usize,
        disconnected: usize,
        completions: [Option<(u8, CommandKind, bool)>; 4],
        completions_len: usize,
    }

    impl RecordingConsumer {
        fn new() -> Self {
            Self {
                values: [CanonicalValue { usage_page: 0, usage: 0, value: 0 }; MAX_FIELDS],
                values_len: 0,
                reports: 0,
                connected: 0,
                disconnected: 0,
                completions: [None; 4],
                completions_len: 0,
            }
        }
    }

    impl Consumer for RecordingConsumer {
        fn canonical_input(&mut self, _key: InterfaceKey, values: &[CanonicalValue]) {
            self.values[..values.len()].copy_from_slice(values);
            self.values_len = values.len();
            self.reports += 1;
        }

        fn command_complete(&mut self, _key: InterfaceKey, report_id: u8, kind: CommandKind, success: bool) {
            self.completions[self.completions_len] = Some((report_id, kind, success));
            self.completions_len += 1;
        }

        fn device_connected(&mut self, _identity: &DeviceIdentity) {
            self.connected += 1;
        }

        fn device_disconnected(&mut self, _key: InterfaceKey) {
            self.disconnected += 1;
        }
    }

    // A well-behaved gamepad: no report ids, 8 buttons and one 8-bit axis.
    const PLAIN_GAMEPAD: &[u8] = &[
        0x05, 0x01, // Usage Page (Generic Desktop)
        0x09, 0x05, // Usage (Game Pad)
        0xA1, 0x01, // Collection (Application)
        0x05, 0x09, //   Usage Page (Button)
        0x19, 0x01, //   Usage Minimum (1)
        0x29, 0x08, //   Usage Maximum (8)
        0x15, 0x00, //   Logical Minimum (0)
        0x25, 0x01, //   Logical Maximum (1)
        0x75, 0x01, //   Report Size (1)
        0x95, 0x08, //   Report Count (8)
        0x81, 0x02, //   Input (Data,Var,Abs)
        0x05, 0x01, //   Usage Page (Generic Desktop)
        0x09, 0x30, //   Usage (X)
        0x15, 0x00, //   Logical Minimum (0)
        0x26, 0xFF, 0x00, // Logical Maximum (255)
        0x75, 0x08, //   Report Size (8)
        0x95, 0x01, //   Report Count (1)
        0x81, 0x02, //   Input (Data,Var,Abs)
        0xC0, // End Collection
    ];

    #[test]
    fn test_plain_device_registers_and_decodes() {
        let mut norm: Normalizer<4> = Normalizer::new();
        let mut transport = FakeTransport::new();
        let mut consumer = RecordingConsumer::new();
        let id = identity(1, VidPid(0x046D, 0xC216));

        assert!(!norm.device_mounted(id, endpoints()));
        norm.descriptor_available(id, endpoints(), PLAIN_GAMEPAD, &mut transport, &mut consumer);
        assert_eq!(consumer.connected, 1);
        assert_eq!(transport.rearmed, 1);

        // buttons 0 and 2 pressed, axis at 0x80
        norm.raw_report(id.key, 0, &[0b0000_0101, 0x80], &mut transport, &mut consumer);
        assert_eq!(consumer.reports, 1);
        assert_eq!(consumer.values_len, 9);
        assert_eq!(consumer.values[0].value, 1);
        assert_eq!(consumer.values[1].value, 0);
        assert_eq!(consumer.values[2].value, 1);
        let axis = consumer.values[8];
        assert_eq!((axis.usage_page, axis.usage, axis.value), (0x01, 0x30, 0x80));
        assert_eq!(transport.rearmed, 2);
    }

    #[test]
    fn test_report_for_unregistered_device_is_dropped() {
        let mut norm: Normalizer<4> = Normalizer::new();
        let mut transport = FakeTransport::new();
        let mut consumer = RecordingConsumer::new();
        let id = identity(1, VidPid(0x046D, 0xC216));

        norm.raw_report(id.key, 0, &[0x00, 0x00], &mut transport, &mut consumer);
        assert_eq!(consumer.reports, 0);
        // reception is still re-armed: dropping is expected during bring-up
        assert_eq!(transport.rearmed, 1);
    }

    #[test]
    fn test_malformed_descriptor_never_registers() {
        let mut norm: Normalizer<4> = Normalizer::new();
        let mut transport = FakeTransport::new();
        let mut consumer = RecordingConsumer::new();
        let id = identity(1, VidPid(0x046D, 0xC216));

        norm.descriptor_available(id, endpoints(), &[0x26, 0xFF], &mut transport, &mut consumer);
        assert_eq!(consumer.connected, 0);
        norm.raw_report(id.key, 0, &[0x00], &mut transport, &mut consumer);
        assert_eq!(consumer.reports, 0);
    }

    #[test]
    fn test_quirk_device_end_to_end() {
        let mut norm: Normalizer<4> = Normalizer::new();
        let mut transport = FakeTransport::new();
        let mut consumer = RecordingConsumer::new();
        let id = pro_controller(1);

        assert!(norm.device_mounted(id, endpoints()));

        // the vendor descriptor is withheld while the adapter owns the device
        norm.descriptor_available(id, endpoints(), PLAIN_GAMEPAD, &mut transport, &mut consumer);
        assert_eq!(consumer.connected, 0);

        norm.begin_adaptation(id.key, &mut transport);
        assert_eq!(transport.sent[0], Some((switch_pro::REPORT_ID_COMMAND, 0x01)));

        // handshake chatter on the input channel is swallowed, not decoded
        norm.raw_report(id.key, switch_pro::REPORT_ID_USB_REPLY, &[0x81, 0x01], &mut transport, &mut consumer);
        assert_eq!(consumer.reports, 0);

        norm.command_transfer_complete(id.key, switch_pro::REPORT_ID_COMMAND, true, &mut transport, &mut consumer);
        assert_eq!(transport.sent[1], Some((switch_pro::REPORT_ID_COMMAND, 0x02)));
        norm.command_transfer_complete(id.key, switch_pro::REPORT_ID_COMMAND, true, &mut transport, &mut consumer);
        assert_eq!(transport.sent[2], Some((switch_pro::REPORT_ID_COMMAND, 0x04)));
        norm.command_transfer_complete(id.key, switch_pro::REPORT_ID_COMMAND, true, &mut transport, &mut consumer);

        // the synthetic descriptor was published and registered
        assert!(norm.is_adapter_ready(id.key));
        assert_eq!(consumer.connected, 1);

        // a simple-mode input report now yields canonical values:
        // report id, buttons 0x0001, hat 0 + pad, centered sticks, vendor bytes
        let report = [
            switch_pro::REPORT_ID_INPUT_SIMPLE,
            0x01, 0x00, // buttons: first pressed
            0x08, // hat released (8 = null), pad 0
            0x80, 0x80, 0x80, 0x80, // sticks centered
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // vendor data
        ];
        norm.raw_report(id.key, switch_pro::REPORT_ID_INPUT_SIMPLE, &report, &mut transport, &mut consumer);
        assert_eq!(consumer.reports, 1);
        // 16 buttons + hat + 4 axes + 6 vendor fields (padding skipped)
        assert_eq!(consumer.values_len, 27);
        assert_eq!(consumer.values[0].value, 1);
        assert_eq!(consumer.values[1].value, 0);
        let hat = consumer.values[16];
        assert_eq!((hat.usage, hat.value), (0x39, 8));
        let x = consumer.values[17];
        assert_eq!((x.usage, x.value), (0x30, 0x80));

        // command replies keep being swallowed after ready
        norm.raw_report(id.key, switch_pro::REPORT_ID_USB_REPLY, &[0x81, 0x04], &mut transport, &mut consumer);
        assert_eq!(consumer.reports, 1);
    }

    #[test]
    fn test_unmount_mid_handshake_starts_over() {
        let mut norm: Normalizer<4> = Normalizer::new();
        let mut transport = FakeTransport::new();
        let mut consumer = RecordingConsumer::new();
        let id = pro_controller(1);

        assert!(norm.device_mounted(id, endpoints()));
        norm.begin_adaptation(id.key, &mut transport);
        norm.command_transfer_complete(id.key, switch_pro::REPORT_ID_COMMAND, true, &mut transport, &mut consumer);
        assert_eq!(transport.sent_len, 2);

        norm.device_unmounted(id.key, &mut consumer);
        assert_eq!(consumer.disconnected, 1);
        assert!(!norm.is_adapter_ready(id.key));

        // the same identity re-mounts with a fresh handshake, not a resumed one
        assert!(norm.device_mounted(id, endpoints()));
        norm.begin_adaptation(id.key, &mut transport);
        assert_eq!(transport.sent[2], Some((switch_pro::REPORT_ID_COMMAND, 0x01)));
    }

    #[test]
    fn test_generic_completion_reaches_consumer() {
        let mut norm: Normalizer<4> = Normalizer::new();
        let mut transport = FakeTransport::new();
        let mut consumer = RecordingConsumer::new();
        let id = identity(1, VidPid(0x046D, 0xC216));

        norm.descriptor_available(id, endpoints(), PLAIN_GAMEPAD, &mut transport, &mut consumer);
        let cmd = OutputCommand::set_feature(id.key, 0x05, &[0x01, 0x02]).unwrap();
        assert!(norm.queue_command(cmd, &mut transport).is_ok());
        norm.command_transfer_complete(id.key, 0x05, true, &mut transport, &mut consumer);
        assert_eq!(consumer.completions[0], Some((0x05, CommandKind::SetFeature, true)));

        // a completion with nothing in flight is dropped
        norm.command_transfer_complete(id.key, 0x05, true, &mut transport, &mut consumer);
        assert_eq!(consumer.completions_len, 1);
    }

    #[test]
    fn test_feature_report_forwarded() {
        struct FeatureConsumer {
            last: Option<(u8, u8)>,
        }
        impl Consumer for FeatureConsumer {
            fn canonical_input(&mut self, _key: InterfaceKey, _values: &[CanonicalValue]) {}
            fn feature_report(&mut self, _key: InterfaceKey, report_id: u8, data: &[u8]) {
                self.last = Some((report_id, data[0]));
            }
        }

        let mut norm: Normalizer<4> = Normalizer::new();
        let mut consumer = FeatureConsumer { last: None };
        let id = identity(1, VidPid(0x046D, 0xC216));
        norm.feature_report(id.key, 0x05, &[0xAB], &mut consumer);
        assert_eq!(consumer.last, Some((0x05, 0xAB)));
    }
}
