//! Serialization of host-to-device commands
//!
//! All outbound traffic to a device (output reports, feature get/set) passes through the
//! [`CommandSequencer`], which enforces the one rule that keeps endpoints uncontended:
//! per interface, at most one command is in flight at any time. A second [`enqueue`]
//! before the completion notification is rejected with [`Rejected::Busy`]; callers must
//! try again after the completion arrives, not spin.
//!
//! [`enqueue`]: CommandSequencer::enqueue

use usb_device::{UsbDirection, control::{Recipient, RequestType}};

use crate::transport::Transport;
use crate::types::{InterfaceKey, SetupPacket};

const GET_REPORT: u8 = 0x01;
const SET_REPORT: u8 = 0x09;

#[repr(u8)]
enum ReportType {
    Output = 0x02,
    Feature = 0x03,
}

/// Maximum command payload, matching the transport's transfer buffer.
pub const MAX_COMMAND_LEN: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandKind {
    /// Output-report transfer.
    Output,
    /// SET_REPORT with report type Feature.
    SetFeature,
    /// GET_REPORT with report type Feature; the response arrives via
    /// [`Normalizer::feature_report`](crate::Normalizer::feature_report).
    GetFeature,
}

/// One host-to-device command. Enqueued by a caller, issued by the sequencer, released on
/// transfer completion.
#[derive(Clone, Copy)]
pub struct OutputCommand {
    pub key: InterfaceKey,
    pub report_id: u8,
    pub kind: CommandKind,
    payload: [u8; MAX_COMMAND_LEN],
    /// Payload length for outbound kinds; expected response length for [`CommandKind::GetFeature`].
    len: u8,
}

impl OutputCommand {
    fn new(key: InterfaceKey, report_id: u8, kind: CommandKind, payload: &[u8]) -> Option<Self> {
        if payload.len() > MAX_COMMAND_LEN {
            return None;
        }
        let mut buf = [0u8; MAX_COMMAND_LEN];
        buf[..payload.len()].copy_from_slice(payload);
        Some(Self {
            key,
            report_id,
            kind,
            payload: buf,
            len: payload.len() as u8,
        })
    }

    /// An output-report command. Returns `None` if the payload exceeds [`MAX_COMMAND_LEN`].
    pub fn output(key: InterfaceKey, report_id: u8, payload: &[u8]) -> Option<Self> {
        Self::new(key, report_id, CommandKind::Output, payload)
    }

    /// A SET_REPORT(Feature) command. Returns `None` if the payload exceeds [`MAX_COMMAND_LEN`].
    pub fn set_feature(key: InterfaceKey, report_id: u8, payload: &[u8]) -> Option<Self> {
        Self::new(key, report_id, CommandKind::SetFeature, payload)
    }

    /// A GET_REPORT(Feature) command requesting `length` bytes.
    pub fn get_feature(key: InterfaceKey, report_id: u8, length: u8) -> Self {
        Self {
            key,
            report_id,
            kind: CommandKind::GetFeature,
            payload: [0; MAX_COMMAND_LEN],
            len: length,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self.kind {
            CommandKind::GetFeature => &[],
            _ => &self.payload[..self.len as usize],
        }
    }

    /// The setup packet for issuing this command as a HID class control transfer.
    pub fn setup_packet(&self) -> SetupPacket {
        let interface = self.key.interface as u16;
        match self.kind {
            CommandKind::Output => SetupPacket::new(
                UsbDirection::Out,
                RequestType::Class,
                Recipient::Interface,
                SET_REPORT,
                ((ReportType::Output as u8 as u16) << 8) | self.report_id as u16,
                interface,
                self.len as u16,
            ),
            CommandKind::SetFeature => SetupPacket::new(
                UsbDirection::Out,
                RequestType::Class,
                Recipient::Interface,
                SET_REPORT,
                ((ReportType::Feature as u8 as u16) << 8) | self.report_id as u16,
                interface,
                self.len as u16,
            ),
            CommandKind::GetFeature => SetupPacket::new(
                UsbDirection::In,
                RequestType::Class,
                Recipient::Interface,
                GET_REPORT,
                ((ReportType::Feature as u8 as u16) << 8) | self.report_id as u16,
                interface,
                self.len as u16,
            ),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rejected {
    /// A command for the same interface is already in flight, or the transport cannot
    /// accept the transfer right now. Try again after the next completion notification.
    Busy,
    /// All in-flight slots are taken.
    NoCapacity,
}

pub struct CommandSequencer<const N: usize = 8> {
    in_flight: [Option<OutputCommand>; N],
}

impl<const N: usize> CommandSequencer<N> {
    pub fn new() -> Self {
        Self {
            in_flight: [None; N],
        }
    }

    /// Issue `command` through the transport and track it as in flight.
    ///
    /// Rejected with [`Rejected::Busy`] while a command for the same interface is
    /// pending, and with [`Rejected::NoCapacity`] when the slot pool is exhausted.
    pub fn enqueue<T: Transport>(&mut self, command: OutputCommand, transport: &mut T) -> Result<(), Rejected> {
        if self.is_busy(command.key) {
            return Err(Rejected::Busy);
        }
        let Some(slot) = self.in_flight.iter_mut().find(|slot| slot.is_none()) else {
            return Err(Rejected::NoCapacity);
        };
        transport.send_command(&command).map_err(|_| Rejected::Busy)?;
        *slot = Some(command);
        Ok(())
    }

    /// Release the in-flight slot for `key` and return the command that occupied it.
    ///
    /// Returns `None` when no command is pending for that interface (a stale or
    /// spurious completion, dropped by the caller).
    pub fn complete(&mut self, key: InterfaceKey) -> Option<OutputCommand> {
        for slot in self.in_flight.iter_mut() {
            if matches!(slot, Some(cmd) if cmd.key == key) {
                return slot.take();
            }
        }
        None
    }

    /// Drop any in-flight bookkeeping for `key` without notifying anyone. Used on
    /// unmount, before the adapter and session state for the interface are freed.
    pub fn cancel(&mut self, key: InterfaceKey) {
        self.complete(key);
    }

    pub fn is_busy(&self, key: InterfaceKey) -> bool {
        self.in_flight
            .iter()
            .flatten()
            .any(|cmd| cmd.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::WouldBlock;
    use crate::types::DeviceAddress;

    fn key(addr: u8) -> InterfaceKey {
        InterfaceKey {
            address: DeviceAddress::new(addr).unwrap(),
            interface: 0,
        }
    }

    struct FakeTransport {
        sent: usize,
        reject: bool,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self { sent: 0, reject: false }
        }
    }

    impl Transport for FakeTransport {
        fn send_command(&mut self, _command: &OutputCommand) -> Result<(), WouldBlock> {
            if self.reject {
                return Err(WouldBlock);
            }
            self.sent += 1;
            Ok(())
        }

        fn receive_reports(&mut self, _key: InterfaceKey) {}
    }

    #[test]
    fn test_second_enqueue_for_same_key_is_busy() {
        let mut seq: CommandSequencer<4> = CommandSequencer::new();
        let mut transport = FakeTransport::new();
        let cmd = OutputCommand::output(key(1), 0x01, &[0xAA]).unwrap();
        assert!(seq.enqueue(cmd, &mut transport).is_ok());
        assert_eq!(seq.enqueue(cmd, &mut transport), Err(Rejected::Busy));
        assert_eq!(transport.sent, 1);
    }

    #[test]
    fn test_completion_releases_slot() {
        let mut seq: CommandSequencer<4> = CommandSequencer::new();
        let mut transport = FakeTransport::new();
        let cmd = OutputCommand::output(key(1), 0x01, &[0xAA]).unwrap();
        assert!(seq.enqueue(cmd, &mut transport).is_ok());
        let completed = seq.complete(key(1)).unwrap();
        assert_eq!(completed.report_id, 0x01);
        assert!(!seq.is_busy(key(1)));
        assert!(seq.enqueue(cmd, &mut transport).is_ok());
    }

    #[test]
    fn test_no_capacity_across_interfaces() {
        let mut seq: CommandSequencer<1> = CommandSequencer::new();
        let mut transport = FakeTransport::new();
        let first = OutputCommand::output(key(1), 0x01, &[]).unwrap();
        let second = OutputCommand::output(key(2), 0x01, &[]).unwrap();
        assert!(seq.enqueue(first, &mut transport).is_ok());
        assert_eq!(seq.enqueue(second, &mut transport), Err(Rejected::NoCapacity));
    }

    #[test]
    fn test_transport_rejection_leaves_slot_free() {
        let mut seq: CommandSequencer<4> = CommandSequencer::new();
        let mut transport = FakeTransport::new();
        transport.reject = true;
        let cmd = OutputCommand::output(key(1), 0x01, &[0xAA]).unwrap();
        assert_eq!(seq.enqueue(cmd, &mut transport), Err(Rejected::Busy));
        assert!(!seq.is_busy(key(1)));
        transport.reject = false;
        assert!(seq.enqueue(cmd, &mut transport).is_ok());
    }

    #[test]
    fn test_stale_completion_returns_none() {
        let mut seq: CommandSequencer<4> = CommandSequencer::new();
        assert!(seq.complete(key(1)).is_none());
    }

    #[test]
    fn test_setup_packet_for_output_report() {
        let cmd = OutputCommand::output(key(1), 0x80, &[0x01]).unwrap();
        let setup = cmd.setup_packet();
        assert_eq!(setup.request, SET_REPORT);
        assert_eq!(setup.value, 0x0280);
        assert_eq!(setup.length, 1);
        assert_eq!(cmd.payload(), &[0x01]);
    }

    #[test]
    fn test_setup_packet_for_get_feature() {
        let cmd = OutputCommand::get_feature(key(1), 0x05, 16);
        let setup = cmd.setup_packet();
        assert_eq!(setup.request, GET_REPORT);
        assert_eq!(setup.value, 0x0305);
        assert_eq!(setup.length, 16);
        assert!(cmd.payload().is_empty());
    }
}
