//! Bring-up state machine for Nintendo Switch controllers
//!
//! The Pro Controller (and the Joy-Cons) enumerate as HID devices but send no input
//! reports over USB until the host performs a three-step handshake on the generic
//! report channel: a handshake command, a USB-enable command, and a command forcing the
//! controller into simple HID mode. Each step is an output report with id `0x80` and a
//! one-byte payload.
//!
//! After the final step the controller emits fixed-layout `0x3F` input reports, which do
//! not match the report descriptor it handed out during enumeration. [`REPORT_DESCRIPTOR`]
//! describes the actual layout and is published once the handshake completes.
//!
//! The sequence is based on reverse engineering from the Linux hid-nintendo driver and
//! dekuNukem's Nintendo_Switch_Reverse_Engineering notes.

use crate::adapter::{Step, Verdict};
use crate::command::{CommandSequencer, OutputCommand};
use crate::transport::Transport;
use crate::types::{InterfaceKey, VidPid};

pub const VENDOR_ID_NINTENDO: u16 = 0x057E;
pub const PRODUCT_ID_PRO_CONTROLLER: u16 = 0x2009;
pub const PRODUCT_ID_JOYCON_LEFT: u16 = 0x2006;
pub const PRODUCT_ID_JOYCON_RIGHT: u16 = 0x2007;
pub const PRODUCT_ID_JOYCON_GRIP: u16 = 0x200E;

/// Report id carrying the bring-up commands.
pub const REPORT_ID_COMMAND: u8 = 0x80;
/// Reply to a `0x80` command. Never input.
pub const REPORT_ID_USB_REPLY: u8 = 0x81;
/// Reply to a subcommand. Never input.
pub const REPORT_ID_SUBCOMMAND_REPLY: u8 = 0x21;
/// Full input report (standard mode).
pub const REPORT_ID_INPUT_FULL: u8 = 0x30;
/// Simple HID mode input report, emitted after the handshake.
pub const REPORT_ID_INPUT_SIMPLE: u8 = 0x3F;

const CMD_HANDSHAKE: u8 = 0x01;
const CMD_ENABLE_USB: u8 = 0x02;
const CMD_HID_ONLY: u8 = 0x04;

/// Layout of the `0x3F` simple-HID-mode report: 16 buttons, a hat with 4 bits of
/// padding, four 8-bit axes and 6 bytes of vendor data.
pub static REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x05, // Usage (Game Pad)
    0xA1, 0x01, // Collection (Application)
    0x85, 0x3F, //   Report ID (63)
    0x05, 0x09, //   Usage Page (Button)
    0x19, 0x01, //   Usage Minimum (1)
    0x29, 0x10, //   Usage Maximum (16)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x10, //   Report Count (16)
    0x81, 0x02, //   Input (Data,Var,Abs)
    0x05, 0x01, //   Usage Page (Generic Desktop)
    0x09, 0x39, //   Usage (Hat switch)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x07, //   Logical Maximum (7)
    0x35, 0x00, //   Physical Minimum (0)
    0x46, 0x3B, 0x01, // Physical Maximum (315)
    0x65, 0x14, //   Unit (Degrees)
    0x75, 0x04, //   Report Size (4)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x42, //   Input (Data,Var,Abs,Null)
    0x75, 0x04, //   Report Size (4)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x03, //   Input (Const,Var,Abs)
    0x09, 0x30, //   Usage (X)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x02, //   Input (Data,Var,Abs)
    0x09, 0x31, //   Usage (Y)
    0x81, 0x02, //   Input (Data,Var,Abs)
    0x09, 0x32, //   Usage (Z)
    0x81, 0x02, //   Input (Data,Var,Abs)
    0x09, 0x35, //   Usage (Rz)
    0x81, 0x02, //   Input (Data,Var,Abs)
    0x06, 0x00, 0xFF, // Usage Page (Vendor Defined 0xFF00)
    0x09, 0x20, //   Usage (0x20)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x06, //   Report Count (6)
    0x81, 0x02, //   Input (Data,Var,Abs)
    0xC0, // End Collection
];

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Stage {
    NotStarted,
    Handshake,
    Enable,
    HidOnly,
    Ready,
}

#[derive(Clone, Copy)]
pub(crate) struct SwitchPro {
    stage: Stage,
    // set when a stage transition could not issue its command; cleared by retry
    pending_advance: bool,
}

impl SwitchPro {
    pub(crate) fn new() -> Self {
        Self {
            stage: Stage::NotStarted,
            pending_advance: false,
        }
    }

    pub(crate) fn matches(vid_pid: VidPid) -> bool {
        vid_pid.vendor() == VENDOR_ID_NINTENDO
            && matches!(
                vid_pid.product(),
                PRODUCT_ID_PRO_CONTROLLER
                    | PRODUCT_ID_JOYCON_LEFT
                    | PRODUCT_ID_JOYCON_RIGHT
                    | PRODUCT_ID_JOYCON_GRIP
            )
    }

    /// Issue the first handshake command. Returns `false` if it could not be issued
    /// (the caller keeps the start pending); `true` once the handshake is underway.
    pub(crate) fn start<T: Transport, const N: usize>(
        &mut self,
        key: InterfaceKey,
        commands: &mut CommandSequencer<N>,
        transport: &mut T,
    ) -> bool {
        if self.stage != Stage::NotStarted {
            return true;
        }
        self.advance(key, commands, transport) != Step::Stalled
    }

    pub(crate) fn command_complete<T: Transport, const N: usize>(
        &mut self,
        key: InterfaceKey,
        success: bool,
        commands: &mut CommandSequencer<N>,
        transport: &mut T,
    ) -> Step {
        if !success {
            // The device never confirmed this step. Stay where we are: a visible,
            // diagnosable stall beats continuing an unconfirmed handshake.
            #[cfg(feature = "defmt")]
            defmt::warn!("switch pro: transfer failed, handshake stalls at {}", self.stage);
            return Step::Stalled;
        }
        self.advance(key, commands, transport)
    }

    /// Re-attempt a stage entry whose command issuance failed. Does nothing unless
    /// such an attempt is actually pending.
    pub(crate) fn retry<T: Transport, const N: usize>(
        &mut self,
        key: InterfaceKey,
        commands: &mut CommandSequencer<N>,
        transport: &mut T,
    ) -> Step {
        if !self.pending_advance {
            return Step::Ignored;
        }
        self.advance(key, commands, transport)
    }

    fn advance<T: Transport, const N: usize>(
        &mut self,
        key: InterfaceKey,
        commands: &mut CommandSequencer<N>,
        transport: &mut T,
    ) -> Step {
        let (next, command) = match self.stage {
            Stage::NotStarted => (Stage::Handshake, CMD_HANDSHAKE),
            Stage::Handshake => (Stage::Enable, CMD_ENABLE_USB),
            Stage::Enable => (Stage::HidOnly, CMD_HID_ONLY),
            Stage::HidOnly => {
                self.stage = Stage::Ready;
                self.pending_advance = false;
                #[cfg(feature = "defmt")]
                defmt::debug!("switch pro: handshake complete, publishing descriptor");
                return Step::Finished;
            }
            Stage::Ready => return Step::Ignored,
        };

        let Some(cmd) = OutputCommand::output(key, REPORT_ID_COMMAND, &[command]) else {
            return Step::Stalled;
        };
        match commands.enqueue(cmd, transport) {
            Ok(()) => {
                self.stage = next;
                self.pending_advance = false;
                #[cfg(feature = "defmt")]
                defmt::debug!("switch pro: sent command {:#x}", command);
                Step::Advanced
            }
            Err(_) => {
                self.pending_advance = true;
                Step::Stalled
            }
        }
    }

    /// Classify a raw report.
    ///
    /// Command replies are never input and are swallowed at every stage. The two
    /// recognized input ids always pass. Anything else is handshake-era chatter and is
    /// swallowed while the first two stages are pending.
    pub(crate) fn intercept(&self, report_id: u8, _data: &[u8]) -> Verdict {
        match report_id {
            REPORT_ID_USB_REPLY | REPORT_ID_SUBCOMMAND_REPLY => {
                #[cfg(feature = "defmt")]
                if _data.len() > 1 {
                    defmt::debug!("switch pro: reply {:#x}", _data[1]);
                }
                Verdict::Swallow
            }
            REPORT_ID_INPUT_FULL | REPORT_ID_INPUT_SIMPLE => Verdict::Pass,
            _ => match self.stage {
                Stage::Handshake | Stage::Enable => Verdict::Swallow,
                _ => Verdict::Pass,
            },
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.stage == Stage::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::build_field_map;

    #[test]
    fn test_matches_known_controllers() {
        assert!(SwitchPro::matches(VidPid(VENDOR_ID_NINTENDO, PRODUCT_ID_PRO_CONTROLLER)));
        assert!(SwitchPro::matches(VidPid(VENDOR_ID_NINTENDO, PRODUCT_ID_JOYCON_LEFT)));
        assert!(SwitchPro::matches(VidPid(VENDOR_ID_NINTENDO, PRODUCT_ID_JOYCON_RIGHT)));
        assert!(SwitchPro::matches(VidPid(VENDOR_ID_NINTENDO, PRODUCT_ID_JOYCON_GRIP)));
        assert!(!SwitchPro::matches(VidPid(VENDOR_ID_NINTENDO, 0x0306)));
        assert!(!SwitchPro::matches(VidPid(0x045E, PRODUCT_ID_PRO_CONTROLLER)));
    }

    #[test]
    fn test_synthetic_descriptor_builds_a_field_map() {
        let map = build_field_map(REPORT_DESCRIPTOR).unwrap();
        assert!(map.uses_report_ids());
        // 16 buttons + hat + pad + 4 axes + 6 vendor bytes
        assert_eq!(map.len(), 28);
        for field in map.fields() {
            assert_eq!(field.report_id, REPORT_ID_INPUT_SIMPLE);
        }
        // the report is 13 payload bytes behind the report id
        let last = map.fields().last().unwrap();
        assert_eq!(last.bit_offset + last.bit_width as u16, 14 * 8);
    }
}
