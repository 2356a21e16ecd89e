//! Interface for the USB host transport
//!
//! This core does not talk to endpoints itself. Enumeration, endpoint transfer primitives
//! and the polling cadence all live in the transport collaborator, which must implement
//! [`Transport`].
//!
//! The transport calls *into* the core through the methods on [`Normalizer`](crate::Normalizer)
//! (`device_mounted`, `raw_report`, `command_transfer_complete`, ...); the core calls *out*
//! through this trait.

use crate::command::OutputCommand;
use crate::types::InterfaceKey;

/// Returned by [`Transport::send_command`] when the transport cannot accept an outbound
/// transfer right now (endpoint busy, or the device is not yet ready for host-initiated
/// traffic).
pub struct WouldBlock;

pub trait Transport {
    /// Issue the host-to-device transfer described by `command`.
    ///
    /// For [`CommandKind::Output`](crate::command::CommandKind) this is an output-report
    /// transfer; for the feature kinds it is a SET_REPORT/GET_REPORT control transfer
    /// ([`OutputCommand::setup_packet`] builds the matching setup packet).
    ///
    /// The transport must later report the outcome via
    /// [`Normalizer::command_transfer_complete`](crate::Normalizer::command_transfer_complete),
    /// exactly once per accepted command.
    fn send_command(&mut self, command: &OutputCommand) -> Result<(), WouldBlock>;

    /// Re-arm input-report reception for the given interface.
    ///
    /// The core requests this after every consumed report and after a device becomes
    /// registered; the transport owns the receive lifecycle beyond that.
    fn receive_reports(&mut self, key: InterfaceKey);
}
