use core::num::NonZeroU8;
use usb_device::{UsbDirection, control::{Recipient, RequestType}};

/// An address that the transport has assigned to an attached device.
///
/// The address may or may not represent a device that is currently attached.
///
/// This type only represents assigned addresses, and thus cannot represent the special address 0.
/// Address 0 is only used while the transport assigns an address, before this core ever sees
/// the device.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceAddress(pub(crate) NonZeroU8);

impl DeviceAddress {
    /// Returns `None` for the reserved address 0.
    pub fn new(raw: u8) -> Option<Self> {
        NonZeroU8::new(raw).map(DeviceAddress)
    }
}

impl From<DeviceAddress> for u16 {
    fn from(value: DeviceAddress) -> Self {
        u8::from(value.0) as u16
    }
}

impl From<DeviceAddress> for u8 {
    fn from(value: DeviceAddress) -> Self {
        u8::from(value.0)
    }
}

/// VendorId and ProductId from a device descriptor
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VidPid(pub u16, pub u16);

impl VidPid {
    pub fn vendor(&self) -> u16 {
        self.0
    }

    pub fn product(&self) -> u16 {
        self.1
    }
}

/// Identifies one input interface of one attached device.
///
/// This is the key under which all per-device state in this core is held: session slots,
/// quirk adapters and in-flight commands are all looked up by it. It stays valid for the
/// lifetime of a connection and is never reused while the device remains attached.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterfaceKey {
    pub address: DeviceAddress,
    pub interface: u8,
}

/// Full identity of an input interface: the lookup key plus the vendor/product pair
/// reported by the device descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceIdentity {
    pub key: InterfaceKey,
    pub vid_pid: VidPid,
}

/// Endpoint addresses of the interrupt pipes the transport opened for an interface.
///
/// Held by the session entry (and by an adapter during bring-up) so that the transport
/// can be asked to keep polling the right endpoints.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Endpoints {
    pub interrupt_in: u8,
    pub interrupt_out: u8,
}

/// One normalized field value, emitted downstream for every non-padding field of a
/// decoded input report.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanonicalValue {
    pub usage_page: u16,
    pub usage: u16,
    pub value: i32,
}

pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub fn new(direction: UsbDirection, request_type: RequestType, recipient: Recipient, request: u8, value: u16, index: u16, length: u16) -> Self {
        Self {
            request_type: (recipient as u8) | ((request_type as u8) << 5) | (direction as u8),
            request,
            value,
            index,
            length,
        }
    }
}
