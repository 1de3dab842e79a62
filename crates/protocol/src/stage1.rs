//! USB/IP stage-1 messages (device discovery and import)
//!
//! Stage 1 runs before a device is imported. The host either asks for the
//! exported device list (`OP_REQ_DEVLIST`) or imports a device by bus id
//! (`OP_REQ_IMPORT`). Every message starts with an 8-byte header:
//!
//! ```text
//! [version: u16][command: u16][status: u32]   (all big-endian)
//! ```
//!
//! Replies to both requests carry one [`DeviceRecord`]; the device list reply
//! additionally carries a list count and one [`InterfaceRecord`] per interface.

use crate::error::{ProtocolError, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

/// USB/IP protocol version (1.1.1)
pub const USBIP_VERSION: u16 = 0x0111;

/// Size of the bus id field on the wire
pub const BUSID_SIZE: usize = 32;

/// Size of the sysfs path field on the wire
pub const DEVICE_PATH_SIZE: usize = 256;

/// Request: retrieve the list of exported devices
pub const OP_REQ_DEVLIST: u16 = 0x8005;
/// Request: import a remote device
pub const OP_REQ_IMPORT: u16 = 0x8003;
/// Reply: list of exported devices
pub const OP_REP_DEVLIST: u16 = 0x0005;
/// Reply: import result
pub const OP_REP_IMPORT: u16 = 0x0003;

/// Stage-1 request kinds
///
/// Requests are recognised by the low byte of the command code only, so
/// `0x8005` and `0x0005` both select the device list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage1Command {
    /// `OP_REQ_DEVLIST`
    DeviceList,
    /// `OP_REQ_IMPORT`
    DeviceAttach,
}

impl Stage1Command {
    /// Classify a raw command code, `None` if unrecognised
    pub fn from_code(code: u16) -> Option<Self> {
        match code & 0x00FF {
            0x05 => Some(Self::DeviceList),
            0x03 => Some(Self::DeviceAttach),
            _ => None,
        }
    }

    /// Command code used in the reply header
    pub fn reply_code(self) -> u16 {
        match self {
            Self::DeviceList => OP_REP_DEVLIST,
            Self::DeviceAttach => OP_REP_IMPORT,
        }
    }
}

/// Stage-1 header shared by every request and reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage1Header {
    pub version: u16,
    pub command: u16,
    pub status: u32,
}

impl Stage1Header {
    /// Size of the header in bytes
    pub const SIZE: usize = 8;

    /// Build a reply header with the current protocol version
    pub fn reply(command: Stage1Command, status: u32) -> Self {
        Self {
            version: USBIP_VERSION,
            command: command.reply_code(),
            status,
        }
    }

    /// Decode a header from the start of `buf`
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(ProtocolError::BufferTooSmall {
                needed: Self::SIZE,
                available: buf.len(),
            });
        }

        let mut cursor = Cursor::new(buf);
        Ok(Self {
            version: cursor.read_u16::<BigEndian>()?,
            command: cursor.read_u16::<BigEndian>()?,
            status: cursor.read_u32::<BigEndian>()?,
        })
    }

    /// Write the header in wire order
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(self.version)?;
        writer.write_u16::<BigEndian>(self.command)?;
        writer.write_u32::<BigEndian>(self.status)?;
        Ok(())
    }

    /// Recognised command, if any
    pub fn command_type(&self) -> Option<Stage1Command> {
        Stage1Command::from_code(self.command)
    }
}

/// Exported device description (`usbip_usb_device`, 312 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub path: String,
    pub busid: String,
    pub busnum: u32,
    pub devnum: u32,
    pub speed: u32,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub configuration_value: u8,
    pub num_configurations: u8,
    pub num_interfaces: u8,
}

impl DeviceRecord {
    /// Size of the record in bytes
    pub const SIZE: usize = DEVICE_PATH_SIZE + BUSID_SIZE + 24;

    /// Write the record in wire order
    ///
    /// Strings are NUL-padded to their fixed slot and must leave room for at
    /// least one terminator.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_fixed_str(writer, "path", &self.path, DEVICE_PATH_SIZE)?;
        write_fixed_str(writer, "busid", &self.busid, BUSID_SIZE)?;
        writer.write_u32::<BigEndian>(self.busnum)?;
        writer.write_u32::<BigEndian>(self.devnum)?;
        writer.write_u32::<BigEndian>(self.speed)?;
        writer.write_u16::<BigEndian>(self.vendor_id)?;
        writer.write_u16::<BigEndian>(self.product_id)?;
        writer.write_u16::<BigEndian>(self.bcd_device)?;
        writer.write_u8(self.device_class)?;
        writer.write_u8(self.device_subclass)?;
        writer.write_u8(self.device_protocol)?;
        writer.write_u8(self.configuration_value)?;
        writer.write_u8(self.num_configurations)?;
        writer.write_u8(self.num_interfaces)?;
        Ok(())
    }
}

/// Interface description (`usbip_usb_interface`, 4 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceRecord {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

impl InterfaceRecord {
    /// Size of the record in bytes
    pub const SIZE: usize = 4;

    /// Write the record; the trailing padding byte is always zero
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&[self.class, self.subclass, self.protocol, 0])?;
        Ok(())
    }
}

fn write_fixed_str<W: Write>(
    writer: &mut W,
    field: &'static str,
    value: &str,
    size: usize,
) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() >= size {
        return Err(ProtocolError::FieldTooLong {
            field,
            len: bytes.len(),
            max: size - 1,
        });
    }

    let mut slot = vec![0u8; size];
    slot[..bytes.len()].copy_from_slice(bytes);
    writer.write_all(&slot)?;
    Ok(())
}
