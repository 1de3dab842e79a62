//! USB/IP stage-2 messages (URB submit and unlink)
//!
//! After a device is imported every message uses the same 48-byte envelope:
//!
//! ```text
//! offset  0  command      u32
//!         4  seqnum       u32
//!         8  devid        u32
//!        12  direction    u32   (0 = OUT, 1 = IN)
//!        16  ep           u32
//!        20  body         5 x u32, meaning depends on command
//!        40  setup        8 bytes, never byte-swapped
//! ```
//!
//! The body is modelled as [`Stage2Body`], one variant per command. The
//! command tag itself lives in the variant, so a header can never carry a
//! body that disagrees with its command.

use crate::codec;
use crate::error::{ProtocolError, Result};
use byteorder::{BigEndian, ByteOrder};

/// Size of the stage-2 envelope in bytes
pub const STAGE2_HEADER_SIZE: usize = 48;

/// Command code: submit an URB
pub const USBIP_CMD_SUBMIT: u32 = 0x0001;
/// Command code: unlink an URB
pub const USBIP_CMD_UNLINK: u32 = 0x0002;
/// Reply code: URB submitted
pub const USBIP_RET_SUBMIT: u32 = 0x0003;
/// Reply code: URB unlinked
pub const USBIP_RET_UNLINK: u32 = 0x0004;

/// Transfer direction host -> device
pub const USBIP_DIR_OUT: u32 = 0;
/// Transfer direction device -> host
pub const USBIP_DIR_IN: u32 = 1;

/// Byte offsets into a raw (wire order) stage-2 header
///
/// Fields are big-endian, so the least significant byte of a `u32` at
/// offset `n` sits at `n + 3`.
pub mod offsets {
    /// Command field
    pub const COMMAND: core::ops::Range<usize> = 0..4;
    /// Direction field
    pub const DIRECTION: core::ops::Range<usize> = 12..16;
    /// CMD_SUBMIT transfer_buffer_length
    pub const TRANSFER_BUFFER_LENGTH: core::ops::Range<usize> = 24..28;
    /// Low byte of the command field
    pub const COMMAND_LSB: usize = 3;
    /// Low byte of the direction field
    pub const DIRECTION_LSB: usize = 15;
    /// Low byte of the endpoint field
    pub const EP_LSB: usize = 19;
    /// RET_SUBMIT status
    pub const STATUS: core::ops::Range<usize> = 20..24;
    /// RET_SUBMIT actual_length
    pub const ACTUAL_LENGTH: core::ops::Range<usize> = 24..28;
    /// RET_SUBMIT error_count
    pub const ERROR_COUNT: core::ops::Range<usize> = 36..40;
    /// Transfer setup block
    pub const SETUP: core::ops::Range<usize> = 40..48;
}

/// Length of the payload following a raw header
///
/// Non-zero only for a CMD_SUBMIT with direction OUT. Reads the three words
/// it needs straight from the wire bytes, so the header is never decoded.
pub fn out_payload_len(raw: &[u8; STAGE2_HEADER_SIZE]) -> u32 {
    let command = BigEndian::read_u32(&raw[offsets::COMMAND]);
    let direction = BigEndian::read_u32(&raw[offsets::DIRECTION]);
    if command == USBIP_CMD_SUBMIT && direction == USBIP_DIR_OUT {
        BigEndian::read_u32(&raw[offsets::TRANSFER_BUFFER_LENGTH])
    } else {
        0
    }
}

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
}

impl Direction {
    /// Any non-zero value on the wire means IN
    pub fn from_raw(raw: u32) -> Self {
        if raw == USBIP_DIR_OUT {
            Self::Out
        } else {
            Self::In
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            Self::Out => USBIP_DIR_OUT,
            Self::In => USBIP_DIR_IN,
        }
    }

    pub fn flip(self) -> Self {
        match self {
            Self::Out => Self::In,
            Self::In => Self::Out,
        }
    }
}

/// CMD_SUBMIT body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CmdSubmit {
    pub transfer_flags: u32,
    pub transfer_buffer_length: u32,
    pub start_frame: u32,
    pub number_of_packets: u32,
    pub interval: u32,
}

/// RET_SUBMIT body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetSubmit {
    pub status: i32,
    pub actual_length: u32,
    pub start_frame: u32,
    pub number_of_packets: u32,
    pub error_count: u32,
}

/// CMD_UNLINK body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CmdUnlink {
    pub unlink_seqnum: u32,
    pub reserved: [u32; 4],
}

/// RET_UNLINK body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetUnlink {
    pub status: i32,
    pub reserved: [u32; 4],
}

/// Command-specific part of the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage2Body {
    CmdSubmit(CmdSubmit),
    RetSubmit(RetSubmit),
    CmdUnlink(CmdUnlink),
    RetUnlink(RetUnlink),
    /// Unrecognised command, words kept verbatim
    Unknown { command: u32, words: [u32; 5] },
}

impl Stage2Body {
    /// Command tag for this body
    pub fn command(&self) -> u32 {
        match self {
            Self::CmdSubmit(_) => USBIP_CMD_SUBMIT,
            Self::RetSubmit(_) => USBIP_RET_SUBMIT,
            Self::CmdUnlink(_) => USBIP_CMD_UNLINK,
            Self::RetUnlink(_) => USBIP_RET_UNLINK,
            Self::Unknown { command, .. } => *command,
        }
    }

    pub(crate) fn from_words(command: u32, w: [u32; 5]) -> Self {
        match command {
            USBIP_CMD_SUBMIT => Self::CmdSubmit(CmdSubmit {
                transfer_flags: w[0],
                transfer_buffer_length: w[1],
                start_frame: w[2],
                number_of_packets: w[3],
                interval: w[4],
            }),
            USBIP_RET_SUBMIT => Self::RetSubmit(RetSubmit {
                status: w[0] as i32,
                actual_length: w[1],
                start_frame: w[2],
                number_of_packets: w[3],
                error_count: w[4],
            }),
            USBIP_CMD_UNLINK => Self::CmdUnlink(CmdUnlink {
                unlink_seqnum: w[0],
                reserved: [w[1], w[2], w[3], w[4]],
            }),
            USBIP_RET_UNLINK => Self::RetUnlink(RetUnlink {
                status: w[0] as i32,
                reserved: [w[1], w[2], w[3], w[4]],
            }),
            command => Self::Unknown { command, words: w },
        }
    }

    pub(crate) fn to_words(self) -> [u32; 5] {
        match self {
            Self::CmdSubmit(b) => [
                b.transfer_flags,
                b.transfer_buffer_length,
                b.start_frame,
                b.number_of_packets,
                b.interval,
            ],
            Self::RetSubmit(b) => [
                b.status as u32,
                b.actual_length,
                b.start_frame,
                b.number_of_packets,
                b.error_count,
            ],
            Self::CmdUnlink(b) => [
                b.unlink_seqnum,
                b.reserved[0],
                b.reserved[1],
                b.reserved[2],
                b.reserved[3],
            ],
            Self::RetUnlink(b) => [
                b.status as u32,
                b.reserved[0],
                b.reserved[1],
                b.reserved[2],
                b.reserved[3],
            ],
            Self::Unknown { words, .. } => words,
        }
    }
}

/// Decoded stage-2 envelope in host byte order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage2Header {
    pub seqnum: u32,
    pub devid: u32,
    /// Raw direction word, see [`Direction::from_raw`]
    pub direction: u32,
    pub ep: u32,
    pub body: Stage2Body,
    /// Transfer setup block, opaque to the codec
    pub setup: [u8; 8],
}

impl Stage2Header {
    /// Size of the envelope in bytes
    pub const SIZE: usize = STAGE2_HEADER_SIZE;

    /// Decode the envelope at the start of `buf`
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let raw: &[u8; STAGE2_HEADER_SIZE] = buf
            .get(..STAGE2_HEADER_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(ProtocolError::BufferTooSmall {
                needed: STAGE2_HEADER_SIZE,
                available: buf.len(),
            })?;
        Ok(codec::from_wire(raw))
    }

    /// Encode the envelope in wire order
    pub fn encode(&self) -> [u8; STAGE2_HEADER_SIZE] {
        codec::to_wire(self)
    }

    /// Command tag
    pub fn command(&self) -> u32 {
        self.body.command()
    }

    pub fn direction(&self) -> Direction {
        Direction::from_raw(self.direction)
    }

    /// CMD_SUBMIT body, if this is a submit request
    pub fn submit(&self) -> Option<&CmdSubmit> {
        match &self.body {
            Stage2Body::CmdSubmit(submit) => Some(submit),
            _ => None,
        }
    }

    /// Setup packet view of the trailing block
    pub fn setup_packet(&self) -> SetupPacket {
        SetupPacket::from_bytes(&self.setup)
    }

    /// Turn a request into its RET_SUBMIT reply
    ///
    /// Direction is flipped and the body replaced by a zeroed RET_SUBMIT
    /// carrying `status` and `actual_length`. The setup block is kept.
    pub fn into_ret_submit(self, status: i32, actual_length: u32) -> Self {
        Self {
            direction: self.direction().flip().as_raw(),
            body: Stage2Body::RetSubmit(RetSubmit {
                status,
                actual_length,
                ..RetSubmit::default()
            }),
            ..self
        }
    }

    /// Turn a request into its RET_UNLINK reply
    ///
    /// Direction is forced to OUT; status, padding and setup are zeroed.
    pub fn into_ret_unlink(self) -> Self {
        Self {
            direction: USBIP_DIR_OUT,
            body: Stage2Body::RetUnlink(RetUnlink::default()),
            setup: [0; 8],
            ..self
        }
    }
}

/// Standard USB setup packet carried in the trailing block of CMD_SUBMIT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    /// Parse the little-endian setup block
    pub fn from_bytes(bytes: &[u8; 8]) -> Self {
        Self {
            request_type: bytes[0],
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }

    /// Descriptor type of a GET_DESCRIPTOR request (high byte of wValue)
    pub fn descriptor_type(&self) -> u8 {
        (self.value >> 8) as u8
    }

    /// Descriptor index of a GET_DESCRIPTOR request (low byte of wValue)
    pub fn descriptor_index(&self) -> u8 {
        (self.value & 0xFF) as u8
    }
}
