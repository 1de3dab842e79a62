//! USB/IP wire protocol for a single exported debug-probe device
//!
//! This crate defines the byte-exact message formats used between a USB/IP
//! host (for example the Linux `vhci_hcd` driver via `usbip attach`) and the
//! probe server:
//!
//! - [`stage1`]: device list and import handshake, sent before a device is
//!   attached.
//! - [`stage2`]: the 48-byte URB envelope (`CMD_SUBMIT`, `RET_SUBMIT`,
//!   `CMD_UNLINK`, `RET_UNLINK`), modelled as a tagged body.
//! - [`codec`]: conversion of the stage-2 envelope between wire and host
//!   byte order.
//!
//! # Example
//!
//! ```
//! use protocol::{Stage2Header, USBIP_RET_SUBMIT};
//!
//! let mut raw = [0u8; 48];
//! raw[3] = 0x01; // CMD_SUBMIT
//! raw[15] = 0x01; // direction IN
//! raw[19] = 0x01; // endpoint 1
//!
//! let header = Stage2Header::decode(&raw).unwrap();
//! let reply = header.into_ret_submit(0, 0);
//! assert_eq!(reply.command(), USBIP_RET_SUBMIT);
//! assert_eq!(reply.encode()[3], 0x03);
//! ```

pub mod codec;
pub mod error;
pub mod stage1;
pub mod stage2;

pub use codec::{ENVELOPE_WORDS, TRAILER_WORDS, from_wire, to_wire};
pub use error::{ProtocolError, Result};
pub use stage1::{
    BUSID_SIZE, DEVICE_PATH_SIZE, DeviceRecord, InterfaceRecord, OP_REP_DEVLIST, OP_REP_IMPORT,
    OP_REQ_DEVLIST, OP_REQ_IMPORT, Stage1Command, Stage1Header, USBIP_VERSION,
};
pub use stage2::{
    CmdSubmit, CmdUnlink, Direction, RetSubmit, RetUnlink, STAGE2_HEADER_SIZE, SetupPacket,
    Stage2Body, Stage2Header, USBIP_CMD_SUBMIT, USBIP_CMD_UNLINK, USBIP_DIR_IN, USBIP_DIR_OUT,
    USBIP_RET_SUBMIT, USBIP_RET_UNLINK, offsets, out_payload_len,
};
