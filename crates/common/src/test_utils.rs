//! Test utilities for usbip-dap
//!
//! Compiled for this crate's own tests and, through the `test-utils`
//! feature, for dev-dependencies of the other crates.
//!
//! Builders for raw USB/IP request frames as a host would send them, plus a
//! few command processors with predictable output.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_submit_in;
//!
//! let frame = create_submit_in(1, 1);
//! assert_eq!(frame.len(), 48);
//! assert_eq!(frame[19], 1);
//! ```

use crate::dap::CommandProcessor;
use protocol::{
    BUSID_SIZE, CmdSubmit, CmdUnlink, OP_REQ_DEVLIST, OP_REQ_IMPORT, Stage1Header, Stage2Body,
    Stage2Header, USBIP_DIR_IN, USBIP_DIR_OUT, USBIP_VERSION,
};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Device id used in generated stage-2 frames
pub const TEST_DEVID: u32 = 0x0001_0001;

/// `URB_DIR_IN` as set by vhci_hcd on IN transfers
const URB_DIR_IN: u32 = 0x0200;

/// Stage-1 request header for `command`
pub fn create_stage1_request(command: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(Stage1Header::SIZE);
    let header = Stage1Header {
        version: USBIP_VERSION,
        command,
        status: 0,
    };
    header
        .write_to(&mut buf)
        .expect("writing a header into a Vec cannot fail");
    buf
}

/// `OP_REQ_DEVLIST` request
pub fn create_devlist_request() -> Vec<u8> {
    create_stage1_request(OP_REQ_DEVLIST)
}

/// `OP_REQ_IMPORT` request for `busid`
pub fn create_import_request(busid: &str) -> Vec<u8> {
    let mut buf = create_stage1_request(OP_REQ_IMPORT);
    let mut slot = [0u8; BUSID_SIZE];
    let len = busid.len().min(BUSID_SIZE - 1);
    slot[..len].copy_from_slice(&busid.as_bytes()[..len]);
    buf.extend_from_slice(&slot);
    buf
}

/// CMD_SUBMIT, direction OUT, carrying `payload`
pub fn create_submit_out(seqnum: u32, ep: u32, payload: &[u8]) -> Vec<u8> {
    let header = Stage2Header {
        seqnum,
        devid: TEST_DEVID,
        direction: USBIP_DIR_OUT,
        ep,
        body: Stage2Body::CmdSubmit(CmdSubmit {
            transfer_buffer_length: payload.len() as u32,
            ..CmdSubmit::default()
        }),
        setup: [0; 8],
    };
    let mut buf = header.encode().to_vec();
    buf.extend_from_slice(payload);
    buf
}

/// CMD_SUBMIT, direction IN, asking for up to 512 bytes
pub fn create_submit_in(seqnum: u32, ep: u32) -> Vec<u8> {
    let header = Stage2Header {
        seqnum,
        devid: TEST_DEVID,
        direction: USBIP_DIR_IN,
        ep,
        body: Stage2Body::CmdSubmit(CmdSubmit {
            transfer_flags: URB_DIR_IN,
            transfer_buffer_length: 512,
            ..CmdSubmit::default()
        }),
        setup: [0; 8],
    };
    header.encode().to_vec()
}

/// Control transfer on endpoint 0 with the given setup packet
pub fn create_control_request(seqnum: u32, setup: [u8; 8]) -> Vec<u8> {
    let length = u16::from_le_bytes([setup[6], setup[7]]) as u32;
    let direction = if setup[0] & 0x80 != 0 {
        USBIP_DIR_IN
    } else {
        USBIP_DIR_OUT
    };
    let header = Stage2Header {
        seqnum,
        devid: TEST_DEVID,
        direction,
        ep: 0,
        body: Stage2Body::CmdSubmit(CmdSubmit {
            transfer_buffer_length: length,
            ..CmdSubmit::default()
        }),
        setup,
    };
    header.encode().to_vec()
}

/// CMD_UNLINK for `unlink_seqnum`
pub fn create_unlink(seqnum: u32, unlink_seqnum: u32) -> Vec<u8> {
    let header = Stage2Header {
        seqnum,
        devid: TEST_DEVID,
        direction: USBIP_DIR_IN,
        ep: 1,
        body: Stage2Body::CmdUnlink(CmdUnlink {
            unlink_seqnum,
            ..CmdUnlink::default()
        }),
        setup: [0; 8],
    };
    header.encode().to_vec()
}

/// Create a setup packet
///
/// # Arguments
/// * `request_type` - bmRequestType
/// * `request` - bRequest
/// * `value` - wValue
/// * `index` - wIndex
/// * `length` - wLength
pub fn create_setup_packet(
    request_type: u8,
    request: u8,
    value: u16,
    index: u16,
    length: u16,
) -> [u8; 8] {
    [
        request_type,
        request,
        (value & 0xFF) as u8,
        ((value >> 8) & 0xFF) as u8,
        (index & 0xFF) as u8,
        ((index >> 8) & 0xFF) as u8,
        (length & 0xFF) as u8,
        ((length >> 8) & 0xFF) as u8,
    ]
}

/// Processor that replies with the request reversed
///
/// Request length is taken from the first byte (number of bytes that
/// follow), so zero padding in the queue item does not leak into replies.
#[derive(Debug, Default)]
pub struct ReverseProcessor;

impl CommandProcessor for ReverseProcessor {
    fn process_command(&mut self, request: &[u8], response: &mut [u8]) -> u32 {
        let len = (request[0] as usize + 1).min(request.len()).min(response.len());
        for (out, inp) in response.iter_mut().zip(request[..len].iter().rev()) {
            *out = *inp;
        }
        ((len as u32) << 16) | len as u32
    }
}

/// Processor that echoes the command byte and sleeps for `delay`
#[derive(Debug)]
pub struct SlowProcessor {
    pub delay: Duration,
}

impl CommandProcessor for SlowProcessor {
    fn process_command(&mut self, request: &[u8], response: &mut [u8]) -> u32 {
        std::thread::sleep(self.delay);
        response[0] = request[0];
        0x0001_0001
    }
}

/// Run an async operation with a timeout
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{Direction, USBIP_CMD_UNLINK};

    #[test]
    fn test_submit_out_carries_payload() {
        let frame = create_submit_out(3, 1, &[0x00, 0x01, 0x02]);
        assert_eq!(frame.len(), 48 + 3);

        let header = Stage2Header::decode(&frame).unwrap();
        assert_eq!(header.direction(), Direction::Out);
        assert_eq!(header.submit().unwrap().transfer_buffer_length, 3);
    }

    #[test]
    fn test_unlink_frame() {
        let header = Stage2Header::decode(&create_unlink(8, 7)).unwrap();
        assert_eq!(header.command(), USBIP_CMD_UNLINK);
    }

    #[test]
    fn test_stage1_request_header() {
        let frame = create_devlist_request();
        assert_eq!(frame.len(), Stage1Header::SIZE);

        let header = Stage1Header::decode(&frame).unwrap();
        assert_eq!(header.version, USBIP_VERSION);
        assert_eq!(header.command, OP_REQ_DEVLIST);
        assert_eq!(header.status, 0);
    }

    #[test]
    fn test_import_request_length() {
        assert_eq!(create_import_request("1-1").len(), 8 + BUSID_SIZE);
    }

    #[test]
    fn test_reverse_processor() {
        let mut request = [0u8; 16];
        request[..3].copy_from_slice(&[2, 0xAA, 0xBB]);
        let mut response = [0u8; 16];

        let result = ReverseProcessor.process_command(&request, &mut response);
        assert_eq!(result & 0xFFFF, 3);
        assert_eq!(&response[..3], &[0xBB, 0xAA, 2]);
    }
}
