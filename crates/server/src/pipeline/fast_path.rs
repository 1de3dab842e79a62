//! Raw-frame recognition for endpoint-1 IN polls
//!
//! Debuggers poll the DAP response endpoint continuously, so these frames
//! are matched on the wire bytes before any decoding. Only the low byte of
//! the command, direction and endpoint words is inspected.

use protocol::{STAGE2_HEADER_SIZE, USBIP_CMD_SUBMIT, USBIP_DIR_IN, USBIP_RET_SUBMIT, offsets};

/// Endpoint the DAP response is polled on
pub const DAP_IN_ENDPOINT: u8 = 1;

/// Whether `raw` is a bare CMD_SUBMIT IN on endpoint 1
pub fn is_poll_frame(raw: &[u8]) -> bool {
    raw.len() == STAGE2_HEADER_SIZE
        && raw[offsets::COMMAND_LSB] == USBIP_CMD_SUBMIT as u8
        && raw[offsets::DIRECTION_LSB] == USBIP_DIR_IN as u8
        && raw[offsets::EP_LSB] == DAP_IN_ENDPOINT
}

/// Rewrite a poll frame in place into an empty RET_SUBMIT
///
/// seqnum, devid, endpoint and the setup block stay as received.
pub fn patch_empty_reply(raw: &mut [u8]) {
    raw[offsets::COMMAND_LSB] = USBIP_RET_SUBMIT as u8;
    raw[offsets::DIRECTION_LSB] = 0;
    raw[offsets::STATUS].fill(0);
    raw[offsets::ACTUAL_LENGTH].fill(0);
    raw[offsets::ERROR_COUNT].fill(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{create_submit_in, create_submit_out};
    use protocol::{Direction, RetSubmit, Stage2Body, Stage2Header};

    #[test]
    fn test_recognizes_poll() {
        assert!(is_poll_frame(&create_submit_in(1, 1)));
    }

    #[test]
    fn test_rejects_other_frames() {
        assert!(!is_poll_frame(&create_submit_in(1, 2)));
        assert!(!is_poll_frame(&create_submit_out(1, 1, &[0x00, 0x01])));

        // Header-only OUT on ep1
        assert!(!is_poll_frame(&create_submit_out(1, 1, &[])));

        let mut longer = create_submit_in(1, 1);
        longer.push(0);
        assert!(!is_poll_frame(&longer));
        assert!(!is_poll_frame(&longer[..47]));
    }

    #[test]
    fn test_patch_produces_empty_ret_submit() {
        let mut raw = create_submit_in(77, 1);
        patch_empty_reply(&mut raw);

        let reply = Stage2Header::decode(&raw).unwrap();
        assert_eq!(reply.seqnum, 77);
        assert_eq!(reply.ep, 1);
        assert_eq!(reply.direction(), Direction::Out);
        assert_eq!(
            reply.body,
            Stage2Body::RetSubmit(RetSubmit {
                status: 0,
                actual_length: 0,
                start_frame: 0,
                number_of_packets: 0,
                error_count: 0,
            })
        );
    }
}
