//! Built-in command processor for running without probe hardware
//!
//! Answers the identification commands a debugger sends while probing a
//! CMSIS-DAP device so the probe enumerates and can be inspected. Every
//! command that would touch a target replies `DAP_Invalid`.

use crate::config::DeviceSettings;
use common::dap::{
    ID_DAP_EXECUTE_COMMANDS, ID_DAP_HOST_STATUS, ID_DAP_INFO, ID_DAP_INVALID,
    ID_DAP_QUEUE_COMMANDS,
};
use common::{CommandProcessor, DAP_PACKET_SIZE};
use tracing::debug;

const DAP_OK: u8 = 0x00;

/// CMSIS-DAP protocol version reported by `DAP_Info`
pub const DAP_PROTOCOL_VERSION: &str = "2.1.0";

/// `DAP_Info` identifiers
pub mod info_id {
    pub const VENDOR: u8 = 0x01;
    pub const PRODUCT: u8 = 0x02;
    pub const SERIAL_NUMBER: u8 = 0x03;
    pub const PROTOCOL_VERSION: u8 = 0x04;
    pub const TARGET_DEVICE_VENDOR: u8 = 0x05;
    pub const TARGET_DEVICE_NAME: u8 = 0x06;
    pub const TARGET_BOARD_VENDOR: u8 = 0x07;
    pub const TARGET_BOARD_NAME: u8 = 0x08;
    pub const FIRMWARE_VERSION: u8 = 0x09;
    pub const CAPABILITIES: u8 = 0xF0;
    pub const PACKET_COUNT: u8 = 0xFE;
    pub const PACKET_SIZE: u8 = 0xFF;
}

/// Capabilities byte: SWD supported
const CAPABILITY_SWD: u8 = 0x01;

/// Answers `DAP_Info`, `DAP_HostStatus` and `DAP_ExecuteCommands`
#[derive(Debug, Clone)]
pub struct InfoProcessor {
    vendor: String,
    product: String,
    serial: String,
    packet_count: u8,
}

impl InfoProcessor {
    pub fn new(device: &DeviceSettings, queue_depth: usize) -> Self {
        Self {
            vendor: device.manufacturer.clone(),
            product: device.product.clone(),
            serial: device.serial.clone(),
            packet_count: queue_depth.min(u8::MAX as usize) as u8,
        }
    }

    /// Execute one command at the start of `request`
    ///
    /// Returns (request bytes consumed, response bytes written).
    fn execute(&self, request: &[u8], response: &mut [u8]) -> (usize, usize) {
        let Some(&command) = request.first() else {
            return (0, 0);
        };
        if response.is_empty() {
            return (1, 0);
        }

        match command {
            ID_DAP_INFO => {
                let id = request.get(1).copied().unwrap_or_default();
                (2, self.info(id, response))
            }
            ID_DAP_HOST_STATUS => {
                response[0] = ID_DAP_HOST_STATUS;
                if response.len() < 2 {
                    return (3, 1);
                }
                response[1] = DAP_OK;
                (3, 2)
            }
            ID_DAP_EXECUTE_COMMANDS | ID_DAP_QUEUE_COMMANDS => self.execute_batch(request, response),
            other => {
                debug!(command = other, "Unsupported DAP command");
                response[0] = ID_DAP_INVALID;
                (1, 1)
            }
        }
    }

    fn execute_batch(&self, request: &[u8], response: &mut [u8]) -> (usize, usize) {
        if response.len() < 2 {
            response[0] = ID_DAP_INVALID;
            return (1, 1);
        }

        let count = request.get(1).copied().unwrap_or_default();
        response[0] = ID_DAP_EXECUTE_COMMANDS;
        response[1] = count;

        let mut consumed = 2;
        let mut written = 2;
        for _ in 0..count {
            let rest = request.get(consumed..).unwrap_or_default();
            if rest.is_empty() || written >= response.len() {
                break;
            }
            let (used, produced) = self.execute(rest, &mut response[written..]);
            consumed += used;
            written += produced;
            if rest[0] != ID_DAP_INFO && rest[0] != ID_DAP_HOST_STATUS {
                // Unknown command length, nothing after it can be parsed
                break;
            }
        }

        (consumed, written)
    }

    fn info(&self, id: u8, response: &mut [u8]) -> usize {
        response[0] = ID_DAP_INFO;
        let value: Vec<u8> = match id {
            info_id::VENDOR => nul_terminated(&self.vendor),
            info_id::PRODUCT => nul_terminated(&self.product),
            info_id::SERIAL_NUMBER => nul_terminated(&self.serial),
            info_id::PROTOCOL_VERSION => nul_terminated(DAP_PROTOCOL_VERSION),
            info_id::FIRMWARE_VERSION => nul_terminated(env!("CARGO_PKG_VERSION")),
            info_id::TARGET_DEVICE_VENDOR
            | info_id::TARGET_DEVICE_NAME
            | info_id::TARGET_BOARD_VENDOR
            | info_id::TARGET_BOARD_NAME => Vec::new(),
            info_id::CAPABILITIES => vec![CAPABILITY_SWD],
            info_id::PACKET_COUNT => vec![self.packet_count],
            info_id::PACKET_SIZE => (DAP_PACKET_SIZE as u16).to_le_bytes().to_vec(),
            other => {
                debug!(id = other, "Unsupported DAP_Info id");
                Vec::new()
            }
        };

        let len = value.len().min(response.len().saturating_sub(2)).min(u8::MAX as usize);
        if response.len() < 2 {
            return 1;
        }
        response[1] = len as u8;
        response[2..2 + len].copy_from_slice(&value[..len]);
        2 + len
    }
}

impl CommandProcessor for InfoProcessor {
    fn process_command(&mut self, request: &[u8], response: &mut [u8]) -> u32 {
        let (consumed, written) = self.execute(request, response);
        ((consumed as u32) << 16) | (written as u32 & 0xFFFF)
    }
}

fn nul_terminated(text: &str) -> Vec<u8> {
    let mut value = text.as_bytes().to_vec();
    value.push(0);
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::dap::response_len;

    fn processor() -> InfoProcessor {
        InfoProcessor::new(&DeviceSettings::default(), 20)
    }

    fn run(request: &[u8]) -> Vec<u8> {
        let mut padded = [0u8; DAP_PACKET_SIZE];
        padded[..request.len()].copy_from_slice(request);
        let mut response = [0u8; DAP_PACKET_SIZE];
        let result = processor().process_command(&padded, &mut response);
        response[..response_len(result)].to_vec()
    }

    #[test]
    fn test_info_product_string() {
        let reply = run(&[ID_DAP_INFO, info_id::PRODUCT]);
        assert_eq!(reply[0], ID_DAP_INFO);
        assert_eq!(reply[1] as usize, "Wireless CMSIS-DAP".len() + 1);
        assert_eq!(&reply[2..reply.len() - 1], b"Wireless CMSIS-DAP");
        assert_eq!(reply[reply.len() - 1], 0);
    }

    #[test]
    fn test_info_packet_geometry() {
        assert_eq!(run(&[ID_DAP_INFO, info_id::PACKET_SIZE]), vec![0x00, 2, 0x00, 0x02]);
        assert_eq!(run(&[ID_DAP_INFO, info_id::PACKET_COUNT]), vec![0x00, 1, 20]);
    }

    #[test]
    fn test_unknown_info_id_is_empty() {
        assert_eq!(run(&[ID_DAP_INFO, 0x42]), vec![0x00, 0]);
    }

    #[test]
    fn test_host_status() {
        assert_eq!(run(&[ID_DAP_HOST_STATUS, 0x00, 0x01]), vec![ID_DAP_HOST_STATUS, DAP_OK]);
    }

    #[test]
    fn test_unsupported_command() {
        assert_eq!(run(&[0x02, 0x01]), vec![ID_DAP_INVALID]);
    }

    #[test]
    fn test_execute_commands_nested() {
        let reply = run(&[
            ID_DAP_EXECUTE_COMMANDS,
            2,
            ID_DAP_INFO,
            info_id::CAPABILITIES,
            ID_DAP_HOST_STATUS,
            0x00,
            0x01,
        ]);
        assert_eq!(
            reply,
            vec![
                ID_DAP_EXECUTE_COMMANDS,
                2,
                ID_DAP_INFO,
                1,
                CAPABILITY_SWD,
                ID_DAP_HOST_STATUS,
                DAP_OK
            ]
        );
    }

    #[test]
    fn test_result_word_reports_consumed() {
        let mut response = [0u8; DAP_PACKET_SIZE];
        let result = processor().process_command(&[ID_DAP_INFO, info_id::PACKET_COUNT], &mut response);
        assert_eq!(result >> 16, 2);
        assert_eq!(result & 0xFFFF, 3);
    }
}
