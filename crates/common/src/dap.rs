//! Debug-probe command interpreter boundary
//!
//! The worker thread hands every request packet to a [`CommandProcessor`]
//! and ships whatever it writes back to the host. The processor follows the
//! CMSIS-DAP firmware convention for its return value: the low 16 bits are
//! the number of response bytes written, the high 16 bits the number of
//! request bytes consumed.

/// `DAP_Info`
pub const ID_DAP_INFO: u8 = 0x00;
/// `DAP_HostStatus`
pub const ID_DAP_HOST_STATUS: u8 = 0x01;
/// `DAP_QueueCommands`
pub const ID_DAP_QUEUE_COMMANDS: u8 = 0x7E;
/// `DAP_ExecuteCommands`
pub const ID_DAP_EXECUTE_COMMANDS: u8 = 0x7F;
/// Reply for unsupported commands
pub const ID_DAP_INVALID: u8 = 0xFF;

/// Executes one probe command packet
///
/// Called synchronously from the worker thread. Implementations must not
/// block for long: the host is polling for the reply.
pub trait CommandProcessor: Send + 'static {
    /// Process `request` and write the reply into `response`
    ///
    /// Returns `(consumed << 16) | written`.
    fn process_command(&mut self, request: &[u8], response: &mut [u8]) -> u32;
}

impl<F> CommandProcessor for F
where
    F: FnMut(&[u8], &mut [u8]) -> u32 + Send + 'static,
{
    fn process_command(&mut self, request: &[u8], response: &mut [u8]) -> u32 {
        self(request, response)
    }
}

/// Length of the reply encoded in a result word
pub fn response_len(result: u32) -> usize {
    (result & 0xFFFF) as usize
}
