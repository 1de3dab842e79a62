//! USB/IP request handling
//!
//! - [`stage1`]: device list and import handshake
//! - [`dispatcher`]: stage-2 routing by endpoint and direction
//! - [`framer`]: serialisation of `RET_SUBMIT` / `RET_UNLINK` replies

pub mod dispatcher;
pub mod framer;
pub mod stage1;

pub use dispatcher::{EndpointDispatcher, Outcome};
pub use stage1::Stage1Handler;

use protocol::ProtocolError;
use thiserror::Error;

/// Failure while handling one USB/IP request
///
/// Only [`UsbIpError::is_fatal`] errors end the session; everything else
/// drops the offending request and keeps reading.
#[derive(Debug, Error)]
pub enum UsbIpError {
    #[error("Malformed request: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Unrecognized stage-1 command {0:#06x}")]
    UnknownStage1(u16),

    #[error("Unknown stage-2 command {0:#x}")]
    UnknownStage2(u32),

    #[error("Invalid endpoint {0}")]
    InvalidEndpoint(u32),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UsbIpError {
    /// Whether the connection can no longer be used
    pub fn is_fatal(&self) -> bool {
        matches!(self, UsbIpError::Pipeline(_) | UsbIpError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(UsbIpError::Io(std::io::Error::other("reset")).is_fatal());
        assert!(UsbIpError::Pipeline(common::Error::WorkerStopped).is_fatal());
        assert!(!UsbIpError::InvalidEndpoint(5).is_fatal());
        assert!(!UsbIpError::UnknownStage1(0x8009).is_fatal());
    }
}
