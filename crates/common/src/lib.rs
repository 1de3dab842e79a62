//! Common utilities for usbip-dap
//!
//! This crate provides functionality shared by the network-facing side and
//! the DAP worker thread: the bounded request/response queue pair, the
//! command interpreter boundary, error handling, logging setup and pipeline
//! statistics.

pub mod channel;
pub mod dap;
pub mod error;
pub mod logging;
pub mod metrics;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use channel::{
    DAP_PACKET_SIZE, DEFAULT_QUEUE_DEPTH, DapBridge, DapWorker, RequestItem, ResponseItem,
    create_dap_bridge,
};
pub use dap::CommandProcessor;
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use metrics::{PipelineStats, PipelineStatsSnapshot};
