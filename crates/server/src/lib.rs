//! USB/IP server exporting a CMSIS-DAP debug probe
//!
//! A host attaches the probe with `usbip attach -r <addr> -b 1-1` and sees a
//! high-speed CMSIS-DAP v2 device. DAP command packets arriving on endpoint 1
//! are executed on a dedicated worker thread; endpoint-1 IN polls are
//! answered from the worker's response queue in order.
//!
//! # Modules
//!
//! - [`network`]: TCP accept loop and per-connection sessions
//! - [`usbip`]: stage-1 handshake, stage-2 routing, reply framing
//! - [`pipeline`]: request/response queues and the DAP worker thread
//! - [`usb`]: descriptors, endpoint-0 control requests, SWO trace
//! - [`dap`]: built-in command processor
//! - [`config`]: TOML configuration

pub mod config;
pub mod dap;
pub mod network;
pub mod pipeline;
pub mod usb;
pub mod usbip;

pub use config::ServerConfig;
pub use dap::InfoProcessor;
pub use network::UsbIpServer;
pub use pipeline::{CommandPipeline, spawn_dap_worker};
