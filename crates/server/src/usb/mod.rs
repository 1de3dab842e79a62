//! Emulated USB device surface
//!
//! Everything the host sees below the USB/IP envelope apart from the DAP
//! command stream: descriptors, endpoint-0 control requests and the SWO
//! trace endpoint.

pub mod control;
pub mod descriptors;
pub mod trace;

pub use control::{ControlRequestHandler, StandardControlHandler};
pub use descriptors::{DescriptorProvider, DescriptorSet};
pub use trace::SwoTrace;
