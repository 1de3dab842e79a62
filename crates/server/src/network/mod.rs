//! Network subsystem
//!
//! TCP accept loop and per-connection sessions.
//!
//! # Architecture
//!
//! ```text
//! UsbIpServer
//!   ├─> accept one connection
//!   ├─> restart the command pipeline
//!   └─> run a Session until the client disconnects
//!         ├─> DETACHED: stage-1 requests (device list, import)
//!         └─> EMULATING: stage-2 requests via EndpointDispatcher
//! ```

pub mod server;
pub mod session;

pub use server::UsbIpServer;
pub use session::{Session, SessionState};
