//! Endpoint 0 control requests
//!
//! The dispatcher hands every endpoint-0 SUBMIT to a [`ControlRequestHandler`].
//! A `Some` reply is sent as the RET_SUBMIT data (an empty vector is a valid
//! zero-length acknowledgment); `None` leaves the request unanswered.

use crate::usb::descriptors::{
    DT_BOS, DT_CONFIGURATION, DT_DEVICE, DT_DEVICE_QUALIFIER, DT_ENDPOINT, DT_INTERFACE,
    DT_INTERFACE_POWER, DT_OTHER_SPEED_CONFIGURATION, DT_STRING, DescriptorProvider,
    MS_OS_20_DESCRIPTOR_INDEX, MS_OS_20_SET_ALT_ENUMERATION,
};
use protocol::SetupPacket;
use std::sync::Arc;
use tracing::{debug, warn};

pub const REQ_GET_STATUS: u8 = 0x00;
pub const REQ_CLEAR_FEATURE: u8 = 0x01;
pub const REQ_SET_FEATURE: u8 = 0x03;
pub const REQ_SET_ADDRESS: u8 = 0x05;
pub const REQ_GET_DESCRIPTOR: u8 = 0x06;
pub const REQ_SET_DESCRIPTOR: u8 = 0x07;
pub const REQ_GET_CONFIGURATION: u8 = 0x08;
pub const REQ_SET_CONFIGURATION: u8 = 0x09;
pub const REQ_GET_INTERFACE: u8 = 0x0A;
pub const REQ_SET_INTERFACE: u8 = 0x0B;
pub const REQ_SYNCH_FRAME: u8 = 0x0C;
/// HID class request
pub const REQ_SET_IDLE: u8 = 0x0A;

/// Host-to-device, standard, to device
const RT_OUT_DEVICE: u8 = 0x00;
const RT_OUT_INTERFACE: u8 = 0x01;
const RT_OUT_ENDPOINT: u8 = 0x02;
/// Device-to-host, standard, to device
const RT_IN_DEVICE: u8 = 0x80;
const RT_IN_INTERFACE: u8 = 0x81;
const RT_IN_ENDPOINT: u8 = 0x82;
/// Device-to-host, vendor, to device
const RT_IN_VENDOR_DEVICE: u8 = 0xC0;
/// Host-to-device, class, to interface
const RT_OUT_CLASS_INTERFACE: u8 = 0x21;

/// Answers control transfers on endpoint 0
///
/// Called synchronously from the network task.
pub trait ControlRequestHandler: Send {
    /// Reply data for `setup`, or `None` if the request is not handled
    fn handle(&mut self, setup: &SetupPacket) -> Option<Vec<u8>>;
}

/// Standard device requests plus the Microsoft OS 2.0 vendor request
pub struct StandardControlHandler<D: DescriptorProvider> {
    descriptors: Arc<D>,
}

impl<D: DescriptorProvider> StandardControlHandler<D> {
    pub fn new(descriptors: Arc<D>) -> Self {
        Self { descriptors }
    }

    fn get_descriptor(&self, setup: &SetupPacket) -> Option<Vec<u8>> {
        let descriptor_type = setup.descriptor_type();
        let index = setup.descriptor_index();

        match descriptor_type {
            DT_DEVICE | DT_CONFIGURATION | DT_STRING | DT_DEVICE_QUALIFIER | DT_BOS => {
                match self.descriptors.descriptor(descriptor_type, index) {
                    Some(data) => {
                        debug!(descriptor_type, index, len = data.len(), "GET_DESCRIPTOR");
                        Some(data.to_vec())
                    }
                    None => {
                        debug!(descriptor_type, index, "GET_DESCRIPTOR: not available");
                        Some(Vec::new())
                    }
                }
            }
            DT_INTERFACE | DT_ENDPOINT | DT_OTHER_SPEED_CONFIGURATION | DT_INTERFACE_POWER => {
                debug!(descriptor_type, "GET_DESCRIPTOR: not implemented, empty reply");
                Some(Vec::new())
            }
            _ => {
                warn!(descriptor_type, index, "Unknown descriptor requested");
                None
            }
        }
    }

    fn vendor_request(&self, setup: &SetupPacket) -> Option<Vec<u8>> {
        match setup.index {
            MS_OS_20_DESCRIPTOR_INDEX => {
                debug!("GET MS OS 2.0 descriptor set");
                Some(self.descriptors.ms_os_20_descriptor_set().to_vec())
            }
            MS_OS_20_SET_ALT_ENUMERATION => {
                warn!("Host requested MS OS 2.0 alternate enumeration, ignoring");
                None
            }
            index => {
                warn!(request = setup.request, index, "Unknown vendor request");
                None
            }
        }
    }

    fn dispatch(&self, setup: &SetupPacket) -> Option<Vec<u8>> {
        match (setup.request_type, setup.request) {
            (
                RT_OUT_DEVICE,
                REQ_CLEAR_FEATURE | REQ_SET_FEATURE | REQ_SET_ADDRESS | REQ_SET_DESCRIPTOR
                | REQ_SET_CONFIGURATION,
            )
            | (RT_OUT_INTERFACE, REQ_CLEAR_FEATURE | REQ_SET_FEATURE | REQ_SET_INTERFACE)
            | (RT_OUT_ENDPOINT, REQ_CLEAR_FEATURE | REQ_SET_FEATURE)
            | (RT_OUT_CLASS_INTERFACE, REQ_SET_IDLE)
            | (RT_IN_INTERFACE, REQ_SYNCH_FRAME) => {
                debug!(
                    request_type = setup.request_type,
                    request = setup.request,
                    value = setup.value,
                    "Acknowledged control request"
                );
                Some(Vec::new())
            }
            (RT_IN_DEVICE | RT_IN_INTERFACE | RT_IN_ENDPOINT, REQ_GET_STATUS) => Some(vec![0, 0]),
            (RT_IN_DEVICE, REQ_GET_DESCRIPTOR) => self.get_descriptor(setup),
            (RT_IN_DEVICE, REQ_GET_CONFIGURATION) => {
                Some(vec![self.descriptors.configuration_value()])
            }
            (RT_IN_INTERFACE, REQ_GET_INTERFACE) => Some(vec![0]),
            (RT_IN_VENDOR_DEVICE, _) => self.vendor_request(setup),
            (request_type, request) => {
                warn!(request_type, request, "Unknown control request");
                None
            }
        }
    }
}

impl<D: DescriptorProvider> ControlRequestHandler for StandardControlHandler<D> {
    fn handle(&mut self, setup: &SetupPacket) -> Option<Vec<u8>> {
        let mut reply = self.dispatch(setup)?;
        reply.truncate(setup.length as usize);
        Some(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceSettings;
    use crate::usb::descriptors::DescriptorSet;

    fn handler() -> StandardControlHandler<DescriptorSet> {
        StandardControlHandler::new(Arc::new(DescriptorSet::new(&DeviceSettings::default())))
    }

    fn setup(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> SetupPacket {
        SetupPacket {
            request_type,
            request,
            value,
            index,
            length,
        }
    }

    #[test]
    fn test_device_descriptor_truncated_to_length() {
        let mut handler = handler();

        let full = handler
            .handle(&setup(RT_IN_DEVICE, REQ_GET_DESCRIPTOR, 0x0100, 0, 64))
            .unwrap();
        assert_eq!(full.len(), 18);

        let short = handler
            .handle(&setup(RT_IN_DEVICE, REQ_GET_DESCRIPTOR, 0x0100, 0, 8))
            .unwrap();
        assert_eq!(short, full[..8]);
    }

    #[test]
    fn test_configuration_header_then_full() {
        let mut handler = handler();

        let header = handler
            .handle(&setup(RT_IN_DEVICE, REQ_GET_DESCRIPTOR, 0x0200, 0, 9))
            .unwrap();
        assert_eq!(header.len(), 9);
        let total = u16::from_le_bytes([header[2], header[3]]);

        let full = handler
            .handle(&setup(RT_IN_DEVICE, REQ_GET_DESCRIPTOR, 0x0200, 0, total))
            .unwrap();
        assert_eq!(full.len(), total as usize);
    }

    #[test]
    fn test_unknown_string_index_gets_empty_reply() {
        let mut handler = handler();
        let reply = handler
            .handle(&setup(RT_IN_DEVICE, REQ_GET_DESCRIPTOR, 0x03EE, 0x0409, 255))
            .unwrap();
        assert!(reply.is_empty());

        let reply = handler
            .handle(&setup(RT_IN_DEVICE, REQ_GET_DESCRIPTOR, 0x0309, 0x0409, 255))
            .unwrap();
        assert!(reply.is_empty());
    }

    #[test]
    fn test_standard_set_requests_acknowledged() {
        let mut handler = handler();
        for (request_type, request) in [
            (RT_OUT_DEVICE, REQ_SET_ADDRESS),
            (RT_OUT_DEVICE, REQ_SET_CONFIGURATION),
            (RT_OUT_INTERFACE, REQ_SET_INTERFACE),
            (RT_OUT_ENDPOINT, REQ_CLEAR_FEATURE),
            (RT_OUT_CLASS_INTERFACE, REQ_SET_IDLE),
        ] {
            let reply = handler.handle(&setup(request_type, request, 1, 0, 0));
            assert_eq!(reply, Some(Vec::new()));
        }
    }

    #[test]
    fn test_status_and_configuration() {
        let mut handler = handler();
        assert_eq!(
            handler.handle(&setup(RT_IN_DEVICE, REQ_GET_STATUS, 0, 0, 2)),
            Some(vec![0, 0])
        );
        assert_eq!(
            handler.handle(&setup(RT_IN_DEVICE, REQ_GET_CONFIGURATION, 0, 0, 1)),
            Some(vec![1])
        );
        assert_eq!(
            handler.handle(&setup(RT_IN_INTERFACE, REQ_GET_INTERFACE, 0, 0, 1)),
            Some(vec![0])
        );
    }

    #[test]
    fn test_ms_os_20_vendor_request() {
        let mut handler = handler();
        let set = handler
            .handle(&setup(RT_IN_VENDOR_DEVICE, 0x01, 0, MS_OS_20_DESCRIPTOR_INDEX, 0x00A2))
            .unwrap();
        assert_eq!(set.len(), 162);

        assert!(
            handler
                .handle(&setup(RT_IN_VENDOR_DEVICE, 0x01, 0, MS_OS_20_SET_ALT_ENUMERATION, 0))
                .is_none()
        );
    }

    #[test]
    fn test_unknown_request_unhandled() {
        let mut handler = handler();
        assert!(handler.handle(&setup(0x40, 0x42, 0, 0, 0)).is_none());
        assert!(
            handler
                .handle(&setup(RT_IN_DEVICE, REQ_GET_DESCRIPTOR, 0x2200, 0, 64))
                .is_none()
        );
    }
}
