//! USB descriptor tables for a CMSIS-DAP v2 probe
//!
//! One configuration with a single vendor-class interface and three bulk
//! endpoints:
//!
//! | Address | Use                 |
//! |---------|---------------------|
//! | 0x01    | DAP command OUT     |
//! | 0x81    | DAP response IN     |
//! | 0x82    | SWO trace IN        |
//!
//! Windows binds WinUSB through the Microsoft OS 2.0 descriptor set
//! advertised in the BOS descriptor, so no INF file is needed.

use crate::config::DeviceSettings;
use bytes::BufMut;

pub const DT_DEVICE: u8 = 0x01;
pub const DT_CONFIGURATION: u8 = 0x02;
pub const DT_STRING: u8 = 0x03;
pub const DT_INTERFACE: u8 = 0x04;
pub const DT_ENDPOINT: u8 = 0x05;
pub const DT_DEVICE_QUALIFIER: u8 = 0x06;
pub const DT_OTHER_SPEED_CONFIGURATION: u8 = 0x07;
pub const DT_INTERFACE_POWER: u8 = 0x08;
pub const DT_BOS: u8 = 0x0F;
const DT_DEVICE_CAPABILITY: u8 = 0x10;

const CAP_USB2_EXTENSION: u8 = 0x02;
const CAP_PLATFORM: u8 = 0x05;

/// Endpoint 0 max packet size
pub const CONTROL_MAX_PACKET: u8 = 64;
/// Bulk max packet size at high speed
pub const BULK_MAX_PACKET: u16 = 512;

pub const EP_DAP_OUT: u8 = 0x01;
pub const EP_DAP_IN: u8 = 0x81;
pub const EP_SWO_IN: u8 = 0x82;

pub const INTERFACE_CLASS_VENDOR: u8 = 0xFF;
pub const CONFIGURATION_VALUE: u8 = 1;

pub const STRING_MANUFACTURER: u8 = 1;
pub const STRING_PRODUCT: u8 = 2;
pub const STRING_SERIAL: u8 = 3;
/// Microsoft OS 1.0 string index; never answered
pub const STRING_MS_OS: u8 = 0xEE;

/// US English
const LANGUAGE_ID: u16 = 0x0409;

/// `bRequest` the host uses to fetch the MS OS 2.0 descriptor set
pub const MS_OS_20_VENDOR_CODE: u8 = 0x01;
/// `wIndex` of a MS OS 2.0 descriptor set request
pub const MS_OS_20_DESCRIPTOR_INDEX: u16 = 0x07;
/// `wIndex` of a MS OS 2.0 set alternate enumeration request
pub const MS_OS_20_SET_ALT_ENUMERATION: u16 = 0x08;

/// Windows 8.1 (NTDDI_WINBLUE)
const MS_OS_20_WINDOWS_VERSION: u32 = 0x0603_0000;

const MS_OS_20_SET_HEADER_DESCRIPTOR: u16 = 0x00;
const MS_OS_20_FEATURE_COMPATIBLE_ID: u16 = 0x03;
const MS_OS_20_FEATURE_REG_PROPERTY: u16 = 0x04;
const REG_MULTI_SZ: u16 = 0x07;

/// D8DD60DF-4589-4CC7-9CD2-659D9E648A9F in wire order
const MS_OS_20_PLATFORM_UUID: [u8; 16] = [
    0xDF, 0x60, 0xDD, 0xD8, 0x89, 0x45, 0xC7, 0x4C, 0x9C, 0xD2, 0x65, 0x9D, 0x9E, 0x64, 0x8A, 0x9F,
];

/// Interface GUID that identifies a CMSIS-DAP v2 interface
pub const CMSIS_DAP_V2_GUID: &str = "{CDB3B5AD-293B-4663-AA36-1AAE46463776}";

/// Source of descriptor bytes for the control handler
pub trait DescriptorProvider: Send + Sync {
    /// Descriptor of `descriptor_type` at `index`, if the device has one
    fn descriptor(&self, descriptor_type: u8, index: u8) -> Option<&[u8]>;

    /// Microsoft OS 2.0 descriptor set
    fn ms_os_20_descriptor_set(&self) -> &[u8];

    /// Value reported by GET_CONFIGURATION
    fn configuration_value(&self) -> u8 {
        CONFIGURATION_VALUE
    }
}

/// Precomputed descriptors for one device
#[derive(Debug, Clone)]
pub struct DescriptorSet {
    device: Vec<u8>,
    configuration: Vec<u8>,
    /// Index 0 is the language table
    strings: Vec<Vec<u8>>,
    qualifier: Vec<u8>,
    bos: Vec<u8>,
    ms_os_20: Vec<u8>,
}

impl DescriptorSet {
    pub fn new(device: &DeviceSettings) -> Self {
        let mut language = Vec::with_capacity(4);
        language.put_u8(4);
        language.put_u8(DT_STRING);
        language.put_u16_le(LANGUAGE_ID);

        let ms_os_20 = build_ms_os_20_set();

        Self {
            device: build_device(device),
            configuration: build_configuration(),
            strings: vec![
                language,
                string_descriptor(&device.manufacturer),
                string_descriptor(&device.product),
                string_descriptor(&device.serial),
            ],
            qualifier: build_qualifier(),
            bos: build_bos(ms_os_20.len() as u16),
            ms_os_20,
        }
    }
}

impl DescriptorProvider for DescriptorSet {
    fn descriptor(&self, descriptor_type: u8, index: u8) -> Option<&[u8]> {
        match descriptor_type {
            DT_DEVICE => Some(&self.device),
            DT_CONFIGURATION if index == 0 => Some(&self.configuration),
            DT_STRING if index != STRING_MS_OS => {
                self.strings.get(index as usize).map(Vec::as_slice)
            }
            DT_DEVICE_QUALIFIER => Some(&self.qualifier),
            DT_BOS => Some(&self.bos),
            _ => None,
        }
    }

    fn ms_os_20_descriptor_set(&self) -> &[u8] {
        &self.ms_os_20
    }
}

fn build_device(device: &DeviceSettings) -> Vec<u8> {
    let mut buf = Vec::with_capacity(18);
    buf.put_u8(18);
    buf.put_u8(DT_DEVICE);
    buf.put_u16_le(0x0210); // bcdUSB 2.1 so the host asks for BOS
    buf.put_u8(0x00); // class defined per interface
    buf.put_u8(0x00);
    buf.put_u8(0x00);
    buf.put_u8(CONTROL_MAX_PACKET);
    buf.put_u16_le(device.vendor_id);
    buf.put_u16_le(device.product_id);
    buf.put_u16_le(device.bcd_device);
    buf.put_u8(STRING_MANUFACTURER);
    buf.put_u8(STRING_PRODUCT);
    buf.put_u8(STRING_SERIAL);
    buf.put_u8(1); // bNumConfigurations
    buf
}

fn build_configuration() -> Vec<u8> {
    let endpoints = [EP_DAP_OUT, EP_DAP_IN, EP_SWO_IN];
    let total_len = 9 + 9 + 7 * endpoints.len();

    let mut buf = Vec::with_capacity(total_len);
    buf.put_u8(9);
    buf.put_u8(DT_CONFIGURATION);
    buf.put_u16_le(total_len as u16);
    buf.put_u8(1); // bNumInterfaces
    buf.put_u8(CONFIGURATION_VALUE);
    buf.put_u8(0); // iConfiguration
    buf.put_u8(0x80); // bus powered
    buf.put_u8(0x32); // 100 mA

    buf.put_u8(9);
    buf.put_u8(DT_INTERFACE);
    buf.put_u8(0); // bInterfaceNumber
    buf.put_u8(0); // bAlternateSetting
    buf.put_u8(endpoints.len() as u8);
    buf.put_u8(INTERFACE_CLASS_VENDOR);
    buf.put_u8(0x00);
    buf.put_u8(0x00);
    // Debuggers look for "CMSIS-DAP" in the interface string
    buf.put_u8(STRING_PRODUCT);

    for address in endpoints {
        buf.put_u8(7);
        buf.put_u8(DT_ENDPOINT);
        buf.put_u8(address);
        buf.put_u8(0x02); // bulk
        buf.put_u16_le(BULK_MAX_PACKET);
        buf.put_u8(0);
    }

    buf
}

fn build_qualifier() -> Vec<u8> {
    vec![
        10,
        DT_DEVICE_QUALIFIER,
        0x00,
        0x02,
        0x00,
        0x00,
        0x00,
        CONTROL_MAX_PACKET,
        1,
        0,
    ]
}

fn build_bos(ms_os_20_len: u16) -> Vec<u8> {
    let mut caps = Vec::new();

    // USB 2.0 extension, LPM supported
    caps.put_u8(7);
    caps.put_u8(DT_DEVICE_CAPABILITY);
    caps.put_u8(CAP_USB2_EXTENSION);
    caps.put_u32_le(0x0000_0002);

    // Microsoft OS 2.0 platform capability
    caps.put_u8(28);
    caps.put_u8(DT_DEVICE_CAPABILITY);
    caps.put_u8(CAP_PLATFORM);
    caps.put_u8(0);
    caps.put_slice(&MS_OS_20_PLATFORM_UUID);
    caps.put_u32_le(MS_OS_20_WINDOWS_VERSION);
    caps.put_u16_le(ms_os_20_len);
    caps.put_u8(MS_OS_20_VENDOR_CODE);
    caps.put_u8(0); // bAltEnumCode

    let mut buf = Vec::with_capacity(5 + caps.len());
    buf.put_u8(5);
    buf.put_u8(DT_BOS);
    buf.put_u16_le((5 + caps.len()) as u16);
    buf.put_u8(2); // bNumDeviceCaps
    buf.put_slice(&caps);
    buf
}

fn build_ms_os_20_set() -> Vec<u8> {
    let name = utf16z("DeviceInterfaceGUIDs");
    // REG_MULTI_SZ ends with an extra terminator
    let mut data = utf16z(CMSIS_DAP_V2_GUID);
    data.put_u16_le(0);

    let property_len = 10 + name.len() + data.len();
    let total_len = 10 + 20 + property_len;

    let mut buf = Vec::with_capacity(total_len);

    buf.put_u16_le(10);
    buf.put_u16_le(MS_OS_20_SET_HEADER_DESCRIPTOR);
    buf.put_u32_le(MS_OS_20_WINDOWS_VERSION);
    buf.put_u16_le(total_len as u16);

    buf.put_u16_le(20);
    buf.put_u16_le(MS_OS_20_FEATURE_COMPATIBLE_ID);
    buf.put_slice(b"WINUSB\0\0");
    buf.put_bytes(0, 8); // subCompatibleID

    buf.put_u16_le(property_len as u16);
    buf.put_u16_le(MS_OS_20_FEATURE_REG_PROPERTY);
    buf.put_u16_le(REG_MULTI_SZ);
    buf.put_u16_le(name.len() as u16);
    buf.put_slice(&name);
    buf.put_u16_le(data.len() as u16);
    buf.put_slice(&data);

    buf
}

/// USB string descriptor (UTF-16LE, no terminator)
fn string_descriptor(text: &str) -> Vec<u8> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let mut buf = Vec::with_capacity(2 + units.len() * 2);
    buf.put_u8((2 + units.len() * 2) as u8);
    buf.put_u8(DT_STRING);
    for unit in units {
        buf.put_u16_le(unit);
    }
    buf
}

/// NUL-terminated UTF-16LE
fn utf16z(text: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    for unit in text.encode_utf16() {
        buf.put_u16_le(unit);
    }
    buf.put_u16_le(0);
    buf
}
