//! Stage-1 handshake: device list and import
//!
//! Both replies describe the same single device, so they are serialised
//! once up front.

use crate::config::DeviceSettings;
use crate::network::session::SessionState;
use crate::usb::descriptors::{CONFIGURATION_VALUE, INTERFACE_CLASS_VENDOR};
use crate::usbip::UsbIpError;
use protocol::{BUSID_SIZE, DeviceRecord, InterfaceRecord, Stage1Command, Stage1Header};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Answers stage-1 requests for the exported device
#[derive(Debug, Clone)]
pub struct Stage1Handler {
    busid: String,
    devlist_reply: Vec<u8>,
    import_reply: Vec<u8>,
}

impl Stage1Handler {
    pub fn new(device: &DeviceRecord, interface: &InterfaceRecord) -> protocol::Result<Self> {
        let mut devlist_reply = Vec::with_capacity(
            Stage1Header::SIZE + 4 + DeviceRecord::SIZE + InterfaceRecord::SIZE,
        );
        Stage1Header::reply(Stage1Command::DeviceList, 0).write_to(&mut devlist_reply)?;
        devlist_reply.extend_from_slice(&1u32.to_be_bytes());
        device.write_to(&mut devlist_reply)?;
        interface.write_to(&mut devlist_reply)?;

        let mut import_reply = Vec::with_capacity(Stage1Header::SIZE + DeviceRecord::SIZE);
        Stage1Header::reply(Stage1Command::DeviceAttach, 0).write_to(&mut import_reply)?;
        device.write_to(&mut import_reply)?;

        Ok(Self {
            busid: device.busid.clone(),
            devlist_reply,
            import_reply,
        })
    }

    /// Handler for a CMSIS-DAP v2 probe described by `settings`
    pub fn from_settings(settings: &DeviceSettings) -> protocol::Result<Self> {
        let device = DeviceRecord {
            path: settings.path.clone(),
            busid: settings.busid.clone(),
            busnum: settings.busnum,
            devnum: settings.devnum,
            speed: settings.speed,
            vendor_id: settings.vendor_id,
            product_id: settings.product_id,
            bcd_device: settings.bcd_device,
            device_class: 0,
            device_subclass: 0,
            device_protocol: 0,
            configuration_value: CONFIGURATION_VALUE,
            num_configurations: 1,
            num_interfaces: 1,
        };
        let interface = InterfaceRecord {
            class: INTERFACE_CLASS_VENDOR,
            subclass: 0,
            protocol: 0,
        };
        Self::new(&device, &interface)
    }

    /// Handle one stage-1 request
    ///
    /// A successful import moves `state` to [`SessionState::Emulating`].
    pub async fn handle<W>(
        &self,
        buf: &[u8],
        state: &mut SessionState,
        writer: &mut W,
    ) -> Result<Stage1Command, UsbIpError>
    where
        W: AsyncWrite + Unpin,
    {
        let header = Stage1Header::decode(buf)?;
        let command = header
            .command_type()
            .ok_or(UsbIpError::UnknownStage1(header.command))?;

        match command {
            Stage1Command::DeviceList => {
                debug!("Handling device list request");
                writer.write_all(&self.devlist_reply).await?;
                writer.flush().await?;
            }
            Stage1Command::DeviceAttach => {
                let requested = buf
                    .get(Stage1Header::SIZE..Stage1Header::SIZE + BUSID_SIZE)
                    .ok_or(protocol::ProtocolError::BufferTooSmall {
                        needed: Stage1Header::SIZE + BUSID_SIZE,
                        available: buf.len(),
                    })?;
                let requested = busid_str(requested);
                if requested != self.busid {
                    warn!(
                        requested = %requested,
                        exported = %self.busid,
                        "Import for unknown bus id, attaching the exported device anyway"
                    );
                }

                *state = SessionState::AttachPending;
                writer.write_all(&self.import_reply).await?;
                writer.flush().await?;
                *state = SessionState::Emulating;

                info!(busid = %self.busid, "Device attached");
            }
        }

        Ok(command)
    }
}

/// Bus id up to the first NUL
fn busid_str(raw: &[u8]) -> String {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
