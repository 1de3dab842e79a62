//! Server configuration management

use anyhow::{Context, Result, anyhow};
use protocol::{BUSID_SIZE, DEVICE_PATH_SIZE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest string that still fits a USB string descriptor (255 bytes)
const MAX_DESCRIPTOR_STRING_UNITS: usize = 126;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server: ServerSettings,
    /// Exported device identity
    #[serde(default)]
    pub device: DeviceSettings,
    /// Command pipeline sizing
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// SWO trace endpoint
    #[serde(default)]
    pub trace: TraceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub bind_addr: String,
    pub log_level: String,
    /// Disable Nagle on client sockets
    #[serde(default = "ServerSettings::default_nodelay")]
    pub tcp_nodelay: bool,
}

impl ServerSettings {
    fn default_nodelay() -> bool {
        true
    }
}

/// Identity of the single exported device
///
/// Used both for the stage-1 device record and for the USB descriptors
/// returned on endpoint 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default = "DeviceSettings::default_busid")]
    pub busid: String,
    #[serde(default = "DeviceSettings::default_path")]
    pub path: String,
    #[serde(default = "DeviceSettings::default_one")]
    pub busnum: u32,
    #[serde(default = "DeviceSettings::default_one")]
    pub devnum: u32,
    /// `usb_device_speed` value (3 = high speed)
    #[serde(default = "DeviceSettings::default_speed")]
    pub speed: u32,
    #[serde(default = "DeviceSettings::default_vendor_id")]
    pub vendor_id: u16,
    #[serde(default = "DeviceSettings::default_product_id")]
    pub product_id: u16,
    #[serde(default = "DeviceSettings::default_bcd_device")]
    pub bcd_device: u16,
    #[serde(default = "DeviceSettings::default_manufacturer")]
    pub manufacturer: String,
    /// Must contain "CMSIS-DAP" for debuggers to pick the interface up
    #[serde(default = "DeviceSettings::default_product")]
    pub product: String,
    #[serde(default = "DeviceSettings::default_serial")]
    pub serial: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            busid: Self::default_busid(),
            path: Self::default_path(),
            busnum: Self::default_one(),
            devnum: Self::default_one(),
            speed: Self::default_speed(),
            vendor_id: Self::default_vendor_id(),
            product_id: Self::default_product_id(),
            bcd_device: Self::default_bcd_device(),
            manufacturer: Self::default_manufacturer(),
            product: Self::default_product(),
            serial: Self::default_serial(),
        }
    }
}

impl DeviceSettings {
    fn default_busid() -> String {
        "1-1".to_string()
    }

    fn default_path() -> String {
        "/sys/devices/pci0000:00/0000:00:01.2/usb1/1-1".to_string()
    }

    fn default_one() -> u32 {
        1
    }

    fn default_speed() -> u32 {
        3 // USB_SPEED_HIGH
    }

    fn default_vendor_id() -> u16 {
        0xC251
    }

    fn default_product_id() -> u16 {
        0xF002
    }

    fn default_bcd_device() -> u16 {
        0x0100
    }

    fn default_manufacturer() -> String {
        "usbip-dap".to_string()
    }

    fn default_product() -> String {
        "Wireless CMSIS-DAP".to_string()
    }

    fn default_serial() -> String {
        "1234".to_string()
    }
}

/// Command pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Items per queue (request and response)
    #[serde(default = "PipelineSettings::default_queue_depth")]
    pub queue_depth: usize,
    /// How long a poll waits for a pending response before giving up
    #[serde(default = "PipelineSettings::default_fast_path_timeout")]
    pub fast_path_timeout_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_depth: Self::default_queue_depth(),
            fast_path_timeout_ms: Self::default_fast_path_timeout(),
        }
    }
}

impl PipelineSettings {
    fn default_queue_depth() -> usize {
        common::DEFAULT_QUEUE_DEPTH
    }

    fn default_fast_path_timeout() -> u64 {
        10
    }

    pub fn fast_path_timeout(&self) -> Duration {
        Duration::from_millis(self.fast_path_timeout_ms)
    }
}

/// SWO trace configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TraceSettings {
    /// Serve trace data on endpoint 2 (otherwise always reply empty)
    #[serde(default)]
    pub enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_addr: "0.0.0.0:3240".to_string(),
                log_level: "info".to_string(),
                tcp_nodelay: true,
            },
            device: DeviceSettings::default(),
            pipeline: PipelineSettings::default(),
            trace: TraceSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usbip-dap/server.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ServerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usbip-dap").join("server.toml")
        } else {
            PathBuf::from(".config/usbip-dap/server.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.pipeline.queue_depth == 0 {
            return Err(anyhow!("pipeline.queue_depth must be at least 1"));
        }
        if self.pipeline.fast_path_timeout_ms == 0 {
            return Err(anyhow!("pipeline.fast_path_timeout_ms must be at least 1"));
        }

        let device = &self.device;
        if device.busid.is_empty() || device.busid.len() >= BUSID_SIZE {
            return Err(anyhow!(
                "Invalid busid '{}', must be 1-{} bytes",
                device.busid,
                BUSID_SIZE - 1
            ));
        }
        if device.path.len() >= DEVICE_PATH_SIZE {
            return Err(anyhow!(
                "Device path too long ({} bytes, max {})",
                device.path.len(),
                DEVICE_PATH_SIZE - 1
            ));
        }

        for (name, value) in [
            ("manufacturer", &device.manufacturer),
            ("product", &device.product),
            ("serial", &device.serial),
        ] {
            if value.encode_utf16().count() > MAX_DESCRIPTOR_STRING_UNITS {
                return Err(anyhow!(
                    "device.{} too long for a string descriptor (max {} characters)",
                    name,
                    MAX_DESCRIPTOR_STRING_UNITS
                ));
            }
        }

        if !device.product.contains("CMSIS-DAP") {
            tracing::warn!(
                "device.product '{}' does not contain \"CMSIS-DAP\"; debuggers may not detect the probe",
                device.product
            );
        }

        Ok(())
    }
}
