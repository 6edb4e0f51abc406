//! YAML configuration for a device and its sessions.
//!
//! ```yaml
//! device:
//!   type: android
//!   client_id: device_client_id_blob
//!   private_key: device_private_key
//! session:
//!   offline: false
//!   raw: false
//! ```
//!
//! Relative paths resolve against the directory holding the config file.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::cdm::SessionOptions;
use crate::device::{self, Device, DeviceType};
use crate::error::{Error, Result};

/// Top level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CdmConfig {
    pub device: DeviceConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Where the device comes from: a `.wvd` file, or a client id blob plus a
/// PEM private key.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    #[serde(rename = "type", default = "default_device_type")]
    pub device_type: DeviceType,
    pub wvd: Option<PathBuf>,
    pub client_id: Option<PathBuf>,
    pub private_key: Option<PathBuf>,
    /// Optional VMP file hashes.
    pub vmp: Option<PathBuf>,
    /// Directory relative paths resolve against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

fn default_device_type() -> DeviceType {
    DeviceType::Android
}

/// Session options as written in YAML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    #[serde(default)]
    pub offline: bool,
    #[serde(default)]
    pub raw: bool,
    /// Base64 service certificate.
    pub service_certificate: Option<String>,
}

impl CdmConfig {
    /// Parse YAML. Relative paths resolve against the working directory.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: CdmConfig = serde_yaml::from_str(yaml)?;
        config.device.validate()?;
        Ok(config)
    }

    /// Read a YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&yaml)?;
        config.device.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }
}

impl DeviceConfig {
    fn validate(&self) -> Result<()> {
        match (&self.wvd, &self.client_id, &self.private_key) {
            (Some(_), None, None) => Ok(()),
            (None, Some(_), Some(_)) => Ok(()),
            (Some(_), _, _) => Err(Error::Config(
                "Set either device.wvd or device.client_id/private_key, not both".to_string(),
            )),
            _ => Err(Error::Config(
                "device.client_id and device.private_key are both required without device.wvd"
                    .to_string(),
            )),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Read the configured files and build the device.
    pub fn load(&self) -> Result<Arc<dyn Device>> {
        self.validate()?;

        if let Some(wvd) = &self.wvd {
            let device = device::from_wvd_path(self.resolve(wvd))?;
            if device.device_type() != self.device_type {
                debug!(
                    "wvd file declares a {:?} device, config says {:?}; using the file",
                    device.device_type(),
                    self.device_type
                );
            }
            return Ok(device);
        }

        let (Some(client_id), Some(private_key)) = (&self.client_id, &self.private_key) else {
            return Err(Error::Config("Device files are missing".to_string()));
        };
        let client_id = std::fs::read(self.resolve(client_id))?;
        let private_key = std::fs::read_to_string(self.resolve(private_key))?;
        let vmp = match &self.vmp {
            Some(vmp) => Some(std::fs::read(self.resolve(vmp))?),
            None => None,
        };

        device::load(self.device_type, &client_id, &private_key, vmp.as_deref())
    }
}

impl From<SessionConfig> for SessionOptions {
    fn from(config: SessionConfig) -> Self {
        SessionOptions {
            service_certificate: config.service_certificate,
            offline: config.offline,
            raw: config.raw,
        }
    }
}
