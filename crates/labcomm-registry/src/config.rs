use std::collections::HashSet;
use std::path::Path;

use labcomm_transport::{SerialConfig, TransportKind, WorkMode};
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

/// Maximum configuration file size accepted by [`RegistryConfig::from_file`].
pub const MAX_CONFIG_BYTES: u64 = 1024 * 1024;

/// Declarative set of channels to build a registry from.
///
/// ```json
/// {
///   "channels": [
///     { "transport": "network", "name": "tracker", "host": "127.0.0.1",
///       "port": 9000, "kind": "tcp_server", "mode": "auto" },
///     { "transport": "serial", "name": "pump", "port_name": "/dev/ttyUSB0",
///       "baud_rate": 115200 }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// One channel definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ChannelConfig {
    Network {
        name: String,
        host: String,
        port: u16,
        kind: TransportKind,
        #[serde(default)]
        mode: WorkMode,
    },
    Serial {
        name: String,
        #[serde(flatten)]
        config: SerialConfig,
    },
}

impl ChannelConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Network { name, .. } | Self::Serial { name, .. } => name,
        }
    }
}

impl RegistryConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path)
            .map_err(|err| RegistryError::Config(format!("{}: {err}", path.display())))?;
        if metadata.len() > MAX_CONFIG_BYTES {
            return Err(RegistryError::Config(format!(
                "{} is too large ({} bytes, max {MAX_CONFIG_BYTES})",
                path.display(),
                metadata.len()
            )));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|err| RegistryError::Config(format!("{}: {err}", path.display())))?;
        Self::from_json(&content)
    }

    /// Names must be unique across network and serial channels.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for channel in &self.channels {
            let name = channel.name();
            if name.is_empty() {
                return Err(RegistryError::Config("channel name is empty".to_string()));
            }
            if !seen.insert(name) {
                return Err(RegistryError::DuplicateName(name.to_string()));
            }
        }
        Ok(())
    }
}
