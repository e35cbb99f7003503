//! Configuration for the dmareg daemon

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::registry::RegistryLimits;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DmaregConfig {
    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Registry limits
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Socket path
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Socket file mode; every process registers its own ranges
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            socket_mode: default_socket_mode(),
            log_level: default_log_level(),
        }
    }
}

/// Registry configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Max live address-space contexts (0 = unlimited)
    #[serde(default)]
    pub max_contexts: usize,

    /// Max ranges per address space (0 = unlimited)
    #[serde(default)]
    pub max_ranges_per_context: usize,
}

impl RegistryConfig {
    pub fn limits(&self) -> RegistryLimits {
        RegistryLimits {
            max_contexts: self.max_contexts,
            max_ranges_per_context: self.max_ranges_per_context,
        }
    }
}

// Default value functions
fn default_socket_path() -> String {
    "/run/dmareg/dmareg.sock".to_string()
}

fn default_socket_mode() -> u32 {
    0o666
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DmaregConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_yaml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DmaregConfig::default();
        assert_eq!(config.daemon.socket_path, "/run/dmareg/dmareg.sock");
        assert_eq!(config.daemon.socket_mode, 0o666);
        assert_eq!(config.registry.limits(), RegistryLimits::default());
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = "registry:\n  max_ranges_per_context: 4096\n";
        let config: DmaregConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.registry.max_ranges_per_context, 4096);
        assert_eq!(config.registry.max_contexts, 0);
        assert_eq!(config.daemon.log_level, "info");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = DmaregConfig::load(Path::new("/nonexistent/dmareg.yaml")).unwrap();
        assert_eq!(config.daemon.socket_mode, 0o666);
    }
}
