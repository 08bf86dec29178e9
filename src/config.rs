//! Store configuration
//!
//! Sources in priority order (lowest to highest):
//! 1. Code defaults
//! 2. TOML file passed to [`SlotStoreConfig::load`]
//! 3. Environment variables prefixed `SLOTDEV_` (e.g. `SLOTDEV_BLOCK_SIZE=4096`)

use crate::error::{Error, Result};
use crate::storage::slab::device::validate_block_size;
use crate::storage::DeviceOptions;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SLOTDEV";

/// Configuration for one slot store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotStoreConfig {
    /// Block device or file backing the store
    pub device_path: PathBuf,
    /// Bytes managed by the store
    pub total_size: u64,
    /// Slot size and physical transfer size
    pub block_size: u64,
    /// Open with `O_SYNC`
    pub sync: bool,
    /// Open with `O_DIRECT` and use aligned buffers
    pub direct: bool,
    /// Create the path if missing and extend regular files to `total_size`
    pub create: bool,
}

impl Default for SlotStoreConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from("/dev/sdb"),
            total_size: 4096 * 1024 * 1024,
            block_size: 4096,
            sync: true,
            direct: true,
            create: false,
        }
    }
}

impl SlotStoreConfig {
    /// Merge defaults, an optional TOML file and `SLOTDEV_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("device_path", defaults.device_path.to_string_lossy().to_string())?
            .set_default("total_size", defaults.total_size)?
            .set_default("block_size", defaults.block_size)?
            .set_default("sync", defaults.sync)?
            .set_default("direct", defaults.direct)?
            .set_default("create", defaults.create)?;

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize::<Self>()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml(source: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the store cannot run with
    pub fn validate(&self) -> Result<()> {
        validate_block_size(self.block_size, &self.device_options())?;
        if self.device_path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("device_path must be set".to_string()));
        }
        Ok(())
    }

    /// Number of slots, `total_size / block_size`
    pub fn capacity(&self) -> u64 {
        self.total_size.checked_div(self.block_size).unwrap_or(0)
    }

    /// Options used to open the device
    pub fn device_options(&self) -> DeviceOptions {
        DeviceOptions {
            sync: self.sync,
            direct: self.direct,
            create: self.create,
            create_len: self.total_size,
        }
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfig(format!("Failed to serialize config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SlotStoreConfig::default();
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.capacity(), 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_overrides() -> Result<()> {
        let config = SlotStoreConfig::from_toml(
            r#"
            device_path = "/tmp/slotdev.img"
            total_size = 16384
            block_size = 4096
            direct = false
            "#,
        )?;
        assert_eq!(config.device_path, PathBuf::from("/tmp/slotdev.img"));
        assert_eq!(config.capacity(), 4);
        assert!(!config.direct);
        // Unset fields keep their defaults
        assert!(config.sync);
        Ok(())
    }

    #[test]
    fn test_invalid_block_size() {
        let err = SlotStoreConfig::from_toml("block_size = 0").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let err = SlotStoreConfig::from_toml("block_size = 1000\ndirect = true").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_toml_roundtrip() -> Result<()> {
        let config = SlotStoreConfig {
            device_path: PathBuf::from("/dev/nvme0n1"),
            block_size: 8192,
            ..Default::default()
        };
        let rendered = config.to_toml()?;
        assert!(rendered.contains("block_size = 8192"));
        assert_eq!(SlotStoreConfig::from_toml(&rendered)?, config);
        Ok(())
    }

    #[test]
    fn test_load_from_file() -> Result<()> {
        let path = std::env::temp_dir().join(format!("slotdev_config_{}.toml", std::process::id()));
        std::fs::write(&path, "total_size = 8192\nblock_size = 512\n").unwrap();

        let config = SlotStoreConfig::load(Some(&path))?;
        assert_eq!(config.capacity(), 16);

        std::fs::remove_file(path).ok();
        Ok(())
    }
}
