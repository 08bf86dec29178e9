// slotdev - Rust Implementation
// A key-addressed fixed-block slot store for raw block devices

#![warn(rust_2018_idioms)]

pub mod config;
pub mod metrics;
pub mod storage;

// Re-exports for convenience
pub use config::SlotStoreConfig;
pub use storage::{BlockDevice, DeviceOptions, FileDevice, SlotId, SlotStats, SlotStore};

/// slotdev error types
pub mod error {
    use std::path::PathBuf;
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Not found: no slot assigned to key {key}")]
        NotFound { key: u64 },

        #[error("Exhausted: all {capacity} slots are assigned")]
        Exhausted { capacity: u64 },

        #[error("I/O error: {op} at byte offset {offset}: {source}")]
        Io {
            op: &'static str,
            offset: u64,
            #[source]
            source: std::io::Error,
        },

        #[error("Failed to open device {}: {source}", path.display())]
        DeviceOpen {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },

        #[error("Failed to close device {}: {source}", path.display())]
        DeviceClose {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },

        #[error("Offset overflow: block at offset {offset} of slot {slot} is not addressable")]
        OffsetOverflow { slot: u64, offset: u64 },

        #[error("Invalid configuration: {0}")]
        InvalidConfig(String),

        #[error("Configuration error: {0}")]
        Config(#[from] ::config::ConfigError),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
