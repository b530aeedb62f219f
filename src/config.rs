use std::fs;
use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default look-ahead budget for a single transfer.
pub const DEFAULT_BUFFER_SIZE: u64 = 16 * 1024 * 1024;
/// Capacity of one async buffer unit.
pub const DEFAULT_ASYNC_BUFFER_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_FILE_NAME_LENGTH: usize = 40;

#[derive(ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataRateUnit {
    #[default]
    Bytes,
    Bits,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Total look-ahead budget per transfer, in bytes.
    pub buffer_size: u64,
    /// Size of each async buffer, in bytes.
    pub async_buffer_size: u64,
    /// Maximum rendered file name length; 0 disables truncation.
    pub stats_file_name_length: usize,
    pub data_rate_unit: DataRateUnit,
    /// Global bandwidth cap in bytes per second; 0 disables limiting.
    pub bwlimit: u64,
    /// Token bucket capacity; 0 picks one second of `bwlimit`.
    pub bwlimit_burst: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            async_buffer_size: DEFAULT_ASYNC_BUFFER_SIZE,
            stats_file_name_length: DEFAULT_FILE_NAME_LENGTH,
            data_rate_unit: DataRateUnit::Bytes,
            bwlimit: 0,
            bwlimit_burst: 0,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| Error::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Number of async buffers to put under a transfer of `size` bytes
    /// (`size < 0` when unknown).
    pub fn buffer_count(&self, size: i64) -> usize {
        if self.async_buffer_size == 0 {
            return 0;
        }
        let budget = if size < 0 || size as u64 >= self.buffer_size {
            self.buffer_size
        } else {
            size as u64
        };
        (budget / self.async_buffer_size) as usize
    }
}
