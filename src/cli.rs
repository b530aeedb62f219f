use std::path::PathBuf;

use clap::{Parser, Subcommand};
use xferacct::{Config, DataRateUnit};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// JSON config file; command line flags take precedence
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Copy a file while reporting transfer statistics
    Copy(CopyArgs),
    /// Print the effective configuration as JSON
    Config,
}

#[derive(Parser, Clone, Debug)]
pub struct CopyArgs {
    /// Source file
    pub src: PathBuf,

    /// Destination file
    pub dst: PathBuf,

    /// Bandwidth limit in bytes per second (0 for unlimited)
    #[arg(long)]
    pub bwlimit: Option<u64>,

    /// Look-ahead buffer budget in bytes
    #[arg(long)]
    pub buffer_size: Option<u64>,

    /// Read the source without an async buffer
    #[arg(long)]
    pub no_buffer: bool,

    /// Seconds between statistics reports (0 to disable)
    #[arg(long, default_value_t = 1)]
    pub stats: u64,

    /// Unit used when printing rates
    #[arg(long, value_enum)]
    pub data_rate_unit: Option<DataRateUnit>,

    /// Maximum file name length in statistics (0 for unlimited)
    #[arg(long)]
    pub name_length: Option<usize>,
}

impl CopyArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(bwlimit) = self.bwlimit {
            config.bwlimit = bwlimit;
        }
        if let Some(buffer_size) = self.buffer_size {
            config.buffer_size = buffer_size;
        }
        if let Some(unit) = self.data_rate_unit {
            config.data_rate_unit = unit;
        }
        if let Some(len) = self.name_length {
            config.stats_file_name_length = len;
        }
    }
}
