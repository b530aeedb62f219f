//! Accounting and rate limiting for transfer streams.
//!
//! An [`Account`] wraps the source of one transfer, counts what is read,
//! keeps speed and ETA estimates, reports to a shared [`Stats`] and charges
//! a process-wide bandwidth [`limiter`]. The [`wrap`] module lets decorating
//! code keep the accounting stage outermost.

pub mod account;
pub mod asyncreader;
pub mod config;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod size;
pub mod stats;
pub mod stream;
pub mod wrap;

#[cfg(test)]
mod testutil;

pub use account::{Account, Object, Progress};
pub use config::{Config, DataRateUnit};
pub use error::{Error, Result};
pub use stats::Stats;
pub use stream::{Plain, ReadClose, ReadStream};
pub use wrap::{unwrap, AccountStream, Accounter, WrapFn};
