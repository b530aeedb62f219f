use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid buffer configuration: {buffers} buffers of {unit} bytes")]
    InvalidBufferCount { buffers: usize, unit: usize },

    #[error("failed to spawn {what} thread")]
    Spawn {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("stream closed")]
    StreamClosed,

    #[error("reading config file {path}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parsing config file {path}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    /// Read-side error returned once the underlying source has been closed.
    pub(crate) fn closed() -> io::Error {
        io::Error::new(io::ErrorKind::Other, Error::StreamClosed)
    }

    pub fn is_stream_closed(err: &io::Error) -> bool {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<Error>())
            .map_or(false, |e| matches!(e, Error::StreamClosed))
    }
}
