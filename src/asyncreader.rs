//! Look-ahead reader: a worker thread keeps up to `buffers` chunks of the
//! source queued so the consumer rarely waits on the underlying I/O.

use std::cmp;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::{Buf, Bytes, BytesMut};
use crossbeam_channel as channel;
use tracing::{debug, warn};

use crate::error::Error;
use crate::stream::ReadClose;

enum Msg {
    Data(Bytes),
    Eof,
    Failed(io::Error),
    /// Worker has stopped; the source comes back to the consumer side.
    Handoff(Box<dyn ReadClose>),
}

pub struct AsyncReader {
    rx: channel::Receiver<Msg>,
    current: Bytes,
    direct: Option<Box<dyn ReadClose>>,
    abandoned: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    closed: bool,
}

impl AsyncReader {
    /// Start buffering `source` in `buffers` chunks of `unit` bytes.
    ///
    /// On failure the untouched source is handed back alongside the error.
    pub fn new(
        source: Box<dyn ReadClose>,
        buffers: usize,
        unit: usize,
    ) -> Result<Self, (Error, Box<dyn ReadClose>)> {
        if buffers == 0 || unit == 0 {
            return Err((Error::InvalidBufferCount { buffers, unit }, source));
        }

        // The source is only handed over once the worker exists, so a failed
        // spawn leaves it with the caller.
        let (source_tx, source_rx) = channel::bounded::<Box<dyn ReadClose>>(1);
        let (tx, rx) = channel::bounded::<Msg>(buffers);
        let abandoned = Arc::new(AtomicBool::new(false));
        let abandoned_worker = Arc::clone(&abandoned);

        let spawned = thread::Builder::new()
            .name("async-reader".into())
            .spawn(move || {
                if let Ok(source) = source_rx.recv() {
                    fill(source, unit, tx, abandoned_worker);
                }
            });
        let worker = match spawned {
            Ok(handle) => handle,
            Err(e) => return Err((Error::Spawn { what: "async reader", source: e }, source)),
        };
        if let Err(channel::SendError(source)) = source_tx.send(source) {
            let gone = io::Error::new(io::ErrorKind::Other, "async reader worker exited");
            return Err((Error::Spawn { what: "async reader", source: gone }, source));
        }
        debug!(buffers, unit, "Started async reader");

        Ok(Self {
            rx,
            current: Bytes::new(),
            direct: None,
            abandoned,
            worker: Some(worker),
            closed: false,
        })
    }

    /// Stop reading ahead. Chunks already queued are still delivered, after
    /// which reads go straight to the source.
    pub fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }

    /// The source, once the worker has stopped and handed it back. `None`
    /// while the worker still owns it.
    pub fn source_mut(&mut self) -> Option<&mut (dyn ReadClose + 'static)> {
        self.direct.as_deref_mut()
    }
}

impl Read for AsyncReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(Error::closed());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if !self.current.is_empty() {
                let n = cmp::min(buf.len(), self.current.len());
                buf[..n].copy_from_slice(&self.current[..n]);
                self.current.advance(n);
                return Ok(n);
            }
            if let Some(source) = self.direct.as_mut() {
                return source.read(buf);
            }
            match self.rx.recv() {
                Ok(Msg::Data(chunk)) => self.current = chunk,
                Ok(Msg::Eof) => {
                    // The worker hands the source back right after end of stream.
                    if let Ok(Msg::Handoff(source)) = self.rx.recv() {
                        self.direct = Some(source);
                    }
                    return Ok(0);
                }
                Ok(Msg::Failed(e)) => return Err(e),
                Ok(Msg::Handoff(source)) => self.direct = Some(source),
                // Worker died without returning the source.
                Err(_) => return Err(Error::closed()),
            }
        }
    }
}

impl ReadClose for AsyncReader {
    /// Stops the worker, discards anything still queued and closes the
    /// source. Blocks while the worker finishes an in-flight read.
    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.abandon();
        self.current = Bytes::new();

        let mut source = self.direct.take();
        while source.is_none() {
            match self.rx.recv() {
                Ok(Msg::Handoff(s)) => source = Some(s),
                Ok(_) => {}
                Err(_) => break,
            }
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Async reader worker panicked");
            }
        }
        match source {
            Some(mut source) => source.close(),
            None => Ok(()),
        }
    }
}

impl Drop for AsyncReader {
    fn drop(&mut self) {
        // Dropping the receiver unblocks a worker parked on a full queue.
        self.abandon();
    }
}

fn fill(
    mut source: Box<dyn ReadClose>,
    unit: usize,
    tx: channel::Sender<Msg>,
    abandoned: Arc<AtomicBool>,
) {
    while !abandoned.load(Ordering::Acquire) {
        let mut chunk = BytesMut::zeroed(unit);
        let (filled, outcome) = read_chunk(&mut *source, &mut chunk);
        if filled > 0 {
            chunk.truncate(filled);
            if tx.send(Msg::Data(chunk.freeze())).is_err() {
                return;
            }
        }
        let last = match outcome {
            Ok(true) => Msg::Eof,
            Ok(false) => continue,
            Err(e) => Msg::Failed(e),
        };
        if tx.send(last).is_err() {
            return;
        }
        break;
    }
    let _ = tx.send(Msg::Handoff(source));
}

/// Fill `chunk` from `source`. Returns the bytes filled and whether the
/// source hit end of stream.
fn read_chunk(source: &mut dyn ReadClose, chunk: &mut [u8]) -> (usize, io::Result<bool>) {
    let mut filled = 0;
    while filled < chunk.len() {
        match source.read(&mut chunk[filled..]) {
            Ok(0) => return (filled, Ok(true)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return (filled, Err(e)),
        }
    }
    (filled, Ok(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{pattern, Tracked};

    #[test]
    fn delivers_source_bytes_in_order() {
        let data = pattern(10_000);
        let (source, _closes) = Tracked::new(data.clone());
        let mut reader = AsyncReader::new(Box::new(source), 3, 1024).ok().unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn rejects_zero_buffers_and_returns_source() {
        let (source, closes) = Tracked::new(pattern(10));
        let (err, mut source) = match AsyncReader::new(Box::new(source), 0, 1024) {
            Ok(_) => panic!("zero buffers accepted"),
            Err(rejected) => rejected,
        };
        assert!(matches!(err, Error::InvalidBufferCount { buffers: 0, .. }));
        let mut out = Vec::new();
        source.read_to_end(&mut out).unwrap();
        assert_eq!(out, pattern(10));
        assert_eq!(closes.get(), 0);
    }

    #[test]
    fn abandon_keeps_all_bytes() {
        let data = pattern(50_000);
        let (source, _closes) = Tracked::new(data.clone());
        let mut reader = AsyncReader::new(Box::new(source), 2, 4096).ok().unwrap();
        let mut first = vec![0u8; 100];
        reader.read_exact(&mut first).unwrap();
        reader.abandon();
        assert!(reader.is_abandoned());
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        first.extend_from_slice(&rest);
        assert_eq!(first, data);
    }

    #[test]
    fn source_returns_after_end_of_stream() {
        let (source, closes) = Tracked::new(pattern(2000));
        let mut reader = AsyncReader::new(Box::new(source), 4, 1024).ok().unwrap();
        assert!(reader.source_mut().is_none());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, pattern(2000));
        let source = reader.source_mut().expect("source handed back at end of stream");
        assert_eq!(source.read(&mut [0u8; 8]).unwrap(), 0);
        assert_eq!(reader.read(&mut [0u8; 8]).unwrap(), 0);
        reader.close().unwrap();
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn close_releases_source_once() {
        let (source, closes) = Tracked::new(pattern(1 << 20));
        let mut reader = AsyncReader::new(Box::new(source), 4, 1024).ok().unwrap();
        let mut head = [0u8; 10];
        reader.read_exact(&mut head).unwrap();
        reader.close().unwrap();
        reader.close().unwrap();
        assert_eq!(closes.get(), 1);
        let err = reader.read(&mut head).unwrap_err();
        assert!(Error::is_stream_closed(&err));
    }

    #[test]
    fn read_error_surfaces_after_buffered_data() {
        let (source, _closes) = Tracked::failing_after(pattern(3000));
        let mut reader = AsyncReader::new(Box::new(source), 2, 1024).ok().unwrap();
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(out, pattern(3000));
    }
}
