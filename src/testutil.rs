use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::stream::{ReadClose, ReadStream};

pub(crate) fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[derive(Clone, Default)]
pub(crate) struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// In-memory source that counts `close` calls and can fail once drained.
pub(crate) struct Tracked {
    data: io::Cursor<Vec<u8>>,
    fail_at_end: bool,
    closes: Counter,
}

impl Tracked {
    pub(crate) fn new(data: Vec<u8>) -> (Self, Counter) {
        let closes = Counter::default();
        let source = Self { data: io::Cursor::new(data), fail_at_end: false, closes: closes.clone() };
        (source, closes)
    }

    pub(crate) fn failing_after(data: Vec<u8>) -> (Self, Counter) {
        let (mut source, closes) = Self::new(data);
        source.fail_at_end = true;
        (source, closes)
    }
}

impl Read for Tracked {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.data.read(buf)?;
        if n == 0 && self.fail_at_end && !buf.is_empty() {
            return Err(io::Error::from(io::ErrorKind::ConnectionReset));
        }
        Ok(n)
    }
}

impl ReadStream for Tracked {}

impl ReadClose for Tracked {
    fn close(&mut self) -> io::Result<()> {
        self.closes.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Decorator that XORs every byte, standing in for encryption or checksums.
pub(crate) struct Xor<R> {
    pub(crate) inner: R,
    pub(crate) key: u8,
}

impl<R: Read> Read for Xor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        for b in &mut buf[..n] {
            *b ^= self.key;
        }
        Ok(n)
    }
}

impl<R: Read + Send> ReadStream for Xor<R> {}
