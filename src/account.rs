//! Per-transfer accounting.
//!
//! An [`Account`] sits on top of a transfer's source stream. Every read is
//! counted, reported to the process-wide [`Stats`] and charged against the
//! bandwidth limiter. A sampler thread folds the bytes seen in each second
//! into a moving average used for the smoothed speed and the ETA.
//!
//! Two locks guard the state. The stream lock is held across the underlying
//! read so a source swap or close never races a read on the old source. The
//! counter lock is only taken briefly, so progress queries never wait on slow
//! I/O.
//!
//! Transports that reuse connections may still call `read` after the
//! transfer was cancelled and `close` has run. Such reads fail with
//! [`Error::StreamClosed`] and account nothing.

use std::fmt;
use std::io::{self, Read};
use std::mem;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::asyncreader::AsyncReader;
use crate::config::DataRateUnit;
use crate::error::Error;
use crate::metrics::MovingAverage;
use crate::size::{format_duration, SizeSuffix};
use crate::stats::Stats;
use crate::stream::{ReadClose, ReadStream};
use crate::wrap::{AccountStream, Accounter};

pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Storage object whose transfer is being accounted.
pub trait Object {
    /// Size in bytes, negative when unknown.
    fn size(&self) -> i64;
    /// Logical path of the object.
    fn remote(&self) -> &str;
}

/// Accounting handle for one transfer. Clones share the same counters.
#[derive(Clone)]
pub struct Account {
    inner: Arc<Inner>,
}

/// Non-owning reference held by the in-progress registry.
#[derive(Clone)]
pub struct WeakAccount(Weak<Inner>);

impl WeakAccount {
    pub fn upgrade(&self) -> Option<Account> {
        self.0.upgrade().map(|inner| Account { inner })
    }

    pub fn is(&self, account: &Account) -> bool {
        Weak::as_ptr(&self.0) == Arc::as_ptr(&account.inner)
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.0.strong_count() == 0
    }
}

struct Inner {
    name: String,
    size: i64,
    stats: Arc<Stats>,
    streams: Mutex<Streams>,
    counters: Mutex<Counters>,
}

struct Streams {
    /// Reader consulted by `Account::read`; a handle onto `source` unless a
    /// decorator was installed with `replace_inner`.
    current: Box<dyn ReadStream>,
    /// The closable layer: the plain source or the buffer over it.
    source: SourceHandle,
    with_buffer: bool,
    closed: bool,
    exit: Option<channel::Sender<()>>,
    sampler: Option<JoinHandle<()>>,
}

struct Counters {
    bytes: u64,
    start: Option<Instant>,
    sample_time: Instant,
    sample_bytes: u64,
    avg: MovingAverage,
}

impl Account {
    /// Start accounting `source`, a transfer of `size` bytes (negative if
    /// unknown) named `name`. The account is registered as in progress.
    pub fn new<S: ReadClose + 'static>(
        source: S,
        size: i64,
        name: impl Into<String>,
        stats: &Arc<Stats>,
    ) -> Self {
        let source = SourceHandle::new(Box::new(source));
        let (exit_tx, exit_rx) = channel::bounded::<()>(0);
        let inner = Arc::new(Inner {
            name: name.into(),
            size,
            stats: Arc::clone(stats),
            streams: Mutex::new(Streams {
                current: Box::new(source.clone()),
                source,
                with_buffer: false,
                closed: false,
                exit: Some(exit_tx),
                sampler: None,
            }),
            counters: Mutex::new(Counters {
                bytes: 0,
                start: None,
                sample_time: Instant::now(),
                sample_bytes: 0,
                avg: MovingAverage::default(),
            }),
        });
        let sampler = spawn_sampler(Arc::downgrade(&inner), exit_rx);
        inner.streams.lock().sampler = sampler;

        let account = Account { inner };
        stats.in_progress().set(account.name(), &account);
        debug!(name = %account.name(), size, "Started accounting");
        account
    }

    pub fn for_object<S: ReadClose + 'static>(
        source: S,
        object: &dyn Object,
        stats: &Arc<Stats>,
    ) -> Self {
        Self::new(source, object.size(), object.remote(), stats)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Declared size, negative when unknown.
    pub fn size(&self) -> i64 {
        self.inner.size
    }

    pub fn downgrade(&self) -> WeakAccount {
        WeakAccount(Arc::downgrade(&self.inner))
    }

    pub fn with_buffer(self) -> Self {
        self.enable_buffering();
        self
    }

    /// Put an async buffer under the account when the transfer is large
    /// enough. Failing to create it only logs; the transfer goes on
    /// unbuffered.
    pub fn enable_buffering(&self) {
        let mut streams = self.inner.streams.lock();
        self.inner.buffer(&mut streams);
    }

    /// Stop the async buffer reading ahead. Buffered data is kept.
    pub fn stop_buffering(&self) {
        self.inner.streams.lock().source.stop_buffering();
    }

    pub fn is_buffered(&self) -> bool {
        self.inner.streams.lock().source.is_buffered()
    }

    /// Swap in a fresh source, for instance after the transfer was reopened
    /// following an error. Counters carry on from where they were, and the
    /// buffer is rebuilt if one had been requested.
    pub fn replace_source<S: ReadClose + 'static>(&self, source: S) {
        let mut source: Box<dyn ReadClose> = Box::new(source);
        let mut streams = self.inner.streams.lock();
        if streams.closed {
            if let Err(e) = source.close() {
                debug!(name = %self.inner.name, ?e, "Closing source offered to closed account");
            }
            return;
        }
        streams.source.stop_buffering();
        streams.source.replace(source);
        let top = Box::new(streams.source.clone());
        streams.current = top;
        if streams.with_buffer {
            self.inner.buffer(&mut streams);
        }
    }

    /// Run `f` on the source beneath any buffer and decorators. The stream
    /// lock is held throughout, so no accounted read runs meanwhile.
    ///
    /// Returns `None` once the account is closed, or while an async buffer
    /// still owns the source.
    pub fn with_reader<T>(&self, f: impl FnOnce(&mut dyn ReadClose) -> T) -> Option<T> {
        let streams = self.inner.streams.lock();
        streams.source.with_reader(f)
    }

    /// Wrap `inner` so reads through it are accounted here.
    pub fn wrap_stream(&self, inner: Box<dyn ReadStream>) -> Box<dyn ReadStream> {
        Box::new(AccountStream::new(self.clone(), inner))
    }

    /// Close the source and stop accounting. Only the first call does any
    /// work; later calls return `Ok(())`.
    pub fn close(&self) -> io::Result<()> {
        let mut streams = self.inner.streams.lock();
        if streams.closed {
            return Ok(());
        }
        streams.closed = true;
        drop(streams.exit.take());
        if let Some(sampler) = streams.sampler.take() {
            if sampler.join().is_err() {
                warn!(name = %self.inner.name, "Sampler thread panicked");
            }
        }
        self.inner.stats.in_progress().clear(&self.inner.name, self);
        let result = streams.source.close();
        debug!(name = %self.inner.name, bytes = self.progress().0, "Closed account");
        result
    }

    pub fn is_closed(&self) -> bool {
        self.inner.streams.lock().closed
    }

    /// Account one read of `stream`. Used by this account and by the
    /// [`AccountStream`]s wrapping other readers into it.
    pub(crate) fn account_read<R: Read + ?Sized>(
        &self,
        stream: &mut R,
        buf: &mut [u8],
    ) -> io::Result<usize> {
        self.inner.read(stream, buf)
    }

    /// One line summary: name, percentage, size, current speed and ETA.
    pub fn render(&self) -> String {
        let (done, size) = self.progress();
        let (_, mut current) = self.speed();
        let eta = self.eta().map_or_else(|| "-".to_string(), format_duration);
        let config = self.inner.stats.config();
        let name = truncate_name(&self.inner.name, config.stats_file_name_length);
        if config.data_rate_unit == DataRateUnit::Bits {
            current *= 8.0;
        }
        let percent = if size > 0 { (100.0 * done as f64 / size as f64) as i64 } else { 0 };
        format!(
            "{:>45}: {:>2}% /{}, {}/s, {}",
            name,
            percent,
            SizeSuffix(size),
            SizeSuffix::from(current),
            eta
        )
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("name", &self.inner.name)
            .field("size", &self.inner.size)
            .finish_non_exhaustive()
    }
}

impl Read for Account {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut &*self, buf)
    }
}

impl Read for &Account {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut streams = self.inner.streams.lock();
        self.inner.read(&mut *streams.current, buf)
    }
}

impl ReadStream for Account {
    fn as_accounter(&mut self) -> Option<&mut dyn Accounter> {
        Some(self)
    }
}

impl Accounter for Account {
    fn take_inner(&mut self) -> Box<dyn ReadStream> {
        let mut streams = self.inner.streams.lock();
        let fresh = Box::new(streams.source.clone());
        mem::replace(&mut streams.current, fresh)
    }

    fn replace_inner(&mut self, inner: Box<dyn ReadStream>) {
        self.inner.streams.lock().current = inner;
    }

    fn owner(&self) -> Account {
        self.clone()
    }
}

impl Inner {
    fn read<R: Read + ?Sized>(&self, stream: &mut R, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut counters = self.counters.lock();
            if counters.start.is_none() {
                counters.start = Some(Instant::now());
            }
        }

        let result = stream.read(buf);
        let n = result.as_ref().map_or(0, |n| *n);

        {
            let mut counters = self.counters.lock();
            counters.sample_bytes += n as u64;
            counters.bytes += n as u64;
        }
        self.stats.bytes(n as u64);
        self.stats.limit(n);
        result
    }

    fn buffer(&self, streams: &mut Streams) {
        streams.with_buffer = true;
        let config = self.stats.config();
        let buffers = config.buffer_count(self.size);
        if buffers == 0 {
            return;
        }
        streams.source.buffer(buffers, config.async_buffer_size as usize, &self.name);
    }

    fn sample(&self, now: Instant) {
        let mut counters = self.counters.lock();
        let elapsed = now.saturating_duration_since(counters.sample_time).as_secs_f64();
        let bytes = counters.sample_bytes;
        counters.avg.update(bytes, elapsed);
        counters.sample_bytes = 0;
        counters.sample_time = now;
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.streams.get_mut().closed {
            self.stats.in_progress().clear_dead(&self.name);
        }
    }
}

fn spawn_sampler(inner: Weak<Inner>, exit: channel::Receiver<()>) -> Option<JoinHandle<()>> {
    let spawned = thread::Builder::new()
        .name("account-sampler".into())
        .spawn(move || {
            let ticker = channel::tick(SAMPLE_INTERVAL);
            loop {
                channel::select! {
                    recv(ticker) -> tick => {
                        let (Ok(now), Some(inner)) = (tick, inner.upgrade()) else { break };
                        inner.sample(now);
                    }
                    recv(exit) -> _ => break,
                }
            }
        });
    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(?e, "Failed to start sampler; smoothed speed unavailable");
            None
        }
    }
}

fn truncate_name(name: &str, max: usize) -> String {
    let count = name.chars().count();
    if max == 0 || count <= max {
        return name.to_string();
    }
    let tail: String = name.chars().skip(count - max).collect();
    format!("...{tail}")
}

/// Shared handle onto the closable layer of an account. Handles given out by
/// `take_inner` keep reading whatever layer is currently installed.
#[derive(Clone)]
struct SourceHandle(Arc<Mutex<Layer>>);

enum Layer {
    Plain(Box<dyn ReadClose>),
    Buffered(AsyncReader),
    Closed,
}

impl SourceHandle {
    fn new(source: Box<dyn ReadClose>) -> Self {
        Self(Arc::new(Mutex::new(Layer::Plain(source))))
    }

    fn replace(&self, source: Box<dyn ReadClose>) {
        *self.0.lock() = Layer::Plain(source);
    }

    fn buffer(&self, buffers: usize, unit: usize, name: &str) {
        let mut layer = self.0.lock();
        let source = match mem::replace(&mut *layer, Layer::Closed) {
            Layer::Plain(source) => source,
            other => {
                *layer = other;
                return;
            }
        };
        match AsyncReader::new(source, buffers, unit) {
            Ok(reader) => {
                debug!(name, buffers, "Buffering transfer");
                *layer = Layer::Buffered(reader);
            }
            Err((err, source)) => {
                error!(name, ?err, "Failed to make buffer");
                *layer = Layer::Plain(source);
            }
        }
    }

    fn stop_buffering(&self) {
        if let Layer::Buffered(reader) = &*self.0.lock() {
            reader.abandon();
        }
    }

    fn is_buffered(&self) -> bool {
        matches!(&*self.0.lock(), Layer::Buffered(_))
    }

    fn with_reader<T>(&self, f: impl FnOnce(&mut dyn ReadClose) -> T) -> Option<T> {
        match &mut *self.0.lock() {
            Layer::Plain(source) => Some(f(&mut **source)),
            Layer::Buffered(reader) => reader.source_mut().map(|source| f(source)),
            Layer::Closed => None,
        }
    }

    fn close(&self) -> io::Result<()> {
        let layer = mem::replace(&mut *self.0.lock(), Layer::Closed);
        match layer {
            Layer::Plain(mut source) => source.close(),
            Layer::Buffered(mut reader) => reader.close(),
            Layer::Closed => Ok(()),
        }
    }
}

impl Read for SourceHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut *self.0.lock() {
            Layer::Plain(source) => source.read(buf),
            Layer::Buffered(reader) => reader.read(buf),
            Layer::Closed => Err(Error::closed()),
        }
    }
}

impl ReadStream for SourceHandle {}

/// Statistics that are also answerable for an account that does not exist.
pub trait Progress {
    /// Bytes read so far and the declared size (`<= 0` when unknown).
    fn progress(&self) -> (u64, i64);
    /// Average speed since the first read and the smoothed current speed,
    /// both in bytes per second. Zero until something has been read.
    fn speed(&self) -> (f64, f64);
    /// Time left at the smoothed speed, whole seconds. `None` when it cannot
    /// be estimated.
    fn eta(&self) -> Option<Duration>;
}

impl Progress for Account {
    fn progress(&self) -> (u64, i64) {
        let counters = self.inner.counters.lock();
        (counters.bytes, self.inner.size)
    }

    fn speed(&self) -> (f64, f64) {
        let counters = self.inner.counters.lock();
        if counters.bytes == 0 {
            return (0.0, 0.0);
        }
        let elapsed = counters.start.map_or(0.0, |start| start.elapsed().as_secs_f64()).max(1e-3);
        (counters.bytes as f64 / elapsed, counters.avg.value())
    }

    fn eta(&self) -> Option<Duration> {
        if self.inner.size <= 0 {
            return None;
        }
        let counters = self.inner.counters.lock();
        if counters.bytes == 0 {
            return None;
        }
        let left = self.inner.size.saturating_sub(counters.bytes as i64);
        if left <= 0 {
            return Some(Duration::ZERO);
        }
        let avg = counters.avg.value();
        if avg <= 0.0 {
            return None;
        }
        Some(Duration::from_secs((left as f64 / avg) as u64))
    }
}

impl Progress for Option<&Account> {
    fn progress(&self) -> (u64, i64) {
        self.map_or((0, 0), |account| account.progress())
    }

    fn speed(&self) -> (f64, f64) {
        self.map_or((0.0, 0.0), |account| account.speed())
    }

    fn eta(&self) -> Option<Duration> {
        self.and_then(|account| account.eta())
    }
}
