//! Moving accounting to the outside of a reader chain.
//!
//! Code that decorates a reader (hashing, decryption, retries) should not
//! bury the accounting stage inside its own layers, or a buffer added later
//! would be counted instead of the bytes the caller actually receives. The
//! pattern is always the same, whether or not the stream is accounted:
//!
//! ```
//! # use std::io::Read;
//! # use xferacct::stream::{Plain, ReadStream};
//! # use xferacct::wrap::unwrap;
//! # let stream: Box<dyn ReadStream> = Box::new(Plain(&b"data"[..]));
//! let (inner, wrap) = unwrap(stream);
//! let decorated: Box<dyn ReadStream> = Box::new(Plain(inner.take(2)));
//! let mut stream = wrap(decorated);
//! # let mut out = Vec::new();
//! # stream.read_to_end(&mut out).unwrap();
//! # assert_eq!(out, b"da");
//! ```

use std::io::{self, Read};
use std::mem;

use crate::account::Account;
use crate::stream::ReadStream;

/// Re-applies the accounting removed by [`unwrap`].
pub type WrapFn = Box<dyn Fn(Box<dyn ReadStream>) -> Box<dyn ReadStream> + Send + Sync>;

/// A stream carrying an accounting stage that can be lifted off and put
/// back around a different reader.
pub trait Accounter: ReadStream {
    /// Detach and return the reader directly beneath the accounting stage.
    fn take_inner(&mut self) -> Box<dyn ReadStream>;

    /// Install `inner` beneath the accounting stage.
    fn replace_inner(&mut self, inner: Box<dyn ReadStream>);

    /// The account that reads through this stream are charged to.
    fn owner(&self) -> Account;

    /// Account `inner` into the same destination as this stream.
    fn rewrap(&self, inner: Box<dyn ReadStream>) -> Box<dyn ReadStream> {
        self.owner().wrap_stream(inner)
    }
}

/// Splits `stream` into the reader beneath its accounting stage and a
/// function putting that accounting back around any reader. Streams without
/// accounting come back as they are, with an identity `WrapFn`.
pub fn unwrap(mut stream: Box<dyn ReadStream>) -> (Box<dyn ReadStream>, WrapFn) {
    if let Some(accounter) = stream.as_accounter() {
        let inner = accounter.take_inner();
        let owner = accounter.owner();
        return (inner, Box::new(move |reader| owner.wrap_stream(reader)));
    }
    (stream, Box::new(|reader| reader))
}

/// Accounts reads of an arbitrary reader into an existing [`Account`].
pub struct AccountStream {
    owner: Account,
    upstream: Box<dyn ReadStream>,
}

impl AccountStream {
    pub fn new(owner: Account, upstream: Box<dyn ReadStream>) -> Self {
        Self { owner, upstream }
    }
}

impl Read for AccountStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.owner.account_read(&mut *self.upstream, buf)
    }
}

impl ReadStream for AccountStream {
    fn as_accounter(&mut self) -> Option<&mut dyn Accounter> {
        Some(self)
    }
}

impl Accounter for AccountStream {
    fn take_inner(&mut self) -> Box<dyn ReadStream> {
        mem::replace(&mut self.upstream, Box::new(io::empty()))
    }

    fn replace_inner(&mut self, inner: Box<dyn ReadStream>) {
        self.upstream = inner;
    }

    fn owner(&self) -> Account {
        self.owner.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::account::Progress;
    use crate::config::Config;
    use crate::stats::Stats;
    use crate::stream::Plain;
    use crate::testutil::{pattern, Tracked, Xor};

    fn stats() -> Arc<Stats> {
        Arc::new(Stats::new(Config::default()))
    }

    #[test]
    fn unwrap_passes_plain_streams_through() {
        let stream: Box<dyn ReadStream> = Box::new(Plain(&b"hello"[..]));
        let (mut inner, wrap) = unwrap(stream);
        assert!(inner.as_accounter().is_none());
        let mut wrapped = wrap(inner);
        assert!(wrapped.as_accounter().is_none());
        let mut out = String::new();
        wrapped.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn rewrap_of_unwrapped_account_counts_the_same() {
        let stats = stats();
        let (source, _) = Tracked::new(pattern(3000));
        let account = Account::new(source, 3000, "rt", &stats);

        let (inner, wrap) = unwrap(Box::new(account.clone()));
        let mut stream = wrap(inner);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();

        assert_eq!(out, pattern(3000));
        assert_eq!(account.progress(), (3000, 3000));
        assert_eq!(stats.total_bytes(), 3000);
        account.close().unwrap();
    }

    #[test]
    fn decorator_goes_beneath_accounting() {
        let stats = stats();
        let (source, closes) = Tracked::new(pattern(1000));
        let account = Account::new(source, 1000, "xor", &stats);

        let (inner, wrap) = unwrap(Box::new(account.clone()));
        let mut stream = wrap(Box::new(Xor { inner, key: 0x5a }));
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();

        let expected: Vec<u8> = pattern(1000).iter().map(|b| b ^ 0x5a).collect();
        assert_eq!(out, expected);
        assert_eq!(account.progress().0, 1000);

        account.close().unwrap();
        assert_eq!(closes.get(), 1);
        let err = stream.read(&mut [0u8; 8]).unwrap_err();
        assert!(crate::error::Error::is_stream_closed(&err));
    }

    #[test]
    fn repeated_round_trips_do_not_double_count() {
        let stats = stats();
        let (source, _) = Tracked::new(pattern(4096));
        let account = Account::new(source, 4096, "many", &stats);

        let mut stream: Box<dyn ReadStream> = Box::new(account.clone());
        for key in [1u8, 2, 3] {
            let (inner, wrap) = unwrap(stream);
            stream = wrap(Box::new(Xor { inner, key }));
        }
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();

        let expected: Vec<u8> = pattern(4096).iter().map(|b| b ^ 1 ^ 2 ^ 3).collect();
        assert_eq!(out, expected);
        assert_eq!(account.progress().0, 4096);
        account.close().unwrap();
    }

    #[test]
    fn replace_inner_installs_decorator_on_account() {
        let stats = stats();
        let (source, _) = Tracked::new(pattern(500));
        let mut account = Account::new(source, 500, "inner", &stats);

        let inner = account.take_inner();
        account.replace_inner(Box::new(Xor { inner, key: 0xff }));
        let mut out = Vec::new();
        account.read_to_end(&mut out).unwrap();

        let expected: Vec<u8> = pattern(500).iter().map(|b| !b).collect();
        assert_eq!(out, expected);
        assert_eq!(account.progress().0, 500);
        account.close().unwrap();
    }

    #[test]
    fn adapter_rewrap_targets_same_account() {
        let stats = stats();
        let (source, _) = Tracked::new(Vec::new());
        let account = Account::new(source, -1, "adapter", &stats);

        let mut adapter = AccountStream::new(account.clone(), Box::new(Plain(&b"abc"[..])));
        let taken = adapter.take_inner();
        let mut rewrapped = adapter.rewrap(taken);
        let mut out = Vec::new();
        rewrapped.read_to_end(&mut out).unwrap();

        assert_eq!(out, b"abc");
        assert_eq!(account.progress().0, 3);
        assert_eq!(adapter.read(&mut [0u8; 4]).unwrap(), 0);
        account.close().unwrap();
    }
}
