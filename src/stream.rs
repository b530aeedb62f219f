//! Reader traits shared by the accounting layer and the decorators placed
//! around it.

use std::fs::File;
use std::io::{self, Cursor, Empty, Read};
use std::net::{Shutdown, TcpStream};

use crate::wrap::Accounter;

/// A byte source whose resources are released by an explicit `close`.
///
/// `close` is called at most once by the accounting layer. Sources that have
/// nothing to release can rely on the default, which only drops on scope exit.
pub trait ReadClose: Read + Send {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A reader that may sit in a decorator chain.
///
/// Streams that carry accounting return themselves from `as_accounter`, which
/// is what lets [`crate::wrap::unwrap`] lift the accounting stage to the top
/// of a rebuilt chain. Every other reader keeps the default.
pub trait ReadStream: Read + Send {
    fn as_accounter(&mut self) -> Option<&mut dyn Accounter> {
        None
    }
}

/// Adapts any reader into a [`ReadStream`] / [`ReadClose`] with no extra
/// behaviour.
#[derive(Debug, Default)]
pub struct Plain<R>(pub R);

impl<R: Read> Read for Plain<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read + Send> ReadStream for Plain<R> {}
impl<R: Read + Send> ReadClose for Plain<R> {}

impl ReadStream for Box<dyn ReadStream> {
    fn as_accounter(&mut self) -> Option<&mut dyn Accounter> {
        (**self).as_accounter()
    }
}

impl ReadClose for Box<dyn ReadClose> {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl ReadStream for File {}
impl ReadClose for File {}

impl ReadStream for TcpStream {}
impl ReadClose for TcpStream {
    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl<T: AsRef<[u8]> + Send> ReadStream for Cursor<T> {}
impl<T: AsRef<[u8]> + Send> ReadClose for Cursor<T> {}

impl ReadStream for Empty {}
impl ReadClose for Empty {}

impl ReadStream for &'static [u8] {}
