//! Byte sources the demuxer reads from.
//!
//! Random access is opt-in: wrap a `Read + Seek` value in [`Seekable`] to enable
//! seeking, exact length queries and cursor-restoring format checks, or wrap a
//! plain `Read` value in [`Sequential`] for forward-only decoding. Wrapping a
//! seekable value in [`Sequential`] hides its random access.

use std::io::{self, Read, Seek, SeekFrom};

/// A blocking byte source with optional random access.
pub trait ByteSource {
    /// Reads into `buf`, returning the number of bytes read (0 at end of input).
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Whether [`seek`](ByteSource::seek) and [`byte_len`](ByteSource::byte_len) are usable.
    fn is_seekable(&self) -> bool;

    /// Moves the cursor to an absolute byte offset.
    fn seek(&mut self, offset: u64) -> io::Result<u64>;

    /// Current absolute byte offset of the cursor.
    fn position(&mut self) -> io::Result<u64>;

    /// Total length of the source in bytes. The cursor is left unchanged.
    fn byte_len(&mut self) -> io::Result<u64>;
}

fn unsupported() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "byte source is not seekable")
}

/// Random-access byte source.
#[derive(Debug)]
pub struct Seekable<R: Read + Seek>(pub R);

impl<R: Read + Seek> Seekable<R> {
    pub fn new(inner: R) -> Self {
        Self(inner)
    }

    pub fn into_inner(self) -> R {
        self.0
    }
}

impl<R: Read + Seek> ByteSource for Seekable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn seek(&mut self, offset: u64) -> io::Result<u64> {
        self.0.seek(SeekFrom::Start(offset))
    }

    fn position(&mut self) -> io::Result<u64> {
        self.0.stream_position()
    }

    fn byte_len(&mut self) -> io::Result<u64> {
        let here = self.0.stream_position()?;
        let len = self.0.seek(SeekFrom::End(0))?;
        if here != len {
            self.0.seek(SeekFrom::Start(here))?;
        }
        Ok(len)
    }
}

/// Forward-only byte source.
///
/// Tracks how many bytes were consumed so that [`position`](ByteSource::position)
/// stays meaningful for logging, but refuses to seek.
#[derive(Debug)]
pub struct Sequential<R: Read> {
    inner: R,
    consumed: u64,
}

impl<R: Read> Sequential<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, consumed: 0 }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> ByteSource for Sequential<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed += n as u64;
        Ok(n)
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn seek(&mut self, _offset: u64) -> io::Result<u64> {
        Err(unsupported())
    }

    fn position(&mut self) -> io::Result<u64> {
        Ok(self.consumed)
    }

    fn byte_len(&mut self) -> io::Result<u64> {
        Err(unsupported())
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn is_seekable(&self) -> bool {
        (**self).is_seekable()
    }

    fn seek(&mut self, offset: u64) -> io::Result<u64> {
        (**self).seek(offset)
    }

    fn position(&mut self) -> io::Result<u64> {
        (**self).position()
    }

    fn byte_len(&mut self) -> io::Result<u64> {
        (**self).byte_len()
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn is_seekable(&self) -> bool {
        (**self).is_seekable()
    }

    fn seek(&mut self, offset: u64) -> io::Result<u64> {
        (**self).seek(offset)
    }

    fn position(&mut self) -> io::Result<u64> {
        (**self).position()
    }

    fn byte_len(&mut self) -> io::Result<u64> {
        (**self).byte_len()
    }
}
