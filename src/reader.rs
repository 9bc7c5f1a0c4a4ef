//! Backing readers: byte sources over the raw archive blob.
//!
//! The engine only ever talks to a [BackingReader]. Two implementations
//! ship with the crate: [ReadAtReader], over anything implementing
//! [positioned_io::ReadAt] (files, in-memory buffers), and [SeekReader],
//! over anything implementing [Read] + [Seek].

use std::io::{self, Read, Seek, SeekFrom};

use tracing::trace;

/// A sequential, seekable byte source over an archive.
///
/// Reads are synchronous from the engine's point of view: each call returns
/// a definite byte count or an error before the engine proceeds.
pub trait BackingReader {
    /// Reads up to `buf.len()` bytes at the current offset, advancing it.
    /// Returns 0 at end of input.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Advances the current offset by `n` bytes without performing I/O.
    ///
    /// Returns the number of bytes skipped, which is less than `n` only on
    /// failure (0 by convention). The default implementation doesn't know
    /// how to skip and always returns 0, callers then fall back to
    /// [Self::seek] or to reading.
    fn skip(&mut self, n: u64) -> u64 {
        let _ = n;
        0
    }

    /// Moves the current offset, returning the new one.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;

    /// The current offset, from the start of the archive.
    fn offset(&self) -> u64;

    /// Releases the underlying resource.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<B> BackingReader for Box<B>
where
    B: BackingReader + ?Sized,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn skip(&mut self, n: u64) -> u64 {
        (**self).skip(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        (**self).seek(pos)
    }

    fn offset(&self) -> u64 {
        (**self).offset()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// Resolves a [SeekFrom] against a current offset and a total size.
pub(crate) fn resolve_seek(pos: SeekFrom, current: u64, size: u64) -> io::Result<u64> {
    let (base, delta) = match pos {
        SeekFrom::Start(offset) => return Ok(offset),
        SeekFrom::Current(delta) => (current, delta),
        SeekFrom::End(delta) => (size, delta),
    };
    base.checked_add_signed(delta).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid seek to a negative or overflowing position",
        )
    })
}

cfg_if::cfg_if! {
    if #[cfg(feature = "file")] {
        use positioned_io::ReadAt;

        /// A [BackingReader] over any [ReadAt], with a known size.
        ///
        /// Skips and seeks never perform I/O, which makes this a good fit
        /// for sources where every read is a round trip.
        pub struct ReadAtReader<R>
        where
            R: ReadAt,
        {
            inner: R,
            size: u64,
            offset: u64,
            closed: bool,
        }

        impl<R> ReadAtReader<R>
        where
            R: ReadAt,
        {
            /// Wraps `inner`, which holds `size` bytes.
            pub fn with_size(inner: R, size: u64) -> Self {
                Self {
                    inner,
                    size,
                    offset: 0,
                    closed: false,
                }
            }

            /// Total size of the source in bytes
            pub fn size(&self) -> u64 {
                self.size
            }

            /// Returns the wrapped source
            pub fn into_inner(self) -> R {
                self.inner
            }
        }

        impl ReadAtReader<std::fs::File> {
            /// Opens a file on disk.
            pub fn open(path: impl AsRef<std::path::Path>) -> io::Result<Self> {
                let file = std::fs::File::open(path)?;
                let size = file.metadata()?.len();
                Ok(Self::with_size(file, size))
            }
        }

        impl<R> BackingReader for ReadAtReader<R>
        where
            R: ReadAt,
        {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.closed {
                    return Err(io::Error::new(io::ErrorKind::Other, "reader is closed"));
                }
                if self.offset >= self.size {
                    return Ok(0);
                }

                let max = std::cmp::min(buf.len() as u64, self.size - self.offset) as usize;
                let n = self.inner.read_at(self.offset, &mut buf[..max])?;
                trace!(offset = self.offset, n, "read_at");
                self.offset += n as u64;
                Ok(n)
            }

            fn skip(&mut self, n: u64) -> u64 {
                if self.closed {
                    return 0;
                }
                match self.offset.checked_add(n) {
                    Some(offset) => {
                        self.offset = offset;
                        n
                    }
                    None => 0,
                }
            }

            fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
                self.offset = resolve_seek(pos, self.offset, self.size)?;
                Ok(self.offset)
            }

            fn offset(&self) -> u64 {
                self.offset
            }

            fn close(&mut self) -> io::Result<()> {
                self.closed = true;
                Ok(())
            }
        }
    }
}

/// A [BackingReader] over any [Read] + [Seek], like a
/// [std::io::Cursor] or a [std::fs::File].
///
/// The current offset is tracked on our side so [BackingReader::offset]
/// doesn't need `&mut` access to the inner seeker.
pub struct SeekReader<R>
where
    R: Read + Seek,
{
    inner: R,
    offset: u64,
}

impl<R> SeekReader<R>
where
    R: Read + Seek,
{
    /// Wraps `inner`, rewinding it to the start.
    pub fn new(mut inner: R) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self { inner, offset: 0 })
    }

    /// Returns the wrapped source
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R> BackingReader for SeekReader<R>
where
    R: Read + Seek,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> u64 {
        let Ok(delta) = i64::try_from(n) else {
            return 0;
        };
        match self.inner.seek(SeekFrom::Current(delta)) {
            Ok(offset) => {
                self.offset = offset;
                n
            }
            Err(e) => {
                trace!(%e, "skip failed");
                0
            }
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.offset = self.inner.seek(pos)?;
        Ok(self.offset)
    }

    fn offset(&self) -> u64 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn seek_reader_tracks_offset() {
        let mut rd = SeekReader::new(Cursor::new(b"0123456789".to_vec())).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(rd.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(rd.skip(2), 2);
        assert_eq!(rd.offset(), 6);
        assert_eq!(rd.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"6789");
        assert_eq!(rd.seek(SeekFrom::Start(1)).unwrap(), 1);
        assert_eq!(rd.offset(), 1);
    }

    #[test]
    fn negative_seeks_are_rejected() {
        assert!(resolve_seek(SeekFrom::Current(-5), 2, 10).is_err());
        assert_eq!(resolve_seek(SeekFrom::End(-3), 2, 10).unwrap(), 7);
    }

    #[cfg(feature = "file")]
    #[test]
    fn read_at_reader_stops_at_size() {
        let mut rd = ReadAtReader::with_size(b"abcdef".to_vec(), 6);
        let mut buf = [0u8; 16];
        assert_eq!(rd.skip(4), 4);
        assert_eq!(rd.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(rd.read(&mut buf).unwrap(), 0);
        rd.close().unwrap();
        assert!(rd.read(&mut buf).is_err());
    }
}
