use std::{
    cmp,
    io::{self, SeekFrom},
};

use tracing::trace;

use super::Mode;
use crate::{cache::HeaderCache, codec::StreamIo, reader::BackingReader};

/// What the decoder sees of the backing reader during one engine call.
///
/// Built fresh for every decoder call, carrying the mode explicitly, so
/// there's never any doubt about whether a read is cacheable.
pub(crate) struct EngineIo<'a, R>
where
    R: BackingReader,
{
    pub(crate) reader: &'a mut R,
    pub(crate) cache: &'a mut HeaderCache,
    pub(crate) mode: Mode,
    /// Upper bound on the size of a single backing reader request
    pub(crate) chunk_size: usize,
}

impl<R> StreamIo for EngineIo<'_, R>
where
    R: BackingReader,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = cmp::min(buf.len(), self.chunk_size);
        let buf = &mut buf[..len];

        if self.mode == Mode::HeaderParsing {
            // the read moves the reader, so the key is taken before
            let offset = self.reader.offset();
            if let Some(cached) = self.cache.get(offset) {
                let n = cmp::min(cached.len(), buf.len());
                buf[..n].copy_from_slice(&cached[..n]);

                // keep the reader in step with what we just served
                let skipped = self.reader.skip(n as u64);
                if skipped != n as u64 {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!(
                            "backing reader could not skip {n} cached bytes at offset {offset} (skipped {skipped})"
                        ),
                    ));
                }
                return Ok(n);
            }

            let n = self.reader.read(buf)?;
            trace!(offset, n, "header read");
            self.cache.put(offset, &buf[..n]);
            return Ok(n);
        }

        let n = self.reader.read(buf)?;
        trace!(n, chunk_size = self.chunk_size, "payload read");
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> u64 {
        self.reader.skip(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.reader.seek(pos)
    }
}
