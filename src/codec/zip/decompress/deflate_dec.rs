use flate2::{Decompress, FlushDecompress, Status};
use tracing::trace;

use crate::{codec::zip::Method, error::CodecError};

use super::{decompression_failed, DecompressOutcome, Decompressor, HasMoreInput};

pub(crate) struct DeflateDec {
    inner: Decompress,
    eof: bool,
}

impl Default for DeflateDec {
    fn default() -> Self {
        Self {
            // zip entries hold raw deflate streams, no zlib header
            inner: Decompress::new(false),
            eof: false,
        }
    }
}

impl Decompressor for DeflateDec {
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        _has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, CodecError> {
        trace!(
            in_buf_len = in_buf.len(),
            out_len = out.len(),
            total_in = self.inner.total_in(),
            total_out = self.inner.total_out(),
            "DeflateDec::decompress",
        );

        if self.eof {
            return Ok(Default::default());
        }

        let before_in = self.inner.total_in();
        let before_out = self.inner.total_out();

        // never `Finish`: it expects the whole output to fit in `out`, and
        // reads only ever ask for a chunk. The end of the stream is found
        // from `StreamEnd`; a truncated stream stops making progress and
        // fails the size check.
        match self.inner.decompress(in_buf, out, FlushDecompress::None) {
            Ok(Status::StreamEnd) => {
                trace!("deflate stream end");
                self.eof = true;
            }
            Ok(Status::Ok | Status::BufError) => {
                // BufError only means no progress was possible this time
            }
            Err(e) => return Err(decompression_failed(Method::Deflate, e)),
        }

        Ok(DecompressOutcome {
            bytes_read: (self.inner.total_in() - before_in) as usize,
            bytes_written: (self.inner.total_out() - before_out) as usize,
        })
    }
}
