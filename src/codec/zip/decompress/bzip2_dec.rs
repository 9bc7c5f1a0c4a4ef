use bzip2::{Decompress, Status};
use tracing::trace;

use crate::{codec::zip::Method, error::CodecError};

use super::{decompression_failed, DecompressOutcome, Decompressor, HasMoreInput};

/// An entry holds exactly one bzip2 stream, nothing past its end is read.
pub(crate) struct Bzip2Dec {
    stream: Decompress,
    ended: bool,
}

impl Default for Bzip2Dec {
    fn default() -> Self {
        Self {
            // `false` picks the regular algorithm over the slower,
            // low-memory one
            stream: Decompress::new(false),
            ended: false,
        }
    }
}

impl Decompressor for Bzip2Dec {
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        _has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, CodecError> {
        if self.ended {
            return Ok(DecompressOutcome::default());
        }

        let (total_in, total_out) = (self.stream.total_in(), self.stream.total_out());
        let status = self
            .stream
            .decompress(in_buf, out)
            .map_err(|e| decompression_failed(Method::Bzip2, e))?;
        let outcome = DecompressOutcome {
            bytes_read: (self.stream.total_in() - total_in) as usize,
            bytes_written: (self.stream.total_out() - total_out) as usize,
        };
        trace!(?status, ?outcome, "bzip2");

        self.ended = status == Status::StreamEnd;
        Ok(outcome)
    }
}
