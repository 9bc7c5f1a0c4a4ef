use deflate64::InflaterManaged;
use tracing::trace;

use crate::{codec::zip::Method, error::CodecError};

use super::{decompression_failed, DecompressOutcome, Decompressor, HasMoreInput};

/// Deflate64 keeps a 64K window, the inflater state is big enough to be
/// worth boxing.
pub(crate) struct Deflate64Dec {
    inflater: Box<InflaterManaged>,
}

impl Default for Deflate64Dec {
    fn default() -> Self {
        Self {
            inflater: Box::new(InflaterManaged::new()),
        }
    }
}

impl Decompressor for Deflate64Dec {
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        _has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, CodecError> {
        if self.inflater.finished() && !self.inflater.errored() {
            return Ok(DecompressOutcome::default());
        }

        let res = self.inflater.inflate(in_buf, out);
        if res.data_error {
            return Err(decompression_failed(Method::Deflate64, "invalid deflate64 data"));
        }

        let outcome = DecompressOutcome {
            bytes_read: res.bytes_consumed,
            bytes_written: res.bytes_written,
        };
        trace!(?outcome, pending = self.inflater.available_output(), "deflate64");
        Ok(outcome)
    }
}
