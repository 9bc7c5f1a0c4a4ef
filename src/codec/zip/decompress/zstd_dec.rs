use tracing::trace;
use zstd::stream::raw::{Decoder, InBuffer, Operation, OutBuffer};

use crate::{codec::zip::Method, error::CodecError};

use super::{decompression_failed, DecompressOutcome, Decompressor, HasMoreInput};

pub(crate) struct ZstdDec {
    frame: Decoder<'static>,
    ended: bool,
}

impl ZstdDec {
    pub(crate) fn new() -> Result<Self, CodecError> {
        let frame = Decoder::new().map_err(|e| decompression_failed(Method::Zstd, e))?;
        Ok(Self {
            frame,
            ended: false,
        })
    }
}

impl Decompressor for ZstdDec {
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        _has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, CodecError> {
        if self.ended {
            return Ok(DecompressOutcome::default());
        }

        let mut src = InBuffer::around(in_buf);
        let mut dst = OutBuffer::around(out);
        let hint = self
            .frame
            .run(&mut src, &mut dst)
            .map_err(|e| decompression_failed(Method::Zstd, e))?;
        let outcome = DecompressOutcome {
            bytes_read: src.pos(),
            bytes_written: dst.pos(),
        };
        trace!(?outcome, hint, "zstd");

        // 0: the frame is complete and everything was flushed to `out`
        self.ended = hint == 0;
        Ok(outcome)
    }
}
