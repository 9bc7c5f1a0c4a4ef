use std::cmp;

use crate::error::CodecError;

use super::{DecompressOutcome, Decompressor, HasMoreInput};

#[derive(Default)]
pub(crate) struct StoreDec;

impl Decompressor for StoreDec {
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        _has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, CodecError> {
        let len = cmp::min(in_buf.len(), out.len());
        out[..len].copy_from_slice(&in_buf[..len]);
        Ok(DecompressOutcome {
            bytes_read: len,
            bytes_written: len,
        })
    }
}
