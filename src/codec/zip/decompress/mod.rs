use cfg_if::cfg_if;

use crate::{codec::zip::Method, error::CodecError};

mod store_dec;

#[cfg(feature = "deflate")]
mod deflate_dec;

#[cfg(feature = "deflate64")]
mod deflate64_dec;

#[cfg(feature = "bzip2")]
mod bzip2_dec;

#[cfg(feature = "zstd")]
mod zstd_dec;

#[derive(Default, Debug)]
pub(crate) struct DecompressOutcome {
    /// Number of bytes read from input
    pub(crate) bytes_read: usize,

    /// Number of bytes written to output
    pub(crate) bytes_written: usize,
}

/// Whether the input handed to a decompressor is all that's left of the
/// entry's data.
pub(crate) enum HasMoreInput {
    Yes,
    No,
}

/// Wraps whatever error a decompression library reports.
#[cfg(any(feature = "deflate", feature = "deflate64", feature = "bzip2", feature = "zstd"))]
pub(crate) fn decompression_failed(method: Method, e: impl std::fmt::Display) -> CodecError {
    CodecError::Decompression {
        method,
        msg: e.to_string(),
    }
}

pub(crate) trait Decompressor {
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, CodecError>;
}

pub(crate) enum AnyDecompressor {
    Store(store_dec::StoreDec),
    #[cfg(feature = "deflate")]
    Deflate(Box<deflate_dec::DeflateDec>),
    #[cfg(feature = "deflate64")]
    Deflate64(deflate64_dec::Deflate64Dec),
    #[cfg(feature = "bzip2")]
    Bzip2(bzip2_dec::Bzip2Dec),
    #[cfg(feature = "zstd")]
    Zstd(zstd_dec::ZstdDec),
}

impl AnyDecompressor {
    pub(crate) fn new(method: Method) -> Result<Self, CodecError> {
        let dec = match method {
            Method::Store => Self::Store(Default::default()),
            Method::Deflate => {
                cfg_if! {
                    if #[cfg(feature = "deflate")] {
                        Self::Deflate(Default::default())
                    } else {
                        return Err(CodecError::method_not_enabled(method));
                    }
                }
            }
            Method::Deflate64 => {
                cfg_if! {
                    if #[cfg(feature = "deflate64")] {
                        Self::Deflate64(Default::default())
                    } else {
                        return Err(CodecError::method_not_enabled(method));
                    }
                }
            }
            Method::Bzip2 => {
                cfg_if! {
                    if #[cfg(feature = "bzip2")] {
                        Self::Bzip2(Default::default())
                    } else {
                        return Err(CodecError::method_not_enabled(method));
                    }
                }
            }
            Method::Zstd => {
                cfg_if! {
                    if #[cfg(feature = "zstd")] {
                        Self::Zstd(zstd_dec::ZstdDec::new()?)
                    } else {
                        return Err(CodecError::method_not_enabled(method));
                    }
                }
            }
            method => {
                return Err(CodecError::method_not_supported(method));
            }
        };
        Ok(dec)
    }
}

impl Decompressor for AnyDecompressor {
    #[inline]
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, CodecError> {
        // forward to the appropriate decompressor
        match self {
            Self::Store(dec) => dec.decompress(in_buf, out, has_more_input),
            #[cfg(feature = "deflate")]
            Self::Deflate(dec) => dec.decompress(in_buf, out, has_more_input),
            #[cfg(feature = "deflate64")]
            Self::Deflate64(dec) => dec.decompress(in_buf, out, has_more_input),
            #[cfg(feature = "bzip2")]
            Self::Bzip2(dec) => dec.decompress(in_buf, out, has_more_input),
            #[cfg(feature = "zstd")]
            Self::Zstd(dec) => dec.decompress(in_buf, out, has_more_input),
        }
    }
}
