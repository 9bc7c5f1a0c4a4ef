//! All error types used in this crate
//!
//! [Error] is what callers of the [Engine](crate::Engine) and
//! [Volume](crate::Volume) see. [CodecError] is what decoders report back to
//! the engine, which then tags it with the phase it happened in (opening the
//! stream, parsing a header, decoding payload).

use std::fmt;

use crate::{codec::zip::Method, encoding, volume::EntryHandle};

/// Any error surfaced by the decode engine or the volume on top of it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The decoder could not be allocated, or the codec refused its
    /// configuration. The session is unusable.
    #[error("init: {0}")]
    Init(#[source] CodecError),

    /// The decoder's stream-open handshake failed: malformed archive or
    /// unsupported format. The session is unusable.
    #[error("open: {0}")]
    Open(#[source] CodecError),

    /// An entry header could not be parsed. The session is unusable.
    #[error("header: {0}")]
    HeaderParse(#[source] CodecError),

    /// The backing reader failed. Fatal for the current operation only.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The codec reported corruption while decoding entry data. Fatal for
    /// the current read only.
    #[error("decode: {0}")]
    Decode(#[source] CodecError),

    /// While replaying the archive from the start, the entry being read
    /// never showed up again. This means the backing data changed
    /// underneath the session.
    #[error("entry {name:?} not found while replaying archive")]
    EntryNotFound {
        /// name of the entry we were looking for
        name: String,
    },

    /// The decoder ran out of data while discarding bytes to reach a
    /// requested offset.
    #[error("unexpected end of stream at offset {offset} (wanted to reach {target})")]
    UnexpectedEndOfStream {
        /// offset at which the decoder stopped producing data
        offset: u64,
        /// offset we were trying to reach
        target: u64,
    },

    /// No entry with that name exists in the archive listing.
    #[error("no such entry: {0:?}")]
    NotFound(String),

    /// The handle was never returned by `open_entry`, or was already closed.
    #[error("invalid entry handle {0}")]
    InvalidHandle(EntryHandle),

    /// Data was requested but no entry header has been advanced to.
    #[error("no current entry")]
    NoCurrentEntry,

    /// The session was shut down.
    #[error("session is closed")]
    Closed,

    /// An earlier fatal error made the session unusable.
    #[error("session faulted earlier: {0}")]
    Faulted(String),

    /// The tunables are inconsistent.
    #[error("invalid tunables: {0}")]
    InvalidTunables(&'static str),

    /// More than one release step failed during cleanup.
    #[error("cleanup failed: {}", DisplayAll(.0))]
    Cleanup(Vec<Error>),
}

impl Error {
    /// Whether this error made the session unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Init(_) | Error::Open(_) | Error::HeaderParse(_) | Error::Faulted(_)
        )
    }

    /// Collapses a list of errors gathered during cleanup into a single
    /// result.
    pub(crate) fn aggregate(mut errors: Vec<Error>) -> Result<(), Error> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Cleanup(errors)),
        }
    }
}

struct DisplayAll<'a>(&'a [Error]);

impl fmt::Display for DisplayAll<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            e => std::io::Error::other(e),
        }
    }
}

/// Errors reported by a [Decoder](crate::codec::Decoder) implementation.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Not a valid archive, or a variant that is unsupported.
    #[error("format: {0}")]
    Format(#[from] FormatError),

    /// Something is not supported by this decoder
    #[error("unsupported: {0}")]
    Unsupported(#[from] UnsupportedError),

    /// Invalid UTF-8, Shift-JIS, or any problem encountered while decoding
    /// entry names.
    #[error("encoding: {0}")]
    Encoding(#[from] encoding::DecodingError),

    /// I/O-related error, from one of the stream callbacks
    #[error("io: {0}")]
    IO(#[from] std::io::Error),

    /// Decompression-related error
    #[error("{method:?} decompression error: {msg}")]
    Decompression {
        /// The compression method that failed
        method: Method,
        /// Additional information
        msg: String,
    },
}

impl CodecError {
    /// Create a new error indicating that the given method is not supported.
    pub fn method_not_supported(method: Method) -> Self {
        Self::Unsupported(UnsupportedError::MethodNotSupported(method))
    }

    /// Create a new error indicating that the given method is not enabled.
    pub fn method_not_enabled(method: Method) -> Self {
        Self::Unsupported(UnsupportedError::MethodNotEnabled(method))
    }
}

/// Some part of the archive is not supported by this crate.
#[derive(Debug, thiserror::Error)]
pub enum UnsupportedError {
    /// The compression method is not supported.
    #[error("compression method not supported: {0:?}")]
    MethodNotSupported(Method),

    /// The compression method is supported, but not enabled in this build.
    #[error("compression method supported, but not enabled in this build: {0:?}")]
    MethodNotEnabled(Method),

    /// The entry is encrypted.
    #[error("entry {0:?} is encrypted")]
    Encrypted(String),

    /// The entry defers its sizes to a data descriptor, which a forward-only
    /// reader cannot know in advance.
    #[error("entry {0:?} has no sizes in its local header")]
    UnknownSize(String),

    /// The decoder's input buffer is too small to ever hold a local header.
    #[error("input buffer of {actual} bytes is too small, need at least {minimum}")]
    BufferTooSmall {
        /// minimum buffer size in bytes
        minimum: usize,
        /// configured buffer size in bytes
        actual: usize,
    },
}

/// Specific format errors, mostly due to invalid archives but that could
/// also stem from implementation shortcomings.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The stream does not start with anything we recognize.
    #[error("not a zip archive")]
    NotAZip,

    /// The local file header (before the file data) could not be parsed
    /// correctly.
    #[error("invalid local file header")]
    InvalidLocalHeader,

    /// The data descriptor (after the file data) could not be parsed
    /// correctly.
    #[error("invalid data descriptor")]
    InvalidDataDescriptor,

    /// An extra field (that we support) was not decoded correctly.
    #[error("could not decode extra field")]
    InvalidExtraField,

    /// The input ended in the middle of a record or of entry data.
    #[error("archive is truncated")]
    Truncated,

    /// `decode_chunk` was called before any header was read.
    #[error("no entry is open for decoding")]
    NoEntry,

    /// The uncompressed size didn't match
    #[error("uncompressed size didn't match: expected {expected}, got {actual}")]
    WrongSize {
        /// expected size in bytes (from the local header, data descriptor, etc.)
        expected: u64,
        /// actual size in bytes (from decompressing the entry)
        actual: u64,
    },

    /// The CRC-32 checksum didn't match.
    #[error("checksum didn't match: expected {expected:x?}, got {actual:x?}")]
    WrongChecksum {
        /// expected checksum (from the data descriptor, etc.)
        expected: u32,
        /// actual checksum (from decompressing the entry)
        actual: u32,
    },
}
