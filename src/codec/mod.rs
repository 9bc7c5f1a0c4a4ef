//! The decoder contract.
//!
//! A decoder is forward-only: it walks headers in archive order and streams
//! the data of the current entry, pulling bytes through a [StreamIo] handed
//! to it on every call. It never sees the backing reader directly, which is
//! what lets the engine serve header reads from its cache and meter payload
//! reads.
//!
//! Random access is the engine's job, not the decoder's: going backwards
//! means tearing the decoder down and replaying from the start.

use std::io::{self, SeekFrom};

use crate::{entry::Entry, error::CodecError};

pub mod zip;

/// The byte source a decoder pulls from.
pub trait StreamIo {
    /// Reads up to `buf.len()` bytes. Returns 0 at end of input.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Skips `n` bytes without reading them. Returns how many bytes were
    /// skipped, 0 if skipping isn't possible right now.
    fn skip(&mut self, n: u64) -> u64;

    /// Moves to an arbitrary position.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;
}

/// A forward-only archive decoder, see the [module docs](self).
pub trait Decoder {
    /// Performs the stream-open handshake: recognizes the format and
    /// positions the decoder before the first header.
    fn open_stream(&mut self, io: &mut dyn StreamIo) -> Result<(), CodecError>;

    /// Moves to the next header, skipping whatever remains of the current
    /// entry. Returns `None` once the archive has no more entries.
    fn next_header(&mut self, io: &mut dyn StreamIo) -> Result<Option<Entry>, CodecError>;

    /// Decodes the next bytes of the current entry into `out`.
    ///
    /// Returns 0 when the entry has been fully decoded (and verified, if the
    /// format carries checksums). `out` must not be empty.
    fn decode_chunk(&mut self, io: &mut dyn StreamIo, out: &mut [u8]) -> Result<usize, CodecError>;

    /// Releases stream state. The decoder may be opened again afterwards.
    fn free_stream(&mut self) -> Result<(), CodecError> {
        Ok(())
    }
}

/// Allocates decoders. The engine asks for a fresh one every time it
/// (re)initializes.
pub trait Codec {
    /// The decoder this codec allocates
    type Decoder: Decoder;

    /// Allocates a decoder, or fails if the configuration is unusable.
    fn allocate(&self) -> Result<Self::Decoder, CodecError>;
}
