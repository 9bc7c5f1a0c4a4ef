//! A forward-only zip decoder.
//!
//! Unlike a regular zip reader, this never looks at the central directory:
//! it walks local file headers from the start of the archive, the way a
//! streaming unzipper would. That's what makes it usable over a backing
//! reader that is expensive to seek, and also what makes it a faithful
//! stand-in for any other forward-only format.
//!
//! Limitations that come with reading forward:
//!   - entries that defer their sizes to a data descriptor can only be
//!     handled if the writer also filled in sizes in the local header, or
//!     if they're empty
//!   - archives with a prefix (self-extracting executables) are not
//!     recognized
//!
//! Encrypted entries are listed like any other, reading them fails.

use std::{cmp, io::SeekFrom};

use oval::Buffer;
use tracing::{debug, trace};
use winnow::{
    error::ErrMode,
    stream::{AsBytes, Offset},
    Partial,
};

mod decompress;
mod parse;

pub use parse::{DataDescriptorRecord, LocalFileHeaderRecord, Method, MsdosTimestamp};

use self::{
    decompress::{AnyDecompressor, Decompressor, HasMoreInput},
    parse::{LocalEntry, CENTRAL_DIRECTORY_SIGNATURE, EOCD64_SIGNATURE, EOCD_SIGNATURE},
};
use super::{Codec, Decoder, StreamIo};
use crate::{
    entry::Entry,
    error::{CodecError, FormatError, UnsupportedError},
};

/// Allocates [ZipDecoder]s.
#[derive(Debug, Clone)]
pub struct ZipCodec {
    buffer_capacity: usize,
}

impl ZipCodec {
    /// Default input buffer capacity for decoders
    pub const DEFAULT_BUFFER_CAPACITY: usize = 256 * 1024;

    /// The input buffer must hold a whole local file header, which
    /// [`allocate`](Codec::allocate) checks.
    pub fn with_buffer_capacity(buffer_capacity: usize) -> Self {
        Self { buffer_capacity }
    }
}

impl Default for ZipCodec {
    fn default() -> Self {
        Self::with_buffer_capacity(Self::DEFAULT_BUFFER_CAPACITY)
    }
}

impl Codec for ZipCodec {
    type Decoder = ZipDecoder;

    fn allocate(&self) -> Result<ZipDecoder, CodecError> {
        if self.buffer_capacity < LocalFileHeaderRecord::MAX_SIZE {
            return Err(UnsupportedError::BufferTooSmall {
                minimum: LocalFileHeaderRecord::MAX_SIZE,
                actual: self.buffer_capacity,
            }
            .into());
        }

        Ok(ZipDecoder {
            state: State::Closed,
            buffer: Buffer::with_capacity(self.buffer_capacity),
            eof: false,
        })
    }
}

struct EntryState {
    local: LocalEntry,

    /// Amount of bytes we've fed to the decompressor
    compressed_bytes: u64,

    /// Amount of bytes the decompressor has produced
    uncompressed_bytes: u64,

    /// CRC32 hash of the decompressed data
    hasher: crc32fast::Hasher,

    /// Created on the first decode, so that listing an archive doesn't
    /// require support for every method in it.
    decompressor: Option<AnyDecompressor>,

    /// All data (and the data descriptor, if any) has been consumed.
    done: bool,
}

#[derive(Default)]
enum State {
    /// Not opened, or freed
    Closed,

    /// Positioned right before a record
    ReadLocalHeader,

    /// Positioned in the data of an entry
    ReadData(Box<EntryState>),

    /// We've run into the central directory, or the end of input
    Finished,

    #[default]
    Transition,
}

/// Streams a zip archive, one local file header at a time.
pub struct ZipDecoder {
    state: State,
    buffer: Buffer,
    eof: bool,
}

impl ZipDecoder {
    /// Reads more input into the buffer, returns the number of bytes read.
    fn fill(&mut self, io: &mut dyn StreamIo) -> Result<usize, CodecError> {
        if self.eof {
            return Ok(0);
        }
        if self.buffer.available_space() == 0 {
            self.buffer.shift();
        }
        if self.buffer.available_space() == 0 {
            return Ok(0);
        }

        let n = io.read(self.buffer.space())?;
        self.buffer.fill(n);
        if n == 0 {
            trace!("reached end of input");
            self.eof = true;
        }
        Ok(n)
    }

    /// Makes sure at least `n` bytes are buffered, unless input runs out.
    fn fill_at_least(&mut self, io: &mut dyn StreamIo, n: usize) -> Result<(), CodecError> {
        while self.buffer.available_data() < n {
            if self.fill(io)? == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Runs a streaming parser over the buffer, reading more input for as
    /// long as it reports needing it.
    fn parse_record<T>(
        &mut self,
        io: &mut dyn StreamIo,
        mut parser: impl FnMut(&mut Partial<&'_ [u8]>) -> winnow::PResult<T>,
        invalid: FormatError,
    ) -> Result<T, CodecError> {
        loop {
            let mut input = Partial::new(self.buffer.data());
            match parser(&mut input) {
                Ok(record) => {
                    let consumed = input.as_bytes().offset_from(&self.buffer.data());
                    self.buffer.consume(consumed);
                    return Ok(record);
                }
                Err(ErrMode::Incomplete(_)) => {
                    if self.fill(io)? == 0 {
                        return Err(FormatError::Truncated.into());
                    }
                }
                Err(_e) => return Err(invalid.into()),
            }
        }
    }

    /// For an entry whose sizes are deferred: tells whether a data
    /// descriptor with zero sizes follows the header right away, in which
    /// case the entry is empty. Nothing is consumed.
    fn empty_descriptor_follows(
        &mut self,
        io: &mut dyn StreamIo,
        is_zip64: bool,
    ) -> Result<bool, CodecError> {
        let len = DataDescriptorRecord::SIGNATURE.len() + if is_zip64 { 20 } else { 12 };
        self.fill_at_least(io, len)?;

        let data = self.buffer.data();
        // without a signature, the first bytes of real data could pass for
        // a descriptor
        if !data.starts_with(DataDescriptorRecord::SIGNATURE.as_bytes()) {
            return Ok(false);
        }
        let mut input = Partial::new(data);
        let empty = matches!(
            DataDescriptorRecord::mk_parser(is_zip64)(&mut input),
            Ok(descriptor) if descriptor.compressed_size == 0 && descriptor.uncompressed_size == 0
        );
        Ok(empty)
    }

    /// Skips whatever remains of an entry's data, then its data descriptor.
    fn skip_rest(&mut self, io: &mut dyn StreamIo, entry: &EntryState) -> Result<(), CodecError> {
        if entry.done {
            return Ok(());
        }

        let mut remaining = entry.local.compressed_size - entry.compressed_bytes;
        trace!(name = %entry.local.entry.name, remaining, "skipping rest of entry");

        let buffered = cmp::min(self.buffer.available_data() as u64, remaining);
        self.buffer.consume(buffered as usize);
        remaining -= buffered;

        if remaining > 0 {
            // nothing is buffered anymore, so the stream is right where we
            // want to skip from
            let skipped = io.skip(remaining);
            if skipped == remaining {
                remaining = 0;
            } else if let Ok(delta) = i64::try_from(remaining) {
                if io.seek(SeekFrom::Current(delta)).is_ok() {
                    remaining = 0;
                }
            }
        }

        while remaining > 0 {
            let n = self.fill(io)?;
            if n == 0 {
                return Err(FormatError::Truncated.into());
            }
            let consumed = cmp::min(self.buffer.available_data() as u64, remaining);
            self.buffer.consume(consumed as usize);
            remaining -= consumed;
        }

        if entry.local.has_data_descriptor() {
            let descriptor = self.parse_record(
                io,
                DataDescriptorRecord::mk_parser(entry.local.is_zip64),
                FormatError::InvalidDataDescriptor,
            )?;
            trace!(?descriptor, "skipped data descriptor");
        }
        Ok(())
    }

    /// Called once the decompressor has nothing more to give: reads the
    /// data descriptor, if any, and checks size and checksum.
    fn finish_entry(&mut self, io: &mut dyn StreamIo) -> Result<(), CodecError> {
        let State::ReadData(entry) = &mut self.state else {
            return Err(FormatError::NoEntry.into());
        };

        // leftovers the decompressor didn't want (trailers, padding)
        let leftover = entry.local.compressed_size - entry.compressed_bytes;
        if leftover > 0 {
            trace!(leftover, "dropping unconsumed entry data");
            self.buffer.consume(leftover as usize);
            entry.compressed_bytes += leftover;
        }

        let is_zip64 = entry.local.is_zip64;
        let descriptor = if entry.local.has_data_descriptor() {
            Some(self.parse_record(
                io,
                DataDescriptorRecord::mk_parser(is_zip64),
                FormatError::InvalidDataDescriptor,
            )?)
        } else {
            None
        };

        let State::ReadData(entry) = &mut self.state else {
            unreachable!()
        };
        entry.done = true;

        let (expected_size, expected_crc32) = match descriptor.as_ref() {
            Some(descriptor) => (descriptor.uncompressed_size, descriptor.crc32),
            None => (entry.local.entry.size, entry.local.crc32),
        };
        let actual_crc32 = entry.hasher.clone().finalize();

        if expected_size != entry.uncompressed_bytes {
            return Err(FormatError::WrongSize {
                expected: expected_size,
                actual: entry.uncompressed_bytes,
            }
            .into());
        }

        if expected_crc32 != 0 && expected_crc32 != actual_crc32 {
            return Err(FormatError::WrongChecksum {
                expected: expected_crc32,
                actual: actual_crc32,
            }
            .into());
        }

        debug!(
            name = %entry.local.entry.name,
            size = entry.uncompressed_bytes,
            "entry verified"
        );
        Ok(())
    }
}

impl Decoder for ZipDecoder {
    fn open_stream(&mut self, io: &mut dyn StreamIo) -> Result<(), CodecError> {
        self.buffer.reset();
        self.eof = false;
        self.state = State::Closed;

        self.fill_at_least(io, 4)?;
        let data = self.buffer.data();
        if data.len() < 4 {
            return Err(FormatError::NotAZip.into());
        }

        let signature = &data[..4];
        if signature == LocalFileHeaderRecord::SIGNATURE.as_bytes() {
            self.state = State::ReadLocalHeader;
        } else if signature == EOCD_SIGNATURE {
            debug!("archive has no entries");
            self.state = State::Finished;
        } else {
            return Err(FormatError::NotAZip.into());
        }
        Ok(())
    }

    fn next_header(&mut self, io: &mut dyn StreamIo) -> Result<Option<Entry>, CodecError> {
        match std::mem::take(&mut self.state) {
            State::Closed => {
                self.state = State::Closed;
                return Err(FormatError::NoEntry.into());
            }
            State::Finished => {
                self.state = State::Finished;
                return Ok(None);
            }
            State::ReadData(entry) => {
                self.state = State::ReadLocalHeader;
                self.skip_rest(io, &entry)?;
            }
            State::ReadLocalHeader => {
                self.state = State::ReadLocalHeader;
            }
            State::Transition => unreachable!(),
        }

        self.fill_at_least(io, 4)?;
        let data = self.buffer.data();
        if data.is_empty() {
            debug!("end of input without central directory");
            self.state = State::Finished;
            return Ok(None);
        }
        if data.len() < 4 {
            return Err(FormatError::Truncated.into());
        }

        let signature = &data[..4];
        if signature == CENTRAL_DIRECTORY_SIGNATURE
            || signature == EOCD_SIGNATURE
            || signature == EOCD64_SIGNATURE
        {
            debug!("reached central directory, no more entries");
            self.state = State::Finished;
            return Ok(None);
        }

        let header = self.parse_record(
            io,
            LocalFileHeaderRecord::parser,
            FormatError::InvalidLocalHeader,
        )?;
        trace!(local_file_header = ?header, "parsed local file header");

        let local = header.resolve()?;
        if local.sizes_deferred() && !self.empty_descriptor_follows(io, local.is_zip64)? {
            // there'd be no telling where the data ends, nor where the next
            // header starts
            return Err(UnsupportedError::UnknownSize(local.entry.name).into());
        }
        let entry = local.entry.clone();
        self.state = State::ReadData(Box::new(EntryState {
            local,
            compressed_bytes: 0,
            uncompressed_bytes: 0,
            hasher: crc32fast::Hasher::new(),
            decompressor: None,
            done: false,
        }));
        Ok(Some(entry))
    }

    fn decode_chunk(&mut self, io: &mut dyn StreamIo, out: &mut [u8]) -> Result<usize, CodecError> {
        loop {
            let State::ReadData(entry) = &mut self.state else {
                return Err(FormatError::NoEntry.into());
            };
            if entry.done {
                return Ok(0);
            }

            let decompressor = match &mut entry.decompressor {
                Some(decompressor) => decompressor,
                slot => {
                    if entry.local.is_encrypted() {
                        let name = entry.local.entry.name.clone();
                        return Err(UnsupportedError::Encrypted(name).into());
                    }
                    slot.insert(AnyDecompressor::new(entry.local.method)?)
                }
            };

            let remaining = entry.local.compressed_size - entry.compressed_bytes;
            let in_buf = self.buffer.data();
            // don't feed the decompressor bytes beyond the entry's compressed size
            let in_buf = &in_buf[..cmp::min(in_buf.len() as u64, remaining) as usize];
            let has_more_input = if in_buf.len() as u64 == remaining {
                HasMoreInput::No
            } else {
                HasMoreInput::Yes
            };
            let all_input_buffered = matches!(has_more_input, HasMoreInput::No);

            let outcome = decompressor.decompress(in_buf, out, has_more_input)?;
            self.buffer.consume(outcome.bytes_read);
            entry.compressed_bytes += outcome.bytes_read as u64;

            if outcome.bytes_written > 0 {
                entry.hasher.update(&out[..outcome.bytes_written]);
                entry.uncompressed_bytes += outcome.bytes_written as u64;
                return Ok(outcome.bytes_written);
            }

            if outcome.bytes_read > 0 {
                continue;
            }

            // no progress at all
            if all_input_buffered {
                trace!(
                    compressed_bytes = entry.compressed_bytes,
                    uncompressed_bytes = entry.uncompressed_bytes,
                    "decompressor is done"
                );
                self.finish_entry(io)?;
                return Ok(0);
            }

            if self.fill(io)? == 0 {
                return Err(if self.eof {
                    FormatError::Truncated.into()
                } else {
                    CodecError::Decompression {
                        method: entry_method(&self.state),
                        msg: "decompressor made no progress with a full buffer".into(),
                    }
                });
            }
        }
    }

    fn free_stream(&mut self) -> Result<(), CodecError> {
        self.state = State::Closed;
        self.buffer.reset();
        self.eof = false;
        Ok(())
    }
}

fn entry_method(state: &State) -> Method {
    match state {
        State::ReadData(entry) => entry.local.method,
        _ => Method::Store,
    }
}
