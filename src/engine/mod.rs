//! The decode engine: random-access reads on top of a forward-only decoder.
//!
//! The decoder can only ever move forward through the archive. The engine
//! keeps track of where, within the current entry, the decoder stands, and
//! bridges the gap to whatever offset the caller asks for:
//!
//!   - reading at the current position is served from the decompress
//!     buffer, or by decoding the next bytes into it
//!   - reading ahead decodes the bytes in between and throws them away
//!   - reading behind tears the decoder down, seeks the backing reader to
//!     the start of the archive, and replays headers until the entry shows
//!     up again
//!
//! Replays would re-fetch every header from the backing reader, which is
//! why reads made while parsing headers go through the [HeaderCache].
//!
//! Throughout, the decoder sits at `last_decoded_offset + buffered bytes`
//! within the current entry.

use std::{cmp, io::SeekFrom};

use tracing::{debug, trace, warn};

use crate::{
    cache::{CacheStats, HeaderCache},
    codec::{zip::ZipCodec, Codec, Decoder},
    config::Tunables,
    entry::Entry,
    error::{CodecError, Error, FormatError},
    reader::BackingReader,
};

mod buffer;
mod io;

use self::{buffer::DecompressBuffer, io::EngineIo};

/// Whether reads made on behalf of the decoder are for headers (which get
/// cached) or for entry data (which doesn't).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Enumerating entries: reads are recorded in the header cache
    HeaderParsing,
    /// Decoding entry data: reads go straight to the backing reader
    PayloadStreaming,
}

/// Lifecycle of an [Engine].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// No decoder allocated
    Uninitialized,
    /// Decoder open, no header read yet
    Initialized,
    /// Last operation moved through headers
    EnumeratingHeaders,
    /// Last operation read entry data
    StreamingPayload,
    /// Shut down, every operation fails with [Error::Closed]
    Closed,
    /// An unrecoverable error happened, every operation fails with
    /// [Error::Faulted]
    Faulted(String),
}

/// Where the engine is within the current entry.
#[derive(Debug, Default, Clone)]
struct DecodeCursor {
    /// Name of the current entry
    name: String,

    /// How many bytes of the current entry have been handed out (or
    /// skipped over). Only grows, until the next header or replay.
    last_decoded_offset: u64,

    /// Length of the last read, used by [Engine::prefetch]
    last_requested_length: u64,
}

/// Counters, mostly useful to check that access patterns are efficient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// How many times the decoder was torn down and headers replayed to
    /// serve a backwards read (or to recover from an error)
    pub replays: u64,

    /// Decoded bytes thrown away to serve forward jumps
    pub discarded_bytes: u64,

    /// Header cache counters
    pub cache: CacheStats,
}

/// Random-access reads over a forward-only [Decoder], see the
/// [module docs](self).
///
/// Not meant for concurrent use: every operation takes `&mut self`, and
/// callers that receive requests from several places should serialize them
/// (see [dispatch](crate::dispatch) when the `tokio` feature is enabled).
pub struct Engine<R, C = ZipCodec>
where
    R: BackingReader,
    C: Codec,
{
    reader: R,
    codec: C,
    tunables: Tunables,
    cache: HeaderCache,
    decoder: Option<C::Decoder>,
    state: State,

    current: Option<Entry>,
    /// Enumeration index of the last header we advanced to
    index: Option<usize>,
    next_index: usize,
    cursor: DecodeCursor,

    buffer: DecompressBuffer,
    /// Scratch space for forward jumps, allocated on first use
    discard: Vec<u8>,

    /// Set when a read failed halfway: the decoder's position is unknown and
    /// the next read has to replay.
    needs_rebuild: bool,

    replays: u64,
    discarded_bytes: u64,
}

impl<R, C> Engine<R, C>
where
    R: BackingReader,
    C: Codec,
{
    /// Creates an engine. Nothing is read until the first operation.
    pub fn new(reader: R, codec: C, tunables: Tunables) -> Result<Self, Error> {
        tunables.validate()?;

        Ok(Self {
            reader,
            codec,
            cache: HeaderCache::new(tunables.header_cache_limit),
            buffer: DecompressBuffer::new(tunables.decompress_buffer_capacity),
            tunables,
            decoder: None,
            state: State::Uninitialized,
            current: None,
            index: None,
            next_index: 0,
            cursor: Default::default(),
            discard: Vec::new(),
            needs_rebuild: false,
            replays: 0,
            discarded_bytes: 0,
        })
    }

    /// Allocates a decoder and runs its stream-open handshake, from the start
    /// of the archive. Any previous decoder is released first.
    pub fn initialize(&mut self) -> Result<(), Error> {
        self.ensure_usable()?;
        self.release_decoder()?;

        if self.reader.offset() != 0 {
            self.reader.seek(SeekFrom::Start(0))?;
        }

        let mut decoder = match self.codec.allocate() {
            Ok(decoder) => decoder,
            Err(e) => return Err(self.fault(Error::Init(e))),
        };

        let mut io = EngineIo {
            reader: &mut self.reader,
            cache: &mut self.cache,
            mode: Mode::HeaderParsing,
            chunk_size: self.tunables.header_chunk_size,
        };
        if let Err(e) = decoder.open_stream(&mut io) {
            let _ = decoder.free_stream();
            return Err(self.fault(codec_error(e, Error::Open)));
        }
        debug!("decoder initialized");

        self.decoder = Some(decoder);
        self.state = State::Initialized;
        self.current = None;
        self.index = None;
        self.next_index = 0;
        self.cursor = Default::default();
        self.buffer.clear();
        self.needs_rebuild = false;
        Ok(())
    }

    /// Moves to the next entry in the archive. Returns `None` at the end of
    /// the archive, which is not an error.
    ///
    /// Initializes the engine if needed.
    pub fn advance_header(&mut self) -> Result<Option<Entry>, Error> {
        self.ensure_usable()?;

        if self.needs_rebuild {
            if let Some(index) = self.index {
                let name = self.cursor.name.clone();
                self.replay_to(index, &name)?;
            } else {
                // never got past a header: start over
                self.initialize()?;
            }
        } else if self.decoder.is_none() {
            self.initialize()?;
        }

        self.advance()
    }

    fn advance(&mut self) -> Result<Option<Entry>, Error> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(Error::NoCurrentEntry);
        };

        let mut io = EngineIo {
            reader: &mut self.reader,
            cache: &mut self.cache,
            mode: Mode::HeaderParsing,
            chunk_size: self.tunables.header_chunk_size,
        };
        let res = decoder.next_header(&mut io);
        self.state = State::EnumeratingHeaders;
        self.buffer.clear();

        match res {
            Ok(Some(entry)) => {
                trace!(index = self.next_index, name = %entry.name, size = entry.size, "advanced to entry");
                self.cursor = DecodeCursor {
                    name: entry.name.clone(),
                    last_decoded_offset: 0,
                    last_requested_length: 0,
                };
                self.index = Some(self.next_index);
                self.next_index += 1;
                self.current = Some(entry.clone());
                Ok(Some(entry))
            }
            Ok(None) => {
                debug!(entries = self.next_index, "end of archive");
                self.current = None;
                Ok(None)
            }
            Err(e) => {
                let e = codec_error(e, Error::HeaderParse);
                if !e.is_fatal() {
                    // the decoder may be anywhere now, but the entry it was
                    // on is still the one reads are for: the next read
                    // replays to it
                    self.needs_rebuild = true;
                }
                Err(self.fault(e))
            }
        }
    }

    /// Reads bytes of the current entry starting at `offset` into `buf`.
    ///
    /// Returns the number of bytes read, which is `min(buf.len(), size -
    /// offset)`: reading at or past the end of the entry returns 0, and is
    /// not an error.
    ///
    /// Reads may come in any order. Sequential reads are cheapest, reads
    /// ahead of the last one cost decoding the gap, reads behind it cost a
    /// full replay.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, Error> {
        self.ensure_usable()?;
        let size = match self.current.as_ref() {
            Some(entry) => entry.size,
            None => return Err(Error::NoCurrentEntry),
        };

        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let wanted = cmp::min(buf.len() as u64, size - offset) as usize;
        self.state = State::StreamingPayload;

        let mut served = 0;
        while served < wanted {
            let pos = offset + served as u64;
            // fills stop at the end of the entry anyway
            let requested = (buf.len() - served) as u64;
            match self.read_chunk(pos, &mut buf[served..wanted], requested) {
                Ok(0) => {
                    self.needs_rebuild = true;
                    return Err(Error::UnexpectedEndOfStream {
                        offset: pos,
                        target: size,
                    });
                }
                Ok(n) => served += n,
                Err(e) => {
                    if !e.is_fatal() {
                        self.needs_rebuild = true;
                    }
                    return Err(e);
                }
            }
        }

        if offset + served as u64 == size {
            if let Err(e) = self.verify_end(size) {
                self.needs_rebuild = true;
                return Err(e);
            }
        }
        Ok(served)
    }

    /// Once the last byte of an entry is served, asks the decoder for one
    /// more: that's when it checks what it decoded against sizes and
    /// checksums recorded in the archive.
    fn verify_end(&mut self, size: u64) -> Result<(), Error> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(Error::NoCurrentEntry);
        };

        let mut io = EngineIo {
            reader: &mut self.reader,
            cache: &mut self.cache,
            mode: Mode::PayloadStreaming,
            chunk_size: self.tunables.min_data_chunk_size,
        };
        let mut scratch = [0u8; 1];
        match decoder
            .decode_chunk(&mut io, &mut scratch)
            .map_err(|e| codec_error(e, Error::Decode))?
        {
            0 => Ok(()),
            n => Err(Error::Decode(
                FormatError::WrongSize {
                    expected: size,
                    actual: size + n as u64,
                }
                .into(),
            )),
        }
    }

    /// One step of [Self::read_at]: positions the decoder at `offset`,
    /// refills the buffer if needed, serves what it can.
    fn read_chunk(&mut self, offset: u64, out: &mut [u8], requested: u64) -> Result<usize, Error> {
        if offset != self.cursor.last_decoded_offset || self.buffer.is_empty() {
            self.decompress_to(offset, requested)?;
        }

        self.cursor.last_requested_length = requested;
        let n = self.buffer.serve(out);
        self.cursor.last_decoded_offset += n as u64;
        debug_assert!(self.buffer.remaining() <= self.buffer.capacity());
        Ok(n)
    }

    fn decompress_to(&mut self, offset: u64, length: u64) -> Result<(), Error> {
        if self.needs_rebuild || offset < self.cursor.last_decoded_offset {
            let Some(index) = self.index else {
                return Err(Error::NoCurrentEntry);
            };
            let name = self.cursor.name.clone();
            debug!(
                %name,
                offset,
                last_decoded_offset = self.cursor.last_decoded_offset,
                "backward jump, replaying archive"
            );
            self.replay_to(index, &name)?;
            self.state = State::StreamingPayload;
        }

        if offset > self.cursor.last_decoded_offset {
            let gap = offset - self.cursor.last_decoded_offset;
            if gap <= self.buffer.remaining() as u64 {
                trace!(gap, "forward jump within buffered data");
                self.buffer.consume(gap as usize);
                self.cursor.last_decoded_offset = offset;
            } else {
                // what's buffered was decoded, it counts as skipped
                self.cursor.last_decoded_offset += self.buffer.remaining() as u64;
                self.buffer.clear();
                self.discard_to(offset)?;
            }
        }

        if self.buffer.is_empty() {
            self.fill(length)?;
        }
        Ok(())
    }

    /// Decodes and throws away bytes until the decoder reaches `target`.
    fn discard_to(&mut self, target: u64) -> Result<(), Error> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(Error::NoCurrentEntry);
        };
        if self.discard.len() < self.tunables.discard_buffer_size {
            self.discard.resize(self.tunables.discard_buffer_size, 0);
        }

        let start = self.cursor.last_decoded_offset;
        while self.cursor.last_decoded_offset < target {
            let gap = target - self.cursor.last_decoded_offset;
            let mut io = EngineIo {
                reader: &mut self.reader,
                cache: &mut self.cache,
                mode: Mode::PayloadStreaming,
                chunk_size: self.tunables.data_chunk_for(gap),
            };
            let len = cmp::min(gap, self.discard.len() as u64) as usize;
            let n = decoder
                .decode_chunk(&mut io, &mut self.discard[..len])
                .map_err(|e| codec_error(e, Error::Decode))?;
            if n == 0 {
                return Err(Error::UnexpectedEndOfStream {
                    offset: self.cursor.last_decoded_offset,
                    target,
                });
            }
            self.cursor.last_decoded_offset += n as u64;
            self.discarded_bytes += n as u64;
        }
        trace!(from = start, to = target, "discarded decoded bytes");
        Ok(())
    }

    /// Decodes up to `length` bytes (bounded by the buffer capacity) into the
    /// decompress buffer.
    fn fill(&mut self, length: u64) -> Result<usize, Error> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(Error::NoCurrentEntry);
        };

        let max = cmp::min(length, self.buffer.capacity() as u64);
        let mut io = EngineIo {
            reader: &mut self.reader,
            cache: &mut self.cache,
            mode: Mode::PayloadStreaming,
            chunk_size: self.tunables.data_chunk_for(max),
        };
        let n = self.buffer.refill(max as usize, |out| {
            decoder
                .decode_chunk(&mut io, out)
                .map_err(|e| codec_error(e, Error::Decode))
        })?;
        trace!(
            offset = self.cursor.last_decoded_offset,
            n,
            "filled decompress buffer"
        );
        Ok(n)
    }

    /// Tears the decoder down, and replays headers from the start of the
    /// archive until the entry at `index` is current again.
    ///
    /// If the replay fails part way, the engine still targets that entry,
    /// and the next read or advance replays again.
    fn replay_to(&mut self, index: usize, name: &str) -> Result<(), Error> {
        self.replays += 1;
        let target = self.current.clone();
        let res = self.replay(index, name);
        if let Err(e) = &res {
            if !e.is_fatal() {
                self.index = Some(index);
                self.next_index = index + 1;
                self.cursor = DecodeCursor {
                    name: name.to_owned(),
                    ..Default::default()
                };
                self.current = target;
                self.buffer.clear();
                self.needs_rebuild = true;
            }
        }
        res
    }

    fn replay(&mut self, index: usize, name: &str) -> Result<(), Error> {
        self.initialize()?;

        loop {
            match self.advance()? {
                Some(entry) if self.index == Some(index) => {
                    if entry.name != name {
                        return Err(Error::EntryNotFound {
                            name: name.to_owned(),
                        });
                    }
                    return Ok(());
                }
                Some(_) => continue,
                None => {
                    return Err(Error::EntryNotFound {
                        name: name.to_owned(),
                    });
                }
            }
        }
    }

    /// Tears the decoder down and starts over from the start of the archive.
    /// The next [Self::advance_header] returns the first entry.
    pub fn rewind(&mut self) -> Result<(), Error> {
        self.replays += 1;
        self.initialize()
    }

    /// If the decompress buffer is empty, decodes ahead assuming the next
    /// read will continue where the last one stopped, with the same length.
    ///
    /// Best-effort: failures are logged and swallowed, the next read will
    /// replay as needed.
    pub fn prefetch(&mut self) {
        if self.state != State::StreamingPayload
            || self.needs_rebuild
            || !self.buffer.is_empty()
            || self.cursor.last_requested_length == 0
        {
            return;
        }
        let Some(size) = self.current.as_ref().map(|entry| entry.size) else {
            return;
        };
        if self.cursor.last_decoded_offset >= size {
            return;
        }

        if let Err(e) = self.fill(self.cursor.last_requested_length) {
            debug!(%e, "prefetch failed");
            self.needs_rebuild = true;
        }
    }

    /// Releases the decoder, keeping the backing reader around. The next
    /// header advance starts over from the beginning of the archive.
    pub fn close_entry(&mut self) -> Result<(), Error> {
        if matches!(self.state, State::Closed) {
            return Ok(());
        }
        let res = self.release_decoder();
        self.current = None;
        self.index = None;
        self.next_index = 0;
        self.cursor = Default::default();
        self.buffer.clear();
        self.needs_rebuild = false;
        if !matches!(self.state, State::Faulted(_)) {
            self.state = State::Uninitialized;
        }
        res
    }

    /// Releases the decoder and closes the backing reader. Both are always
    /// attempted, failures are aggregated. Calling this again does nothing.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        if matches!(self.state, State::Closed) {
            return Ok(());
        }
        self.state = State::Closed;
        self.current = None;
        self.buffer.clear();

        let mut errors = Vec::new();
        if let Some(mut decoder) = self.decoder.take() {
            if let Err(e) = decoder.free_stream() {
                warn!(%e, "could not release decoder");
                errors.push(codec_error(e, Error::Decode));
            }
        }
        if let Err(e) = self.reader.close() {
            warn!(%e, "could not close backing reader");
            errors.push(Error::Io(e));
        }
        Error::aggregate(errors)
    }

    /// Releases the decoder and hands back the backing reader, unclosed.
    pub fn into_reader(mut self) -> R {
        if let Some(mut decoder) = self.decoder.take() {
            if let Err(e) = decoder.free_stream() {
                warn!(%e, "could not release decoder");
            }
        }
        self.reader
    }

    /// An iterator over the remaining entries. See [Entries].
    pub fn entries(&mut self) -> Entries<'_, R, C> {
        Entries {
            engine: self,
            done: false,
        }
    }

    /// The entry [Self::read_at] reads from, if any
    pub fn current_entry(&self) -> Option<&Entry> {
        self.current.as_ref()
    }

    /// Enumeration index of the current entry
    pub fn current_index(&self) -> Option<usize> {
        self.current.as_ref().and(self.index)
    }

    /// Index the next [Self::advance_header] will return
    pub fn next_index(&self) -> usize {
        self.next_index
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Decoded bytes waiting to be served
    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.buffer.remaining()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            replays: self.replays,
            discarded_bytes: self.discarded_bytes,
            cache: self.cache.stats(),
        }
    }

    fn ensure_usable(&self) -> Result<(), Error> {
        match &self.state {
            State::Closed => Err(Error::Closed),
            State::Faulted(msg) => Err(Error::Faulted(msg.clone())),
            _ => Ok(()),
        }
    }

    fn release_decoder(&mut self) -> Result<(), Error> {
        match self.decoder.take() {
            Some(mut decoder) => decoder
                .free_stream()
                .map_err(|e| codec_error(e, Error::Decode)),
            None => Ok(()),
        }
    }

    /// Moves to [State::Faulted] if `e` is fatal, returns it either way.
    fn fault(&mut self, e: Error) -> Error {
        if e.is_fatal() {
            warn!(%e, "session faulted");
            self.state = State::Faulted(e.to_string());
            if let Some(mut decoder) = self.decoder.take() {
                let _ = decoder.free_stream();
            }
            self.current = None;
            self.buffer.clear();
        }
        e
    }
}

/// I/O failures are always [Error::Io], whatever phase they happen in.
fn codec_error(e: CodecError, wrap: fn(CodecError) -> Error) -> Error {
    match e {
        CodecError::IO(e) => Error::Io(e),
        e => wrap(e),
    }
}

/// Forward-only iterator over the entries of an archive, driven by
/// [Engine::advance_header].
///
/// Stops after the last entry or the first error. It can't be restarted:
/// going over the entries again means [rewinding](Engine::rewind) the engine.
pub struct Entries<'a, R, C>
where
    R: BackingReader,
    C: Codec,
{
    engine: &'a mut Engine<R, C>,
    done: bool,
}

impl<R, C> Iterator for Entries<'_, R, C>
where
    R: BackingReader,
    C: Codec,
{
    type Item = Result<Entry, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.engine.advance_header() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
