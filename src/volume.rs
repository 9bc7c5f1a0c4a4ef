use std::{cmp, collections::HashMap, fmt};

use tracing::{debug, trace};

use crate::{
    codec::{zip::ZipCodec, Codec},
    config::Tunables,
    engine::Engine,
    entry::Entry,
    error::Error,
    reader::BackingReader,
};

/// Opaque handle to an entry opened with [Volume::open_entry].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHandle(u64);

impl fmt::Display for EntryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An archive seen as a read-only set of files: list them, open them by
/// name, read byte ranges out of them.
///
/// All reads go through a single [Engine], so opening several entries is
/// cheap but alternating reads between them isn't: every switch to an
/// entry that lies behind the current one replays the archive from the
/// start.
pub struct Volume<R, C = ZipCodec>
where
    R: BackingReader,
    C: Codec,
{
    engine: Engine<R, C>,

    listing: Option<Vec<Entry>>,
    /// Name to enumeration index, first occurrence wins
    by_name: HashMap<String, usize>,

    handles: HashMap<EntryHandle, usize>,
    next_handle: u64,
}

impl<R> Volume<R, ZipCodec>
where
    R: BackingReader,
{
    /// Opens a zip archive with the default codec and tunables.
    pub fn zip(reader: R) -> Result<Self, Error> {
        Self::open(reader, ZipCodec::default(), Tunables::default())
    }
}

impl<R, C> Volume<R, C>
where
    R: BackingReader,
    C: Codec,
{
    /// Nothing is read until the first operation.
    pub fn open(reader: R, codec: C, tunables: Tunables) -> Result<Self, Error> {
        Ok(Self {
            engine: Engine::new(reader, codec, tunables)?,
            listing: None,
            by_name: HashMap::new(),
            handles: HashMap::new(),
            next_handle: 0,
        })
    }

    /// All entries, in archive order. The first call walks every header of
    /// the archive, later calls return the same listing.
    pub fn list_entries(&mut self) -> Result<&[Entry], Error> {
        if self.listing.is_none() {
            if self.engine.next_index() > 0 {
                self.engine.rewind()?;
            }

            let listing = self.engine.entries().collect::<Result<Vec<_>, _>>()?;
            debug!(entries = listing.len(), "built listing");

            self.by_name.clear();
            for (index, entry) in listing.iter().enumerate() {
                self.by_name.entry(entry.name.clone()).or_insert(index);
            }
            self.listing = Some(listing);
        }
        Ok(self.listing.as_deref().unwrap_or_default())
    }

    /// Returns a handle to the entry named `name`. The engine doesn't move
    /// until the handle is read from.
    pub fn open_entry(&mut self, name: &str) -> Result<EntryHandle, Error> {
        self.list_entries()?;
        let index = *self
            .by_name
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_owned()))?;

        let handle = EntryHandle(self.next_handle);
        self.next_handle += 1;
        self.handles.insert(handle, index);
        trace!(%handle, name, index, "opened entry");
        Ok(handle)
    }

    /// The entry behind a handle
    pub fn entry(&self, handle: EntryHandle) -> Result<&Entry, Error> {
        let index = *self
            .handles
            .get(&handle)
            .ok_or(Error::InvalidHandle(handle))?;
        self.listing
            .as_ref()
            .and_then(|listing| listing.get(index))
            .ok_or(Error::InvalidHandle(handle))
    }

    /// Reads up to `length` bytes of the entry behind `handle`, starting at
    /// `offset`. Fewer bytes come back only when the end of the entry is
    /// reached.
    pub fn read_entry(
        &mut self,
        handle: EntryHandle,
        offset: u64,
        length: usize,
    ) -> Result<Vec<u8>, Error> {
        let index = *self
            .handles
            .get(&handle)
            .ok_or(Error::InvalidHandle(handle))?;
        let entry = self.entry(handle)?.clone();

        let available = entry.size.saturating_sub(offset);
        let len = cmp::min(length as u64, available) as usize;
        if len == 0 {
            return Ok(Vec::new());
        }

        self.seek_to_entry(index, &entry.name)?;

        let mut buf = vec![0u8; len];
        let n = self.engine.read_at(offset, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Makes the entry at `index` the engine's current one.
    fn seek_to_entry(&mut self, index: usize, name: &str) -> Result<(), Error> {
        if self.engine.current_index() == Some(index) {
            return Ok(());
        }

        if self.engine.next_index() > index {
            debug!(index, name, "entry lies behind, rewinding");
            self.engine.rewind()?;
        }

        while self.engine.current_index() != Some(index) {
            if self.engine.advance_header()?.is_none() {
                return Err(Error::EntryNotFound {
                    name: name.to_owned(),
                });
            }
        }

        match self.engine.current_entry() {
            Some(current) if current.name == name => Ok(()),
            _ => Err(Error::EntryNotFound {
                name: name.to_owned(),
            }),
        }
    }

    /// Forgets a handle. Once no handles remain, the decoder is released.
    pub fn close_entry(&mut self, handle: EntryHandle) -> Result<(), Error> {
        self.handles
            .remove(&handle)
            .ok_or(Error::InvalidHandle(handle))?;
        trace!(%handle, "closed entry");

        if self.handles.is_empty() {
            self.engine.close_entry()?;
        }
        Ok(())
    }

    /// See [Engine::prefetch]
    pub fn prefetch(&mut self) {
        self.engine.prefetch()
    }

    /// Forgets all handles and shuts the engine down.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        self.handles.clear();
        self.engine.shutdown()
    }

    pub fn engine(&self) -> &Engine<R, C> {
        &self.engine
    }

    /// Releases the decoder and hands back the backing reader, unclosed.
    pub fn into_reader(self) -> R {
        self.engine.into_reader()
    }
}
