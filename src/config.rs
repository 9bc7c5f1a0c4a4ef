use crate::error::Error;

/// Knobs that trade memory for I/O round trips.
///
/// The defaults suit a backing store where each read is an expensive round
/// trip (a network request, a message across a process boundary): headers
/// are read in small chunks since they're cached and replayed, payload in
/// chunks clamped between [Self::min_data_chunk_size] and
/// [Self::max_data_chunk_size].
#[derive(Debug, Clone)]
pub struct Tunables {
    /// How many bytes to ask the backing reader for while parsing headers.
    pub header_chunk_size: usize,

    /// Lower clamp for backing reader requests while decoding entry data.
    pub min_data_chunk_size: usize,

    /// Upper clamp for backing reader requests while decoding entry data.
    pub max_data_chunk_size: usize,

    /// Capacity of the decompression buffer, i.e. the most decoded bytes
    /// held in memory at once. Entries are never materialized in full.
    pub decompress_buffer_capacity: usize,

    /// Size of the scratch buffer decoded bytes are thrown into when
    /// skipping forward.
    pub discard_buffer_size: usize,

    /// Stop adding records to the header cache past this many bytes.
    /// `None` means unbounded.
    pub header_cache_limit: Option<usize>,
}

impl Tunables {
    /// 16 KiB
    pub const DEFAULT_HEADER_CHUNK_SIZE: usize = 16 * 1024;
    /// 32 KiB
    pub const DEFAULT_MIN_DATA_CHUNK_SIZE: usize = 32 * 1024;
    /// 512 KiB
    pub const DEFAULT_MAX_DATA_CHUNK_SIZE: usize = 512 * 1024;
    /// 512 KiB
    pub const DEFAULT_DECOMPRESS_BUFFER_CAPACITY: usize = 512 * 1024;
    /// 512 KiB
    pub const DEFAULT_DISCARD_BUFFER_SIZE: usize = 512 * 1024;

    /// Sets [Self::header_chunk_size]
    pub fn header_chunk_size(mut self, size: usize) -> Self {
        self.header_chunk_size = size;
        self
    }

    /// Sets both data chunk clamps
    pub fn data_chunk_size(mut self, min: usize, max: usize) -> Self {
        self.min_data_chunk_size = min;
        self.max_data_chunk_size = max;
        self
    }

    /// Sets [Self::decompress_buffer_capacity]
    pub fn decompress_buffer_capacity(mut self, capacity: usize) -> Self {
        self.decompress_buffer_capacity = capacity;
        self
    }

    /// Sets [Self::discard_buffer_size]
    pub fn discard_buffer_size(mut self, size: usize) -> Self {
        self.discard_buffer_size = size;
        self
    }

    /// Sets [Self::header_cache_limit]
    pub fn header_cache_limit(mut self, limit: Option<usize>) -> Self {
        self.header_cache_limit = limit;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.header_chunk_size == 0 {
            return Err(Error::InvalidTunables("header chunk size must be non-zero"));
        }
        if self.min_data_chunk_size == 0 {
            return Err(Error::InvalidTunables("data chunk size must be non-zero"));
        }
        if self.min_data_chunk_size > self.max_data_chunk_size {
            return Err(Error::InvalidTunables(
                "minimum data chunk size exceeds the maximum",
            ));
        }
        if self.decompress_buffer_capacity == 0 {
            return Err(Error::InvalidTunables(
                "decompress buffer capacity must be non-zero",
            ));
        }
        if self.discard_buffer_size == 0 {
            return Err(Error::InvalidTunables("discard buffer size must be non-zero"));
        }
        Ok(())
    }

    /// Clamps a wanted byte count to the data chunk bounds.
    pub(crate) fn data_chunk_for(&self, wanted: u64) -> usize {
        wanted.clamp(
            self.min_data_chunk_size as u64,
            self.max_data_chunk_size as u64,
        ) as usize
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            header_chunk_size: Self::DEFAULT_HEADER_CHUNK_SIZE,
            min_data_chunk_size: Self::DEFAULT_MIN_DATA_CHUNK_SIZE,
            max_data_chunk_size: Self::DEFAULT_MAX_DATA_CHUNK_SIZE,
            decompress_buffer_capacity: Self::DEFAULT_DECOMPRESS_BUFFER_CAPACITY,
            discard_buffer_size: Self::DEFAULT_DISCARD_BUFFER_SIZE,
            header_cache_limit: None,
        }
    }
}
