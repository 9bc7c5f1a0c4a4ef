use std::collections::HashMap;

use tracing::{debug, trace};

/// Raw bytes the decoder consumed while parsing headers, keyed by the
/// backing reader offset they were read at.
///
/// Re-initializing a decoder replays the archive from the start, and
/// headers get parsed again every time: serving those reads from memory
/// keeps a slow or remote backing reader out of the loop. Payload bytes are
/// never cached, see [Mode](crate::engine::Mode).
///
/// Records are append-only and never evicted. An optional byte limit stops
/// new insertions once reached.
#[derive(Debug, Default)]
pub struct HeaderCache {
    records: HashMap<u64, Vec<u8>>,
    bytes: usize,
    limit: Option<usize>,
    hits: u64,
    misses: u64,
}

/// Counters describing how useful the header cache has been so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of records
    pub records: usize,
    /// Total bytes held
    pub bytes: usize,
    /// Reads served from the cache
    pub hits: u64,
    /// Reads that went to the backing reader
    pub misses: u64,
}

impl HeaderCache {
    /// An empty cache, optionally bounded to `limit` bytes.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    /// Returns the bytes recorded at `offset`, if any.
    pub fn get(&mut self, offset: u64) -> Option<&[u8]> {
        match self.records.get(&offset) {
            Some(data) => {
                self.hits += 1;
                trace!(offset, len = data.len(), "header cache hit");
                Some(&data[..])
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Records `data`, read from the backing reader at `offset`. Existing
    /// records are left untouched.
    pub fn put(&mut self, offset: u64, data: &[u8]) {
        if data.is_empty() || self.records.contains_key(&offset) {
            return;
        }

        if let Some(limit) = self.limit {
            if self.bytes + data.len() > limit {
                debug!(offset, len = data.len(), limit, "header cache full, not recording");
                return;
            }
        }

        trace!(offset, len = data.len(), "header cache insert");
        self.bytes += data.len();
        self.records.insert(offset, data.to_vec());
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            records: self.records.len(),
            bytes: self.bytes,
            hits: self.hits,
            misses: self.misses,
        }
    }
}
