//! rc-volume serves random-access reads out of archives, on top of decoders
//! that can only move forward.
//!
//! It's made up of:
//!
//!   * a [Decoder](codec::Decoder) contract for forward-only decoders, and a
//!     streaming zip implementation of it in [codec::zip]
//!   * the [Engine], which turns `read_at(offset)` calls into decode
//!     operations, decoding and discarding to move forward, replaying the
//!     archive from the start to move backward
//!   * a [HeaderCache] that keeps replays from hitting the backing reader
//!     for headers it already read
//!   * a [Volume], exposing an archive as a set of named entries to list,
//!     open, read and close
//!   * with the `tokio` feature, a [dispatch] module that serializes
//!     requests from async code onto a volume
//!
//! ```no_run
//! use rc_volume::{ReadAtReader, Volume};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut volume = Volume::zip(ReadAtReader::open("archive.zip")?)?;
//! for entry in volume.list_entries()? {
//!     println!("{} ({} bytes)", entry.name, entry.size);
//! }
//! let handle = volume.open_entry("readme.txt")?;
//! let bytes = volume.read_entry(handle, 0, 1024)?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod codec;
pub mod config;
pub mod encoding;
pub mod engine;
pub mod entry;
pub mod error;
pub mod reader;
pub mod volume;

#[cfg(feature = "tokio")]
pub mod dispatch;

#[cfg(any(test, feature = "corpus"))]
pub mod corpus;

pub use cache::{CacheStats, HeaderCache};
pub use codec::zip::ZipCodec;
pub use config::Tunables;
pub use engine::{Engine, EngineStats, Mode, State};
pub use entry::{Entry, EntryKind};
pub use error::Error;
pub use reader::{BackingReader, SeekReader};
pub use volume::{EntryHandle, Volume};

#[cfg(feature = "file")]
pub use reader::ReadAtReader;

#[cfg(feature = "file")]
pub use positioned_io;

#[cfg(test)]
mod tests;
