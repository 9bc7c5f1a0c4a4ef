use chrono::{DateTime, Utc};

/// Describes an entry in an archive, as reported by a decoder while
/// enumerating headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Path of the entry within the archive, e.g. `dir/file.txt`.
    ///
    /// Not unique: archives can legitimately contain the same path twice.
    pub name: String,

    /// Decoded size in bytes. Always zero for directories.
    pub size: u64,

    /// File or directory
    pub kind: EntryKind,

    /// Last modification time, or the Unix epoch if the archive doesn't
    /// record a usable one.
    pub modified: DateTime<Utc>,
}

/// What an [Entry] stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file, with data
    File,
    /// Directory, no data
    Directory,
}

impl Entry {
    /// True if this entry is a directory
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}
