//! Records of the zip format a forward-only decoder runs into: local file
//! headers, data descriptors, and the extra fields carried by local headers.
//!
//! All parsers are streaming: they return [ErrMode::Incomplete] when the
//! buffer doesn't hold a full record yet.
//!
//! [ErrMode::Incomplete]: winnow::error::ErrMode::Incomplete

use chrono::{
    offset::{LocalResult, TimeZone, Utc},
    DateTime, Timelike,
};
use num_enum::{FromPrimitive, IntoPrimitive};
use pretty_hex::PrettyHex;
use std::fmt;
use tracing::trace;
use winnow::{
    binary::{le_u16, le_u32, le_u64, le_u8},
    combinator::{opt, preceded},
    seq,
    stream::ToUsize,
    token::{tag, take},
    PResult, Parser, Partial,
};

use crate::{
    encoding::Encoding,
    entry::{Entry, EntryKind},
    error::{CodecError, FormatError},
};

/// Compression method used for a file entry.
///
/// In archives that follow [ISO/IEC 21320-1:2015](https://www.iso.org/standard/60101.html), only
/// [Store][Method::Store] and [Deflate][Method::Deflate] should be used.
///
/// However, in the wild, it is not too uncommon to encounter [Bzip2][Method::Bzip2],
/// [Zstd][Method::Zstd] or others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum Method {
    /// No compression is applied
    Store = 0,

    /// [DEFLATE (RFC 1951)](https://www.ietf.org/rfc/rfc1951.txt)
    Deflate = 8,

    /// [DEFLATE64](https://deflate64.com/)
    Deflate64 = 9,

    /// [BZIP-2](https://github.com/dsnet/compress/blob/master/doc/bzip2-format.pdf)
    Bzip2 = 12,

    /// [LZMA](https://github.com/jljusten/LZMA-SDK/blob/master/DOC/lzma-specification.txt)
    Lzma = 14,

    /// [zstd](https://datatracker.ietf.org/doc/html/rfc8878)
    Zstd = 93,

    /// [XZ](https://tukaani.org/xz/xz-file-format.txt)
    Xz = 95,

    /// AE-x encryption marker (see Appendix E of appnote)
    Aex = 99,

    /// A compression method that isn't recognized by this crate.
    #[num_enum(catch_all)]
    Unrecognized(u16),
}

/// Signature of a central directory file header. Seeing it means the last
/// entry has gone by.
pub(crate) const CENTRAL_DIRECTORY_SIGNATURE: &[u8] = b"PK\x01\x02";

/// Signature of the end of central directory record. An archive with no
/// entries starts with it.
pub(crate) const EOCD_SIGNATURE: &[u8] = b"PK\x05\x06";

/// Signature of the zip64 end of central directory record.
pub(crate) const EOCD64_SIGNATURE: &[u8] = b"PK\x06\x06";

/// 4.3.7 Local file header
#[derive(Debug)]
pub struct LocalFileHeaderRecord {
    /// version needed to extract
    pub reader_version: u16,

    /// general purpose bit flag
    pub flags: u16,

    /// compression method
    pub method: Method,

    /// last mod file datetime
    pub modified: MsdosTimestamp,

    /// crc-32
    pub crc32: u32,

    /// compressed size
    pub compressed_size: u32,

    /// uncompressed size
    pub uncompressed_size: u32,

    /// file name
    pub name: ZipString,

    /// extra field
    pub extra: ZipBytes,
}

impl LocalFileHeaderRecord {
    /// The signature for a local file header
    pub const SIGNATURE: &'static str = "PK\x03\x04";

    /// Fixed-size part of the record, signature included
    pub const FIXED_SIZE: usize = 30;

    /// Largest possible record: name and extra field lengths are u16s.
    pub const MAX_SIZE: usize = Self::FIXED_SIZE + 2 * u16::MAX as usize;

    /// Parser for the local file header
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        let _ = tag(Self::SIGNATURE).parse_next(i)?;

        let reader_version = le_u16.parse_next(i)?;
        let flags = le_u16.parse_next(i)?;
        let method = le_u16.parse_next(i).map(Method::from)?;
        let modified = MsdosTimestamp::parser.parse_next(i)?;
        let crc32 = le_u32.parse_next(i)?;
        let compressed_size = le_u32.parse_next(i)?;
        let uncompressed_size = le_u32.parse_next(i)?;

        let name_len = le_u16.parse_next(i)?;
        let extra_len = le_u16.parse_next(i)?;

        let name = ZipString::parser(name_len).parse_next(i)?;
        let extra = ZipBytes::parser(extra_len).parse_next(i)?;

        Ok(Self {
            reader_version,
            flags,
            method,
            modified,
            crc32,
            compressed_size,
            uncompressed_size,
            name,
            extra,
        })
    }

    /// Check for the presence of the bit flag that indicates a data descriptor
    /// is present after the file data.
    pub fn has_data_descriptor(&self) -> bool {
        // 4.3.9.1 This descriptor MUST exist if bit 3 of the general
        // purpose bit flag is set (see below).
        self.flags & 0b1000 != 0
    }

    /// Bit 0: the entry is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.flags & 0b1 != 0
    }

    /// Interprets the header: decodes the name and applies extra fields.
    /// Encrypted entries and deferred sizes are left for the decoder to
    /// deal with, see `LocalEntry::is_encrypted` and
    /// `LocalEntry::sizes_deferred`.
    pub(crate) fn resolve(&self) -> Result<LocalEntry, CodecError> {
        let encoding = Encoding::detect(&self.name.0, self.flags);
        let name = encoding.decode(&self.name.0)?;
        trace!(%encoding, %name, "decoded entry name");

        let mut resolved = LocalEntry {
            entry: Entry {
                kind: if name.ends_with('/') {
                    // believe it or not, this is straight from the APPNOTE
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
                name,
                size: self.uncompressed_size as u64,
                modified: self.modified.to_datetime().unwrap_or_default(),
            },
            method: self.method,
            flags: self.flags,
            crc32: self.crc32,
            compressed_size: self.compressed_size as u64,
            is_zip64: false,
        };

        let settings = ExtraFieldSettings {
            uncompressed_size_u32: self.uncompressed_size,
            compressed_size_u32: self.compressed_size,
        };
        let mut slice = Partial::new(&self.extra.0[..]);
        while !slice.is_empty() {
            match ExtraField::mk_parser(settings).parse_next(&mut slice) {
                Ok(ef) => resolved.apply_extra_field(ef),
                Err(e) => {
                    trace!("extra field error: {:#?}", e);
                    return Err(FormatError::InvalidExtraField.into());
                }
            }
        }

        if resolved.entry.is_dir() {
            resolved.entry.size = 0;
        }

        Ok(resolved)
    }
}

/// A local file header, interpreted.
#[derive(Debug, Clone)]
pub(crate) struct LocalEntry {
    pub(crate) entry: Entry,
    pub(crate) method: Method,
    pub(crate) flags: u16,
    pub(crate) crc32: u32,
    pub(crate) compressed_size: u64,
    pub(crate) is_zip64: bool,
}

impl LocalEntry {
    pub(crate) fn has_data_descriptor(&self) -> bool {
        self.flags & 0b1000 != 0
    }

    pub(crate) fn is_encrypted(&self) -> bool {
        self.flags & 0b1 != 0
    }

    /// The local header has no sizes, they only come in the data
    /// descriptor. Whatever the method, the data can't be skipped then,
    /// unless there is none.
    pub(crate) fn sizes_deferred(&self) -> bool {
        self.has_data_descriptor() && self.compressed_size == 0 && !self.entry.is_dir()
    }

    fn apply_extra_field(&mut self, ef: ExtraField) {
        match ef {
            ExtraField::Zip64(z64) => {
                self.entry.size = z64.uncompressed_size;
                self.compressed_size = z64.compressed_size;
                self.is_zip64 = true;
            }
            ExtraField::Timestamp(ts) => {
                if let LocalResult::Single(dt) = Utc.timestamp_opt(ts.mtime as i64, 0) {
                    self.entry.modified = dt;
                }
            }
            ExtraField::Unknown { tag } => {
                trace!(tag = format_args!("0x{tag:04x}"), "ignoring extra field");
            }
        }
    }
}

/// 4.3.9  Data descriptor:
#[derive(Debug)]
pub struct DataDescriptorRecord {
    /// CRC32 checksum
    pub crc32: u32,
    /// Compressed size
    pub compressed_size: u64,
    /// Uncompressed size
    pub uncompressed_size: u64,
}

impl DataDescriptorRecord {
    pub(crate) const SIGNATURE: &'static str = "PK\x07\x08";

    /// Create a parser for the data descriptor record.
    pub fn mk_parser(is_zip64: bool) -> impl FnMut(&mut Partial<&'_ [u8]>) -> PResult<Self> {
        move |i| {
            // 4.3.9.3 the signature is commonly used but not mandatory
            let _ = opt(tag(Self::SIGNATURE)).parse_next(i)?;

            if is_zip64 {
                seq! {Self {
                    crc32: le_u32,
                    compressed_size: le_u64,
                    uncompressed_size: le_u64,
                }}
                .parse_next(i)
            } else {
                seq! {Self {
                    crc32: le_u32,
                    compressed_size: le_u32.map(|x| x as u64),
                    uncompressed_size: le_u32.map(|x| x as u64),
                }}
                .parse_next(i)
            }
        }
    }
}

/// A timestamp in MS-DOS format
///
/// Represents dates from year 1980 to 2180, with 2 second precision.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct MsdosTimestamp {
    /// Time in 2-second intervals
    pub time: u16,

    /// Date in MS-DOS format
    pub date: u16,
}

impl fmt::Debug for MsdosTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "MsdosTimestamp({})", dt),
            None => write!(f, "MsdosTimestamp(?)"),
        }
    }
}

impl MsdosTimestamp {
    /// Parser for MS-DOS timestamps
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        seq! {Self {
            time: le_u16,
            date: le_u16,
        }}
        .parse_next(i)
    }

    /// Attempts to convert to a chrono UTC date time
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        // see https://docs.microsoft.com/en-us/windows/win32/api/winbase/nf-winbase-dosdatetimetofiletime
        let date = match {
            // bits 0-4: day of the month (1-31)
            let d = (self.date & 0b1_1111) as u32;
            // bits 5-8: month (1 = january, 2 = february and so on)
            let m = ((self.date >> 5) & 0b1111) as u32;
            // bits 9-15: year offset from 1980
            let y = ((self.date >> 9) + 1980) as i32;
            Utc.with_ymd_and_hms(y, m, d, 0, 0, 0)
        } {
            LocalResult::Single(date) => date,
            _ => return None,
        };

        // bits 0-4: second divided by 2
        let s = (self.time & 0b1_1111) as u32 * 2;
        // bits 5-10: minute (0-59)
        let m = (self.time >> 5 & 0b11_1111) as u32;
        // bits 11-15: hour (0-23 on a 24-hour clock)
        let h = (self.time >> 11) as u32;
        date.with_hour(h)?.with_minute(m)?.with_second(s)
    }
}

/// A raw zip string, with no specific encoding.
#[derive(Clone)]
pub struct ZipString(pub Vec<u8>);

impl fmt::Debug for ZipString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{:?}", s),
            Err(_) => write!(f, "[non-utf8 string: {}]", self.0.hex_dump()),
        }
    }
}

impl ZipString {
    pub(crate) fn parser<C>(count: C) -> impl FnMut(&mut Partial<&'_ [u8]>) -> PResult<Self>
    where
        C: ToUsize,
    {
        let count = count.to_usize();
        move |i| (take(count).map(|slice: &[u8]| Self(slice.into()))).parse_next(i)
    }
}

/// A raw u8 slice, with no specific structure.
#[derive(Clone)]
pub struct ZipBytes(pub Vec<u8>);

impl fmt::Debug for ZipBytes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const MAX_SHOWN_SIZE: usize = 10;
        let data = &self.0[..];
        let (slice, extra) = if data.len() > MAX_SHOWN_SIZE {
            (&self.0[..MAX_SHOWN_SIZE], Some(data.len() - MAX_SHOWN_SIZE))
        } else {
            (&self.0[..], None)
        };
        write!(f, "{}", slice.hex_dump())?;
        if let Some(extra) = extra {
            write!(f, " (+ {} bytes)", extra)?;
        }
        Ok(())
    }
}

impl ZipBytes {
    pub(crate) fn parser<C>(count: C) -> impl FnMut(&mut Partial<&'_ [u8]>) -> PResult<Self>
    where
        C: ToUsize,
    {
        let count = count.to_usize();
        move |i| (take(count).map(|slice: &[u8]| Self(slice.into()))).parse_next(i)
    }
}

/// The zip64 extra field has a fixed order but optional fields: each one
/// only appears if the matching u32 field in the header is 0xFFFF_FFFF.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExtraFieldSettings {
    pub(crate) uncompressed_size_u32: u32,
    pub(crate) compressed_size_u32: u32,
}

/// Extra fields a local header may carry that we care about.
#[derive(Debug)]
pub(crate) enum ExtraField {
    /// Zip64 extended information extra field
    Zip64(ExtraZip64Field),
    /// Extended timestamp
    Timestamp(ExtraTimestampField),
    /// Anything else
    Unknown { tag: u16 },
}

impl ExtraField {
    pub(crate) fn mk_parser(
        settings: ExtraFieldSettings,
    ) -> impl FnMut(&mut Partial<&'_ [u8]>) -> PResult<Self> {
        move |i| {
            use ExtraField as EF;
            let tag = le_u16.parse_next(i)?;
            let len = le_u16.parse_next(i)?;
            let payload = take(len).parse_next(i)?;
            let payload = &mut Partial::new(payload);

            let variant = match tag {
                ExtraZip64Field::TAG => {
                    opt(ExtraZip64Field::mk_parser(settings).map(EF::Zip64)).parse_next(payload)?
                }
                ExtraTimestampField::TAG => {
                    opt(ExtraTimestampField::parser.map(EF::Timestamp)).parse_next(payload)?
                }
                _ => None,
            }
            .unwrap_or(EF::Unknown { tag });

            Ok(variant)
        }
    }
}

/// 4.5.3 -Zip64 Extended Information Extra Field (0x0001)
#[derive(Debug, Clone, Default)]
pub(crate) struct ExtraZip64Field {
    pub(crate) uncompressed_size: u64,
    pub(crate) compressed_size: u64,
}

impl ExtraZip64Field {
    const TAG: u16 = 0x0001;

    fn mk_parser(
        settings: ExtraFieldSettings,
    ) -> impl FnMut(&mut Partial<&'_ [u8]>) -> PResult<Self> {
        move |i| {
            let uncompressed_size = if settings.uncompressed_size_u32 == 0xFFFF_FFFF {
                le_u64.parse_next(i)?
            } else {
                settings.uncompressed_size_u32 as u64
            };
            let compressed_size = if settings.compressed_size_u32 == 0xFFFF_FFFF {
                le_u64.parse_next(i)?
            } else {
                settings.compressed_size_u32 as u64
            };
            // local headers carry no offset, the rest of the payload is ignored

            Ok(Self {
                uncompressed_size,
                compressed_size,
            })
        }
    }
}

/// Extended timestamp extra field
#[derive(Debug, Clone)]
pub(crate) struct ExtraTimestampField {
    /// number of seconds since epoch
    pub(crate) mtime: u32,
}

impl ExtraTimestampField {
    const TAG: u16 = 0x5455;

    fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        preceded(
            // 1 byte of flags, if bit 0 is set, modification time is present
            le_u8.verify(|x| x & 0b1 != 0),
            seq! {Self { mtime: le_u32 }},
        )
        .parse_next(i)
    }
}
