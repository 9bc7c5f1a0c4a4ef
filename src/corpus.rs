//! Test fixtures: zip archives built in memory, and backing readers that
//! count what the engine asks of them or fail on command.

use std::{
    io::{self, Cursor, SeekFrom, Write},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use byteorder::{ByteOrder, LittleEndian as LE};
use flate2::{write::DeflateEncoder, Compression};

use crate::{
    codec::zip::Method,
    reader::{BackingReader, SeekReader},
};

const LOCAL_HEADER_SIGNATURE: u32 = 0x04034b50;
const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x02014b50;
const EOCD_SIGNATURE: u32 = 0x06054b50;

/// 2024-01-01 12:00:00
const DOS_TIME: u16 = 12 << 11;
const DOS_DATE: u16 = ((2024 - 1980) << 9) | (1 << 5) | 1;

const FLAG_ENCRYPTED: u16 = 1;
const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
const FLAG_UTF8: u16 = 1 << 11;

struct BuilderEntry {
    name: String,
    method: u16,
    /// what ends up in the archive
    payload: Vec<u8>,
    uncompressed_size: u32,
    crc32: u32,
    is_dir: bool,
    encrypted: bool,
}

/// Builds small zip archives, in the shape most writers produce them:
/// local headers and data, then a central directory and an end of central
/// directory record.
#[derive(Default)]
pub struct ZipBuilder {
    entries: Vec<BuilderEntry>,
    descriptors: bool,
    streaming: bool,
    corrupt_crc32: bool,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Flags every entry as having a data descriptor, and writes one after
    /// its data. Sizes are still filled in the local headers.
    pub fn with_descriptors(mut self) -> Self {
        self.descriptors = true;
        self
    }

    /// Like [with_descriptors](Self::with_descriptors), but leaves sizes in
    /// the local headers zeroed, the way a writer that can't seek back
    /// does.
    pub fn streaming(mut self) -> Self {
        self.descriptors = true;
        self.streaming = true;
        self
    }

    /// Records a wrong CRC-32 for every entry.
    pub fn corrupt_crc32(mut self) -> Self {
        self.corrupt_crc32 = true;
        self
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.raw(name, Method::Store, data.to_vec(), data)
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        let payload = enc.finish().unwrap();
        self.raw(name, Method::Deflate, payload, data)
    }

    pub fn directory(mut self, name: &str) -> Self {
        self.entries.push(BuilderEntry {
            name: name.to_owned(),
            method: Method::Store.into(),
            payload: Vec::new(),
            uncompressed_size: 0,
            crc32: 0,
            is_dir: true,
            encrypted: false,
        });
        self
    }

    /// Adds an entry whose data is `payload`, as compressed with `method`,
    /// which decompresses to `data`.
    pub fn raw(mut self, name: &str, method: Method, payload: Vec<u8>, data: &[u8]) -> Self {
        self.entries.push(BuilderEntry {
            name: name.to_owned(),
            method: method.into(),
            payload,
            uncompressed_size: data.len() as u32,
            crc32: crc32fast::hash(data),
            is_dir: false,
            encrypted: false,
        });
        self
    }

    /// Adds a stored entry flagged as encrypted. The data is written as-is,
    /// nothing reads it without a password anyway.
    pub fn encrypted(mut self, name: &str, data: &[u8]) -> Self {
        self = self.stored(name, data);
        if let Some(entry) = self.entries.last_mut() {
            entry.encrypted = true;
        }
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();

        let mut archive_flags = FLAG_UTF8;
        if self.descriptors {
            archive_flags |= FLAG_DATA_DESCRIPTOR;
        }

        for entry in &self.entries {
            let flags = if entry.encrypted {
                archive_flags | FLAG_ENCRYPTED
            } else {
                archive_flags
            };
            let offset = out.len() as u32;
            let crc32 = if self.corrupt_crc32 {
                !entry.crc32
            } else {
                entry.crc32
            };
            let compressed_size = entry.payload.len() as u32;
            let name = entry.name.as_bytes();

            let mut local = [0u8; 30];
            LE::write_u32(&mut local[0..], LOCAL_HEADER_SIGNATURE);
            LE::write_u16(&mut local[4..], 20);
            LE::write_u16(&mut local[6..], flags);
            LE::write_u16(&mut local[8..], entry.method);
            LE::write_u16(&mut local[10..], DOS_TIME);
            LE::write_u16(&mut local[12..], DOS_DATE);
            // with a descriptor, the checksum only comes after the data
            LE::write_u32(&mut local[14..], if self.descriptors { 0 } else { crc32 });
            if !self.streaming {
                LE::write_u32(&mut local[18..], compressed_size);
                LE::write_u32(&mut local[22..], entry.uncompressed_size);
            }
            LE::write_u16(&mut local[26..], name.len() as u16);
            LE::write_u16(&mut local[28..], 0);
            out.extend_from_slice(&local);
            out.extend_from_slice(name);
            out.extend_from_slice(&entry.payload);

            if self.descriptors {
                let mut descriptor = [0u8; 16];
                LE::write_u32(&mut descriptor[0..], DATA_DESCRIPTOR_SIGNATURE);
                LE::write_u32(&mut descriptor[4..], crc32);
                LE::write_u32(&mut descriptor[8..], compressed_size);
                LE::write_u32(&mut descriptor[12..], entry.uncompressed_size);
                out.extend_from_slice(&descriptor);
            }

            let mut header = [0u8; 46];
            LE::write_u32(&mut header[0..], CENTRAL_HEADER_SIGNATURE);
            LE::write_u16(&mut header[4..], 20);
            LE::write_u16(&mut header[6..], 20);
            LE::write_u16(&mut header[8..], flags);
            LE::write_u16(&mut header[10..], entry.method);
            LE::write_u16(&mut header[12..], DOS_TIME);
            LE::write_u16(&mut header[14..], DOS_DATE);
            LE::write_u32(&mut header[16..], crc32);
            LE::write_u32(&mut header[20..], compressed_size);
            LE::write_u32(&mut header[24..], entry.uncompressed_size);
            LE::write_u16(&mut header[28..], name.len() as u16);
            // extra, comment, disk number, internal attributes: all zero
            LE::write_u32(&mut header[38..], if entry.is_dir { 0x10 } else { 0 });
            LE::write_u32(&mut header[42..], offset);
            central.extend_from_slice(&header);
            central.extend_from_slice(name);
        }

        let central_offset = out.len() as u32;
        out.extend_from_slice(&central);

        let mut eocd = [0u8; 22];
        LE::write_u32(&mut eocd[0..], EOCD_SIGNATURE);
        LE::write_u16(&mut eocd[8..], self.entries.len() as u16);
        LE::write_u16(&mut eocd[10..], self.entries.len() as u16);
        LE::write_u32(&mut eocd[12..], central.len() as u32);
        LE::write_u32(&mut eocd[16..], central_offset);
        out.extend_from_slice(&eocd);
        out
    }
}

/// Shared view on what an [InstrumentedReader] was asked to do, and
/// switches to make it fail.
#[derive(Debug, Default)]
pub struct Tally {
    pub reads: AtomicU64,
    pub bytes_read: AtomicU64,
    pub skips: AtomicU64,
    pub seeks: AtomicU64,
    pub closes: AtomicU64,

    /// When set, every read fails
    pub fail_reads: AtomicBool,
    /// When set, closing fails
    pub fail_close: AtomicBool,
}

impl Tally {
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::SeqCst)
    }

    pub fn seeks(&self) -> u64 {
        self.seeks.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst)
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst)
    }
}

/// An in-memory [BackingReader] reporting to a [Tally].
pub struct InstrumentedReader {
    inner: SeekReader<Cursor<Vec<u8>>>,
    tally: Arc<Tally>,
}

impl InstrumentedReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inner: SeekReader::new(Cursor::new(data)).unwrap(),
            tally: Default::default(),
        }
    }

    pub fn tally(&self) -> Arc<Tally> {
        self.tally.clone()
    }
}

impl BackingReader for InstrumentedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.tally.fail_reads.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected read failure"));
        }
        let n = self.inner.read(buf)?;
        self.tally.reads.fetch_add(1, Ordering::SeqCst);
        self.tally.bytes_read.fetch_add(n as u64, Ordering::SeqCst);
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> u64 {
        self.tally.skips.fetch_add(1, Ordering::SeqCst);
        self.inner.skip(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.tally.seeks.fetch_add(1, Ordering::SeqCst);
        self.inner.seek(pos)
    }

    fn offset(&self) -> u64 {
        self.inner.offset()
    }

    fn close(&mut self) -> io::Result<()> {
        self.tally.closes.fetch_add(1, Ordering::SeqCst);
        if self.tally.fail_close.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected close failure"));
        }
        Ok(())
    }
}
