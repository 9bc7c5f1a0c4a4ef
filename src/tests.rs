use std::sync::Arc;

use crate::{
    codec::zip::Method,
    corpus::{InstrumentedReader, Tally, ZipBuilder},
    error::{CodecError, FormatError, UnsupportedError},
    Engine, EntryKind, Error, State, Tunables, Volume, ZipCodec,
};

/// Compresses well, but not trivially
fn text_data(len: usize) -> Vec<u8> {
    let words: &[&[u8]] = &[b"lorem ", b"ipsum ", b"dolor ", b"sit ", b"amet\n", b"0123 "];
    let mut state = 0x2545_f491_u32;
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        out.extend_from_slice(words[(state >> 16) as usize % words.len()]);
    }
    out.truncate(len);
    out
}

/// Doesn't compress at all
fn noise(len: usize) -> Vec<u8> {
    let mut state = 0x9e37_79b9_u32;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16) as u8
        })
        .collect()
}

fn scenario_zip() -> Vec<u8> {
    ZipBuilder::new()
        .stored("A", b"0123456789")
        .stored("B", b"abcde")
        .build()
}

fn engine_over(data: Vec<u8>, tunables: Tunables) -> (Engine<InstrumentedReader>, Arc<Tally>) {
    let reader = InstrumentedReader::new(data);
    let tally = reader.tally();
    let engine = Engine::new(reader, ZipCodec::default(), tunables).unwrap();
    (engine, tally)
}

fn advance_to(engine: &mut Engine<InstrumentedReader>, name: &str) {
    loop {
        match engine.advance_header().unwrap() {
            Some(entry) if entry.name == name => return,
            Some(_) => continue,
            None => panic!("no entry named {name:?}"),
        }
    }
}

fn read(engine: &mut Engine<InstrumentedReader>, offset: u64, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    let n = engine.read_at(offset, &mut buf).unwrap();
    buf.truncate(n);
    buf
}

fn small_tunables() -> Tunables {
    Tunables::default()
        .header_chunk_size(512)
        .data_chunk_size(256, 4096)
        .decompress_buffer_capacity(1000)
        .discard_buffer_size(300)
}

#[test_log::test]
fn two_entry_scenario() {
    let reader = InstrumentedReader::new(scenario_zip());
    let mut volume = Volume::zip(reader).unwrap();

    let listing = volume.list_entries().unwrap();
    let names = listing
        .iter()
        .map(|e| (e.name.as_str(), e.size))
        .collect::<Vec<_>>();
    assert_eq!(names, vec![("A", 10), ("B", 5)]);

    let a = volume.open_entry("A").unwrap();
    let b = volume.open_entry("B").unwrap();

    assert_eq!(volume.read_entry(a, 3, 4).unwrap(), b"3456");
    // backwards
    assert_eq!(volume.read_entry(a, 0, 2).unwrap(), b"01");
    // clamped
    assert_eq!(volume.read_entry(b, 1, 10).unwrap(), b"bcde");
    // end of entry is not an error
    assert_eq!(volume.read_entry(a, 10, 1).unwrap(), b"");
}

#[cfg(feature = "file")]
#[test_log::test]
fn two_entry_scenario_over_read_at() {
    let data = scenario_zip();
    let size = data.len() as u64;
    let mut volume = Volume::zip(crate::ReadAtReader::with_size(data, size)).unwrap();

    assert_eq!(volume.list_entries().unwrap().len(), 2);
    let b = volume.open_entry("B").unwrap();
    let a = volume.open_entry("A").unwrap();
    assert_eq!(volume.read_entry(b, 0, 5).unwrap(), b"abcde");
    assert_eq!(volume.read_entry(a, 8, 5).unwrap(), b"89");
}

#[test_log::test]
fn random_access_matches_sequential_decode() {
    let data = text_data(100_000);
    let zip = ZipBuilder::new()
        .stored("before", b"something else")
        .deflated("big.txt", &data)
        .build();
    let (mut engine, _) = engine_over(zip, small_tunables());
    advance_to(&mut engine, "big.txt");
    assert_eq!(engine.current_entry().unwrap().size, data.len() as u64);

    let reads: &[(u64, usize)] = &[
        (0, 10),
        (5, 100),
        (50_000, 2_000),
        (49_000, 10),
        (99_990, 100),
        (12_345, 1),
        (70_000, 30_000),
        (0, 100_000),
    ];
    for &(offset, len) in reads {
        let start = offset as usize;
        let end = std::cmp::min(start + len, data.len());
        assert_eq!(
            read(&mut engine, offset, len),
            &data[start..end],
            "read_at({offset}, {len})"
        );
    }
}

#[test_log::test]
fn first_read_can_start_mid_entry() {
    // default tunables: the first fill decodes a chunk much smaller than
    // the entry
    for len in [3_000, 20_000, 50_000] {
        let data = text_data(len);
        let zip = ZipBuilder::new().deflated("t", &data).build();
        let mut volume = Volume::zip(InstrumentedReader::new(zip)).unwrap();
        let t = volume.open_entry("t").unwrap();

        assert_eq!(
            volume.read_entry(t, 2_000, 1_000).unwrap(),
            &data[2_000..3_000],
            "entry of {len} bytes"
        );
        // all the way to the end, which verifies the checksum
        assert_eq!(
            volume.read_entry(t, 2_500, len).unwrap(),
            &data[2_500..],
            "entry of {len} bytes"
        );
    }
}

#[test_log::test]
fn repeated_reads_are_identical() {
    let data = text_data(20_000);
    let zip = ZipBuilder::new().deflated("t", &data).build();
    let (mut engine, _) = engine_over(zip, small_tunables());
    advance_to(&mut engine, "t");

    let first = read(&mut engine, 4_000, 777);
    let second = read(&mut engine, 4_000, 777);
    assert_eq!(first, second);
    assert_eq!(first, &data[4_000..4_777]);
}

#[test_log::test]
fn forward_reads_never_replay() {
    let data = text_data(100_000);
    let zip = ZipBuilder::new().deflated("t", &data).build();
    let (mut engine, _) = engine_over(zip, small_tunables());
    advance_to(&mut engine, "t");

    for &(offset, len) in &[
        (0u64, 10usize),
        (10, 10),
        (500, 1_000),
        (5_000, 3),
        (5_003, 3_000),
        (99_000, 5_000),
    ] {
        let start = offset as usize;
        let end = std::cmp::min(start + len, data.len());
        assert_eq!(read(&mut engine, offset, len), &data[start..end]);
    }

    let stats = engine.stats();
    assert_eq!(stats.replays, 0);
    assert!(stats.discarded_bytes > 0);
}

#[test_log::test]
fn backward_jump_to_start_reproduces_data() {
    let data = text_data(30_000);
    let zip = ZipBuilder::new().deflated("t", &data).build();
    let (mut engine, _) = engine_over(zip, small_tunables());
    advance_to(&mut engine, "t");

    let first = read(&mut engine, 0, 2_048);
    read(&mut engine, 20_000, 100);
    let again = read(&mut engine, 0, 2_048);

    assert_eq!(first, again);
    assert_eq!(again, &data[..2_048]);
    assert_eq!(engine.stats().replays, 1);
}

#[test_log::test]
fn replays_are_served_by_the_header_cache() {
    let (mut engine, tally) = engine_over(scenario_zip(), Tunables::default());
    advance_to(&mut engine, "A");
    assert_eq!(read(&mut engine, 3, 4), b"3456");

    // the whole archive was read along with the first header
    let reads = tally.reads();
    assert_eq!(read(&mut engine, 0, 2), b"01");
    assert_eq!(tally.reads(), reads);

    let stats = engine.stats();
    assert_eq!(stats.replays, 1);
    assert!(stats.cache.hits >= 1);
    assert!(stats.cache.records >= 1);
}

#[test_log::test]
fn offsets_past_the_end_read_nothing() {
    let (mut engine, _) = engine_over(scenario_zip(), Tunables::default());
    advance_to(&mut engine, "A");

    let mut buf = [0u8; 8];
    assert_eq!(engine.read_at(10, &mut buf).unwrap(), 0);
    assert_eq!(engine.read_at(1_000, &mut buf).unwrap(), 0);
    assert_eq!(engine.read_at(0, &mut []).unwrap(), 0);
    assert_eq!(read(&mut engine, 9, 8), b"9");
}

#[test_log::test]
fn buffer_never_outgrows_its_capacity() {
    let data = noise(10_000);
    let zip = ZipBuilder::new().stored("n", &data).build();
    let tunables = Tunables::default().decompress_buffer_capacity(100);
    let (mut engine, _) = engine_over(zip, tunables);
    advance_to(&mut engine, "n");

    assert_eq!(read(&mut engine, 0, 5_000), &data[..5_000]);
    assert!(engine.buffered() <= 100);
    engine.prefetch();
    assert!(engine.buffered() <= 100);
    assert_eq!(read(&mut engine, 5_000, 1 << 20), &data[5_000..]);
    assert!(engine.buffered() <= 100);
}

#[test_log::test]
fn forward_jumps_use_buffered_data_first() {
    let data = noise(10_000);
    let zip = ZipBuilder::new().stored("n", &data).build();
    let (mut engine, _) = engine_over(zip, small_tunables());
    advance_to(&mut engine, "n");

    assert_eq!(read(&mut engine, 0, 500), &data[..500]);
    engine.prefetch();
    assert_eq!(engine.buffered(), 500);

    // lands within the prefetched window
    assert_eq!(read(&mut engine, 700, 10), &data[700..710]);
    assert_eq!(engine.stats().discarded_bytes, 0);

    // past it: what's left of the window counts as skipped, the rest gets
    // decoded and thrown away
    assert_eq!(read(&mut engine, 2_000, 10), &data[2_000..2_010]);
    assert_eq!(engine.stats().discarded_bytes, 1_000);
    assert_eq!(engine.stats().replays, 0);
}

#[test_log::test]
fn prefetch_decodes_the_next_chunk() {
    let data = noise(10_000);
    let zip = ZipBuilder::new().stored("n", &data).build();
    let tunables = Tunables::default().decompress_buffer_capacity(100);
    let (mut engine, _) = engine_over(zip, tunables);

    // nothing to prefetch while enumerating
    advance_to(&mut engine, "n");
    engine.prefetch();
    assert_eq!(engine.buffered(), 0);

    assert_eq!(read(&mut engine, 0, 50), &data[..50]);
    assert_eq!(engine.buffered(), 0);
    engine.prefetch();
    assert_eq!(engine.buffered(), 50);
    // already full
    engine.prefetch();
    assert_eq!(engine.buffered(), 50);

    assert_eq!(read(&mut engine, 50, 50), &data[50..100]);
    assert_eq!(engine.buffered(), 0);
}

#[test_log::test]
fn io_errors_fail_the_read_only() {
    let data = noise(200_000);
    let zip = ZipBuilder::new().stored("n", &data).build();
    let tunables = Tunables::default()
        .header_chunk_size(512)
        .data_chunk_size(1024, 1024)
        .decompress_buffer_capacity(4096);
    let (mut engine, tally) = engine_over(zip, tunables);
    advance_to(&mut engine, "n");
    assert_eq!(read(&mut engine, 0, 100), &data[..100]);

    tally.set_fail_reads(true);
    let mut buf = [0u8; 100];
    assert!(matches!(engine.read_at(50_000, &mut buf), Err(Error::Io(_))));
    assert!(!matches!(engine.state(), State::Faulted(_)));

    tally.set_fail_reads(false);
    assert_eq!(read(&mut engine, 50_000, 100), &data[50_000..50_100]);
    assert_eq!(engine.stats().replays, 1);
}

#[test_log::test]
fn failed_advances_keep_the_current_entry() {
    let data = noise(100_000);
    let zip = ZipBuilder::new()
        .stored("a", &data)
        .stored("b", b"bee")
        .build();
    let tunables = Tunables::default()
        .header_chunk_size(512)
        .data_chunk_size(1024, 1024)
        .decompress_buffer_capacity(4096);
    let (mut engine, tally) = engine_over(zip, tunables);
    advance_to(&mut engine, "a");
    assert_eq!(read(&mut engine, 0, 10), &data[..10]);

    // the next header was never read, so it's not cached either
    tally.set_fail_reads(true);
    assert!(matches!(engine.advance_header(), Err(Error::Io(_))));
    assert!(!matches!(engine.state(), State::Faulted(_)));
    assert_eq!(engine.current_entry().unwrap().name, "a");
    assert_eq!(engine.current_index(), Some(0));

    tally.set_fail_reads(false);
    assert_eq!(read(&mut engine, 0, 10), &data[..10]);
    assert_eq!(read(&mut engine, 99_990, 100), &data[99_990..]);
    assert_eq!(engine.stats().replays, 1);
    assert_eq!(engine.advance_header().unwrap().unwrap().name, "b");
}

#[test_log::test]
fn failed_replays_keep_the_current_entry() {
    let zip = ZipBuilder::new()
        .stored("a", b"alpha")
        .stored("b", b"bravo")
        .build();
    // without a cache, replays have to read headers again
    let tunables = Tunables::default().header_cache_limit(Some(0));
    let (mut engine, tally) = engine_over(zip, tunables);
    advance_to(&mut engine, "b");
    assert_eq!(read(&mut engine, 2, 3), b"avo");

    tally.set_fail_reads(true);
    let mut buf = [0u8; 2];
    assert!(matches!(engine.read_at(0, &mut buf), Err(Error::Io(_))));
    assert_eq!(engine.current_entry().unwrap().name, "b");
    assert_eq!(engine.current_index(), Some(1));

    tally.set_fail_reads(false);
    assert_eq!(read(&mut engine, 0, 2), b"br");
    assert_eq!(engine.stats().replays, 2);
    assert!(engine.advance_header().unwrap().is_none());
}

#[test_log::test]
fn checksum_mismatch_fails_the_read_and_recovers() {
    let zip = ZipBuilder::new()
        .corrupt_crc32()
        .stored("bad", b"payload")
        .build();
    let (mut engine, _) = engine_over(zip, Tunables::default());
    advance_to(&mut engine, "bad");

    // reading up to the end of the entry is what verifies it
    let mut buf = [0u8; 64];
    assert!(matches!(
        engine.read_at(0, &mut buf),
        Err(Error::Decode(CodecError::Format(
            FormatError::WrongChecksum { .. }
        )))
    ));
    assert!(!matches!(engine.state(), State::Faulted(_)));

    // bytes short of the end can still be served, after a replay
    assert_eq!(read(&mut engine, 0, 3), b"pay");
    assert!(engine.advance_header().unwrap().is_none());
}

#[test_log::test]
fn unsupported_methods_fail_reads_not_listings() {
    let zip = ZipBuilder::new()
        .raw("x.lzma", Method::Lzma, b"not really lzma".to_vec(), b"data")
        .stored("ok", b"fine")
        .build();
    let mut volume = Volume::zip(InstrumentedReader::new(zip)).unwrap();
    assert_eq!(volume.list_entries().unwrap().len(), 2);

    let x = volume.open_entry("x.lzma").unwrap();
    assert!(matches!(
        volume.read_entry(x, 0, 4),
        Err(Error::Decode(CodecError::Unsupported(
            UnsupportedError::MethodNotSupported(Method::Lzma)
        )))
    ));

    let ok = volume.open_entry("ok").unwrap();
    assert_eq!(volume.read_entry(ok, 0, 4).unwrap(), b"fine");
}

#[test_log::test]
fn tiny_decoder_buffers_fail_init() {
    let reader = InstrumentedReader::new(scenario_zip());
    let mut engine =
        Engine::new(reader, ZipCodec::with_buffer_capacity(16), Tunables::default()).unwrap();

    assert!(matches!(engine.advance_header(), Err(Error::Init(_))));
    assert!(matches!(engine.state(), State::Faulted(_)));
    assert!(matches!(engine.advance_header(), Err(Error::Faulted(_))));
    assert!(matches!(engine.read_at(0, &mut [0u8; 4]), Err(Error::Faulted(_))));
}

#[test_log::test]
fn non_archives_fail_open() {
    let (mut engine, _) = engine_over(b"GIF89a, certainly not a zip".to_vec(), Tunables::default());
    assert!(matches!(
        engine.advance_header(),
        Err(Error::Open(CodecError::Format(FormatError::NotAZip)))
    ));
    assert!(matches!(engine.advance_header(), Err(Error::Faulted(_))));
}

#[test_log::test]
fn bad_headers_fault_the_session() {
    let mut zip = ZipBuilder::new()
        .stored("a", b"x")
        .stored("b", b"y")
        .build();
    // second local header starts after 30 + "a" + "x": "PK\x03\x04" becomes
    // "PK\x03\x05", which isn't any known record
    zip[32 + 3] = 0x05;

    let mut volume = Volume::zip(InstrumentedReader::new(zip)).unwrap();
    assert!(matches!(
        volume.list_entries(),
        Err(Error::HeaderParse(CodecError::Format(
            FormatError::InvalidLocalHeader
        )))
    ));
    assert!(matches!(volume.engine().state(), State::Faulted(_)));
    assert!(matches!(volume.open_entry("a"), Err(Error::Faulted(_))));
}

#[test_log::test]
fn encrypted_entries_fail_reads_not_listings() {
    let zip = ZipBuilder::new()
        .stored("plain.txt", b"in the clear")
        .encrypted("secret.txt", b"under wraps")
        .stored("after.txt", b"still readable")
        .build();
    let mut volume = Volume::zip(InstrumentedReader::new(zip)).unwrap();

    let names = volume
        .list_entries()
        .unwrap()
        .iter()
        .map(|e| e.name.clone())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["plain.txt", "secret.txt", "after.txt"]);

    let secret = volume.open_entry("secret.txt").unwrap();
    assert!(matches!(
        volume.read_entry(secret, 0, 5),
        Err(Error::Decode(CodecError::Unsupported(
            UnsupportedError::Encrypted(name)
        ))) if name == "secret.txt"
    ));
    assert!(!matches!(volume.engine().state(), State::Faulted(_)));

    let plain = volume.open_entry("plain.txt").unwrap();
    assert_eq!(volume.read_entry(plain, 0, 100).unwrap(), b"in the clear");
    let after = volume.open_entry("after.txt").unwrap();
    assert_eq!(volume.read_entry(after, 6, 100).unwrap(), b"readable");
}

#[test_log::test]
fn entries_without_sizes_cannot_be_listed() {
    let zip = ZipBuilder::new()
        .streaming()
        .stored("first", b"can't tell where this ends")
        .stored("second", b"or where this starts")
        .build();
    let mut volume = Volume::zip(InstrumentedReader::new(zip)).unwrap();
    assert!(matches!(
        volume.list_entries(),
        Err(Error::HeaderParse(CodecError::Unsupported(
            UnsupportedError::UnknownSize(name)
        ))) if name == "first"
    ));
    assert!(matches!(volume.engine().state(), State::Faulted(_)));
}

#[test_log::test]
fn empty_entries_without_sizes_are_fine() {
    let zip = ZipBuilder::new()
        .streaming()
        .stored("empty", b"")
        .directory("dir/")
        .build();
    let mut volume = Volume::zip(InstrumentedReader::new(zip)).unwrap();
    let listing = volume.list_entries().unwrap();
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].size, 0);

    let empty = volume.open_entry("empty").unwrap();
    assert_eq!(volume.read_entry(empty, 0, 10).unwrap(), b"");
}

#[test_log::test]
fn invalid_tunables_are_rejected() {
    let res = Engine::new(
        InstrumentedReader::new(scenario_zip()),
        ZipCodec::default(),
        Tunables::default().decompress_buffer_capacity(0),
    );
    assert!(matches!(res, Err(Error::InvalidTunables(_))));
}

#[test_log::test]
fn entries_iterate_once() {
    let zip = ZipBuilder::new()
        .stored("a", b"1")
        .directory("b/")
        .deflated("b/c", b"22")
        .build();
    let (mut engine, _) = engine_over(zip, Tunables::default());

    let entries = engine.entries().collect::<Result<Vec<_>, _>>().unwrap();
    let names = entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["a", "b/", "b/c"]);
    assert_eq!(entries[1].kind, EntryKind::Directory);
    assert_eq!(entries[2].size, 2);
    assert_eq!(entries[0].modified.to_rfc3339(), "2024-01-01T12:00:00+00:00");

    assert!(engine.advance_header().unwrap().is_none());
    assert!(engine.entries().next().is_none());
    assert!(engine.read_at(0, &mut [0u8; 1]).is_err());

    engine.rewind().unwrap();
    assert_eq!(engine.advance_header().unwrap().unwrap().name, "a");
    assert_eq!(engine.current_index(), Some(0));
}

#[test_log::test]
fn replays_track_entries_by_position() {
    let zip = ZipBuilder::new()
        .stored("dup", b"first")
        .stored("dup", b"second")
        .build();
    let (mut engine, _) = engine_over(zip, Tunables::default());
    engine.advance_header().unwrap();
    engine.advance_header().unwrap();
    assert_eq!(engine.current_index(), Some(1));

    assert_eq!(read(&mut engine, 3, 3), b"ond");
    assert_eq!(read(&mut engine, 0, 3), b"sec");
    assert_eq!(engine.stats().replays, 1);
}

#[test_log::test]
fn duplicate_names_open_the_first_entry() {
    let zip = ZipBuilder::new()
        .stored("dup", b"first")
        .stored("dup", b"second")
        .build();
    let mut volume = Volume::zip(InstrumentedReader::new(zip)).unwrap();
    let handle = volume.open_entry("dup").unwrap();
    assert_eq!(volume.read_entry(handle, 0, 100).unwrap(), b"first");
}

#[test_log::test]
fn handles_are_validated() {
    let mut volume = Volume::zip(InstrumentedReader::new(scenario_zip())).unwrap();
    assert!(matches!(volume.open_entry("C"), Err(Error::NotFound(_))));

    let a = volume.open_entry("A").unwrap();
    assert_eq!(volume.entry(a).unwrap().size, 10);
    volume.close_entry(a).unwrap();

    assert!(matches!(volume.read_entry(a, 0, 1), Err(Error::InvalidHandle(_))));
    assert!(matches!(volume.close_entry(a), Err(Error::InvalidHandle(_))));
    assert!(matches!(volume.entry(a), Err(Error::InvalidHandle(_))));
}

#[test_log::test]
fn closing_the_last_handle_releases_the_decoder() {
    let mut volume = Volume::zip(InstrumentedReader::new(scenario_zip())).unwrap();
    let a = volume.open_entry("A").unwrap();
    let b = volume.open_entry("B").unwrap();
    assert_eq!(volume.read_entry(b, 0, 5).unwrap(), b"abcde");

    volume.close_entry(a).unwrap();
    assert_eq!(volume.engine().state(), &State::StreamingPayload);
    assert_eq!(volume.read_entry(b, 2, 2).unwrap(), b"cd");

    volume.close_entry(b).unwrap();
    assert_eq!(volume.engine().state(), &State::Uninitialized);
    assert!(volume.engine().current_entry().is_none());

    // starts over from the beginning
    let b = volume.open_entry("B").unwrap();
    assert_eq!(volume.read_entry(b, 0, 5).unwrap(), b"abcde");
}

#[test_log::test]
fn shutdown_is_idempotent_and_reports_failures() {
    let (mut engine, tally) = engine_over(scenario_zip(), Tunables::default());
    advance_to(&mut engine, "A");
    tally.set_fail_close(true);

    assert!(matches!(engine.shutdown(), Err(Error::Io(_))));
    assert_eq!(engine.state(), &State::Closed);
    assert_eq!(tally.closes(), 1);

    engine.shutdown().unwrap();
    assert_eq!(tally.closes(), 1);
    assert!(matches!(engine.read_at(0, &mut [0u8; 1]), Err(Error::Closed)));
    assert!(matches!(engine.advance_header(), Err(Error::Closed)));
}

#[test_log::test]
fn empty_archives_list_nothing() {
    let mut volume = Volume::zip(InstrumentedReader::new(ZipBuilder::new().build())).unwrap();
    assert!(volume.list_entries().unwrap().is_empty());
    assert!(matches!(volume.open_entry("anything"), Err(Error::NotFound(_))));
}

#[test_log::test]
fn readers_are_handed_back_unclosed() {
    let (mut engine, tally) = engine_over(scenario_zip(), Tunables::default());
    advance_to(&mut engine, "B");
    let reader = engine.into_reader();
    assert_eq!(tally.closes(), 0);
    assert!(crate::BackingReader::offset(&reader) > 0);
}

/// Puts a compressed entry between two stored ones, and reads it out of
/// order.
#[cfg(any(feature = "bzip2", feature = "zstd", feature = "deflate64"))]
fn check_method(method: Method, payload: Vec<u8>, data: &[u8]) {
    let zip = ZipBuilder::new()
        .stored("before", b"1")
        .raw("packed", method, payload, data)
        .stored("after", b"2")
        .build();
    let (mut engine, _) = engine_over(zip, small_tunables());
    advance_to(&mut engine, "packed");

    let len = data.len() as u64;
    for (offset, n) in [(len / 2, 1_000), (0, 100), (len - 100, 1_000), (10, 5_000)] {
        let start = offset as usize;
        let end = std::cmp::min(start + n, data.len());
        assert_eq!(
            read(&mut engine, offset, n),
            &data[start..end],
            "{method:?} read_at({offset}, {n})"
        );
    }
    assert_eq!(engine.advance_header().unwrap().unwrap().name, "after");
}

#[cfg(feature = "bzip2")]
#[test_log::test]
fn bzip2_entries_are_random_access() {
    use std::io::Write;

    let data = text_data(60_000);
    let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    enc.write_all(&data).unwrap();
    check_method(Method::Bzip2, enc.finish().unwrap(), &data);
}

#[cfg(feature = "zstd")]
#[test_log::test]
fn zstd_entries_are_random_access() {
    let data = text_data(60_000);
    let payload = zstd::encode_all(&data[..], 3).unwrap();
    check_method(Method::Zstd, payload, &data);
}

#[cfg(feature = "deflate64")]
#[test_log::test]
fn deflate64_entries_are_random_access() {
    use std::io::Write;

    // deflate64 reads plain deflate streams too, as long as no match is
    // 258 bytes long: noise has no matches at all
    let data = noise(60_000);
    let mut enc = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(&data).unwrap();
    check_method(Method::Deflate64, enc.finish().unwrap(), &data);
}

#[cfg(feature = "zstd")]
#[test_log::test]
fn corrupt_data_fails_the_read() {
    let data = text_data(10_000);
    let mut payload = zstd::encode_all(&data[..], 3).unwrap();
    // past the frame header
    let mid = payload.len() / 2;
    for b in &mut payload[mid..mid + 16] {
        *b ^= 0xa5;
    }
    let zip = ZipBuilder::new()
        .raw("bad.zst", Method::Zstd, payload, &data)
        .build();
    let (mut engine, _) = engine_over(zip, Tunables::default());
    advance_to(&mut engine, "bad.zst");

    let mut buf = vec![0u8; data.len()];
    assert!(engine.read_at(0, &mut buf).is_err());
    assert!(!matches!(engine.state(), State::Faulted(_)));
}

#[cfg(feature = "tokio")]
#[tokio::test]
async fn dispatcher_serializes_requests() {
    let data = text_data(50_000);
    let zip = ZipBuilder::new()
        .deflated("big", &data)
        .stored("small", b"tiny")
        .build();
    let volume = Volume::zip(InstrumentedReader::new(zip)).unwrap();
    let client = crate::dispatch::spawn(volume);

    let entries = client.list_entries().await.unwrap();
    assert_eq!(entries.len(), 2);

    let big = client.open_entry("big").await.unwrap();
    let small = client.open_entry("small").await.unwrap();

    let other = client.clone();
    let (a, b, c) = tokio::join!(
        client.read_entry(big, 10_000, 1_000),
        other.read_entry(small, 0, 100),
        other.read_entry(big, 0, 10),
    );
    assert_eq!(a.unwrap(), &data[10_000..11_000]);
    assert_eq!(b.unwrap(), b"tiny");
    assert_eq!(c.unwrap(), &data[..10]);

    client.close_entry(small).await.unwrap();
    client.shutdown().await.unwrap();
    assert!(matches!(
        other.read_entry(big, 0, 1).await,
        Err(Error::Closed)
    ));
}
