//! Integration tests for compression filters in read and write sessions.

mod common;

use std::io::Write;

use arcstream::{ByteBuffer, Error, ReadArchive, Result, WriteArchive, codes, filter};

use common::{SharedVec, file_entry, pattern, read_all};

/// Writes `payload` as a raw archive through the filters `setup` adds.
fn compress(payload: &[u8], setup: impl FnOnce(&mut WriteArchive) -> Result<()>) -> Vec<u8> {
    let out = SharedVec::default();
    let mut archive: WriteArchive = WriteArchive::new();
    archive.set_format_raw().unwrap();
    setup(&mut archive).unwrap();
    archive.open_writer(out.clone()).unwrap();
    archive.write_header(&file_entry("data", payload.len())).unwrap();
    archive.write_all(payload).unwrap();
    archive.free().unwrap();
    out.bytes()
}

/// Reads a raw archive with every compiled filter enabled.
fn open_detecting(data: Vec<u8>) -> ReadArchive {
    let mut archive: ReadArchive = ReadArchive::new();
    archive.support_filter_all().unwrap();
    archive.support_format_raw().unwrap();
    archive.open_memory(ByteBuffer::wrap(data)).unwrap();
    archive
}

fn payload() -> Vec<u8> {
    b"The quick brown fox jumps over the lazy dog. ".repeat(500)
}

// ============================================================================
// Single filters
// ============================================================================

#[cfg(feature = "deflate")]
#[test]
fn test_gzip_roundtrip() {
    let data = compress(&payload(), |a| a.add_filter_gzip());
    let mut archive = open_detecting(data);
    assert_eq!(archive.filter_name(0), Some("gzip"));
    assert_eq!(read_all(&mut archive).unwrap()[0].1, payload());
}

#[cfg(feature = "bzip2")]
#[test]
fn test_bzip2_roundtrip() {
    let data = compress(&payload(), |a| a.add_filter_bzip2());
    assert!(data.starts_with(b"BZh"));
    let mut archive = open_detecting(data);
    assert_eq!(archive.filter_code(0), Some(filter::BZIP2));
    assert_eq!(read_all(&mut archive).unwrap()[0].1, payload());
}

#[cfg(feature = "zstd")]
#[test]
fn test_zstd_roundtrip() {
    let data = compress(&payload(), |a| a.add_filter_zstd());
    assert!(data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]));
    let mut archive = open_detecting(data);
    assert_eq!(archive.filter_name(0), Some("zstd"));
    assert_eq!(read_all(&mut archive).unwrap()[0].1, payload());
}

#[cfg(feature = "deflate")]
#[test]
fn test_filter_by_name() {
    let data = compress(b"named", |a| a.add_filter_by_name("gzip"));
    let mut archive = open_detecting(data);
    assert_eq!(read_all(&mut archive).unwrap()[0].1, b"named");
}

#[test]
fn test_uncompressed_input_has_only_client_slot() {
    let data = compress(b"plain bytes", |a| a.add_filter_none());
    let mut archive = open_detecting(data);
    assert_eq!(archive.filter_count(), 1);
    assert_eq!(archive.filter_code(0), Some(filter::NONE));
    assert_eq!(read_all(&mut archive).unwrap()[0].1, b"plain bytes");
}

// ============================================================================
// Stacked filters
// ============================================================================

#[cfg(all(feature = "deflate", feature = "bzip2"))]
#[test]
fn test_stacked_filters_are_detected_in_order() {
    let data = compress(&payload(), |a| {
        a.add_filter_gzip()?;
        a.add_filter_bzip2()
    });
    // The last filter added produces the outermost layer.
    assert!(data.starts_with(b"BZh"));

    let mut archive = open_detecting(data);
    assert_eq!(archive.filter_count(), 3);
    assert_eq!(archive.filter_name(0), Some("gzip"));
    assert_eq!(archive.filter_name(1), Some("bzip2"));
    assert_eq!(archive.filter_name(2), Some("none"));
    assert_eq!(archive.filter_name(-1), Some("none"));
    assert_eq!(archive.filter_name(3), None);
    assert_eq!(read_all(&mut archive).unwrap()[0].1, payload());
}

#[cfg(all(feature = "deflate", feature = "bzip2"))]
#[test]
fn test_write_slots_follow_added_order() {
    let mut archive: WriteArchive = WriteArchive::new();
    archive.set_format_raw().unwrap();
    archive.add_filter_gzip().unwrap();
    archive.add_filter_bzip2().unwrap();
    archive.open_writer(SharedVec::default()).unwrap();
    assert_eq!(archive.filter_count(), 3);
    assert_eq!(archive.filter_name(0), Some("gzip"));
    assert_eq!(archive.filter_name(1), Some("bzip2"));
    assert_eq!(archive.filter_name(-1), Some("none"));
}

#[cfg(feature = "deflate")]
#[test]
fn test_deep_nesting_is_rejected() {
    let data = compress(b"onion", |a| {
        for _ in 0..26 {
            a.add_filter_gzip()?;
        }
        Ok(())
    });
    let mut archive: ReadArchive = ReadArchive::new();
    archive.support_filter_gzip().unwrap();
    archive.support_format_raw().unwrap();
    let err = archive.open_memory(ByteBuffer::wrap(data)).unwrap_err();
    assert_eq!(err.to_string(), "Input requires too many filters for decoding");
    assert_eq!(archive.errno(), codes::ERRNO_FILE_FORMAT);
}

#[cfg(feature = "deflate")]
#[test]
fn test_moderate_nesting_is_decoded() {
    let data = compress(b"onion", |a| {
        for _ in 0..3 {
            a.add_filter_gzip()?;
        }
        Ok(())
    });
    let mut archive = open_detecting(data);
    assert_eq!(archive.filter_count(), 4);
    assert_eq!(read_all(&mut archive).unwrap()[0].1, b"onion");
}

// ============================================================================
// Forced filters
// ============================================================================

#[cfg(feature = "deflate")]
#[test]
fn test_appended_filter_is_used_without_bidding() {
    let data = compress(&payload(), |a| a.add_filter_gzip());
    let mut archive: ReadArchive = ReadArchive::new();
    archive.append_filter(filter::GZIP).unwrap();
    archive.support_format_raw().unwrap();
    archive.open_memory(ByteBuffer::wrap(data)).unwrap();
    assert_eq!(archive.filter_name(0), Some("gzip"));
    assert_eq!(read_all(&mut archive).unwrap()[0].1, payload());
}

#[cfg(all(feature = "deflate", feature = "bzip2"))]
#[test]
fn test_appended_filters_disable_detection() {
    let data = compress(b"layered", |a| {
        a.add_filter_gzip()?;
        a.add_filter_bzip2()
    });
    let mut archive: ReadArchive = ReadArchive::new();
    archive.support_filter_all().unwrap();
    archive.append_filter(filter::BZIP2).unwrap();
    archive.support_format_raw().unwrap();
    archive.open_memory(ByteBuffer::wrap(data)).unwrap();
    assert_eq!(archive.filter_count(), 2);

    let inner = read_all(&mut archive).unwrap().remove(0).1;
    assert_eq!(&inner[..2], &[0x1f, 0x8b]);
}

#[cfg(feature = "bzip2")]
#[test]
fn test_unsupported_candidates_leave_input_alone() {
    let data = compress(b"bzipped", |a| a.add_filter_bzip2());
    let mut archive: ReadArchive = ReadArchive::new();
    #[cfg(feature = "deflate")]
    archive.support_filter_gzip().unwrap();
    archive.support_format_raw().unwrap();
    archive.open_memory(ByteBuffer::wrap(data.clone())).unwrap();
    assert_eq!(archive.filter_count(), 1);
    assert_eq!(read_all(&mut archive).unwrap()[0].1, data);
}

// ============================================================================
// Options and errors
// ============================================================================

#[cfg(feature = "deflate")]
#[test]
fn test_compression_level_option() {
    let fast = compress(&pattern(20_000, 1), |a| {
        a.add_filter_gzip()?;
        a.set_filter_option(Some("gzip"), "compression-level", Some("0"))
    });
    let best = compress(&pattern(20_000, 1), |a| {
        a.add_filter_gzip()?;
        a.set_options("gzip:compression-level=9")
    });
    assert!(best.len() < fast.len());

    let mut archive = open_detecting(fast);
    assert_eq!(read_all(&mut archive).unwrap()[0].1, pattern(20_000, 1));
}

#[cfg(feature = "deflate")]
#[test]
fn test_invalid_compression_level() {
    let mut archive: WriteArchive = WriteArchive::new();
    archive.add_filter_gzip().unwrap();
    let err = archive
        .set_filter_option(Some("gzip"), "compression-level", Some("12"))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOption { .. }));
    assert_eq!(archive.errno(), codes::ERRNO_MISC);

    let err = archive
        .set_filter_option(Some("gzip"), "window-size", Some("4"))
        .unwrap_err();
    assert!(matches!(err, Error::UnknownOption { .. }));
}

#[test]
fn test_unsupported_filters_are_rejected() {
    let mut writer: WriteArchive = WriteArchive::new();
    let err = writer.add_filter(filter::XZ).unwrap_err();
    assert!(matches!(err, Error::UnsupportedFilter { code: filter::XZ, .. }));
    assert_eq!(writer.errno(), codes::ERRNO_MISC);

    let err = writer.add_filter_by_name("rot13").unwrap_err();
    assert_eq!(err.to_string(), "No such filter 'rot13'");

    let mut reader: ReadArchive = ReadArchive::new();
    let err = reader.support_filter_by_code(filter::LZ4).unwrap_err();
    assert!(matches!(err, Error::UnsupportedFilter { name: "lz4", .. }));
    assert!(reader.append_filter(filter::XZ).is_err());
}

#[cfg(not(feature = "zstd"))]
#[test]
fn test_disabled_feature_reports_unsupported() {
    let mut writer: WriteArchive = WriteArchive::new();
    let err = writer.add_filter_zstd().unwrap_err();
    assert!(matches!(err, Error::UnsupportedFilter { .. }));
    assert!(!filter::is_available(filter::ZSTD));
}
