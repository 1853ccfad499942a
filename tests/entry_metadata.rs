//! Integration tests for entry metadata as seen by applications.

mod common;

use std::io::Write;

use arcstream::entry::{
    AE_IFBLK, AE_IFDIR, AE_IFLNK, AE_IFREG, Attribute, Digest, FieldState, FileFlags, Stat,
};
use arcstream::{ByteBuffer, Entry, ReadArchive, Timestamp, WriteArchive};
use tempfile::NamedTempFile;

use common::{RecordReader, RecordWriter, SharedVec, file_entry, record_archive};

// ============================================================================
// Tri-state fields
// ============================================================================

#[test]
fn test_fields_move_between_states() {
    let mut entry = Entry::new();
    assert_eq!(entry.field_state(Attribute::Uid), FieldState::Unset);
    assert_eq!(entry.uid(), 0);

    entry.set_uid(0);
    assert_eq!(entry.field_state(Attribute::Uid), FieldState::Set);
    assert!(entry.uid_is_set());

    entry.mark_inapplicable(Attribute::Uid);
    assert_eq!(entry.field_state(Attribute::Uid), FieldState::NotApplicable);
    assert!(!entry.uid_is_set());
    assert_eq!(entry.uid(), 0);

    entry.set_uid(1000);
    assert_eq!(entry.uid(), 1000);
    assert_eq!(entry.field_state(Attribute::Uid), FieldState::Set);
}

#[test]
fn test_unset_time_reads_as_epoch() {
    let mut entry = Entry::new();
    entry.set_mtime(Timestamp::new(-1, 250_000_000));
    assert!(entry.mtime().is_before_unix_epoch());
    entry.unset_mtime();
    assert!(!entry.mtime_is_set());
    assert_eq!(entry.mtime(), Timestamp::default());
}

#[test]
fn test_clone_is_independent() {
    let mut original = file_entry("a/b.txt", 10);
    original.set_uname("alice");
    original.set_digest(Digest::Md5, &[7; 16]).unwrap();

    let mut copy = original.clone();
    copy.set_pathname("c.txt");
    copy.unset_uname();
    copy.set_digest(Digest::Md5, &[9; 16]).unwrap();

    assert_eq!(original.pathname_utf8(), Some("a/b.txt"));
    assert_eq!(original.uname_utf8(), Some("alice"));
    assert_eq!(original.digest(Digest::Md5), Some(&[7u8; 16][..]));
    assert_eq!(copy.pathname_utf8(), Some("c.txt"));
    assert_ne!(original, copy);
}

#[test]
fn test_clear_resets_everything() {
    let mut entry = file_entry("x", 1);
    entry.set_data_encrypted(true);
    entry.set_fflags_text("nodump");
    entry.clear();
    assert_eq!(entry, Entry::new());
    assert!(!entry.is_encrypted());
}

// ============================================================================
// Modes, links and flags
// ============================================================================

#[test]
fn test_strmode_variants() {
    let mut entry = Entry::new();
    entry.set_mode(AE_IFDIR | 0o755);
    assert_eq!(entry.strmode(), "drwxr-xr-x ");

    entry.set_mode(AE_IFLNK | 0o777);
    assert_eq!(entry.strmode(), "lrwxrwxrwx ");

    entry.set_mode(AE_IFBLK | 0o660);
    assert_eq!(entry.strmode(), "brw-rw---- ");

    let mut link = Entry::new();
    link.set_perm(0o644);
    link.set_hardlink("target");
    assert_eq!(link.strmode(), "hrw-r--r-- ");
}

#[test]
fn test_set_link_prefers_symlink() {
    let mut entry = Entry::new();
    entry.set_link("first");
    assert_eq!(entry.hardlink_utf8(), Some("first"));
    assert!(!entry.symlink_is_set());

    entry.set_symlink("old");
    entry.set_link("new");
    assert_eq!(entry.symlink_utf8(), Some("new"));
    assert_eq!(entry.hardlink_utf8(), Some("first"));
}

#[test]
fn test_fflags_text_and_bits() {
    let mut entry = Entry::new();
    let unknown = entry.set_fflags_text("nodump,frobnicate,uchg");
    assert_eq!(unknown, Some("frobnicate"));
    assert_eq!(entry.fflags_text().as_deref(), Some("nodump,frobnicate,uchg"));
    assert_ne!(entry.fflags().set, 0);

    let flags = entry.fflags();
    entry.set_fflags(flags.set, 0);
    assert_eq!(entry.fflags_text().as_deref(), Some("nodump"));

    let (parsed, rest) = FileFlags::parse("dump noatime");
    assert_eq!(rest, None);
    assert_ne!(parsed.clear, 0);
    assert_eq!(parsed.to_text().as_deref(), Some("noatime,dump"));
}

#[test]
fn test_digest_length_is_checked() {
    let mut entry = Entry::new();
    assert!(entry.set_digest(Digest::Sha256, &[1; 31]).is_err());
    assert_eq!(entry.digest(Digest::Sha256), None);
    entry.set_digest(Digest::Sha256, &[1; 32]).unwrap();
    assert_eq!(entry.digest(Digest::Sha256).map(<[u8]>::len), Some(32));
    assert_eq!(Digest::from_raw(4), Some(Digest::Sha256));
    assert_eq!(Digest::from_raw(7), None);
}

// ============================================================================
// Stat and file system metadata
// ============================================================================

#[test]
fn test_stat_roundtrip() {
    let st = Stat {
        dev: 0x0801,
        ino: 42,
        mode: AE_IFREG | 0o600,
        nlink: 2,
        uid: 501,
        gid: 20,
        rdev: 0,
        size: 4096,
        atime: Timestamp::new(1_600_000_000, 1),
        mtime: Timestamp::new(1_600_000_001, 2),
        ctime: Timestamp::new(1_600_000_002, 3),
    };
    let mut entry = Entry::new();
    entry.set_stat(&st);
    assert_eq!(entry.stat(), st);
    assert!(entry.ino_is_set());
    assert!(!entry.birthtime_is_set());
}

#[test]
fn test_device_numbers_split_and_join() {
    let mut entry = Entry::new();
    entry.set_rdevmajor(8);
    entry.set_rdevminor(17);
    assert_eq!(entry.rdevmajor(), 8);
    assert_eq!(entry.rdevminor(), 17);
    assert!(entry.rdev_is_set());
}

#[test]
fn test_copy_metadata_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"twelve bytes").unwrap();
    let metadata = file.as_file().metadata().unwrap();

    let mut entry = Entry::new();
    entry.copy_metadata(&metadata);
    assert_eq!(entry.size(), 12);
    assert_eq!(entry.filetype(), AE_IFREG);
    assert!(entry.mtime_is_set());
    assert_eq!(
        entry.mtime().as_system_time(),
        metadata.modified().unwrap()
    );
}

// ============================================================================
// Entries through sessions
// ============================================================================

#[test]
fn test_record_headers_populate_entries() {
    let data = record_archive(&[("dir/one", b"1"), ("two", b"22")]);
    let mut archive: ReadArchive = ReadArchive::new();
    archive.add_format_reader(RecordReader::default()).unwrap();
    archive.open_memory(ByteBuffer::wrap(data)).unwrap();

    let mut entry = Entry::new();
    assert!(archive.next_header2(&mut entry).unwrap());
    assert_eq!(entry.pathname_utf8(), Some("dir/one"));
    assert_eq!(entry.size(), 1);
    assert_eq!(entry.strmode(), "-rw-r--r-- ");
    assert!(!entry.uid_is_set());

    // The caller's copy survives the next header.
    assert!(archive.next_header2(&mut Entry::new()).unwrap());
    assert_eq!(entry.pathname_utf8(), Some("dir/one"));
    assert!(!archive.next_header2(&mut entry).unwrap());
    assert_eq!(archive.file_count(), 2);
}

#[test]
fn test_written_entries_read_back() {
    let out = SharedVec::default();
    let mut writer: WriteArchive = WriteArchive::new();
    writer.set_format_writer(RecordWriter::default()).unwrap();
    writer.open_writer(out.clone()).unwrap();
    writer.write_header(&file_entry("short", 8)).unwrap();
    writer.write_all(b"abc").unwrap();
    writer.write_header(&file_entry("full", 3)).unwrap();
    writer.write_all(b"xyz").unwrap();
    writer.free().unwrap();

    let mut reader: ReadArchive = ReadArchive::new();
    reader.add_format_reader(RecordReader::default()).unwrap();
    reader.open_memory(ByteBuffer::wrap(out.bytes())).unwrap();
    let entries = common::read_all(&mut reader).unwrap();
    assert_eq!(entries[0], ("short".to_string(), b"abc\0\0\0\0\0".to_vec()));
    assert_eq!(entries[1], ("full".to_string(), b"xyz".to_vec()));
}
