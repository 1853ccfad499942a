//! Archive container formats.
//!
//! A format turns the byte stream of a session into entries and back. This
//! crate ships two trivial formats, [`raw`](RawReader) and
//! [`empty`](EmptyReader); any other container plugs in through the
//! [`FormatReader`] and [`FormatWriter`] traits.
//!
//! # Implementing a Format
//!
//! ```rust
//! use arcstream::format::{self, FormatReader};
//! use arcstream::stream::ReadStream;
//! use arcstream::{Entry, Result};
//!
//! /// Every line of the input is an entry with no data.
//! struct LineFormat;
//!
//! impl FormatReader for LineFormat {
//!     fn code(&self) -> i32 {
//!         format::BASE_MASK
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "lines"
//!     }
//!
//!     fn bid(&mut self, stream: &mut ReadStream, _best_bid: i32) -> Result<i32> {
//!         Ok(if stream.ahead(1)?.first() == Some(&b'/') { 8 } else { 0 })
//!     }
//!
//!     fn read_header(&mut self, stream: &mut ReadStream, entry: &mut Entry) -> Result<bool> {
//!         let mut line = Vec::new();
//!         let mut byte = [0u8; 1];
//!         while stream.read(&mut byte)? == 1 && byte[0] != b'\n' {
//!             line.push(byte[0]);
//!         }
//!         if line.is_empty() {
//!             return Ok(false);
//!         }
//!         entry.set_pathname(line);
//!         Ok(true)
//!     }
//!
//!     fn read_data(&mut self, _: &mut ReadStream, _: &mut Entry, _: &mut [u8]) -> Result<usize> {
//!         Ok(0)
//!     }
//!
//!     fn skip_data(&mut self, _: &mut ReadStream) -> Result<()> {
//!         Ok(())
//!     }
//! }
//! ```

mod empty;
mod raw;

pub use empty::EmptyReader;
pub use raw::{RawReader, RawWriter};

use crate::callback::Whence;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::stream::{ReadStream, WriteStream};

/// Mask selecting the format family of a code.
pub const BASE_MASK: i32 = 0xff0000;

/// cpio family.
pub const CPIO: i32 = 0x10000;
/// POSIX octet-oriented cpio.
pub const CPIO_POSIX: i32 = CPIO | 1;
/// Little-endian binary cpio.
pub const CPIO_BIN_LE: i32 = CPIO | 2;
/// Big-endian binary cpio.
pub const CPIO_BIN_BE: i32 = CPIO | 3;
/// SVR4 cpio without checksums.
pub const CPIO_SVR4_NOCRC: i32 = CPIO | 4;
/// SVR4 cpio with checksums.
pub const CPIO_SVR4_CRC: i32 = CPIO | 5;
/// afio large-file cpio.
pub const CPIO_AFIO_LARGE: i32 = CPIO | 6;
/// PWB cpio.
pub const CPIO_PWB: i32 = CPIO | 7;
/// shar family.
pub const SHAR: i32 = 0x20000;
/// Plain shell archive.
pub const SHAR_BASE: i32 = SHAR | 1;
/// Binary-safe shell archive.
pub const SHAR_DUMP: i32 = SHAR | 2;
/// tar family.
pub const TAR: i32 = 0x30000;
/// POSIX ustar.
pub const TAR_USTAR: i32 = TAR | 1;
/// pax interchange format.
pub const TAR_PAX_INTERCHANGE: i32 = TAR | 2;
/// Restricted pax.
pub const TAR_PAX_RESTRICTED: i32 = TAR | 3;
/// GNU tar.
pub const TAR_GNUTAR: i32 = TAR | 4;
/// ISO 9660 images.
pub const ISO9660: i32 = 0x40000;
/// ISO 9660 with Rock Ridge extensions.
pub const ISO9660_ROCKRIDGE: i32 = ISO9660 | 1;
/// zip.
pub const ZIP: i32 = 0x50000;
/// Empty input, no entries.
pub const EMPTY: i32 = 0x60000;
/// ar family.
pub const AR: i32 = 0x70000;
/// GNU ar.
pub const AR_GNU: i32 = AR | 1;
/// BSD ar.
pub const AR_BSD: i32 = AR | 2;
/// mtree manifests.
pub const MTREE: i32 = 0x80000;
/// A single unnamed entry holding the whole input.
pub const RAW: i32 = 0x90000;
/// xar.
pub const XAR: i32 = 0xA0000;
/// LHA/LZH.
pub const LHA: i32 = 0xB0000;
/// Microsoft cabinet.
pub const CAB: i32 = 0xC0000;
/// RAR up to version 4.
pub const RAR: i32 = 0xD0000;
/// 7z.
pub const SEVENZIP: i32 = 0xE0000;
/// WARC web archives.
pub const WARC: i32 = 0xF0000;
/// RAR version 5.
pub const RAR_V5: i32 = 0x100000;

/// The format cannot encrypt anything.
pub const CAPS_NONE: i32 = 0;
/// The format can encrypt entry data.
pub const CAPS_ENCRYPT_DATA: i32 = 1 << 0;
/// The format can encrypt entry metadata.
pub const CAPS_ENCRYPT_METADATA: i32 = 1 << 1;

/// The format does not support encryption.
pub const ENCRYPTION_UNSUPPORTED: i32 = -2;
/// Not enough of the archive has been read to tell.
pub const ENCRYPTION_DONT_KNOW: i32 = -1;

const NAMES: [(i32, &str); 27] = [
    (CPIO, "cpio"),
    (CPIO_POSIX, "POSIX octet-oriented cpio"),
    (CPIO_BIN_LE, "little-endian binary cpio"),
    (CPIO_BIN_BE, "big-endian binary cpio"),
    (CPIO_SVR4_NOCRC, "SVR4 cpio (no CRC)"),
    (CPIO_SVR4_CRC, "SVR4 cpio (with CRC)"),
    (CPIO_AFIO_LARGE, "afio large ASCII cpio"),
    (CPIO_PWB, "PWB cpio"),
    (SHAR_BASE, "shar"),
    (SHAR_DUMP, "shar dump"),
    (TAR, "tar"),
    (TAR_USTAR, "POSIX ustar format"),
    (TAR_PAX_INTERCHANGE, "POSIX pax interchange format"),
    (TAR_PAX_RESTRICTED, "restricted pax format"),
    (TAR_GNUTAR, "GNU tar format"),
    (ISO9660, "ISO9660"),
    (ISO9660_ROCKRIDGE, "ISO9660 with Rockridge extensions"),
    (ZIP, "ZIP"),
    (EMPTY, "Empty file"),
    (AR_GNU, "ar (GNU/SVR4)"),
    (AR_BSD, "ar (BSD)"),
    (MTREE, "mtree"),
    (RAW, "raw"),
    (XAR, "xar"),
    (SEVENZIP, "7-Zip"),
    (WARC, "WARC"),
    (RAR_V5, "RAR5"),
];

/// Returns the display name of a format code.
///
/// Subtype codes without a name of their own fall back to their family.
pub fn name(code: i32) -> Option<&'static str> {
    let lookup = |code: i32| NAMES.iter().find(|(c, _)| *c == code).map(|(_, n)| *n);
    lookup(code).or_else(|| match code & BASE_MASK {
        LHA => Some("lha"),
        CAB => Some("CAB"),
        RAR => Some("RAR"),
        base if base != code => lookup(base),
        _ => None,
    })
}

/// Decodes entries from a read stream.
pub trait FormatReader: Send {
    /// The format code reported for the session.
    fn code(&self) -> i32;

    /// The format name reported for the session.
    fn name(&self) -> &'static str;

    /// Returns how confident this format is that it recognizes the input.
    ///
    /// Peeking through [`ReadStream::ahead`] is allowed; consuming is not.
    /// `best_bid` is the highest bid made so far by other formats.
    fn bid(&mut self, stream: &mut ReadStream, best_bid: i32) -> Result<i32>;

    /// Reads the next header into `entry`; returns false at the end of the archive.
    fn read_header(&mut self, stream: &mut ReadStream, entry: &mut Entry) -> Result<bool>;

    /// Reads entry data into `out`; returns 0 at the end of the entry.
    fn read_data(
        &mut self,
        stream: &mut ReadStream,
        entry: &mut Entry,
        out: &mut [u8],
    ) -> Result<usize>;

    /// Discards the rest of the current entry's data.
    fn skip_data(&mut self, stream: &mut ReadStream) -> Result<()>;

    /// Repositions within the current entry's data.
    fn seek_data(
        &mut self,
        _stream: &mut ReadStream,
        _offset: i64,
        _whence: Whence,
    ) -> Result<u64> {
        Err(Error::Unsupported {
            operation: "seek_data",
        })
    }

    /// Applies a format option; returns false for keys this format does not know.
    fn set_option(&mut self, _key: &str, _value: Option<&str>) -> Result<bool> {
        Ok(false)
    }

    /// Encryption capabilities, as a combination of the `CAPS_*` flags.
    fn capabilities(&self) -> i32 {
        CAPS_NONE
    }

    /// Whether the archive read so far has encrypted entries.
    ///
    /// Returns 0 or 1, or one of [`ENCRYPTION_UNSUPPORTED`] and
    /// [`ENCRYPTION_DONT_KNOW`].
    fn has_encrypted_entries(&self) -> i32 {
        ENCRYPTION_UNSUPPORTED
    }
}

/// Encodes entries into a write stream.
pub trait FormatWriter: Send {
    /// The format code reported for the session.
    fn code(&self) -> i32;

    /// The format name reported for the session.
    fn name(&self) -> &'static str;

    /// Starts a new entry.
    fn write_header(&mut self, stream: &mut WriteStream, entry: &Entry) -> Result<()>;

    /// Writes data for the current entry and returns how much was accepted.
    fn write_data(&mut self, stream: &mut WriteStream, data: &[u8]) -> Result<usize>;

    /// Completes the current entry.
    fn finish_entry(&mut self, _stream: &mut WriteStream) -> Result<()> {
        Ok(())
    }

    /// Writes the archive trailer.
    fn close(&mut self, _stream: &mut WriteStream) -> Result<()> {
        Ok(())
    }

    /// Applies a format option; returns false for keys this format does not know.
    fn set_option(&mut self, _key: &str, _value: Option<&str>) -> Result<bool> {
        Ok(false)
    }
}

pub(crate) fn unsupported(code: i32) -> Error {
    Error::UnsupportedFormat {
        code,
        name: name(code).unwrap_or("unknown"),
    }
}

/// The built-in reader for a format code or family.
pub(crate) fn reader_for(code: i32) -> Result<Box<dyn FormatReader>> {
    match code & BASE_MASK {
        RAW => Ok(Box::new(RawReader::new())),
        EMPTY => Ok(Box::new(EmptyReader::new())),
        _ => Err(unsupported(code)),
    }
}

pub(crate) fn writer_for(code: i32) -> Result<Box<dyn FormatWriter>> {
    match code & BASE_MASK {
        RAW => Ok(Box::new(RawWriter::new())),
        _ => Err(unsupported(code)),
    }
}

/// Looks up a writable format by the names `set_format_by_name` accepts.
pub(crate) fn writer_code_by_name(name: &str) -> Option<i32> {
    match name {
        "raw" => Some(RAW),
        "7zip" => Some(SEVENZIP),
        "ar" | "argnu" => Some(AR_GNU),
        "arbsd" => Some(AR_BSD),
        "cpio" => Some(CPIO_POSIX),
        "newc" => Some(CPIO_SVR4_NOCRC),
        "gnutar" => Some(TAR_GNUTAR),
        "iso" | "iso9660" => Some(ISO9660),
        "mtree" => Some(MTREE),
        "pax" | "posix" => Some(TAR_PAX_INTERCHANGE),
        "paxr" | "rpax" => Some(TAR_PAX_RESTRICTED),
        "shar" => Some(SHAR_BASE),
        "shardump" => Some(SHAR_DUMP),
        "ustar" => Some(TAR_USTAR),
        "warc" => Some(WARC),
        "xar" => Some(XAR),
        "zip" => Some(ZIP),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_names() {
        assert_eq!(name(RAW), Some("raw"));
        assert_eq!(name(EMPTY), Some("Empty file"));
        assert_eq!(name(TAR_GNUTAR), Some("GNU tar format"));
        assert_eq!(name(ZIP | 3), Some("ZIP"));
        assert_eq!(name(RAR | 1), Some("RAR"));
        assert_eq!(name(0x7f0000), None);
    }

    #[test]
    fn test_builtin_lookup() {
        assert_eq!(reader_for(RAW).unwrap().code(), RAW);
        assert_eq!(reader_for(EMPTY).unwrap().name(), "Empty file");
        assert!(matches!(
            reader_for(TAR_USTAR),
            Err(Error::UnsupportedFormat { name: "POSIX ustar format", .. })
        ));
        assert!(writer_for(RAW).is_ok());
        assert!(writer_for(ZIP).is_err());
        assert_eq!(writer_code_by_name("ustar"), Some(TAR_USTAR));
        assert_eq!(writer_code_by_name("tarball"), None);
    }
}
