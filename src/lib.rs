//! # arcstream
//!
//! Streaming archive sessions driven by application callbacks.
//!
//! A [`ReadArchive`] pulls archive bytes from a transport, detects compression
//! filters and the archive format, and hands out entries and their data. A
//! [`WriteArchive`] does the reverse. Transports are either application
//! callbacks or one of the built-in file, reader, descriptor and memory
//! transports.
//!
//! ## Reading through callbacks
//!
//! ```rust
//! use std::io::Cursor;
//! use arcstream::{ReadArchive, Result};
//! use arcstream::callback::ReadBuffer;
//!
//! fn main() -> Result<()> {
//!     // Two chunks, read one per callback.
//!     let chunks = vec![b"hello, ".to_vec(), b"world".to_vec()];
//!
//!     let mut archive: ReadArchive<Vec<Vec<u8>>> = ReadArchive::new();
//!     archive.support_format_raw()?;
//!     archive.set_read_callback(|_session, chunks: &mut Vec<Vec<u8>>| {
//!         if chunks.is_empty() {
//!             return Ok(None);
//!         }
//!         let chunk: ReadBuffer = Box::new(Cursor::new(chunks.remove(0)));
//!         Ok(Some(chunk))
//!     })?;
//!     archive.open(chunks)?;
//!
//!     archive.next_header()?;
//!     let mut data = Vec::new();
//!     archive.read_data_into(&mut data)?;
//!     assert_eq!(data, b"hello, world");
//!     archive.free()
//! }
//! ```
//!
//! ## Writing compressed output
//!
//! ```rust
//! # #[cfg(feature = "deflate")]
//! # fn main() -> arcstream::Result<()> {
//! use std::io::Write;
//! use arcstream::{Entry, WriteArchive};
//! use arcstream::entry::AE_IFREG;
//!
//! let mut archive: WriteArchive = WriteArchive::new();
//! archive.set_format_raw()?;
//! archive.add_filter_gzip()?;
//! archive.open_writer(Vec::new())?;
//!
//! let mut entry = Entry::new();
//! entry.set_pathname("data");
//! entry.set_filetype(AE_IFREG);
//! archive.write_header(&entry)?;
//! archive.write_all(b"compressed payload")?;
//! archive.close()?;
//! archive.free()
//! # }
//! # #[cfg(not(feature = "deflate"))]
//! # fn main() {}
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `deflate` | Yes | gzip filter via `flate2` |
//! | `bzip2` | Yes | bzip2 filter |
//! | `zstd` | No | zstd filter |
//!
//! ## Errors
//!
//! Every fallible call returns [`Result`]. Sessions also keep the code and
//! message of their latest failure in an [`ErrorState`], readable with
//! `errno()` and `error_string()`.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]

use std::sync::{Mutex, MutexGuard};

pub mod buffer;
pub mod callback;
pub mod entry;
pub mod error;
pub mod filter;
pub mod format;
pub mod options;
pub mod session;
pub mod stream;
mod transport;
pub mod version;

pub use buffer::{AppBuffer, ByteBuffer, Release, SharedBuffer};
pub use callback::{ReadBuffer, Role, SessionId, Whence};
pub use entry::{Entry, Timestamp};
pub use error::{CallbackError, CallbackResult, Error, Result, codes};
pub use session::{ErrorState, ReadArchive, SessionState, WriteArchive};
pub use version::{version_details, version_number, version_string};

/// Locks a mutex, recovering the data if another thread panicked while
/// holding it.
///
/// Client-data tokens and shared buffers stay usable after a callback panic,
/// which is reported as an error instead.
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!("mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}
