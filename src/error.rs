//! Error types for archive sessions.
//!
//! This module provides the [`Error`] enum, which covers every way a read or
//! write session can fail, together with the [`Result<T>`] alias. Application
//! callbacks report failures through the smaller [`CallbackError`] type, which
//! the session copies into its error slot verbatim.
//!
//! # Error Handling
//!
//! All fallible operations in this crate return `Result<T, Error>`:
//!
//! ```rust,no_run
//! use arcstream::{ReadArchive, Result};
//!
//! fn count_entries(path: &str) -> Result<u64> {
//!     let mut archive: ReadArchive = ReadArchive::new();
//!     archive.support_filter_all()?;
//!     archive.support_format_all()?;
//!     archive.open_filename(Some(path), 10240)?;
//!     while archive.next_header()?.is_some() {}
//!     let count = archive.file_count();
//!     archive.free()?;
//!     Ok(count)
//! }
//! ```
//!
//! ## Reporting Failures From Callbacks
//!
//! Callbacks return [`CallbackResult`]. An explicit [`CallbackError`] keeps its
//! code and message byte for byte; `?` on an [`std::io::Error`] produces a fatal
//! code carrying the I/O error's description:
//!
//! ```rust
//! use arcstream::{CallbackError, CallbackResult, codes};
//!
//! fn check_quota(used: u64) -> CallbackResult<()> {
//!     if used > 1 << 30 {
//!         return Err(CallbackError::new(codes::FAILED, "quota exceeded"));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Inspecting the Error Slot
//!
//! Every session also keeps the most recent failure in an error slot, readable
//! through `errno()` and `error_string()`:
//!
//! ```rust
//! use arcstream::{ReadArchive, codes};
//!
//! let mut archive: ReadArchive = ReadArchive::new();
//! archive.set_error(codes::ERRNO_MISC, Some("custom failure"));
//! assert_eq!(archive.errno(), codes::ERRNO_MISC);
//! assert_eq!(archive.error_string(), Some("custom failure"));
//! archive.clear_error();
//! assert_eq!(archive.error_string(), None);
//! ```

use std::fmt;
use std::io;

use crate::callback::Role;
use crate::session::SessionState;

/// Numeric status and error codes.
///
/// The status codes are what engine operations report internally; the errno-like
/// codes populate the error slot for failures that do not originate in an
/// application callback.
pub mod codes {
    /// End of archive or of the current entry's data.
    pub const EOF: i32 = 1;
    /// Operation succeeded.
    pub const OK: i32 = 0;
    /// Retry might succeed.
    pub const RETRY: i32 = -10;
    /// Partial success.
    pub const WARN: i32 = -20;
    /// The current operation cannot complete; the session remains usable.
    pub const FAILED: i32 = -25;
    /// No more operations are possible on the session.
    pub const FATAL: i32 = -30;

    /// Miscellaneous engine failure.
    pub const ERRNO_MISC: i32 = -1;
    /// The embedder called an operation incorrectly (`EINVAL`).
    pub const ERRNO_PROGRAMMER: i32 = 22;
    /// The input is not in a recognized or well-formed format (`EILSEQ`).
    pub const ERRNO_FILE_FORMAT: i32 = 84;
    /// Allocation failure or exhausted output buffer.
    pub const ENOMEM: i32 = 12;
    /// Generic input/output failure.
    pub const EIO: i32 = 5;
}

/// Helper struct for formatting handler error messages.
struct HandlerDisplay<'a> {
    role: Role,
    code: i32,
    message: Option<&'a str>,
}

impl<'a> HandlerDisplay<'a> {
    fn new(role: &Role, code: &i32, message: &'a Option<String>) -> Self {
        Self {
            role: *role,
            code: *code,
            message: message.as_deref(),
        }
    }
}

impl fmt::Display for HandlerDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message {
            Some(message) => f.write_str(message),
            None => write!(f, "{} callback failed with code {}", self.role, self.code),
        }
    }
}

fn module_prefix(module: &Option<String>) -> String {
    module.as_deref().map(|m| format!("{m}:")).unwrap_or_default()
}

/// The main error type for archive sessions.
///
/// # Error Categories
///
/// | Category | Variants | Typical Cause |
/// |----------|----------|---------------|
/// | Configuration | [`BufferCapability`][Self::BufferCapability] | Buffer without a usable address |
/// | Handler | [`Handler`][Self::Handler] | Application callback reported failure |
/// | Transport | [`ShortWrite`][Self::ShortWrite], [`TransportStatus`][Self::TransportStatus], [`Io`][Self::Io] | Sink or source misbehaved |
/// | Resources | [`OutOfMemory`][Self::OutOfMemory], [`BufferExhausted`][Self::BufferExhausted] | Allocation or capacity limits |
/// | Usage | [`InvalidState`][Self::InvalidState], [`InvalidArgument`][Self::InvalidArgument] | API misuse |
/// | Data | [`UnrecognizedFormat`][Self::UnrecognizedFormat], [`Format`][Self::Format] | Input the engine cannot handle |
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error from a built-in transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An application callback reported failure.
    ///
    /// `code` and `message` are exactly what the callback supplied. For a
    /// panicking callback the code is [`codes::FATAL`] and the message is the
    /// panic payload, when it is a string.
    #[error("{}", HandlerDisplay::new(.role, .code, .message))]
    Handler {
        /// The role of the failing callback.
        role: Role,
        /// The numeric code reported by the callback.
        code: i32,
        /// The callback's message, if it supplied one.
        message: Option<String>,
    },

    /// An application buffer exposes neither a stable address nor a backing array.
    ///
    /// This is an embedder defect, not a data error, and retrying with the same
    /// buffer will fail the same way.
    #[error("buffer exposes neither {missing}")]
    BufferCapability {
        /// The capabilities the buffer lacks.
        missing: &'static str,
        /// True when the buffer came from a transport (a read callback's block
        /// or a memory source or sink) rather than from the caller of
        /// `read_data`/`write_data`; such errors are fatal.
        transport: bool,
    },

    /// Allocating memory for a transfer or for session state failed.
    #[error("out of memory: {0}")]
    OutOfMemory(&'static str),

    /// A write callback consumed fewer bytes than it was given.
    #[error("short write: {written} of {requested} bytes written")]
    ShortWrite {
        /// Bytes handed to the callback.
        requested: usize,
        /// Bytes the callback reported as consumed.
        written: usize,
    },

    /// A transport operation returned an out-of-range result.
    #[error("{operation} returned invalid result {status}")]
    TransportStatus {
        /// The transport operation.
        operation: &'static str,
        /// The value it returned.
        status: i64,
    },

    /// The operation is not valid in the session's current state.
    #[error("{operation} is not allowed while the session is {state}")]
    InvalidState {
        /// The attempted operation.
        operation: &'static str,
        /// The state the session was in.
        state: SessionState,
    },

    /// No registered format recognized the input.
    #[error("Unrecognized archive format")]
    UnrecognizedFormat,

    /// The requested format is not built into this crate.
    #[error("Unsupported format: {name} ({code:#x})")]
    UnsupportedFormat {
        /// Format code.
        code: i32,
        /// Format name, or `"unknown"`.
        name: &'static str,
    },

    /// The requested filter is not compiled in.
    #[error("Unsupported filter: {name} ({code})")]
    UnsupportedFilter {
        /// Filter code.
        code: i32,
        /// Filter name, or `"unknown"`.
        name: &'static str,
    },

    /// No module accepted an option.
    #[error("Undefined option: `{}{option}'", module_prefix(.module))]
    UnknownOption {
        /// Module the option was addressed to, if any.
        module: Option<String>,
        /// The option key.
        option: String,
    },

    /// An option was recognized but its value is malformed.
    #[error("Invalid value for option `{option}': {reason}")]
    InvalidOption {
        /// The option key.
        option: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// An argument was out of range or otherwise invalid.
    #[error("{0}")]
    InvalidArgument(String),

    /// The input or entry violates the selected format.
    #[error("{0}")]
    Format(String),

    /// A memory sink ran out of space.
    #[error("Buffer exhausted")]
    BufferExhausted,

    /// The transport or format does not support an operation.
    #[error("{operation} is not supported")]
    Unsupported {
        /// The unsupported operation.
        operation: &'static str,
    },
}

impl Error {
    /// Returns the numeric code this error contributes to the error slot.
    pub fn code(&self) -> i32 {
        match self {
            Error::Io(e) => e.raw_os_error().unwrap_or(codes::EIO),
            Error::Handler { code, .. } => *code,
            Error::BufferCapability { .. } | Error::TransportStatus { .. } => codes::FATAL,
            Error::OutOfMemory(_) | Error::BufferExhausted => codes::ENOMEM,
            Error::ShortWrite { .. } => codes::EIO,
            Error::InvalidState { .. } | Error::InvalidArgument(_) => codes::ERRNO_PROGRAMMER,
            Error::UnrecognizedFormat | Error::Format(_) => codes::ERRNO_FILE_FORMAT,
            Error::UnsupportedFormat { .. }
            | Error::UnsupportedFilter { .. }
            | Error::UnknownOption { .. }
            | Error::InvalidOption { .. }
            | Error::Unsupported { .. } => codes::ERRNO_MISC,
        }
    }

    /// Returns the text this error contributes to the error slot.
    ///
    /// Handler errors return the callback's message unchanged, or `None` when
    /// the callback gave none. Every other variant returns its display text.
    pub fn message(&self) -> Option<String> {
        match self {
            Error::Handler { message, .. } => message.clone(),
            other => Some(other.to_string()),
        }
    }

    /// Returns true for buffer capability errors, which indicate embedder misuse.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Error::BufferCapability { .. })
    }

    /// Returns true if an application callback reported this error.
    pub fn is_handler_error(&self) -> bool {
        matches!(self, Error::Handler { .. })
    }

    /// Returns true for allocation failures and exhausted memory sinks.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Error::OutOfMemory(_) | Error::BufferExhausted)
    }

    /// Returns true if this error leaves the session unusable.
    ///
    /// Usage errors (bad state, bad arguments, unknown options, capability
    /// errors of the caller's own buffer) leave the session as it was; data and
    /// transport errors do not.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::BufferCapability {
                transport: false,
                ..
            }
                | Error::InvalidState { .. }
                | Error::InvalidArgument(_)
                | Error::UnknownOption { .. }
                | Error::InvalidOption { .. }
                | Error::UnsupportedFormat { .. }
                | Error::UnsupportedFilter { .. }
                | Error::Unsupported { .. }
        )
    }

    /// Recovers a crate error that travelled through an [`io::Error`].
    ///
    /// Codec readers and writers only speak `io::Error`; errors raised by the
    /// layers beneath them are wrapped on the way up and unwrapped here.
    pub fn from_io(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            match err.into_inner().map(|inner| inner.downcast::<Error>()) {
                Some(Ok(inner)) => return *inner,
                Some(Err(other)) => return Error::Io(io::Error::other(other)),
                None => return Error::Io(io::Error::other("unknown I/O failure")),
            }
        }
        Error::Io(err)
    }

    /// Converts this error into an [`io::Error`] that [`Error::from_io`] can unwrap.
    pub fn into_io(self) -> io::Error {
        match self {
            Error::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}

/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A failure reported by an application callback.
///
/// The code and message are copied into the session's error slot unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackError {
    code: i32,
    message: Option<String>,
}

impl CallbackError {
    /// Creates an error with a code and a message.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// Creates an error that carries only a code.
    pub fn from_code(code: i32) -> Self {
        Self {
            code,
            message: None,
        }
    }

    /// Creates a [`codes::FATAL`] error with a message.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(codes::FATAL, message)
    }

    /// Returns the numeric code.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Returns the message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub(crate) fn into_parts(self) -> (i32, Option<String>) {
        (self.code, self.message)
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} (code {})", message, self.code),
            None => write!(f, "callback failed with code {}", self.code),
        }
    }
}

impl std::error::Error for CallbackError {}

impl From<io::Error> for CallbackError {
    fn from(err: io::Error) -> Self {
        Self::fatal(err.to_string())
    }
}

impl From<Error> for CallbackError {
    fn from(err: Error) -> Self {
        Self {
            code: err.code(),
            message: err.message(),
        }
    }
}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self::fatal(message)
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self::fatal(message)
    }
}

/// Result type returned by application callbacks.
pub type CallbackResult<T> = std::result::Result<T, CallbackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_from() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("file not found"));
        assert_eq!(err.code(), codes::EIO);
    }

    #[test]
    fn test_handler_error_keeps_message_verbatim() {
        let err = Error::Handler {
            role: Role::Read,
            code: 42,
            message: Some("disk on fire".into()),
        };
        assert_eq!(err.code(), 42);
        assert_eq!(err.message().as_deref(), Some("disk on fire"));
        assert_eq!(err.to_string(), "disk on fire");
        assert!(err.is_handler_error());
    }

    #[test]
    fn test_handler_error_without_message() {
        let err = Error::Handler {
            role: Role::Open,
            code: codes::FATAL,
            message: None,
        };
        assert_eq!(err.message(), None);
        assert_eq!(err.to_string(), "open callback failed with code -30");
    }

    #[test]
    fn test_short_write_display() {
        let err = Error::ShortWrite {
            requested: 10,
            written: 7,
        };
        assert!(err.to_string().starts_with("short write"));
        assert_eq!(err.code(), codes::EIO);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_capability_error_is_configuration_error() {
        let err = Error::BufferCapability {
            missing: "a direct address nor a backing array",
            transport: false,
        };
        assert!(err.is_configuration_error());
        assert!(!err.is_fatal());
        assert_eq!(err.code(), codes::FATAL);

        let err = Error::BufferCapability {
            missing: "a direct address nor a backing array",
            transport: true,
        };
        assert!(err.is_configuration_error());
        assert!(err.is_fatal());
    }

    #[test]
    fn test_out_of_memory_classification() {
        assert!(Error::OutOfMemory("pin").is_out_of_memory());
        assert!(Error::BufferExhausted.is_out_of_memory());
        assert_eq!(Error::BufferExhausted.to_string(), "Buffer exhausted");
        assert!(!Error::UnrecognizedFormat.is_out_of_memory());
    }

    #[test]
    fn test_unknown_option_display() {
        let err = Error::UnknownOption {
            module: Some("gzip".into()),
            option: "speed".into(),
        };
        assert_eq!(err.to_string(), "Undefined option: `gzip:speed'");
        let err = Error::UnknownOption {
            module: None,
            option: "speed".into(),
        };
        assert_eq!(err.to_string(), "Undefined option: `speed'");
    }

    #[test]
    fn test_io_round_trip_preserves_variant() {
        let io = Error::ShortWrite {
            requested: 4,
            written: 1,
        }
        .into_io();
        let back = Error::from_io(io);
        assert!(matches!(
            back,
            Error::ShortWrite {
                requested: 4,
                written: 1
            }
        ));

        let plain = Error::from_io(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(matches!(plain, Error::Io(_)));
    }

    #[test]
    fn test_callback_error_conversions() {
        let err: CallbackError = io::Error::other("pipe closed").into();
        assert_eq!(err.code(), codes::FATAL);
        assert_eq!(err.message(), Some("pipe closed"));

        let err: CallbackError = Error::BufferExhausted.into();
        assert_eq!(err.code(), codes::ENOMEM);
        assert_eq!(err.message(), Some("Buffer exhausted"));

        let err = CallbackError::from_code(7);
        assert_eq!(err.message(), None);
        assert_eq!(err.to_string(), "callback failed with code 7");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
        assert_send_sync::<CallbackError>();
    }
}
