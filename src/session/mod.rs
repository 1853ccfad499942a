//! Read and write sessions.
//!
//! A session is one open archive operation. [`ReadArchive`] pulls bytes from a
//! transport, detects compression filters and a format, and yields entries;
//! [`WriteArchive`] takes entries and pushes encoded bytes into a sink.
//!
//! Both follow the same lifecycle:
//!
//! ```text
//! Created -> Configured -> Opened -> Data -> Eof -> Closed
//!                  \____________\_______\______\-> Fatal
//! ```
//!
//! Configuration is only accepted before open. Transport and data errors move
//! the session to [`SessionState::Fatal`], after which it can only be closed or
//! freed. Freeing consumes the session, so use after free does not compile.

mod read;
mod write;

pub use read::ReadArchive;
pub use write::WriteArchive;

use std::fmt;

use crate::callback::SessionId;
use crate::error::{Error, Result};
use crate::stream::{FilterSlot, filter_at};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Newly created; nothing configured yet.
    Created,
    /// At least one configuration call was made.
    Configured,
    /// The transport is open and a format was selected.
    Opened,
    /// A header was read or written; entry data operations are valid.
    Data,
    /// The end of the archive was reached.
    Eof,
    /// The session was closed.
    Closed,
    /// An unrecoverable error occurred; only close and free remain.
    Fatal,
}

impl SessionState {
    /// Returns the state's lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Created => "new",
            SessionState::Configured => "configured",
            SessionState::Opened => "open",
            SessionState::Data => "in data",
            SessionState::Eof => "at end of archive",
            SessionState::Closed => "closed",
            SessionState::Fatal => "fatal",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The error slot of a session: the code and message of the latest failure.
///
/// The slot is overwritten by every failing operation and is never cleared
/// automatically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorState {
    code: i32,
    message: Option<String>,
}

impl ErrorState {
    /// Creates a slot holding `code` and `message`.
    pub fn new(code: i32, message: Option<String>) -> Self {
        Self { code, message }
    }

    /// The numeric code; 0 when no error was recorded.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// The message, if the failure supplied one.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns true if an error has been recorded since the last clear.
    pub fn is_set(&self) -> bool {
        self.code != 0 || self.message.is_some()
    }

    pub(crate) fn record(&mut self, err: &Error) {
        self.code = err.code();
        self.message = err.message();
    }

    pub(crate) fn clear(&mut self) {
        self.code = 0;
        self.message = None;
    }
}

/// State shared by read and write sessions.
#[derive(Debug)]
pub(crate) struct SessionCore {
    pub(crate) id: SessionId,
    pub(crate) state: SessionState,
    pub(crate) error: ErrorState,
}

impl SessionCore {
    pub(crate) fn new() -> Self {
        Self {
            id: SessionId::next(),
            state: SessionState::Created,
            error: ErrorState::default(),
        }
    }

    /// Fails unless the session is in one of `allowed`.
    pub(crate) fn check(&self, operation: &'static str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Like [`check`](Self::check), but records the failure.
    pub(crate) fn require(&mut self, operation: &'static str, allowed: &[SessionState]) -> Result<()> {
        let checked = self.check(operation, allowed);
        checked.map_err(|err| self.record(err))
    }

    /// Validates a configuration call and marks the session configured.
    pub(crate) fn configure(&mut self, operation: &'static str) -> Result<()> {
        self.require(operation, &[SessionState::Created, SessionState::Configured])?;
        self.state = SessionState::Configured;
        Ok(())
    }

    /// Copies `err` into the error slot, moving to `Fatal` if the error is fatal.
    pub(crate) fn record(&mut self, err: Error) -> Error {
        self.error.record(&err);
        if err.is_fatal() && self.state != SessionState::Closed {
            self.state = SessionState::Fatal;
        }
        err
    }

    pub(crate) fn set_error(&mut self, code: i32, message: Option<&str>) {
        self.error = ErrorState::new(code, message.map(str::to_string));
    }
}

/// Filter statistics accessors shared by both session kinds.
pub(crate) fn slot_bytes(slots: &[FilterSlot], index: i32) -> Option<u64> {
    filter_at(slots, index).map(|slot| slot.bytes.get())
}

pub(crate) fn slot_code(slots: &[FilterSlot], index: i32) -> Option<i32> {
    filter_at(slots, index).map(|slot| slot.code)
}

pub(crate) fn slot_name(slots: &[FilterSlot], index: i32) -> Option<&'static str> {
    filter_at(slots, index).map(|slot| slot.name)
}
