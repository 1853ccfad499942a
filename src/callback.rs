//! Application callbacks and client data.
//!
//! A session forwards every transport operation to a handler the application
//! bound for that role. Each handler receives the session's [`SessionId`] and
//! a mutable reference to a client-data token of the application's own type
//! `D`; the token is opaque to the crate.
//!
//! Handler calls pass through a single boundary which turns the handler's
//! [`CallbackError`], or a panic, into [`Error::Handler`] so the session can
//! record it in its error slot.

use std::any::Any;
use std::fmt;
use std::io::SeekFrom;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::buffer::AppBuffer;
use crate::error::{CallbackResult, Error, Result, codes};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw identifier.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session #{}", self.0)
    }
}

/// The transport role a callback is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Prepares the source or sink.
    Open,
    /// Produces the next block of input.
    Read,
    /// Skips input without reading it.
    Skip,
    /// Repositions the input.
    Seek,
    /// Consumes a block of output.
    Write,
    /// Tears down the source or sink.
    Close,
    /// Releases what remains after close.
    Free,
    /// Moves from one client-data token to the next.
    Switch,
}

impl Role {
    /// Returns the role's lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Role::Open => "open",
            Role::Read => "read",
            Role::Skip => "skip",
            Role::Seek => "seek",
            Role::Write => "write",
            Role::Close => "close",
            Role::Free => "free",
            Role::Switch => "switch",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Origin of a seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// From the start of the input.
    Set,
    /// From the current position.
    Current,
    /// From the end of the input.
    End,
}

impl Whence {
    /// Converts a `SEEK_SET`/`SEEK_CUR`/`SEEK_END` value.
    pub fn from_raw(whence: i32) -> Option<Self> {
        match whence {
            0 => Some(Whence::Set),
            1 => Some(Whence::Current),
            2 => Some(Whence::End),
            _ => None,
        }
    }

    /// Returns the `SEEK_*` value.
    pub fn as_raw(self) -> i32 {
        match self {
            Whence::Set => 0,
            Whence::Current => 1,
            Whence::End => 2,
        }
    }

    /// Builds the equivalent [`SeekFrom`].
    pub fn to_seek_from(self, offset: i64) -> Result<SeekFrom> {
        match self {
            Whence::Set => u64::try_from(offset).map(SeekFrom::Start).map_err(|_| {
                Error::InvalidArgument(format!("negative absolute seek offset {}", offset))
            }),
            Whence::Current => Ok(SeekFrom::Current(offset)),
            Whence::End => Ok(SeekFrom::End(offset)),
        }
    }
}

/// A buffer returned by a read callback.
pub type ReadBuffer = Box<dyn AppBuffer + Send>;

/// Handler for the open role.
pub type OpenHandler<D> = Box<dyn FnMut(SessionId, &mut D) -> CallbackResult<()> + Send>;
/// Handler for the read role; `None` or an empty buffer ends the input.
pub type ReadHandler<D> =
    Box<dyn FnMut(SessionId, &mut D) -> CallbackResult<Option<ReadBuffer>> + Send>;
/// Handler for the skip role; returns the bytes actually skipped.
pub type SkipHandler<D> = Box<dyn FnMut(SessionId, &mut D, i64) -> CallbackResult<i64> + Send>;
/// Handler for the seek role; returns the new absolute position.
pub type SeekHandler<D> =
    Box<dyn FnMut(SessionId, &mut D, i64, Whence) -> CallbackResult<i64> + Send>;
/// Handler for the write role; returns the bytes consumed.
pub type WriteHandler<D> =
    Box<dyn FnMut(SessionId, &mut D, &[u8]) -> CallbackResult<usize> + Send>;
/// Handler for the close role.
pub type CloseHandler<D> = Box<dyn FnMut(SessionId, &mut D) -> CallbackResult<()> + Send>;
/// Handler for the free role.
pub type FreeHandler<D> = Box<dyn FnMut(SessionId, &mut D) -> CallbackResult<()> + Send>;
/// Handler for the switch role, given the old and the new token.
pub type SwitchHandler<D> =
    Box<dyn FnMut(SessionId, &mut D, &mut D) -> CallbackResult<()> + Send>;

/// One callback slot.
///
/// Binding a new handler drops the previous one first.
pub(crate) struct Binding<H> {
    role: Role,
    handler: Option<H>,
}

impl<H> Binding<H> {
    pub(crate) fn new(role: Role) -> Self {
        Self {
            role,
            handler: None,
        }
    }

    pub(crate) fn bind(&mut self, handler: H) {
        if self.handler.take().is_some() {
            log::trace!("released previous {} handler", self.role);
        }
        self.handler = Some(handler);
    }

    pub(crate) fn unbind(&mut self) -> bool {
        self.handler.take().is_some()
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.handler.is_some()
    }

    pub(crate) fn get_mut(&mut self) -> Option<&mut H> {
        self.handler.as_mut()
    }
}

/// Handlers of a read session.
pub(crate) struct ReadCallbacks<D> {
    pub(crate) open: Binding<OpenHandler<D>>,
    pub(crate) read: Binding<ReadHandler<D>>,
    pub(crate) skip: Binding<SkipHandler<D>>,
    pub(crate) seek: Binding<SeekHandler<D>>,
    pub(crate) close: Binding<CloseHandler<D>>,
    pub(crate) switch: Binding<SwitchHandler<D>>,
}

impl<D> ReadCallbacks<D> {
    pub(crate) fn new() -> Self {
        Self {
            open: Binding::new(Role::Open),
            read: Binding::new(Role::Read),
            skip: Binding::new(Role::Skip),
            seek: Binding::new(Role::Seek),
            close: Binding::new(Role::Close),
            switch: Binding::new(Role::Switch),
        }
    }

    pub(crate) fn unbind(&mut self, role: Role) -> bool {
        match role {
            Role::Open => self.open.unbind(),
            Role::Read => self.read.unbind(),
            Role::Skip => self.skip.unbind(),
            Role::Seek => self.seek.unbind(),
            Role::Close => self.close.unbind(),
            Role::Switch => self.switch.unbind(),
            Role::Write | Role::Free => false,
        }
    }
}

/// Handlers of a write session.
pub(crate) struct WriteCallbacks<D> {
    pub(crate) open: Binding<OpenHandler<D>>,
    pub(crate) write: Binding<WriteHandler<D>>,
    pub(crate) close: Binding<CloseHandler<D>>,
    pub(crate) free: Binding<FreeHandler<D>>,
}

impl<D> WriteCallbacks<D> {
    pub(crate) fn new() -> Self {
        Self {
            open: Binding::new(Role::Open),
            write: Binding::new(Role::Write),
            close: Binding::new(Role::Close),
            free: Binding::new(Role::Free),
        }
    }

    pub(crate) fn unbind(&mut self, role: Role) -> bool {
        match role {
            Role::Open => self.open.unbind(),
            Role::Write => self.write.unbind(),
            Role::Close => self.close.unbind(),
            Role::Free => self.free.unbind(),
            Role::Read | Role::Skip | Role::Seek | Role::Switch => false,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> Option<String> {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
}

/// Calls a handler, translating its failure or panic into [`Error::Handler`].
pub(crate) fn invoke<T>(role: Role, call: impl FnOnce() -> CallbackResult<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            let (code, message) = err.into_parts();
            Err(Error::Handler {
                role,
                code,
                message,
            })
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::warn!(
                "{} callback panicked: {}",
                role,
                message.as_deref().unwrap_or("<non-string payload>")
            );
            Err(Error::Handler {
                role,
                code: codes::FATAL,
                message,
            })
        }
    }
}

/// Client-data tokens of a read session, in source order.
///
/// The cursor marks the source currently being read. Inserting at or before
/// the cursor shifts it so that it keeps pointing at the same token.
pub(crate) struct ClientDataList<D> {
    slots: Vec<D>,
    cursor: usize,
}

impl<D> ClientDataList<D> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            cursor: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    pub(crate) fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor;
    }

    /// Replaces the token at `index`; an empty list accepts index 0.
    pub(crate) fn set(&mut self, index: usize, data: D) -> Result<()> {
        if self.slots.is_empty() && index == 0 {
            self.slots.push(data);
            return Ok(());
        }
        match self.slots.get_mut(index) {
            Some(slot) => {
                *slot = data;
                Ok(())
            }
            None => Err(Error::InvalidArgument("Invalid index specified.".into())),
        }
    }

    /// Inserts a token before `index`; `index == len` appends.
    pub(crate) fn insert(&mut self, index: usize, data: D) -> Result<()> {
        if index > self.slots.len() {
            return Err(Error::InvalidArgument("Invalid index specified.".into()));
        }
        self.slots.insert(index, data);
        if index <= self.cursor && self.slots.len() > 1 {
            self.cursor += 1;
        }
        Ok(())
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut D> {
        self.slots.get_mut(index)
    }

    pub(crate) fn current_mut(&mut self) -> Result<&mut D> {
        let cursor = self.cursor;
        self.slots
            .get_mut(cursor)
            .ok_or_else(|| Error::InvalidArgument("No client data registered".into()))
    }

    /// Borrows two distinct tokens at once.
    pub(crate) fn pair_mut(&mut self, a: usize, b: usize) -> Option<(&mut D, &mut D)> {
        if a == b || a >= self.slots.len() || b >= self.slots.len() {
            return None;
        }
        if a < b {
            let (left, right) = self.slots.split_at_mut(b);
            Some((&mut left[a], &mut right[0]))
        } else {
            let (left, right) = self.slots.split_at_mut(a);
            Some((&mut right[0], &mut left[b]))
        }
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.cursor = 0;
    }
}
