//! Application-owned byte buffers.
//!
//! Sessions never take ownership of the bytes an application reads into or
//! writes from. Instead they operate on anything implementing [`AppBuffer`]:
//! a cursor (`position`), an end marker (`limit`) and one of two addressing
//! modes:
//!
//! - **Direct**: the buffer exposes its memory in place. Transfers operate on
//!   it without copies.
//! - **Array**: the buffer exposes a backing array plus the offset of its
//!   index 0. Transfers pin a copy of the window and release it with commit or
//!   discard semantics afterwards.
//!
//! A buffer exposing neither is rejected with
//! [`Error::BufferCapability`](crate::Error::BufferCapability).
//!
//! [`ByteBuffer`] provides all three flavours, and `io::Cursor` over owned or
//! borrowed bytes works as a direct buffer.
//!
//! ```rust
//! use arcstream::buffer::{AppBuffer, ByteBuffer};
//!
//! let mut buffer = ByteBuffer::allocate_direct(16);
//! buffer.put(b"abc").unwrap();
//! assert_eq!(buffer.position(), 3);
//! buffer.flip();
//! assert_eq!(buffer.as_slice(), b"abc");
//! ```

pub(crate) mod bridge;

use std::fmt;
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};

pub use bridge::Release;

/// How a buffer's memory can be reached.
pub enum Addressing<'a> {
    /// The buffer's memory, indexed from the buffer's index 0.
    Direct(&'a mut [u8]),
    /// A backing array whose element `offset` is the buffer's index 0.
    Array {
        /// The whole backing array.
        array: &'a mut [u8],
        /// Position of the buffer's index 0 within `array`.
        offset: usize,
    },
    /// Neither a stable address nor a backing array is available.
    Opaque,
}

/// A byte buffer owned by the application.
///
/// Transfers operate on `[position, limit)` and advance the position by the
/// number of bytes moved.
pub trait AppBuffer {
    /// Current cursor.
    fn position(&self) -> usize;

    /// End of the usable region.
    fn limit(&self) -> usize;

    /// Moves the cursor. Fails if `position` exceeds the limit.
    fn set_position(&mut self, position: usize) -> Result<()>;

    /// Bytes between the cursor and the limit.
    fn remaining(&self) -> usize {
        self.limit().saturating_sub(self.position())
    }

    /// Resolves how the buffer's memory can be reached.
    fn addressing(&mut self) -> Addressing<'_>;
}

/// The flavour of a [`ByteBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Memory at a stable address, used in place.
    Direct,
    /// Array-backed memory, reached through its backing array.
    Heap,
    /// Neither addressable nor array-backed from the outside.
    ReadOnly,
}

/// A fixed-capacity byte buffer with NIO-style cursor semantics.
#[derive(Clone, PartialEq, Eq)]
pub struct ByteBuffer {
    array: Vec<u8>,
    offset: usize,
    capacity: usize,
    position: usize,
    limit: usize,
    kind: BufferKind,
}

impl ByteBuffer {
    fn with_kind(array: Vec<u8>, kind: BufferKind) -> Self {
        let capacity = array.len();
        Self {
            array,
            offset: 0,
            capacity,
            position: 0,
            limit: capacity,
            kind,
        }
    }

    /// Allocates a zeroed array-backed buffer.
    pub fn allocate(capacity: usize) -> Self {
        Self::with_kind(vec![0; capacity], BufferKind::Heap)
    }

    /// Allocates a zeroed direct buffer.
    pub fn allocate_direct(capacity: usize) -> Self {
        Self::with_kind(vec![0; capacity], BufferKind::Direct)
    }

    /// Wraps bytes in an array-backed buffer; the limit is the length.
    pub fn wrap(array: Vec<u8>) -> Self {
        Self::with_kind(array, BufferKind::Heap)
    }

    /// Wraps bytes in a direct buffer; the limit is the length.
    pub fn direct(data: Vec<u8>) -> Self {
        Self::with_kind(data, BufferKind::Direct)
    }

    /// Wraps `length` bytes of `array` starting at `offset`.
    ///
    /// The buffer's index 0 maps to `array[offset]`, so the backing array
    /// is reported together with that offset.
    pub fn wrap_range(array: Vec<u8>, offset: usize, length: usize) -> Result<Self> {
        if offset.checked_add(length).is_none_or(|end| end > array.len()) {
            return Err(Error::InvalidArgument(format!(
                "range {}+{} exceeds array of {} bytes",
                offset,
                length,
                array.len()
            )));
        }
        Ok(Self {
            array,
            offset,
            capacity: length,
            position: 0,
            limit: length,
            kind: BufferKind::Heap,
        })
    }

    /// Returns a read-only copy with the same cursor state.
    pub fn as_read_only(&self) -> Self {
        Self {
            kind: BufferKind::ReadOnly,
            ..self.clone()
        }
    }

    /// Returns the buffer's flavour.
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Returns true for direct buffers.
    pub fn is_direct(&self) -> bool {
        self.kind == BufferKind::Direct
    }

    /// Returns true if the buffer exposes a backing array.
    pub fn has_array(&self) -> bool {
        self.kind == BufferKind::Heap
    }

    /// Returns true for read-only buffers.
    pub fn is_read_only(&self) -> bool {
        self.kind == BufferKind::ReadOnly
    }

    /// Offset of index 0 within the backing array, if there is one.
    pub fn array_offset(&self) -> Option<usize> {
        self.has_array().then_some(self.offset)
    }

    /// Total capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current cursor.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Current limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes between the cursor and the limit.
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    /// Returns true if any bytes remain.
    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    /// Moves the cursor.
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.limit {
            return Err(Error::InvalidArgument(format!(
                "position {} exceeds limit {}",
                position, self.limit
            )));
        }
        self.position = position;
        Ok(())
    }

    /// Moves the limit, pulling the cursor back if it lies beyond it.
    pub fn set_limit(&mut self, limit: usize) -> Result<()> {
        if limit > self.capacity {
            return Err(Error::InvalidArgument(format!(
                "limit {} exceeds capacity {}",
                limit, self.capacity
            )));
        }
        self.limit = limit;
        self.position = self.position.min(limit);
        Ok(())
    }

    /// Resets the cursor to 0 and the limit to the capacity.
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.capacity;
    }

    /// Sets the limit to the cursor and the cursor to 0.
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
    }

    /// Resets the cursor to 0.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Copies `src` in at the cursor and advances it.
    pub fn put(&mut self, src: &[u8]) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::InvalidArgument("buffer is read-only".into()));
        }
        if src.len() > self.remaining() {
            return Err(Error::InvalidArgument(format!(
                "buffer overflow: {} bytes into {} remaining",
                src.len(),
                self.remaining()
            )));
        }
        let start = self.offset + self.position;
        self.array[start..start + src.len()].copy_from_slice(src);
        self.position += src.len();
        Ok(())
    }

    /// Copies bytes out from the cursor into `dst` and advances it.
    pub fn get(&mut self, dst: &mut [u8]) -> Result<()> {
        if dst.len() > self.remaining() {
            return Err(Error::InvalidArgument(format!(
                "buffer underflow: {} bytes from {} remaining",
                dst.len(),
                self.remaining()
            )));
        }
        let start = self.offset + self.position;
        dst.copy_from_slice(&self.array[start..start + dst.len()]);
        self.position += dst.len();
        Ok(())
    }

    /// Bytes between the cursor and the limit.
    pub fn as_slice(&self) -> &[u8] {
        &self.array[self.offset + self.position..self.offset + self.limit]
    }

    /// Bytes before the cursor, typically what has been written so far.
    pub fn written(&self) -> &[u8] {
        &self.array[self.offset..self.offset + self.position]
    }

    /// Copies the remaining bytes out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("kind", &self.kind)
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self::wrap(data)
    }
}

impl AppBuffer for ByteBuffer {
    fn position(&self) -> usize {
        self.position
    }

    fn limit(&self) -> usize {
        self.limit
    }

    fn set_position(&mut self, position: usize) -> Result<()> {
        ByteBuffer::set_position(self, position)
    }

    fn addressing(&mut self) -> Addressing<'_> {
        match self.kind {
            BufferKind::Direct => Addressing::Direct(&mut self.array[..self.capacity]),
            BufferKind::Heap => Addressing::Array {
                array: &mut self.array,
                offset: self.offset,
            },
            BufferKind::ReadOnly => Addressing::Opaque,
        }
    }
}

fn check_cursor(position: usize, limit: usize) -> Result<()> {
    if position > limit {
        return Err(Error::InvalidArgument(format!(
            "position {} exceeds limit {}",
            position, limit
        )));
    }
    Ok(())
}

impl AppBuffer for Cursor<Vec<u8>> {
    fn position(&self) -> usize {
        usize::try_from(Cursor::position(self)).unwrap_or(usize::MAX)
    }

    fn limit(&self) -> usize {
        self.get_ref().len()
    }

    fn set_position(&mut self, position: usize) -> Result<()> {
        check_cursor(position, self.get_ref().len())?;
        Cursor::set_position(self, position as u64);
        Ok(())
    }

    fn addressing(&mut self) -> Addressing<'_> {
        Addressing::Direct(self.get_mut().as_mut_slice())
    }
}

impl AppBuffer for Cursor<&mut [u8]> {
    fn position(&self) -> usize {
        usize::try_from(Cursor::position(self)).unwrap_or(usize::MAX)
    }

    fn limit(&self) -> usize {
        self.get_ref().len()
    }

    fn set_position(&mut self, position: usize) -> Result<()> {
        check_cursor(position, self.get_ref().len())?;
        Cursor::set_position(self, position as u64);
        Ok(())
    }

    fn addressing(&mut self) -> Addressing<'_> {
        Addressing::Direct(&mut **self.get_mut())
    }
}

/// A [`ByteBuffer`] shared between the application and a memory sink.
///
/// The write session keeps one handle while the application keeps another, so
/// the cursor the sink reports at close is visible to the application.
#[derive(Clone, Debug)]
pub struct SharedBuffer(Arc<Mutex<ByteBuffer>>);

impl SharedBuffer {
    /// Wraps a buffer for sharing.
    pub fn new(buffer: ByteBuffer) -> Self {
        Self(Arc::new(Mutex::new(buffer)))
    }

    /// Locks the buffer, recovering from a poisoned lock.
    pub fn lock(&self) -> MutexGuard<'_, ByteBuffer> {
        crate::lock_or_recover(&self.0)
    }

    /// Current cursor of the shared buffer.
    pub fn position(&self) -> usize {
        self.lock().position()
    }

    /// Returns a copy of the buffer's current state.
    pub fn snapshot(&self) -> ByteBuffer {
        self.lock().clone()
    }
}

impl From<ByteBuffer> for SharedBuffer {
    fn from(buffer: ByteBuffer) -> Self {
        Self::new(buffer)
    }
}
