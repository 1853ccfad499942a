//! Moving bytes between application buffers and the engine.
//!
//! A transfer resolves the buffer's [`Addressing`] once. Direct memory is used
//! in place. An array-backed window is pinned: its bytes are copied into a
//! private region, the engine works on that, and the region is released with
//! [`Release::Commit`] (copied back) or [`Release::Discard`] (dropped). A pin
//! that is never released explicitly is discarded when it goes out of scope,
//! so every error path leaves the application's buffer untouched.

use super::{Addressing, AppBuffer};
use crate::callback::ReadBuffer;
use crate::error::{Error, Result};

const MISSING_CAPABILITY: &str = "a direct address nor a backing array";

/// How a pinned region is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Copy the region back into the application's buffer.
    Commit,
    /// Abandon the region.
    Discard,
}

/// An array-backed window copied out for the duration of one operation.
pub(crate) struct Pin<'a> {
    target: &'a mut [u8],
    elements: Vec<u8>,
    released: bool,
}

impl Pin<'_> {
    fn release(mut self, policy: Release) {
        if policy == Release::Commit {
            self.target.copy_from_slice(&self.elements);
        }
        self.released = true;
    }
}

impl Drop for Pin<'_> {
    fn drop(&mut self) {
        if !self.released {
            log::trace!("discarding pinned region of {} bytes", self.elements.len());
        }
    }
}

/// A resolved byte range of an application buffer.
pub(crate) enum Region<'a> {
    Direct(&'a mut [u8]),
    Pinned(Pin<'a>),
}

fn pin_copy(window: &[u8]) -> Result<Vec<u8>> {
    let mut elements = Vec::new();
    elements
        .try_reserve_exact(window.len())
        .map_err(|_| Error::OutOfMemory("pinning buffer elements"))?;
    elements.extend_from_slice(window);
    Ok(elements)
}

fn out_of_bounds(start: usize, end: usize, len: usize) -> Error {
    Error::InvalidArgument(format!(
        "buffer range {}..{} exceeds {} addressable bytes",
        start, end, len
    ))
}

impl<'a> Region<'a> {
    /// Resolves `start..end`, measured from the buffer's index 0.
    pub(crate) fn resolve(buffer: &'a mut dyn AppBuffer, start: usize, end: usize) -> Result<Self> {
        match buffer.addressing() {
            Addressing::Direct(memory) => {
                let len = memory.len();
                memory
                    .get_mut(start..end)
                    .map(Region::Direct)
                    .ok_or_else(|| out_of_bounds(start, end, len))
            }
            Addressing::Array { array, offset } => {
                let len = array.len();
                let target = array
                    .get_mut(offset + start..offset + end)
                    .ok_or_else(|| out_of_bounds(offset + start, offset + end, len))?;
                let elements = pin_copy(target)?;
                Ok(Region::Pinned(Pin {
                    target,
                    elements,
                    released: false,
                }))
            }
            Addressing::Opaque => Err(Error::BufferCapability {
                missing: MISSING_CAPABILITY,
                transport: false,
            }),
        }
    }

    pub(crate) fn bytes(&mut self) -> &mut [u8] {
        match self {
            Region::Direct(memory) => memory,
            Region::Pinned(pin) => &mut pin.elements,
        }
    }

    pub(crate) fn release(self, policy: Release) {
        if let Region::Pinned(pin) = self {
            pin.release(policy);
        }
    }
}

/// Runs `op` on `start..end` of `buffer`.
///
/// On success the region is released with `on_success`; on failure it is
/// discarded.
pub(crate) fn with_region<T>(
    buffer: &mut dyn AppBuffer,
    start: usize,
    end: usize,
    on_success: Release,
    op: impl FnOnce(&mut [u8]) -> Result<T>,
) -> Result<T> {
    let mut region = Region::resolve(buffer, start, end)?;
    match op(region.bytes()) {
        Ok(value) => {
            region.release(on_success);
            Ok(value)
        }
        Err(err) => {
            region.release(Release::Discard);
            Err(err)
        }
    }
}

/// Runs `op` on the buffer's remaining bytes and advances its cursor by the
/// count `op` returns.
pub(crate) fn transfer(
    buffer: &mut dyn AppBuffer,
    on_success: Release,
    op: impl FnOnce(&mut [u8]) -> Result<usize>,
) -> Result<usize> {
    let position = buffer.position();
    let limit = buffer.limit();
    if position > limit {
        return Err(Error::InvalidArgument(format!(
            "buffer position {} exceeds limit {}",
            position, limit
        )));
    }
    let done = with_region(buffer, position, limit, on_success, |bytes| {
        let len = bytes.len();
        op(bytes).map(|n| n.min(len))
    })?;
    buffer.set_position(position + done)?;
    Ok(done)
}

/// A buffer returned by a read callback, pinned until the next read.
pub(crate) struct PinnedBlock {
    buffer: ReadBuffer,
    start: usize,
    len: usize,
    pinned: Option<Vec<u8>>,
}

impl PinnedBlock {
    /// Pins the remaining bytes of a callback-supplied buffer.
    pub(crate) fn pin(mut buffer: ReadBuffer) -> Result<Self> {
        let start = buffer.position();
        let end = buffer.limit().max(start);
        let pinned = match buffer.addressing() {
            Addressing::Direct(memory) => {
                if end > memory.len() {
                    return Err(out_of_bounds(start, end, memory.len()));
                }
                None
            }
            Addressing::Array { array, offset } => {
                let len = array.len();
                let window = array
                    .get(offset + start..offset + end)
                    .ok_or_else(|| out_of_bounds(offset + start, offset + end, len))?;
                Some(pin_copy(window)?)
            }
            Addressing::Opaque => {
                return Err(Error::BufferCapability {
                    missing: MISSING_CAPABILITY,
                    transport: true,
                });
            }
        };
        Ok(Self {
            buffer,
            start,
            len: end - start,
            pinned,
        })
    }

    /// Wraps bytes produced by a built-in transport.
    pub(crate) fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            buffer: Box::new(super::ByteBuffer::direct(data)),
            start: 0,
            len,
            pinned: None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn bytes(&mut self) -> &[u8] {
        if let Some(elements) = &self.pinned {
            return elements;
        }
        match self.buffer.addressing() {
            Addressing::Direct(memory) => &memory[self.start..self.start + self.len],
            _ => &[],
        }
    }
}
