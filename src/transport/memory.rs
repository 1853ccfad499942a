//! Built-in transports over application memory.

use super::{Sink, Transport};
use crate::buffer::bridge::{self, PinnedBlock};
use crate::buffer::{Release, SharedBuffer};
use crate::callback::{ReadBuffer, Whence};
use crate::error::{Error, Result};

const MEMORY_READ_SIZE: usize = 64 * 1024;

/// Reads the remaining bytes of an application buffer.
///
/// The region is pinned at open and released at close.
pub(crate) struct MemoryTransport {
    buffer: Option<ReadBuffer>,
    region: Option<PinnedBlock>,
    cursor: usize,
}

impl MemoryTransport {
    pub(crate) fn new(buffer: ReadBuffer) -> Self {
        Self {
            buffer: Some(buffer),
            region: None,
            cursor: 0,
        }
    }

    fn len(&self) -> usize {
        self.region.as_ref().map_or(0, PinnedBlock::len)
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self) -> Result<()> {
        let buffer = self
            .buffer
            .take()
            .ok_or_else(|| Error::InvalidArgument("memory transport already opened".into()))?;
        self.region = Some(PinnedBlock::pin(buffer)?);
        self.cursor = 0;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<PinnedBlock>> {
        let cursor = self.cursor;
        let Some(region) = self.region.as_mut() else {
            return Ok(None);
        };
        let bytes = region.bytes();
        if cursor >= bytes.len() {
            return Ok(None);
        }
        let end = bytes.len().min(cursor + MEMORY_READ_SIZE);
        let block = PinnedBlock::from_vec(bytes[cursor..end].to_vec());
        self.cursor = end;
        Ok(Some(block))
    }

    fn skip(&mut self, request: u64) -> Result<u64> {
        let available = (self.len() - self.cursor) as u64;
        let step = request.min(available);
        self.cursor += step as usize;
        Ok(step)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let base = match whence {
            Whence::Set => 0,
            Whence::Current => self.cursor as i64,
            Whence::End => self.len() as i64,
        };
        let target = base
            .checked_add(offset)
            .filter(|target| (0..=self.len() as i64).contains(target))
            .ok_or_else(|| {
                Error::InvalidArgument(format!("seek to {}{:+} is out of range", base, offset))
            })?;
        self.cursor = target as usize;
        Ok(self.cursor as u64)
    }

    fn can_skip(&self) -> bool {
        true
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn close(&mut self) -> Result<()> {
        self.region = None;
        Ok(())
    }
}

/// Writes into a shared application buffer starting at its cursor.
///
/// The buffer's cursor is moved past the written bytes at close, or at free
/// for a session that never closed.
pub(crate) struct MemorySink {
    buffer: SharedBuffer,
    start: usize,
    capacity: usize,
    used: usize,
    reported: bool,
}

impl MemorySink {
    pub(crate) fn new(buffer: SharedBuffer) -> Self {
        Self {
            buffer,
            start: 0,
            capacity: 0,
            used: 0,
            reported: false,
        }
    }

    fn report(&mut self) -> Result<()> {
        if self.reported {
            return Ok(());
        }
        self.reported = true;
        self.buffer.lock().set_position(self.start + self.used)
    }
}

impl Sink for MemorySink {
    fn open(&mut self) -> Result<()> {
        let buffer = self.buffer.lock();
        if buffer.is_read_only() {
            return Err(Error::BufferCapability {
                missing: "a direct address nor a backing array",
                transport: true,
            });
        }
        self.start = buffer.position();
        self.capacity = buffer.remaining();
        self.used = 0;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        if bytes.len() > self.capacity - self.used {
            return Err(Error::BufferExhausted);
        }
        let at = self.start + self.used;
        let mut buffer = self.buffer.lock();
        bridge::with_region(&mut *buffer, at, at + bytes.len(), Release::Commit, |region| {
            region.copy_from_slice(bytes);
            Ok(())
        })?;
        self.used += bytes.len();
        Ok(bytes.len())
    }

    fn close(&mut self) -> Result<()> {
        self.report()
    }

    fn free(&mut self) -> Result<()> {
        self.report()
    }

    fn last_block_hint(&self) -> Option<i32> {
        Some(1)
    }
}
