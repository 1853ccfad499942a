//! Byte sources and sinks beneath the engine.
//!
//! A [`Transport`] feeds a read session and a [`Sink`] drains a write session.
//! The callback implementations forward to application handlers; the file,
//! reader and memory implementations back the built-in `open_*` methods.

pub(crate) mod callback;
pub(crate) mod file;
pub(crate) mod memory;

use crate::buffer::bridge::PinnedBlock;
use crate::callback::Whence;
use crate::error::{Error, Result};

/// Block size used by built-in transports and write buffering.
pub(crate) const DEFAULT_BLOCK_SIZE: usize = 10240;

/// A source of archive bytes, possibly made of several consecutive parts.
pub(crate) trait Transport: Send {
    fn open(&mut self) -> Result<()>;

    /// Returns the next block, or `None` at the end of the current source.
    fn read(&mut self) -> Result<Option<PinnedBlock>>;

    /// Skips up to `request` bytes without reading them.
    fn skip(&mut self, _request: u64) -> Result<u64> {
        Ok(0)
    }

    /// Repositions the current source and returns the new position.
    fn seek(&mut self, _offset: i64, _whence: Whence) -> Result<u64> {
        Err(Error::Unsupported { operation: "seek" })
    }

    fn can_skip(&self) -> bool {
        false
    }

    fn can_seek(&self) -> bool {
        false
    }

    fn sources(&self) -> usize {
        1
    }

    fn current_source(&self) -> usize {
        0
    }

    /// Moves to the source at `index`.
    fn switch_to(&mut self, _index: usize) -> Result<()> {
        Err(Error::Unsupported {
            operation: "switch",
        })
    }

    fn close(&mut self) -> Result<()>;
}

/// A destination for archive bytes.
pub(crate) trait Sink: Send {
    fn open(&mut self) -> Result<()>;

    /// Writes `bytes` and returns how many were consumed.
    fn write(&mut self, bytes: &[u8]) -> Result<usize>;

    fn close(&mut self) -> Result<()>;

    fn free(&mut self) -> Result<()> {
        Ok(())
    }

    /// Preferred last-block size when the session left it unset.
    fn last_block_hint(&self) -> Option<i32> {
        None
    }
}

/// Reads one block from `reader`, retrying on interruption.
pub(crate) fn read_block<R: std::io::Read + ?Sized>(
    reader: &mut R,
    block_size: usize,
) -> Result<Option<PinnedBlock>> {
    let mut block = vec![0u8; block_size.max(1)];
    loop {
        match reader.read(&mut block) {
            Ok(0) => return Ok(None),
            Ok(n) => {
                block.truncate(n);
                return Ok(Some(PinnedBlock::from_vec(block)));
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
}
