//! The bottom layers of the read and write stacks.

use super::{ByteCounter, Downstream, Upstream};
use crate::buffer::bridge::PinnedBlock;
use crate::callback::Whence;
use crate::error::{Error, Result};
use crate::session::SessionState;
use crate::transport::{Sink, Transport};

/// Largest request handed to a skip callback at once.
const SKIP_CHUNK: u64 = 1 << 30;

/// Skips larger than this fall back to seeking when no skip callback exists.
const SEEK_SKIP_THRESHOLD: u64 = 64 * 1024;

/// Pulls blocks from a transport and serves read-ahead requests.
///
/// The current block stays pinned until the next read. When a request spans
/// blocks, the tail of the current block is staged in a copy buffer first.
pub(crate) struct ClientReader {
    transport: Box<dyn Transport>,
    block: Option<PinnedBlock>,
    block_pos: usize,
    copy: Vec<u8>,
    copy_pos: usize,
    position: u64,
    end_of_input: bool,
    bytes: ByteCounter,
}

impl ClientReader {
    pub(crate) fn new(transport: Box<dyn Transport>, bytes: ByteCounter) -> Self {
        Self {
            transport,
            block: None,
            block_pos: 0,
            copy: Vec::new(),
            copy_pos: 0,
            position: 0,
            end_of_input: false,
            bytes,
        }
    }

    pub(crate) fn open(&mut self) -> Result<()> {
        self.transport.open()
    }

    fn block_remaining(&self) -> usize {
        self.block.as_ref().map_or(0, |b| b.len() - self.block_pos)
    }

    fn copied(&self) -> usize {
        self.copy.len() - self.copy_pos
    }

    fn release_block(&mut self) {
        self.block = None;
        self.block_pos = 0;
    }

    /// Reads the next block, moving to the next source at each end of input.
    fn next_block(&mut self) -> Result<bool> {
        self.release_block();
        loop {
            if let Some(block) = self.transport.read()? {
                self.block = Some(block);
                return Ok(true);
            }
            let next = self.transport.current_source() + 1;
            if next >= self.transport.sources() {
                self.end_of_input = true;
                return Ok(false);
            }
            log::debug!("switching to source {}", next);
            self.transport.switch_to(next)?;
        }
    }

    /// Moves the unread tail of the current block into the copy buffer.
    fn stage_block(&mut self) -> Result<()> {
        if self.copy_pos > 0 {
            self.copy.drain(..self.copy_pos);
            self.copy_pos = 0;
        }
        let pos = self.block_pos;
        if let Some(block) = self.block.as_mut() {
            let len = block.len();
            let tail = &block.bytes()[pos..];
            self.copy
                .try_reserve(tail.len())
                .map_err(|_| Error::OutOfMemory("read-ahead buffer"))?;
            self.copy.extend_from_slice(tail);
            self.block_pos = len;
        }
        Ok(())
    }

    fn client_skip(&mut self, request: u64) -> Result<u64> {
        if self.transport.can_skip() {
            let mut total = 0;
            while total < request {
                let ask = (request - total).min(SKIP_CHUNK);
                let got = self.transport.skip(ask)?;
                if got > ask {
                    return Err(Error::TransportStatus {
                        operation: "skip",
                        status: i64::try_from(got).unwrap_or(i64::MAX),
                    });
                }
                total += got;
                if got < ask {
                    break;
                }
            }
            return Ok(total);
        }

        if self.transport.can_seek() && request > SEEK_SKIP_THRESHOLD {
            let step = i64::try_from(request).map_err(|_| {
                Error::InvalidArgument(format!("skip of {} bytes is too large", request))
            })?;
            let before = self.transport.seek(0, Whence::Current)?;
            let after = self.transport.seek(step, Whence::Current)?;
            if after != before + request {
                return Err(Error::TransportStatus {
                    operation: "seek",
                    status: i64::try_from(after).unwrap_or(i64::MAX),
                });
            }
            return Ok(request);
        }

        Ok(0)
    }

    fn advance(&mut self, n: u64) {
        self.position += n;
        self.bytes.add(n);
    }
}

impl Upstream for ClientReader {
    fn ahead(&mut self, min: usize) -> Result<&[u8]> {
        let min = min.max(1);
        loop {
            let copied = self.copied();
            let satisfied = if copied == 0 {
                self.block_remaining() >= min
            } else {
                copied >= min
            };
            if satisfied || self.end_of_input {
                break;
            }
            if copied > 0 || self.block_remaining() > 0 {
                self.stage_block()?;
            } else {
                self.copy.clear();
                self.copy_pos = 0;
            }
            self.next_block()?;
        }

        if self.copied() > 0 {
            return Ok(&self.copy[self.copy_pos..]);
        }
        let pos = self.block_pos;
        match self.block.as_mut() {
            Some(block) => Ok(&block.bytes()[pos..]),
            None => Ok(&[]),
        }
    }

    fn consume(&mut self, n: usize) {
        let copied = self.copied();
        let n = if copied > 0 {
            let n = n.min(copied);
            self.copy_pos += n;
            n
        } else {
            let n = n.min(self.block_remaining());
            self.block_pos += n;
            n
        };
        self.advance(n as u64);
    }

    fn skip(&mut self, request: u64) -> Result<u64> {
        let mut remaining = request;

        let from_copy = remaining.min(self.copied() as u64);
        self.copy_pos += from_copy as usize;
        remaining -= from_copy;
        let from_block = remaining.min(self.block_remaining() as u64);
        self.block_pos += from_block as usize;
        remaining -= from_block;
        self.advance(from_copy + from_block);

        if remaining == 0 || self.end_of_input {
            return Ok(request - remaining);
        }
        self.release_block();

        let skipped = self.client_skip(remaining)?;
        self.advance(skipped);
        remaining -= skipped;

        // Whatever the transport could not skip is read and thrown away.
        while remaining > 0 {
            if !self.next_block()? {
                break;
            }
            let step = remaining.min(self.block_remaining() as u64);
            self.block_pos += step as usize;
            self.advance(step);
            remaining -= step;
        }
        Ok(request - remaining)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        if !self.transport.can_seek() {
            return Err(Error::Unsupported { operation: "seek" });
        }
        let offset = match whence {
            Whence::Current => {
                if i128::from(self.position) + i128::from(offset) < 0 {
                    return Err(Error::InvalidArgument(format!(
                        "seek to {}{:+} is out of range",
                        self.position, offset
                    )));
                }
                // The transport sits past the bytes still buffered here.
                let unread = i64::try_from(self.copied() + self.block_remaining())
                    .unwrap_or(i64::MAX);
                offset.saturating_sub(unread)
            }
            Whence::Set | Whence::End => offset,
        };
        self.release_block();
        self.copy.clear();
        self.copy_pos = 0;
        let position = self.transport.seek(offset, whence)?;
        self.position = position;
        self.end_of_input = false;
        Ok(position)
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn close(&mut self) -> Result<()> {
        self.release_block();
        self.transport.close()
    }
}

/// Groups output into fixed-size blocks before handing it to a sink.
pub(crate) struct ClientWriter {
    sink: Box<dyn Sink>,
    block: Vec<u8>,
    bytes_per_block: usize,
    bytes_in_last_block: i32,
    position: u64,
    bytes: ByteCounter,
    finished: bool,
    closed: bool,
    freed: bool,
}

impl ClientWriter {
    pub(crate) fn new(
        sink: Box<dyn Sink>,
        bytes_per_block: usize,
        bytes_in_last_block: i32,
        bytes: ByteCounter,
    ) -> Self {
        Self {
            sink,
            block: Vec::new(),
            bytes_per_block,
            bytes_in_last_block,
            position: 0,
            bytes,
            finished: false,
            closed: false,
            freed: false,
        }
    }

    pub(crate) fn open(&mut self) -> Result<()> {
        self.sink.open()?;
        if self.bytes_in_last_block < 0 {
            if let Some(hint) = self.sink.last_block_hint() {
                self.bytes_in_last_block = hint;
            }
        }
        self.block
            .try_reserve_exact(self.bytes_per_block)
            .map_err(|_| Error::OutOfMemory("write block buffer"))?;
        Ok(())
    }

    fn write_out(&mut self, data: &[u8]) -> Result<()> {
        let written = self.sink.write(data)?;
        if written > data.len() {
            return Err(Error::TransportStatus {
                operation: "write",
                status: i64::try_from(written).unwrap_or(i64::MAX),
            });
        }
        self.bytes.add(written as u64);
        if written < data.len() {
            return Err(Error::ShortWrite {
                requested: data.len(),
                written,
            });
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        let block = std::mem::take(&mut self.block);
        let result = self.write_out(&block);
        self.block = block;
        self.block.clear();
        result
    }

    /// Size of the final, possibly partial, block.
    fn last_block_size(&self, len: usize) -> usize {
        let target = match usize::try_from(self.bytes_in_last_block) {
            Ok(unit) if unit > 0 => len.div_ceil(unit) * unit,
            _ => self.bytes_per_block,
        };
        target.min(self.bytes_per_block).max(len)
    }
}

impl Downstream for ClientWriter {
    fn write(&mut self, mut data: &[u8]) -> Result<()> {
        if self.closed || self.freed {
            return Err(Error::InvalidState {
                operation: "write",
                state: SessionState::Closed,
            });
        }
        self.position += data.len() as u64;
        if self.bytes_per_block == 0 {
            return if data.is_empty() {
                Ok(())
            } else {
                self.write_out(data)
            };
        }

        if !self.block.is_empty() {
            let take = (self.bytes_per_block - self.block.len()).min(data.len());
            self.block.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.block.len() < self.bytes_per_block {
                return Ok(());
            }
            self.flush_block()?;
        }

        while data.len() >= self.bytes_per_block {
            let (whole, rest) = data.split_at(self.bytes_per_block);
            self.write_out(whole)?;
            data = rest;
        }
        self.block.extend_from_slice(data);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if self.block.is_empty() {
            return Ok(());
        }
        let size = self.last_block_size(self.block.len());
        self.block.resize(size, 0);
        self.flush_block()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink.close()
    }

    fn free(&mut self) -> Result<()> {
        if self.freed {
            return Ok(());
        }
        self.freed = true;
        self.sink.free()
    }

    fn position(&self) -> u64 {
        self.position
    }
}
