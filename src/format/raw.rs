//! The raw format: the whole input is one regular file named `data`.

use super::{FormatReader, FormatWriter, RAW};
use crate::callback::Whence;
use crate::entry::{AE_IFREG, Entry};
use crate::error::{Error, Result};
use crate::stream::{ReadStream, WriteStream};

/// Reads any non-empty input as a single entry.
///
/// The entry's size is unknown until its data has been read to the end.
#[derive(Debug, Default)]
pub struct RawReader {
    header_read: bool,
    offset: u64,
    end_of_data: bool,
}

impl RawReader {
    /// Creates a reader for a fresh input.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FormatReader for RawReader {
    fn code(&self) -> i32 {
        RAW
    }

    fn name(&self) -> &'static str {
        "raw"
    }

    fn bid(&mut self, stream: &mut ReadStream, best_bid: i32) -> Result<i32> {
        // Anything else that recognizes the input wins.
        if best_bid >= 1 {
            return Ok(-1);
        }
        Ok(if stream.ahead(1)?.is_empty() { -1 } else { 1 })
    }

    fn read_header(&mut self, _stream: &mut ReadStream, entry: &mut Entry) -> Result<bool> {
        if self.header_read {
            return Ok(false);
        }
        self.header_read = true;
        entry.set_pathname("data");
        entry.set_filetype(AE_IFREG);
        entry.set_perm(0o644);
        entry.unset_size();
        Ok(true)
    }

    fn read_data(
        &mut self,
        stream: &mut ReadStream,
        entry: &mut Entry,
        out: &mut [u8],
    ) -> Result<usize> {
        if self.end_of_data {
            return Ok(0);
        }
        let n = stream.read(out)?;
        self.offset += n as u64;
        if n == 0 && !out.is_empty() {
            self.end_of_data = true;
            entry.set_size(i64::try_from(self.offset).unwrap_or(i64::MAX));
        }
        Ok(n)
    }

    fn skip_data(&mut self, stream: &mut ReadStream) -> Result<()> {
        while !self.end_of_data {
            let available = stream.ahead(1)?.len();
            if available == 0 {
                self.end_of_data = true;
            }
            stream.consume(available);
            self.offset += available as u64;
        }
        Ok(())
    }

    fn seek_data(&mut self, stream: &mut ReadStream, offset: i64, whence: Whence) -> Result<u64> {
        let position = stream.seek(offset, whence)?;
        self.offset = position;
        self.end_of_data = false;
        Ok(position)
    }
}

/// Writes the data of exactly one regular file with no framing.
#[derive(Debug, Default)]
pub struct RawWriter {
    entries_written: u32,
}

impl RawWriter {
    /// Creates a writer for a fresh archive.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FormatWriter for RawWriter {
    fn code(&self) -> i32 {
        RAW
    }

    fn name(&self) -> &'static str {
        "raw"
    }

    fn write_header(&mut self, _stream: &mut WriteStream, entry: &Entry) -> Result<()> {
        if entry.filetype() != AE_IFREG {
            return Err(Error::Format(
                "Raw format only supports filetype AE_IFREG".into(),
            ));
        }
        if self.entries_written > 0 {
            return Err(Error::Format(
                "Raw format only supports one entry per archive".into(),
            ));
        }
        self.entries_written += 1;
        Ok(())
    }

    fn write_data(&mut self, stream: &mut WriteStream, data: &[u8]) -> Result<usize> {
        stream.write_all(data)?;
        Ok(data.len())
    }
}
