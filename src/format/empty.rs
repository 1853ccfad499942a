//! The empty format: a zero-length input is an archive with no entries.

use super::{EMPTY, FormatReader};
use crate::entry::Entry;
use crate::error::Result;
use crate::stream::ReadStream;

/// Recognizes empty input.
#[derive(Debug, Default)]
pub struct EmptyReader;

impl EmptyReader {
    /// Creates the reader.
    pub fn new() -> Self {
        Self
    }
}

impl FormatReader for EmptyReader {
    fn code(&self) -> i32 {
        EMPTY
    }

    fn name(&self) -> &'static str {
        "Empty file"
    }

    fn bid(&mut self, stream: &mut ReadStream, _best_bid: i32) -> Result<i32> {
        Ok(if stream.ahead(1)?.is_empty() { 1 } else { -1 })
    }

    fn read_header(&mut self, _stream: &mut ReadStream, _entry: &mut Entry) -> Result<bool> {
        Ok(false)
    }

    fn read_data(
        &mut self,
        _stream: &mut ReadStream,
        _entry: &mut Entry,
        _out: &mut [u8],
    ) -> Result<usize> {
        Ok(0)
    }

    fn skip_data(&mut self, _stream: &mut ReadStream) -> Result<()> {
        Ok(())
    }
}
