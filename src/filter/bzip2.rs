//! bzip2 filter backed by the `bzip2` crate.

use std::io;

use bzip2::Compression;
use bzip2::read::MultiBzDecoder;
use bzip2::write::BzEncoder;

use super::{
    BZIP2, Decode, DecoderLayer, DownstreamWriter, Encode, EncoderLayer, ReadFilter,
    UpstreamReader, WriteFilter, parse_level,
};
use crate::error::Result;
use crate::stream::{ByteCounter, Downstream, Upstream};

impl Decode for MultiBzDecoder<UpstreamReader> {
    fn source(&mut self) -> &mut UpstreamReader {
        self.get_mut()
    }
}

impl Encode for BzEncoder<DownstreamWriter> {
    fn finish_stream(&mut self) -> io::Result<()> {
        self.try_finish()
    }

    fn sink(&mut self) -> &mut DownstreamWriter {
        self.get_mut()
    }
}

#[derive(Debug)]
pub(crate) struct Bzip2Reader;

impl ReadFilter for Bzip2Reader {
    fn code(&self) -> i32 {
        BZIP2
    }

    fn name(&self) -> &'static str {
        "bzip2"
    }

    fn bid_len(&self) -> usize {
        10
    }

    /// "BZh" and a block-size digit, then a block or end-of-stream marker.
    fn bid(&self, head: &[u8]) -> i32 {
        let [b'B', b'Z', b'h', level, rest @ ..] = head else {
            return 0;
        };
        if !(b'1'..=b'9').contains(level) {
            return 0;
        }
        match rest {
            [0x31, 0x41, 0x59, 0x26, 0x53, 0x59, ..] | [0x17, 0x72, 0x45, 0x38, 0x50, 0x90, ..] => {
                72
            }
            _ => 32,
        }
    }

    fn wrap(&self, lower: Box<dyn Upstream>, bytes: ByteCounter) -> Result<Box<dyn Upstream>> {
        let decoder = MultiBzDecoder::new(UpstreamReader::new(lower));
        Ok(Box::new(DecoderLayer::new(decoder, bytes)))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Bzip2Writer {
    /// Block size in units of 100 KiB (1-9, default 9).
    level: u32,
}

impl Default for Bzip2Writer {
    fn default() -> Self {
        Self { level: 9 }
    }
}

impl WriteFilter for Bzip2Writer {
    fn code(&self) -> i32 {
        BZIP2
    }

    fn name(&self) -> &'static str {
        "bzip2"
    }

    fn set_option(&mut self, key: &str, value: Option<&str>) -> Result<bool> {
        if key != "compression-level" {
            return Ok(false);
        }
        self.level = parse_level(value, 1..=9, 9)?;
        Ok(true)
    }

    fn wrap(
        &self,
        lower: Box<dyn Downstream>,
        bytes: ByteCounter,
    ) -> Result<Box<dyn Downstream>> {
        let encoder = BzEncoder::new(DownstreamWriter::new(lower), Compression::new(self.level));
        Ok(Box::new(EncoderLayer::new(encoder, bytes)))
    }
}
