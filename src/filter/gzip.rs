//! gzip filter backed by `flate2`.

use std::io;

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

use super::{
    Decode, DecoderLayer, DownstreamWriter, Encode, EncoderLayer, GZIP, ReadFilter,
    UpstreamReader, WriteFilter, parse_level,
};
use crate::error::Result;
use crate::stream::{ByteCounter, Downstream, Upstream};

const MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

impl Decode for MultiGzDecoder<UpstreamReader> {
    fn source(&mut self) -> &mut UpstreamReader {
        self.get_mut()
    }
}

impl Encode for GzEncoder<DownstreamWriter> {
    fn finish_stream(&mut self) -> io::Result<()> {
        self.try_finish()
    }

    fn sink(&mut self) -> &mut DownstreamWriter {
        self.get_mut()
    }
}

/// Detects and decodes gzip members; concatenated members decode as one stream.
#[derive(Debug)]
pub(crate) struct GzipReader;

impl ReadFilter for GzipReader {
    fn code(&self) -> i32 {
        GZIP
    }

    fn name(&self) -> &'static str {
        "gzip"
    }

    fn bid_len(&self) -> usize {
        MAGIC.len()
    }

    fn bid(&self, head: &[u8]) -> i32 {
        if head.starts_with(&MAGIC) { 24 } else { 0 }
    }

    fn wrap(&self, lower: Box<dyn Upstream>, bytes: ByteCounter) -> Result<Box<dyn Upstream>> {
        let decoder = MultiGzDecoder::new(UpstreamReader::new(lower));
        Ok(Box::new(DecoderLayer::new(decoder, bytes)))
    }
}

/// gzip encoder settings.
#[derive(Debug, Clone)]
pub(crate) struct GzipWriter {
    /// Compression level (0-9, default 6).
    level: u32,
}

impl Default for GzipWriter {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl WriteFilter for GzipWriter {
    fn code(&self) -> i32 {
        GZIP
    }

    fn name(&self) -> &'static str {
        "gzip"
    }

    fn set_option(&mut self, key: &str, value: Option<&str>) -> Result<bool> {
        if key != "compression-level" {
            return Ok(false);
        }
        self.level = parse_level(value, 0..=9, 6)?;
        Ok(true)
    }

    fn wrap(
        &self,
        lower: Box<dyn Downstream>,
        bytes: ByteCounter,
    ) -> Result<Box<dyn Downstream>> {
        let encoder = GzEncoder::new(DownstreamWriter::new(lower), Compression::new(self.level));
        Ok(Box::new(EncoderLayer::new(encoder, bytes)))
    }
}
