//! Zstandard filter backed by the `zstd` crate.

use std::io::{self, BufReader};

use zstd::stream::read::Decoder as ZstdDecoder;
use zstd::stream::write::Encoder as ZstdEncoder;

use super::{
    Decode, DecoderLayer, DownstreamWriter, Encode, EncoderLayer, ReadFilter, UpstreamReader,
    WriteFilter, ZSTD, parse_level,
};
use crate::error::{Error, Result};
use crate::stream::{ByteCounter, Downstream, Upstream};

const MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

impl Decode for ZstdDecoder<'static, BufReader<UpstreamReader>> {
    fn source(&mut self) -> &mut UpstreamReader {
        self.get_mut().get_mut()
    }
}

impl Encode for ZstdEncoder<'static, DownstreamWriter> {
    fn finish_stream(&mut self) -> io::Result<()> {
        self.do_finish()
    }

    fn sink(&mut self) -> &mut DownstreamWriter {
        self.get_mut()
    }
}

#[derive(Debug)]
pub(crate) struct ZstdReader;

impl ReadFilter for ZstdReader {
    fn code(&self) -> i32 {
        ZSTD
    }

    fn name(&self) -> &'static str {
        "zstd"
    }

    fn bid_len(&self) -> usize {
        MAGIC.len()
    }

    fn bid(&self, head: &[u8]) -> i32 {
        if head.starts_with(&MAGIC) { 32 } else { 0 }
    }

    fn wrap(&self, lower: Box<dyn Upstream>, bytes: ByteCounter) -> Result<Box<dyn Upstream>> {
        let decoder = ZstdDecoder::new(UpstreamReader::new(lower)).map_err(Error::from_io)?;
        Ok(Box::new(DecoderLayer::new(decoder, bytes)))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ZstdWriter {
    /// Compression level (1-22, default 3).
    level: u32,
}

impl Default for ZstdWriter {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl WriteFilter for ZstdWriter {
    fn code(&self) -> i32 {
        ZSTD
    }

    fn name(&self) -> &'static str {
        "zstd"
    }

    fn set_option(&mut self, key: &str, value: Option<&str>) -> Result<bool> {
        if key != "compression-level" {
            return Ok(false);
        }
        self.level = parse_level(value, 1..=22, 3)?;
        Ok(true)
    }

    fn wrap(
        &self,
        lower: Box<dyn Downstream>,
        bytes: ByteCounter,
    ) -> Result<Box<dyn Downstream>> {
        let level = i32::try_from(self.level).unwrap_or(3);
        let encoder =
            ZstdEncoder::new(DownstreamWriter::new(lower), level).map_err(Error::from_io)?;
        Ok(Box::new(EncoderLayer::new(encoder, bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::testing::{decode, encode};

    #[test]
    fn test_zstd_roundtrip() {
        let data = b"zstd zstd zstd zstd, a frame of repeated words. ".repeat(100);
        let encoded = encode(&ZstdWriter::default(), &data);
        assert_eq!(ZstdReader.bid(&encoded), 32);
        assert_eq!(decode(&ZstdReader, encoded, 64), data);
    }

    #[test]
    fn test_zstd_level_option() {
        let mut writer = ZstdWriter::default();
        assert!(writer.set_option("compression-level", Some("19")).unwrap());
        assert_eq!(writer.level, 19);
        assert!(writer.set_option("compression-level", Some("23")).is_err());
    }
}
