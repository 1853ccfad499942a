//! Compression filters stacked between a format and its transport.
//!
//! A read session detects filters by bidding on the leading bytes of its
//! input and stacks a decoding layer for each one it recognizes. A write
//! session stacks the encoding layers the application added, in order, with
//! the first one nearest the format.
//!
//! The codecs themselves come from [`flate2`](https://docs.rs/flate2),
//! [`bzip2`](https://docs.rs/bzip2) and [`zstd`](https://docs.rs/zstd); this
//! module only adapts their `Read`/`Write` streams to the engine's layers.

#![cfg_attr(
    not(any(feature = "deflate", feature = "bzip2", feature = "zstd")),
    allow(dead_code)
)]

#[cfg(feature = "bzip2")]
mod bzip2;
#[cfg(feature = "deflate")]
mod gzip;
#[cfg(feature = "zstd")]
mod zstd;

use std::fmt;
use std::io::{self, Read, Write};
use std::ops::RangeInclusive;

use crate::callback::Whence;
use crate::error::{Error, Result};
use crate::session::SessionState;
use crate::stream::{ByteCounter, Downstream, Upstream};

/// No filter; also names the client layer of a session.
pub const NONE: i32 = 0;
/// gzip (RFC 1952).
pub const GZIP: i32 = 1;
/// bzip2.
pub const BZIP2: i32 = 2;
/// Unix `compress` (LZW).
pub const COMPRESS: i32 = 3;
/// An external program.
pub const PROGRAM: i32 = 4;
/// Legacy LZMA "alone" streams.
pub const LZMA: i32 = 5;
/// xz.
pub const XZ: i32 = 6;
/// uuencode.
pub const UU: i32 = 7;
/// RPM package wrapper.
pub const RPM: i32 = 8;
/// lzip.
pub const LZIP: i32 = 9;
/// lrzip.
pub const LRZIP: i32 = 10;
/// lzop.
pub const LZOP: i32 = 11;
/// grzip.
pub const GRZIP: i32 = 12;
/// LZ4 frames.
pub const LZ4: i32 = 13;
/// Zstandard.
pub const ZSTD: i32 = 14;

const NAMES: [(i32, &str); 15] = [
    (NONE, "none"),
    (GZIP, "gzip"),
    (BZIP2, "bzip2"),
    (COMPRESS, "compress (.Z)"),
    (PROGRAM, "program"),
    (LZMA, "lzma"),
    (XZ, "xz"),
    (UU, "uu"),
    (RPM, "rpm"),
    (LZIP, "lzip"),
    (LRZIP, "lrzip"),
    (LZOP, "lzop"),
    (GRZIP, "grzip"),
    (LZ4, "lz4"),
    (ZSTD, "zstd"),
];

/// Returns the display name of a filter code.
pub fn name(code: i32) -> Option<&'static str> {
    NAMES.iter().find(|(c, _)| *c == code).map(|(_, n)| *n)
}

/// Looks up a filter code by name, as accepted by `add_filter_by_name`.
///
/// ```
/// use arcstream::filter;
///
/// assert_eq!(filter::code_by_name("gzip"), Some(filter::GZIP));
/// assert_eq!(filter::code_by_name("compress"), Some(filter::COMPRESS));
/// assert_eq!(filter::code_by_name("rot13"), None);
/// ```
pub fn code_by_name(name: &str) -> Option<i32> {
    if name == "compress" {
        return Some(COMPRESS);
    }
    NAMES.iter().find(|(_, n)| *n == name).map(|(c, _)| *c)
}

/// Returns true if the filter is compiled into this build.
pub fn is_available(code: i32) -> bool {
    code == NONE || compiled().contains(&code)
}

/// Filter codes with a built-in implementation, in bidding order.
pub fn compiled() -> Vec<i32> {
    #[allow(unused_mut)]
    let mut codes = Vec::new();
    #[cfg(feature = "deflate")]
    codes.push(GZIP);
    #[cfg(feature = "bzip2")]
    codes.push(BZIP2);
    #[cfg(feature = "zstd")]
    codes.push(ZSTD);
    codes
}

fn unsupported(code: i32) -> Error {
    Error::UnsupportedFilter {
        code,
        name: name(code).unwrap_or("unknown"),
    }
}

/// A decompressing filter for read sessions.
pub(crate) trait ReadFilter: Send {
    fn code(&self) -> i32;

    fn name(&self) -> &'static str;

    /// Bytes of lookahead needed to bid.
    fn bid_len(&self) -> usize;

    /// Returns a positive confidence if `head` starts a stream of this filter.
    fn bid(&self, head: &[u8]) -> i32;

    /// Stacks a decoding layer over `lower`.
    fn wrap(&self, lower: Box<dyn Upstream>, bytes: ByteCounter) -> Result<Box<dyn Upstream>>;
}

/// A compressing filter for write sessions.
pub(crate) trait WriteFilter: Send {
    fn code(&self) -> i32;

    fn name(&self) -> &'static str;

    /// Applies an option; returns false for keys this filter does not know.
    fn set_option(&mut self, key: &str, value: Option<&str>) -> Result<bool>;

    /// Stacks an encoding layer over `lower`.
    fn wrap(&self, lower: Box<dyn Downstream>, bytes: ByteCounter)
    -> Result<Box<dyn Downstream>>;
}

pub(crate) fn read_filter(code: i32) -> Result<Box<dyn ReadFilter>> {
    match code {
        #[cfg(feature = "deflate")]
        GZIP => Ok(Box::new(gzip::GzipReader)),
        #[cfg(feature = "bzip2")]
        BZIP2 => Ok(Box::new(bzip2::Bzip2Reader)),
        #[cfg(feature = "zstd")]
        ZSTD => Ok(Box::new(zstd::ZstdReader)),
        _ => Err(unsupported(code)),
    }
}

pub(crate) fn write_filter(code: i32) -> Result<Box<dyn WriteFilter>> {
    match code {
        #[cfg(feature = "deflate")]
        GZIP => Ok(Box::new(gzip::GzipWriter::default())),
        #[cfg(feature = "bzip2")]
        BZIP2 => Ok(Box::new(bzip2::Bzip2Writer::default())),
        #[cfg(feature = "zstd")]
        ZSTD => Ok(Box::new(zstd::ZstdWriter::default())),
        _ => Err(unsupported(code)),
    }
}

/// Parses the `compression-level` option shared by all encoders.
///
/// A missing value restores `default`.
pub(crate) fn parse_level(
    value: Option<&str>,
    range: RangeInclusive<u32>,
    default: u32,
) -> Result<u32> {
    let Some(value) = value else {
        return Ok(default);
    };
    value
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|level| range.contains(level))
        .ok_or_else(|| Error::InvalidOption {
            option: "compression-level".into(),
            reason: format!(
                "expected a level between {} and {}, got `{}'",
                range.start(),
                range.end(),
                value
            ),
        })
}

/// Exposes an [`Upstream`] as [`Read`] for codec decoders.
pub(crate) struct UpstreamReader {
    inner: Box<dyn Upstream>,
}

impl UpstreamReader {
    pub(crate) fn new(inner: Box<dyn Upstream>) -> Self {
        Self { inner }
    }
}

impl Read for UpstreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let available = self.inner.ahead(1).map_err(Error::into_io)?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.inner.consume(n);
        Ok(n)
    }
}

/// A codec decoder reading from an [`UpstreamReader`].
pub(crate) trait Decode: Read + Send {
    fn source(&mut self) -> &mut UpstreamReader;
}

const DECODE_CHUNK: usize = 64 * 1024;

/// Serves decoded bytes with read-ahead.
pub(crate) struct DecoderLayer<R> {
    decoder: R,
    out: Vec<u8>,
    out_pos: usize,
    position: u64,
    eof: bool,
    bytes: ByteCounter,
}

impl<R> fmt::Debug for DecoderLayer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderLayer")
            .field("position", &self.position)
            .field("eof", &self.eof)
            .finish_non_exhaustive()
    }
}

impl<R: Decode> DecoderLayer<R> {
    pub(crate) fn new(decoder: R, bytes: ByteCounter) -> Self {
        Self {
            decoder,
            out: Vec::new(),
            out_pos: 0,
            position: 0,
            eof: false,
            bytes,
        }
    }

    fn fill(&mut self) -> Result<()> {
        if self.out_pos > 0 {
            self.out.drain(..self.out_pos);
            self.out_pos = 0;
        }
        let filled = self.out.len();
        self.out
            .try_reserve(DECODE_CHUNK)
            .map_err(|_| Error::OutOfMemory("decoder output buffer"))?;
        self.out.resize(filled + DECODE_CHUNK, 0);
        loop {
            match self.decoder.read(&mut self.out[filled..]) {
                Ok(n) => {
                    self.out.truncate(filled + n);
                    self.eof = n == 0;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.out.truncate(filled);
                    return Err(Error::from_io(e));
                }
            }
        }
    }
}

impl<R: Decode> Upstream for DecoderLayer<R> {
    fn ahead(&mut self, min: usize) -> Result<&[u8]> {
        let min = min.max(1);
        while self.out.len() - self.out_pos < min && !self.eof {
            self.fill()?;
        }
        Ok(&self.out[self.out_pos..])
    }

    fn consume(&mut self, n: usize) {
        let n = n.min(self.out.len() - self.out_pos);
        self.out_pos += n;
        self.position += n as u64;
        self.bytes.add(n as u64);
    }

    fn skip(&mut self, request: u64) -> Result<u64> {
        let mut remaining = request;
        while remaining > 0 {
            let available = self.ahead(1)?.len();
            if available == 0 {
                break;
            }
            let step = remaining.min(available as u64) as usize;
            self.consume(step);
            remaining -= step as u64;
        }
        Ok(request - remaining)
    }

    fn seek(&mut self, _offset: i64, _whence: Whence) -> Result<u64> {
        Err(Error::Unsupported {
            operation: "seek through a compression filter",
        })
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn close(&mut self) -> Result<()> {
        self.decoder.source().inner.close()
    }
}

/// Exposes a [`Downstream`] as [`Write`] for codec encoders.
pub(crate) struct DownstreamWriter {
    inner: Box<dyn Downstream>,
}

impl DownstreamWriter {
    pub(crate) fn new(inner: Box<dyn Downstream>) -> Self {
        Self { inner }
    }
}

impl Write for DownstreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf).map_err(Error::into_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A codec encoder writing into a [`DownstreamWriter`].
pub(crate) trait Encode: Write + Send {
    /// Writes the stream trailer; the encoder accepts no more input after it.
    fn finish_stream(&mut self) -> io::Result<()>;

    fn sink(&mut self) -> &mut DownstreamWriter;
}

/// Feeds written bytes through an encoder.
pub(crate) struct EncoderLayer<W> {
    encoder: W,
    position: u64,
    bytes: ByteCounter,
    finished: bool,
}

impl<W> fmt::Debug for EncoderLayer<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderLayer")
            .field("position", &self.position)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<W: Encode> EncoderLayer<W> {
    pub(crate) fn new(encoder: W, bytes: ByteCounter) -> Self {
        Self {
            encoder,
            position: 0,
            bytes,
            finished: false,
        }
    }
}

impl<W: Encode> Downstream for EncoderLayer<W> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.finished {
            return Err(Error::InvalidState {
                operation: "write",
                state: SessionState::Closed,
            });
        }
        self.encoder.write_all(bytes).map_err(Error::from_io)?;
        self.position += bytes.len() as u64;
        self.bytes.add(bytes.len() as u64);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.encoder.finish_stream().map_err(Error::from_io)?;
        self.encoder.sink().inner.finish()
    }

    fn close(&mut self) -> Result<()> {
        self.encoder.sink().inner.close()
    }

    fn free(&mut self) -> Result<()> {
        self.encoder.sink().inner.free()
    }

    fn position(&self) -> u64 {
        self.position
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use super::*;
    use crate::stream::testing::{SliceUpstream, VecDownstream};

    /// Compresses `data` through `filter` and returns the encoded bytes.
    pub(crate) fn encode(filter: &dyn WriteFilter, data: &[u8]) -> Vec<u8> {
        let sink = VecDownstream::default();
        let out = Arc::clone(&sink.out);
        let finished = Arc::clone(&sink.finished);
        let mut layer = filter.wrap(Box::new(sink), ByteCounter::default()).unwrap();
        for chunk in data.chunks(1000) {
            layer.write(chunk).unwrap();
        }
        layer.finish().unwrap();
        assert!(*finished.lock().unwrap());
        let encoded = out.lock().unwrap().clone();
        encoded
    }

    /// Decodes `encoded` through `filter`, reading `piece` bytes at a time.
    pub(crate) fn decode(filter: &dyn ReadFilter, encoded: Vec<u8>, piece: usize) -> Vec<u8> {
        let counter = ByteCounter::default();
        let mut layer = filter
            .wrap(SliceUpstream::boxed(encoded, piece), counter.clone())
            .unwrap();
        let mut decoded = Vec::new();
        loop {
            let chunk = layer.ahead(1).unwrap();
            if chunk.is_empty() {
                break;
            }
            let n = chunk.len();
            decoded.extend_from_slice(chunk);
            layer.consume(n);
        }
        assert_eq!(counter.get(), decoded.len() as u64);
        decoded
    }
}
