//! Shared test utilities for integration tests.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test file
//! compiles as a separate crate and may only use a subset of these helpers.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arcstream::callback::ReadBuffer;
use arcstream::entry::AE_IFREG;
use arcstream::format::{FormatReader, FormatWriter};
use arcstream::stream::{ReadStream, WriteStream};
use arcstream::{Entry, Error, Result, Whence};

// ============================================================================
// Release tracking
// ============================================================================

/// Counts how many of its tokens have been dropped.
#[derive(Clone, Default)]
pub struct DropCounter(Arc<AtomicUsize>);

impl DropCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A value that bumps the counter when dropped.
    pub fn token(&self) -> DropToken {
        DropToken(Arc::clone(&self.0))
    }

    pub fn dropped(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct DropToken(Arc<AtomicUsize>);

impl Drop for DropToken {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// An ordered log of callback invocations, shared with the test body.
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.all().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

// ============================================================================
// Scripted sources
// ============================================================================

/// Chunks handed out one per read call.
pub struct Chunks(VecDeque<Vec<u8>>);

impl Chunks {
    pub fn new(parts: &[&[u8]]) -> Self {
        Self(parts.iter().map(|p| p.to_vec()).collect())
    }

    /// Splits `data` into pieces of the given sizes, cycling through them.
    pub fn split(data: &[u8], sizes: &[usize]) -> Self {
        let mut parts = VecDeque::new();
        let mut rest = data;
        for &size in sizes.iter().cycle() {
            if rest.is_empty() {
                break;
            }
            let (head, tail) = rest.split_at(size.clamp(1, rest.len()));
            parts.push_back(head.to_vec());
            rest = tail;
        }
        Self(parts)
    }

    pub fn next(&mut self) -> Option<ReadBuffer> {
        self.0
            .pop_front()
            .map(|chunk| Box::new(Cursor::new(chunk)) as ReadBuffer)
    }
}

/// A named byte source with position, skip and seek, logging each call.
pub struct Source {
    pub name: &'static str,
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
    /// Fraction of each skip request actually honoured, as `(num, den)`.
    skip_ratio: (u64, u64),
    events: Events,
}

impl Source {
    pub fn new(name: &'static str, data: Vec<u8>, chunk: usize, events: &Events) -> Self {
        Self {
            name,
            data,
            pos: 0,
            chunk,
            skip_ratio: (1, 1),
            events: events.clone(),
        }
    }

    pub fn with_short_skips(mut self, num: u64, den: u64) -> Self {
        self.skip_ratio = (num, den);
        self
    }

    pub fn open(&mut self) {
        self.events.push(format!("open {}", self.name));
    }

    pub fn read(&mut self) -> Option<ReadBuffer> {
        self.events.push(format!("read {}", self.name));
        let end = (self.pos + self.chunk).min(self.data.len());
        let chunk = self.data[self.pos..end].to_vec();
        self.pos = end;
        (!chunk.is_empty()).then(|| Box::new(Cursor::new(chunk)) as ReadBuffer)
    }

    pub fn skip(&mut self, request: i64) -> i64 {
        let (num, den) = self.skip_ratio;
        let honoured = (request as u64 * num / den) as usize;
        let step = honoured.min(self.data.len() - self.pos);
        self.pos += step;
        self.events.push(format!("skip {} {}/{}", self.name, step, request));
        step as i64
    }

    pub fn seek(&mut self, offset: i64, whence: Whence) -> i64 {
        let base = match whence {
            Whence::Set => 0,
            Whence::Current => self.pos as i64,
            Whence::End => self.data.len() as i64,
        };
        let target = base + offset;
        if target < 0 || target as usize > self.data.len() {
            return -1;
        }
        self.pos = target as usize;
        self.events.push(format!("seek {} {}", self.name, target));
        target
    }

    pub fn close(&mut self) {
        self.events.push(format!("close {}", self.name));
    }
}

/// A writer whose output stays reachable after it is moved into a session.
#[derive(Clone, Default)]
pub struct SharedVec(pub Arc<Mutex<Vec<u8>>>);

impl SharedVec {
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedVec {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Record format
// ============================================================================
//
// A minimal multi-entry format for exercising sessions:
//
//   "REC1" { name_len: u32 LE, name, size: u64 LE, data }* 0u32

pub const RECORD_MAGIC: &[u8; 4] = b"REC1";
pub const RECORD_FORMAT: i32 = 0x7f_0000;

/// Encodes entries in the record format.
pub fn record_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = RECORD_MAGIC.to_vec();
    for (name, data) in entries {
        out.extend_from_slice(&(name.len() as u32).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&(data.len() as u64).to_le_bytes());
        out.extend_from_slice(data);
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out
}

/// Deterministic filler bytes.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

fn truncated() -> Error {
    Error::Format("Truncated record archive".into())
}

fn read_exact(stream: &mut ReadStream, out: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < out.len() {
        let n = stream.read(&mut out[filled..])?;
        if n == 0 {
            return Err(truncated());
        }
        filled += n;
    }
    Ok(())
}

#[derive(Default)]
pub struct RecordReader {
    started: bool,
    remaining: u64,
}

impl FormatReader for RecordReader {
    fn code(&self) -> i32 {
        RECORD_FORMAT
    }

    fn name(&self) -> &'static str {
        "record"
    }

    fn bid(&mut self, stream: &mut ReadStream, _best_bid: i32) -> Result<i32> {
        Ok(if stream.ahead(4)?.starts_with(RECORD_MAGIC) {
            32
        } else {
            -1
        })
    }

    fn read_header(&mut self, stream: &mut ReadStream, entry: &mut Entry) -> Result<bool> {
        if !self.started {
            let mut magic = [0u8; 4];
            read_exact(stream, &mut magic)?;
            if &magic != RECORD_MAGIC {
                return Err(Error::Format("Bad record magic".into()));
            }
            self.started = true;
        }
        let mut len = [0u8; 4];
        read_exact(stream, &mut len)?;
        let len = u32::from_le_bytes(len) as usize;
        if len == 0 {
            return Ok(false);
        }
        let mut name = vec![0u8; len];
        read_exact(stream, &mut name)?;
        let mut size = [0u8; 8];
        read_exact(stream, &mut size)?;
        let size = u64::from_le_bytes(size);

        entry.set_pathname(name);
        entry.set_filetype(AE_IFREG);
        entry.set_perm(0o644);
        entry.set_size(size as i64);
        self.remaining = size;
        Ok(true)
    }

    fn read_data(
        &mut self,
        stream: &mut ReadStream,
        _entry: &mut Entry,
        out: &mut [u8],
    ) -> Result<usize> {
        let want = out.len().min(self.remaining as usize);
        if want == 0 {
            return Ok(0);
        }
        let n = stream.read(&mut out[..want])?;
        if n == 0 {
            return Err(truncated());
        }
        self.remaining -= n as u64;
        Ok(n)
    }

    fn skip_data(&mut self, stream: &mut ReadStream) -> Result<()> {
        let skipped = stream.skip(self.remaining)?;
        if skipped < self.remaining {
            return Err(truncated());
        }
        self.remaining = 0;
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordWriter {
    started: bool,
    pending: u64,
}

impl RecordWriter {
    fn start(&mut self, stream: &mut WriteStream) -> Result<()> {
        if !self.started {
            stream.write_all(RECORD_MAGIC)?;
            self.started = true;
        }
        Ok(())
    }
}

impl FormatWriter for RecordWriter {
    fn code(&self) -> i32 {
        RECORD_FORMAT
    }

    fn name(&self) -> &'static str {
        "record"
    }

    fn write_header(&mut self, stream: &mut WriteStream, entry: &Entry) -> Result<()> {
        self.start(stream)?;
        let name = entry.pathname().unwrap_or_default();
        stream.write_all(&(name.len() as u32).to_le_bytes())?;
        stream.write_all(name)?;
        stream.write_all(&(entry.size() as u64).to_le_bytes())?;
        self.pending = entry.size() as u64;
        Ok(())
    }

    fn write_data(&mut self, stream: &mut WriteStream, data: &[u8]) -> Result<usize> {
        let n = data.len().min(self.pending as usize);
        stream.write_all(&data[..n])?;
        self.pending -= n as u64;
        Ok(n)
    }

    fn finish_entry(&mut self, stream: &mut WriteStream) -> Result<()> {
        let padding = vec![0u8; self.pending as usize];
        stream.write_all(&padding)?;
        self.pending = 0;
        Ok(())
    }

    fn close(&mut self, stream: &mut WriteStream) -> Result<()> {
        self.start(stream)?;
        stream.write_all(&0u32.to_le_bytes())
    }
}

/// A regular-file entry with the given path and size.
pub fn file_entry(path: &str, size: usize) -> Entry {
    let mut entry = Entry::new();
    entry.set_pathname(path);
    entry.set_filetype(AE_IFREG);
    entry.set_perm(0o644);
    entry.set_size(size as i64);
    entry
}

/// Reads every entry of an open session as (path, data) pairs.
pub fn read_all<D>(archive: &mut arcstream::ReadArchive<D>) -> Result<Vec<(String, Vec<u8>)>> {
    let mut entries = Vec::new();
    while let Some(entry) = archive.next_header()? {
        let path = entry.pathname_utf8().unwrap_or_default().to_string();
        let mut data = Vec::new();
        archive.read_data_into(&mut data)?;
        entries.push((path, data));
    }
    Ok(entries)
}
