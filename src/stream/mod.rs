//! Layered byte streams between formats and transports.
//!
//! A read session stacks decompression layers on top of a [`ClientReader`];
//! a write session stacks compression layers on top of a [`ClientWriter`].
//! Formats only see the topmost layer, through [`ReadStream`] and
//! [`WriteStream`].

mod client;

pub(crate) use client::{ClientReader, ClientWriter};

use std::fmt;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::callback::Whence;
use crate::error::Result;
use crate::lock_or_recover;

/// A byte source with read-ahead.
pub(crate) trait Upstream: Send {
    /// Returns at least `min` unconsumed bytes, or fewer at the end of input.
    fn ahead(&mut self, min: usize) -> Result<&[u8]>;

    fn consume(&mut self, n: usize);

    /// Skips up to `request` bytes and returns how many were skipped.
    fn skip(&mut self, request: u64) -> Result<u64>;

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64>;

    fn position(&self) -> u64;

    /// Closes the transport at the bottom of the stack.
    fn close(&mut self) -> Result<()>;
}

/// A byte sink.
pub(crate) trait Downstream: Send {
    /// Writes all of `bytes`.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Flushes trailing data through every layer. Later calls do nothing.
    fn finish(&mut self) -> Result<()>;

    /// Closes the sink at the bottom of the stack.
    fn close(&mut self) -> Result<()>;

    /// Frees the sink at the bottom of the stack.
    fn free(&mut self) -> Result<()>;

    fn position(&self) -> u64;
}

/// A downstream reachable both from the layer above it and from the session.
///
/// The session keeps a handle on the bottom of a write stack so the sink can
/// still be closed and freed when stacking a filter over it fails.
#[derive(Clone)]
pub(crate) struct SharedDownstream(Arc<Mutex<Box<dyn Downstream>>>);

impl SharedDownstream {
    pub(crate) fn new(inner: Box<dyn Downstream>) -> Self {
        Self(Arc::new(Mutex::new(inner)))
    }
}

impl Downstream for SharedDownstream {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        lock_or_recover(&self.0).write(bytes)
    }

    fn finish(&mut self) -> Result<()> {
        lock_or_recover(&self.0).finish()
    }

    fn close(&mut self) -> Result<()> {
        lock_or_recover(&self.0).close()
    }

    fn free(&mut self) -> Result<()> {
        lock_or_recover(&self.0).free()
    }

    fn position(&self) -> u64 {
        lock_or_recover(&self.0).position()
    }
}

/// Shared byte counter for one layer.
#[derive(Debug, Clone, Default)]
pub(crate) struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub(crate) fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Statistics entry for one layer of a session.
#[derive(Debug, Clone)]
pub(crate) struct FilterSlot {
    pub(crate) code: i32,
    pub(crate) name: &'static str,
    pub(crate) bytes: ByteCounter,
}

impl FilterSlot {
    pub(crate) fn new(code: i32, name: &'static str, bytes: ByteCounter) -> Self {
        Self { code, name, bytes }
    }
}

/// Resolves a filter index where negative values count from the client end.
pub(crate) fn filter_at(slots: &[FilterSlot], index: i32) -> Option<&FilterSlot> {
    let len = i64::try_from(slots.len()).ok()?;
    let index = i64::from(index);
    let index = if index < 0 { len + index } else { index };
    usize::try_from(index).ok().and_then(|i| slots.get(i))
}

/// The input stream as seen by a format reader.
pub struct ReadStream {
    inner: Box<dyn Upstream>,
}

impl ReadStream {
    pub(crate) fn new(inner: Box<dyn Upstream>) -> Self {
        Self { inner }
    }

    /// Peeks at least `min` bytes without consuming them.
    ///
    /// Fewer bytes are returned only at the end of input; an empty slice
    /// means the input is exhausted.
    pub fn ahead(&mut self, min: usize) -> Result<&[u8]> {
        self.inner.ahead(min)
    }

    /// Consumes `n` bytes previously returned by [`ahead`](Self::ahead).
    pub fn consume(&mut self, n: usize) {
        self.inner.consume(n);
    }

    /// Copies up to `out.len()` bytes out and consumes them.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let available = self.inner.ahead(1)?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.inner.consume(n);
        Ok(n)
    }

    /// Skips up to `n` bytes; a short count means the input ended.
    pub fn skip(&mut self, n: u64) -> Result<u64> {
        self.inner.skip(n)
    }

    /// Repositions the input, if the transport supports it.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        self.inner.seek(offset, whence)
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.inner.position()
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

impl fmt::Debug for ReadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadStream")
            .field("position", &self.position())
            .finish_non_exhaustive()
    }
}

/// The output stream as seen by a format writer.
pub struct WriteStream {
    inner: Box<dyn Downstream>,
}

impl WriteStream {
    pub(crate) fn new(inner: Box<dyn Downstream>) -> Self {
        Self { inner }
    }

    /// Writes all of `bytes`.
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write(bytes)
    }

    /// Bytes written so far.
    pub fn position(&self) -> u64 {
        self.inner.position()
    }

    pub(crate) fn finish(&mut self) -> Result<()> {
        self.inner.finish()
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    pub(crate) fn free(&mut self) -> Result<()> {
        self.inner.free()
    }
}

impl fmt::Debug for WriteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteStream")
            .field("position", &self.position())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
impl ReadStream {
    pub(crate) fn from_bytes(data: Vec<u8>) -> Self {
        Self::new(testing::SliceUpstream::boxed(data, 4096))
    }
}

#[cfg(test)]
impl WriteStream {
    pub(crate) fn discarding() -> Self {
        Self::new(Box::new(testing::VecDownstream::default()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::Error;

    /// An in-memory upstream that serves its bytes in small pieces.
    pub(crate) struct SliceUpstream {
        data: Vec<u8>,
        pos: usize,
        piece: usize,
    }

    impl SliceUpstream {
        pub(crate) fn boxed(data: Vec<u8>, piece: usize) -> Box<dyn Upstream> {
            Box::new(Self {
                data,
                pos: 0,
                piece: piece.max(1),
            })
        }
    }

    impl Upstream for SliceUpstream {
        fn ahead(&mut self, min: usize) -> Result<&[u8]> {
            let end = self.data.len().min(self.pos + min.max(self.piece));
            Ok(&self.data[self.pos..end])
        }

        fn consume(&mut self, n: usize) {
            self.pos = (self.pos + n).min(self.data.len());
        }

        fn skip(&mut self, request: u64) -> Result<u64> {
            let step = request.min((self.data.len() - self.pos) as u64);
            self.pos += step as usize;
            Ok(step)
        }

        fn seek(&mut self, _offset: i64, _whence: Whence) -> Result<u64> {
            Err(Error::Unsupported { operation: "seek" })
        }

        fn position(&self) -> u64 {
            self.pos as u64
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// A downstream collecting everything into a shared vector.
    #[derive(Default)]
    pub(crate) struct VecDownstream {
        pub(crate) out: Arc<Mutex<Vec<u8>>>,
        pub(crate) finished: Arc<Mutex<bool>>,
    }

    impl Downstream for VecDownstream {
        fn write(&mut self, bytes: &[u8]) -> Result<()> {
            self.out.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            *self.finished.lock().unwrap() = true;
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }

        fn free(&mut self) -> Result<()> {
            Ok(())
        }

        fn position(&self) -> u64 {
            self.out.lock().unwrap().len() as u64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_at_negative_indexes() {
        let slots = vec![
            FilterSlot::new(1, "gzip", ByteCounter::default()),
            FilterSlot::new(0, "none", ByteCounter::default()),
        ];
        assert_eq!(filter_at(&slots, 0).map(|s| s.name), Some("gzip"));
        assert_eq!(filter_at(&slots, -1).map(|s| s.name), Some("none"));
        assert_eq!(filter_at(&slots, -2).map(|s| s.name), Some("gzip"));
        assert!(filter_at(&slots, 2).is_none());
        assert!(filter_at(&slots, -3).is_none());
    }

    #[test]
    fn test_byte_counter_is_shared() {
        let counter = ByteCounter::default();
        let clone = counter.clone();
        counter.add(5);
        clone.add(2);
        assert_eq!(counter.get(), 7);
    }
}
