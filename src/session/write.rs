//! The write session.

use std::fmt;
use std::io::{self, Write};
use std::path::Path;

use super::{ErrorState, SessionCore, SessionState, slot_bytes, slot_code, slot_name};
use crate::buffer::{AppBuffer, Release, SharedBuffer, bridge};
use crate::callback::{Role, SessionId, WriteCallbacks};
use crate::entry::Entry;
use crate::error::{CallbackResult, Error, Result};
use crate::filter::{self, WriteFilter};
use crate::format::{self, FormatWriter};
use crate::options;
use crate::stream::{
    ByteCounter, ClientWriter, Downstream, FilterSlot, SharedDownstream, WriteStream,
};
use crate::transport::callback::CallbackSink;
use crate::transport::file::{FileSink, WriterSink};
use crate::transport::memory::MemorySink;
use crate::transport::{DEFAULT_BLOCK_SIZE, Sink};

/// A session writing entries into an archive.
///
/// Output is buffered into blocks of [`bytes_per_block`](Self::bytes_per_block)
/// bytes before it reaches the sink.
///
/// # Example
///
/// ```rust
/// use arcstream::{ByteBuffer, Entry, SharedBuffer, WriteArchive};
/// use arcstream::entry::AE_IFREG;
///
/// let output = SharedBuffer::new(ByteBuffer::allocate(1024));
/// let mut archive: WriteArchive = WriteArchive::new();
/// archive.set_format_raw()?;
/// archive.open_memory(output.clone())?;
///
/// let mut entry = Entry::new();
/// entry.set_pathname("data");
/// entry.set_filetype(AE_IFREG);
/// archive.write_header(&entry)?;
/// archive.write_data(&mut ByteBuffer::wrap(b"contents".to_vec()))?;
/// archive.close()?;
///
/// assert_eq!(output.snapshot().written(), b"contents");
/// # Ok::<(), arcstream::Error>(())
/// ```
pub struct WriteArchive<D = ()> {
    core: SessionCore,
    callbacks: Option<WriteCallbacks<D>>,
    filters: Vec<Box<dyn WriteFilter>>,
    format: Option<Box<dyn FormatWriter>>,
    bytes_per_block: usize,
    bytes_in_last_block: i32,
    stream: Option<WriteStream>,
    slots: Vec<FilterSlot>,
    entry_open: bool,
    released: bool,
}

impl<D> WriteArchive<D> {
    /// Creates a session with no format, filters or callbacks.
    pub fn new() -> Self {
        let core = SessionCore::new();
        log::debug!("{}: created write session", core.id);
        Self {
            core,
            callbacks: Some(WriteCallbacks::new()),
            filters: Vec::new(),
            format: None,
            bytes_per_block: DEFAULT_BLOCK_SIZE,
            bytes_in_last_block: -1,
            stream: None,
            slots: Vec::new(),
            entry_open: false,
            released: false,
        }
    }

    /// The session's identity, as passed to every callback.
    pub fn id(&self) -> SessionId {
        self.core.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.core.state
    }

    // Filters

    /// Adds a compression filter by code.
    ///
    /// The first filter added receives the format's output; the last one
    /// feeds the sink.
    pub fn add_filter(&mut self, code: i32) -> Result<()> {
        self.core.configure("add_filter")?;
        if code == filter::NONE {
            return Ok(());
        }
        match filter::write_filter(code) {
            Ok(filter) => {
                self.filters.push(filter);
                Ok(())
            }
            Err(err) => Err(self.core.record(err)),
        }
    }

    /// Adds a compression filter by name, such as `gzip`.
    pub fn add_filter_by_name(&mut self, name: &str) -> Result<()> {
        match filter::code_by_name(name) {
            Some(code) => self.add_filter(code),
            None => Err(self
                .core
                .record(Error::InvalidArgument(format!("No such filter '{}'", name)))),
        }
    }

    /// Writes uncompressed output, which is the default.
    pub fn add_filter_none(&mut self) -> Result<()> {
        self.add_filter(filter::NONE)
    }

    /// Adds gzip compression.
    pub fn add_filter_gzip(&mut self) -> Result<()> {
        self.add_filter(filter::GZIP)
    }

    /// Adds bzip2 compression.
    pub fn add_filter_bzip2(&mut self) -> Result<()> {
        self.add_filter(filter::BZIP2)
    }

    /// Adds zstd compression.
    pub fn add_filter_zstd(&mut self) -> Result<()> {
        self.add_filter(filter::ZSTD)
    }

    // Format

    /// Selects the output format by code.
    pub fn set_format(&mut self, code: i32) -> Result<()> {
        self.core.configure("set_format")?;
        match format::writer_for(code) {
            Ok(writer) => {
                self.format = Some(writer);
                Ok(())
            }
            Err(err) => Err(self.core.record(err)),
        }
    }

    /// Selects the output format by name, such as `raw`.
    pub fn set_format_by_name(&mut self, name: &str) -> Result<()> {
        match format::writer_code_by_name(name) {
            Some(code) => self.set_format(code),
            None => Err(self
                .core
                .record(Error::InvalidArgument(format!("No such format '{}'", name)))),
        }
    }

    /// Selects the raw format: one regular-file entry, data written as is.
    pub fn set_format_raw(&mut self) -> Result<()> {
        self.set_format(format::RAW)
    }

    /// Uses an application-defined format.
    pub fn set_format_writer(&mut self, writer: impl FormatWriter + 'static) -> Result<()> {
        self.core.configure("set_format_writer")?;
        self.format = Some(Box::new(writer));
        Ok(())
    }

    // Blocking

    /// Sets the output block size; 0 writes every chunk straight through.
    pub fn set_bytes_per_block(&mut self, bytes: usize) -> Result<()> {
        self.core.configure("set_bytes_per_block")?;
        self.bytes_per_block = bytes;
        Ok(())
    }

    /// Output block size.
    pub fn bytes_per_block(&self) -> usize {
        self.bytes_per_block
    }

    /// Sets the padding unit of the final block.
    ///
    /// A negative value lets the sink choose: files and memory get no padding,
    /// other destinations get a full block.
    pub fn set_bytes_in_last_block(&mut self, bytes: i32) -> Result<()> {
        self.core.configure("set_bytes_in_last_block")?;
        self.bytes_in_last_block = bytes;
        Ok(())
    }

    /// Padding unit of the final block; -1 until the sink chooses one.
    pub fn bytes_in_last_block(&self) -> i32 {
        self.bytes_in_last_block
    }

    // Options

    /// Applies a comma-separated option string; see [`crate::options`].
    pub fn set_options(&mut self, options: &str) -> Result<()> {
        self.core.configure("set_options")?;
        let format = &mut self.format;
        let filters = &mut self.filters;
        let applied = options::apply_all(options, |module, key, value| {
            let by_format = offer_format_option(format, module, key, value)?;
            let by_filter = offer_filter_option(filters, module, key, value)?;
            Ok(by_format || by_filter)
        });
        applied.map_err(|err| self.core.record(err))
    }

    /// Offers one option to the format and the filters.
    pub fn set_option(&mut self, module: Option<&str>, key: &str, value: Option<&str>) -> Result<()> {
        self.core.configure("set_option")?;
        let offered = offer_format_option(&mut self.format, module, key, value).and_then(|by_format| {
            Ok(offer_filter_option(&mut self.filters, module, key, value)? || by_format)
        });
        self.accept(offered, module, key)
    }

    /// Offers one option to the format.
    pub fn set_format_option(
        &mut self,
        module: Option<&str>,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        self.core.configure("set_format_option")?;
        let offered = offer_format_option(&mut self.format, module, key, value);
        self.accept(offered, module, key)
    }

    /// Offers one option to the filters, for example
    /// `set_filter_option(Some("gzip"), "compression-level", Some("9"))`.
    pub fn set_filter_option(
        &mut self,
        module: Option<&str>,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        self.core.configure("set_filter_option")?;
        let offered = offer_filter_option(&mut self.filters, module, key, value);
        self.accept(offered, module, key)
    }

    fn accept(&mut self, offered: Result<bool>, module: Option<&str>, key: &str) -> Result<()> {
        match offered {
            Ok(true) => Ok(()),
            Ok(false) => Err(self.core.record(Error::UnknownOption {
                module: module.map(str::to_string),
                option: key.to_string(),
            })),
            Err(err) => Err(self.core.record(err)),
        }
    }

    // Callbacks

    fn callbacks_mut(&mut self, operation: &'static str) -> Result<&mut WriteCallbacks<D>> {
        self.core.configure(operation)?;
        Ok(self.callbacks.get_or_insert_with(WriteCallbacks::new))
    }

    /// Binds the open callback.
    pub fn set_open_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(SessionId, &mut D) -> CallbackResult<()> + Send + 'static,
    {
        self.callbacks_mut("set_open_callback")?.open.bind(Box::new(callback));
        Ok(())
    }

    /// Binds the write callback; it returns how many bytes it consumed.
    ///
    /// Consuming fewer bytes than offered fails the session.
    pub fn set_write_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(SessionId, &mut D, &[u8]) -> CallbackResult<usize> + Send + 'static,
    {
        self.callbacks_mut("set_write_callback")?.write.bind(Box::new(callback));
        Ok(())
    }

    /// Binds the close callback, run once after the final block.
    pub fn set_close_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(SessionId, &mut D) -> CallbackResult<()> + Send + 'static,
    {
        self.callbacks_mut("set_close_callback")?.close.bind(Box::new(callback));
        Ok(())
    }

    /// Binds the free callback, run once when the session is freed, even if
    /// open failed.
    pub fn set_free_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(SessionId, &mut D) -> CallbackResult<()> + Send + 'static,
    {
        self.callbacks_mut("set_free_callback")?.free.bind(Box::new(callback));
        Ok(())
    }

    /// Drops the handler bound to `role`; returns whether one was bound.
    pub fn clear_callback(&mut self, role: Role) -> Result<bool> {
        Ok(self.callbacks_mut("clear_callback")?.unbind(role))
    }

    // Opening

    /// Writes to a file, or standard output for `None`.
    pub fn open_filename<P: AsRef<Path>>(&mut self, path: Option<P>) -> Result<()> {
        let path = path.map(|p| p.as_ref().to_path_buf());
        self.open_sink("open_filename", Box::new(FileSink::new(path)))
    }

    /// Writes to any writer.
    pub fn open_writer<W: Write + Send + 'static>(&mut self, writer: W) -> Result<()> {
        self.open_sink("open_writer", Box::new(WriterSink::new(writer)))
    }

    /// Writes to a duplicate of a file descriptor.
    #[cfg(unix)]
    pub fn open_fd(&mut self, fd: impl std::os::fd::AsFd) -> Result<()> {
        match fd.as_fd().try_clone_to_owned() {
            Ok(owned) => self.open_writer(std::fs::File::from(owned)),
            Err(err) => Err(self.core.record(Error::Io(err))),
        }
    }

    /// Writes into a shared buffer starting at its cursor.
    ///
    /// The buffer's cursor is moved past the output when the session closes.
    pub fn open_memory(&mut self, buffer: SharedBuffer) -> Result<()> {
        self.open_sink("open_memory", Box::new(MemorySink::new(buffer)))
    }

    fn check_openable(&mut self, operation: &'static str) -> Result<()> {
        self.core
            .require(operation, &[SessionState::Created, SessionState::Configured])?;
        if self.format.is_none() {
            return Err(self
                .core
                .record(Error::InvalidArgument("No format has been set".into())));
        }
        Ok(())
    }

    fn open_sink(&mut self, operation: &'static str, sink: Box<dyn Sink>) -> Result<()> {
        self.check_openable(operation)?;
        log::debug!("{}: opening", self.core.id);

        let client_bytes = ByteCounter::default();
        let mut writer = ClientWriter::new(
            sink,
            self.bytes_per_block,
            self.bytes_in_last_block,
            client_bytes.clone(),
        );
        if let Err(err) = writer.open() {
            return Err(self.fail_open(Box::new(writer), err));
        }

        let bottom = SharedDownstream::new(Box::new(writer));
        let (top, mut slots) = match stack_filters(&self.filters, Box::new(bottom.clone())) {
            Ok(stacked) => stacked,
            Err(err) => return Err(self.fail_open(Box::new(bottom), err)),
        };
        slots.push(FilterSlot::new(filter::NONE, "none", client_bytes));

        self.slots = slots;
        self.stream = Some(WriteStream::new(top));
        self.core.state = SessionState::Opened;
        Ok(())
    }

    /// Closes a sink whose stack could not be completed and fails the session.
    ///
    /// The sink is kept so that free still reaches it.
    fn fail_open(&mut self, mut bottom: Box<dyn Downstream>, err: Error) -> Error {
        if let Err(close_err) = bottom.close() {
            log::debug!("{}: close after failed open: {}", self.core.id, close_err);
        }
        self.stream = Some(WriteStream::new(bottom));
        self.core.state = SessionState::Fatal;
        self.core.record(err)
    }

    // Entries

    /// Starts a new entry, completing the previous one first.
    pub fn write_header(&mut self, entry: &Entry) -> Result<()> {
        let result = self.start_entry(entry);
        result.map_err(|err| self.core.record(err))
    }

    fn start_entry(&mut self, entry: &Entry) -> Result<()> {
        self.core
            .check("write_header", &[SessionState::Opened, SessionState::Data])?;
        let (Some(format), Some(stream)) = (self.format.as_mut(), self.stream.as_mut()) else {
            return Err(not_open("write_header", self.core.state));
        };
        if self.entry_open {
            self.entry_open = false;
            format.finish_entry(stream)?;
        }
        format.write_header(stream, entry)?;
        self.entry_open = true;
        self.core.state = SessionState::Data;
        Ok(())
    }

    /// Writes the buffer's remaining bytes as entry data and advances its
    /// cursor by the amount the format accepted.
    pub fn write_data(&mut self, buffer: &mut dyn AppBuffer) -> Result<usize> {
        let result = self.check_data("write_data").and_then(|()| {
            let (format, stream) = self.data_parts()?;
            bridge::transfer(buffer, Release::Discard, |bytes| {
                format.write_data(stream, bytes)
            })
        });
        result.map_err(|err| self.core.record(err))
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<usize> {
        let result = self.check_data("write").and_then(|()| {
            let (format, stream) = self.data_parts()?;
            format.write_data(stream, bytes)
        });
        result.map_err(|err| self.core.record(err))
    }

    fn check_data(&self, operation: &'static str) -> Result<()> {
        self.core.check(operation, &[SessionState::Data])
    }

    fn data_parts(&mut self) -> Result<(&mut Box<dyn FormatWriter>, &mut WriteStream)> {
        match (self.format.as_mut(), self.stream.as_mut()) {
            (Some(format), Some(stream)) => Ok((format, stream)),
            _ => Err(not_open("write_data", self.core.state)),
        }
    }

    /// Completes the current entry; further data needs a new header.
    pub fn finish_entry(&mut self) -> Result<()> {
        let result = self.complete_entry();
        result.map_err(|err| self.core.record(err))
    }

    fn complete_entry(&mut self) -> Result<()> {
        self.core
            .check("finish_entry", &[SessionState::Opened, SessionState::Data])?;
        if !self.entry_open {
            return Ok(());
        }
        self.entry_open = false;
        let (format, stream) = self.data_parts()?;
        format.finish_entry(stream)?;
        self.core.state = SessionState::Opened;
        Ok(())
    }

    // Queries

    /// Code of the selected format.
    pub fn format_code(&self) -> Option<i32> {
        self.format.as_ref().map(|f| f.code())
    }

    /// Name of the selected format.
    pub fn format_name(&self) -> Option<&'static str> {
        self.format.as_ref().map(|f| f.name())
    }

    /// Number of layers, including the client layer, once open.
    pub fn filter_count(&self) -> usize {
        self.slots.len()
    }

    /// Bytes a layer emitted toward the sink.
    ///
    /// Index 0 is the filter nearest the format; -1 is the client layer.
    pub fn filter_bytes(&self, index: i32) -> Option<u64> {
        slot_bytes(&self.slots, index)
    }

    /// Filter code of a layer.
    pub fn filter_code(&self, index: i32) -> Option<i32> {
        slot_code(&self.slots, index)
    }

    /// Filter name of a layer.
    pub fn filter_name(&self, index: i32) -> Option<&'static str> {
        slot_name(&self.slots, index)
    }

    // Error slot

    /// Code of the latest failure; 0 if none was recorded.
    pub fn errno(&self) -> i32 {
        self.core.error.code()
    }

    /// Message of the latest failure.
    pub fn error_string(&self) -> Option<&str> {
        self.core.error.message()
    }

    /// The whole error slot.
    pub fn error_state(&self) -> &ErrorState {
        &self.core.error
    }

    /// Resets the error slot.
    pub fn clear_error(&mut self) {
        self.core.error.clear();
    }

    /// Overwrites the error slot.
    pub fn set_error(&mut self, code: i32, message: Option<&str>) {
        self.core.set_error(code, message);
    }

    /// Copies another session's error slot into this one.
    pub fn copy_error(&mut self, source: &ErrorState) {
        self.core.error = source.clone();
    }

    // Teardown

    /// Marks the session failed; close then skips the archive trailer and
    /// final padding.
    pub fn fail(&mut self) {
        if self.core.state != SessionState::Closed {
            self.core.state = SessionState::Fatal;
        }
    }

    /// Completes the archive and closes the sink.
    ///
    /// The trailer is written and the final block flushed before the close
    /// callback runs. The close callback runs even when an earlier step
    /// failed; the first error is returned.
    pub fn close(&mut self) -> Result<()> {
        match self.core.state {
            SessionState::Closed => Err(self.core.record(Error::InvalidState {
                operation: "close",
                state: SessionState::Closed,
            })),
            SessionState::Created | SessionState::Configured => {
                self.core.state = SessionState::Closed;
                Ok(())
            }
            SessionState::Fatal => {
                let result = match self.stream.as_mut() {
                    Some(stream) => stream.close(),
                    None => Ok(()),
                };
                self.core.state = SessionState::Closed;
                result.map_err(|err| self.core.record(err))
            }
            _ => {
                let result = self.complete_archive();
                let closed = match self.stream.as_mut() {
                    Some(stream) => stream.close(),
                    None => Ok(()),
                };
                self.core.state = SessionState::Closed;
                log::debug!("{}: closed", self.core.id);
                result.and(closed).map_err(|err| self.core.record(err))
            }
        }
    }

    fn complete_archive(&mut self) -> Result<()> {
        self.complete_entry()?;
        let (format, stream) = self.data_parts()?;
        format.close(stream)?;
        stream.finish()
    }

    /// Closes the session if needed, runs the free callback and releases
    /// every handler.
    ///
    /// A session that failed is freed without closing: buffered output is
    /// dropped and the close callback does not run.
    pub fn free(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        // A failed session is not closed, so nothing more reaches the sink.
        let result = match self.core.state {
            SessionState::Closed | SessionState::Fatal => Ok(()),
            _ => self.close(),
        };
        let freed = match self.stream.as_mut() {
            Some(stream) => stream.free(),
            None => Ok(()),
        };
        self.stream = None;
        self.format = None;
        self.filters.clear();
        self.callbacks = None;
        log::debug!("{}: freed", self.core.id);
        result.and(freed)
    }
}

impl<D: Send + 'static> WriteArchive<D> {
    /// Opens the session through the bound callbacks with `data` as the token.
    ///
    /// A format and a write callback are required.
    pub fn open(&mut self, data: D) -> Result<()> {
        self.check_openable("open")?;
        let callbacks = self.callbacks.take().unwrap_or_else(WriteCallbacks::new);
        if !callbacks.write.is_bound() {
            self.callbacks = Some(callbacks);
            return Err(self
                .core
                .record(Error::InvalidArgument("No write callback is registered".into())));
        }
        let sink = CallbackSink::new(self.core.id, callbacks, data);
        self.open_sink("open", Box::new(sink))
    }
}

impl<D> Default for WriteArchive<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> Drop for WriteArchive<D> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::warn!("{}: error while releasing write session: {}", self.core.id, err);
        }
    }
}

impl<D> Write for WriteArchive<D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf).map_err(Error::into_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<D> fmt::Debug for WriteArchive<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteArchive")
            .field("id", &self.core.id)
            .field("state", &self.core.state)
            .field("format", &self.format_name())
            .field("bytes_per_block", &self.bytes_per_block)
            .finish_non_exhaustive()
    }
}

fn offer_format_option(
    format: &mut Option<Box<dyn FormatWriter>>,
    module: Option<&str>,
    key: &str,
    value: Option<&str>,
) -> Result<bool> {
    match format.as_deref_mut() {
        Some(writer) if options::addressed_to(module, writer.name()) => writer.set_option(key, value),
        _ => Ok(false),
    }
}

fn offer_filter_option(
    filters: &mut [Box<dyn WriteFilter>],
    module: Option<&str>,
    key: &str,
    value: Option<&str>,
) -> Result<bool> {
    let mut accepted = false;
    for filter in filters
        .iter_mut()
        .filter(|filter| options::addressed_to(module, filter.name()))
    {
        accepted |= filter.set_option(key, value)?;
    }
    Ok(accepted)
}

/// Stacks the encoders over `bottom`, first-added filter on top.
fn stack_filters(
    filters: &[Box<dyn WriteFilter>],
    bottom: Box<dyn Downstream>,
) -> Result<(Box<dyn Downstream>, Vec<FilterSlot>)> {
    let mut top = bottom;
    let mut slots = Vec::with_capacity(filters.len() + 1);
    for filter in filters.iter().rev() {
        let bytes = ByteCounter::default();
        top = filter.wrap(top, bytes.clone())?;
        slots.push(FilterSlot::new(filter.code(), filter.name(), bytes));
    }
    slots.reverse();
    Ok((top, slots))
}

fn not_open(operation: &'static str, state: SessionState) -> Error {
    Error::InvalidState { operation, state }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ByteBuffer;
    use crate::entry::AE_IFREG;
    use crate::error::codes;

    fn file_entry() -> Entry {
        let mut entry = Entry::new();
        entry.set_pathname("data");
        entry.set_filetype(AE_IFREG);
        entry
    }

    #[test]
    fn test_raw_into_memory() {
        let output = SharedBuffer::new(ByteBuffer::allocate(64));
        let mut archive: WriteArchive = WriteArchive::new();
        archive.set_format_raw().unwrap();
        archive.open_memory(output.clone()).unwrap();
        archive.write_header(&file_entry()).unwrap();
        let mut data = ByteBuffer::wrap(b"abc".to_vec());
        assert_eq!(archive.write_data(&mut data).unwrap(), 3);
        assert_eq!(data.position(), 3);
        archive.write_all(b"def").unwrap();
        archive.close().unwrap();
        assert_eq!(output.position(), 6);
        assert_eq!(output.snapshot().written(), b"abcdef");
        assert_eq!(archive.filter_bytes(-1), Some(6));
        archive.free().unwrap();
    }

    #[test]
    fn test_open_without_format() {
        let mut archive: WriteArchive = WriteArchive::new();
        let err = archive.open_writer(Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "No format has been set");
        assert_eq!(archive.errno(), codes::ERRNO_PROGRAMMER);
        assert_eq!(archive.state(), SessionState::Created);
    }

    #[test]
    fn test_open_without_write_callback() {
        let mut archive: WriteArchive<u32> = WriteArchive::new();
        archive.set_format_raw().unwrap();
        let err = archive.open(7).unwrap_err();
        assert_eq!(err.to_string(), "No write callback is registered");
        assert_eq!(archive.state(), SessionState::Configured);
    }

    #[test]
    fn test_unknown_names() {
        let mut archive: WriteArchive = WriteArchive::new();
        let err = archive.add_filter_by_name("nonesuch").unwrap_err();
        assert_eq!(err.to_string(), "No such filter 'nonesuch'");
        let err = archive.set_format_by_name("nonesuch").unwrap_err();
        assert_eq!(err.to_string(), "No such format 'nonesuch'");
        assert!(matches!(
            archive.set_format_by_name("zip"),
            Err(Error::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_write_data_requires_header() {
        let mut archive: WriteArchive = WriteArchive::new();
        archive.set_format_raw().unwrap();
        archive.open_writer(Vec::new()).unwrap();
        let err = archive
            .write_data(&mut ByteBuffer::wrap(b"x".to_vec()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert_eq!(archive.state(), SessionState::Opened);
    }

    #[test]
    fn test_close_twice_and_never_opened() {
        let mut archive: WriteArchive = WriteArchive::new();
        archive.close().unwrap();
        assert!(archive.close().is_err());
        assert_eq!(archive.state(), SessionState::Closed);
    }

    #[test]
    fn test_fail_skips_padding() {
        let output = SharedBuffer::new(ByteBuffer::allocate(64));
        let mut archive: WriteArchive = WriteArchive::new();
        archive.set_format_raw().unwrap();
        archive.open_memory(output.clone()).unwrap();
        archive.write_header(&file_entry()).unwrap();
        archive.write_all(b"buffered").unwrap();
        archive.fail();
        assert_eq!(archive.state(), SessionState::Fatal);
        archive.close().unwrap();
        assert_eq!(output.position(), 0);
    }

    #[test]
    fn test_filter_option_needs_a_filter() {
        let mut archive: WriteArchive = WriteArchive::new();
        let err = archive
            .set_filter_option(Some("gzip"), "compression-level", Some("9"))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownOption { .. }));
    }

    struct BrokenFilter;

    impl WriteFilter for BrokenFilter {
        fn code(&self) -> i32 {
            99
        }

        fn name(&self) -> &'static str {
            "broken"
        }

        fn set_option(&mut self, _key: &str, _value: Option<&str>) -> Result<bool> {
            Ok(false)
        }

        fn wrap(
            &self,
            _lower: Box<dyn Downstream>,
            _bytes: ByteCounter,
        ) -> Result<Box<dyn Downstream>> {
            Err(Error::InvalidArgument("cannot stack".into()))
        }
    }

    #[test]
    fn test_failed_filter_stack_closes_the_sink() {
        use std::sync::{Arc, Mutex};

        let events = Arc::new(Mutex::new(Vec::new()));
        let mut archive: WriteArchive<u32> = WriteArchive::new();
        archive.set_format_raw().unwrap();
        archive.filters.push(Box::new(BrokenFilter));
        let log = events.clone();
        archive
            .set_open_callback(move |_, _| {
                log.lock().unwrap().push("open");
                Ok(())
            })
            .unwrap();
        archive.set_write_callback(|_, _, bytes| Ok(bytes.len())).unwrap();
        let log = events.clone();
        archive
            .set_close_callback(move |_, _| {
                log.lock().unwrap().push("close");
                Ok(())
            })
            .unwrap();
        let log = events.clone();
        archive
            .set_free_callback(move |_, _| {
                log.lock().unwrap().push("free");
                Ok(())
            })
            .unwrap();

        let err = archive.open(0).unwrap_err();
        assert_eq!(err.to_string(), "cannot stack");
        assert_eq!(archive.state(), SessionState::Fatal);
        assert_eq!(archive.errno(), codes::ERRNO_PROGRAMMER);
        assert_eq!(*events.lock().unwrap(), ["open", "close"]);
        archive.free().unwrap();
        assert_eq!(*events.lock().unwrap(), ["open", "close", "free"]);
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn test_filter_slots_in_added_order() {
        let mut archive: WriteArchive = WriteArchive::new();
        archive.set_format_raw().unwrap();
        archive.add_filter_gzip().unwrap();
        archive
            .set_options("gzip:compression-level=1")
            .unwrap();
        archive.open_writer(Vec::new()).unwrap();
        assert_eq!(archive.filter_count(), 2);
        assert_eq!(archive.filter_name(0), Some("gzip"));
        assert_eq!(archive.filter_code(1), Some(filter::NONE));
    }
}
