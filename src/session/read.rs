//! The read session.

use std::fmt;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{ErrorState, SessionCore, SessionState, slot_bytes, slot_code, slot_name};
use crate::buffer::{AppBuffer, Release, bridge};
use crate::callback::{ClientDataList, ReadBuffer, ReadCallbacks, Role, SessionId, Whence};
use crate::entry::Entry;
use crate::error::{CallbackResult, Error, Result};
use crate::filter::{self, ReadFilter};
use crate::format::{self, FormatReader};
use crate::lock_or_recover;
use crate::options;
use crate::stream::{ByteCounter, ClientReader, FilterSlot, ReadStream, Upstream};
use crate::transport::callback::{CallbackTransport, SharedClientData};
use crate::transport::file::{FileTransport, ReaderTransport};
use crate::transport::memory::MemoryTransport;
use crate::transport::{DEFAULT_BLOCK_SIZE, Transport};

/// Most filters stacked by bidding before the input is rejected.
const MAX_FILTER_DEPTH: usize = 25;

/// Chunk size used when copying entry data to a writer.
const DATA_CHUNK: usize = 64 * 1024;

/// A session reading entries from an archive.
///
/// `D` is the type of the client-data tokens handed to callbacks; sessions
/// opened through a built-in transport can leave it as `()`.
///
/// # Example
///
/// ```rust
/// use arcstream::{ByteBuffer, ReadArchive};
///
/// let mut archive: ReadArchive = ReadArchive::new();
/// archive.support_filter_all()?;
/// archive.support_format_raw()?;
/// archive.open_memory(ByteBuffer::direct(b"hello, world".to_vec()))?;
///
/// let entry = archive.next_header()?.expect("raw input has one entry");
/// assert_eq!(entry.pathname_utf8(), Some("data"));
///
/// let mut contents = Vec::new();
/// archive.read_data_into(&mut contents)?;
/// assert_eq!(contents, b"hello, world");
/// assert!(archive.next_header()?.is_none());
/// archive.free()?;
/// # Ok::<(), arcstream::Error>(())
/// ```
pub struct ReadArchive<D = ()> {
    core: SessionCore,
    callbacks: Option<ReadCallbacks<D>>,
    data: SharedClientData<D>,
    filters: Vec<i32>,
    forced_filters: Vec<i32>,
    formats: Vec<Box<dyn FormatReader>>,
    format_forced: bool,
    format: Option<Box<dyn FormatReader>>,
    stream: Option<ReadStream>,
    slots: Vec<FilterSlot>,
    entry: Entry,
    header_position: u64,
    file_count: u64,
    released: bool,
}

impl<D> ReadArchive<D> {
    /// Creates a session with no formats, filters or callbacks.
    pub fn new() -> Self {
        let core = SessionCore::new();
        log::debug!("{}: created read session", core.id);
        Self {
            core,
            callbacks: Some(ReadCallbacks::new()),
            data: Arc::new(Mutex::new(ClientDataList::new())),
            filters: Vec::new(),
            forced_filters: Vec::new(),
            formats: Vec::new(),
            format_forced: false,
            format: None,
            stream: None,
            slots: Vec::new(),
            entry: Entry::new(),
            header_position: 0,
            file_count: 0,
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

    /// Enables bidding for every compiled-in filter.
    pub fn support_filter_all(&mut self) -> Result<()> {
        self.core.configure("support_filter_all")?;
        for code in filter::compiled() {
            self.add_supported_filter(code);
        }
        Ok(())
    }

    /// Accepts uncompressed input, which is always the case.
    pub fn support_filter_none(&mut self) -> Result<()> {
        self.core.configure("support_filter_none")
    }

    /// Enables bidding for gzip.
    pub fn support_filter_gzip(&mut self) -> Result<()> {
        self.support_filter_by_code(filter::GZIP)
    }

    /// Enables bidding for bzip2.
    pub fn support_filter_bzip2(&mut self) -> Result<()> {
        self.support_filter_by_code(filter::BZIP2)
    }

    /// Enables bidding for zstd.
    pub fn support_filter_zstd(&mut self) -> Result<()> {
        self.support_filter_by_code(filter::ZSTD)
    }

    /// Enables bidding for the filter with the given code.
    pub fn support_filter_by_code(&mut self, code: i32) -> Result<()> {
        self.core.configure("support_filter_by_code")?;
        if code == filter::NONE {
            return Ok(());
        }
        if let Err(err) = filter::read_filter(code) {
            return Err(self.core.record(err));
        }
        self.add_supported_filter(code);
        Ok(())
    }

    /// Forces a decoding filter; forced filters disable bidding.
    ///
    /// Filters are stacked in the order they are appended, the first one
    /// directly above the transport.
    pub fn append_filter(&mut self, code: i32) -> Result<()> {
        self.core.configure("append_filter")?;
        if code == filter::NONE {
            return Ok(());
        }
        if let Err(err) = filter::read_filter(code) {
            return Err(self.core.record(err));
        }
        self.forced_filters.push(code);
        Ok(())
    }

    fn add_supported_filter(&mut self, code: i32) {
        if !self.filters.contains(&code) {
            self.filters.push(code);
        }
    }

    // Formats

    /// Enables every built-in format that recognizes its input.
    ///
    /// The raw format is not included, because it accepts any input; enable it
    /// with [`support_format_raw`](Self::support_format_raw).
    pub fn support_format_all(&mut self) -> Result<()> {
        self.core.configure("support_format_all")?;
        self.register_format(format::EMPTY)
    }

    /// Enables the raw format: the whole input is one entry named `data`.
    pub fn support_format_raw(&mut self) -> Result<()> {
        self.core.configure("support_format_raw")?;
        self.register_format(format::RAW)
    }

    /// Enables the empty format: empty input is an archive with no entries.
    pub fn support_format_empty(&mut self) -> Result<()> {
        self.core.configure("support_format_empty")?;
        self.register_format(format::EMPTY)
    }

    /// Enables the built-in format with the given code.
    pub fn support_format_by_code(&mut self, code: i32) -> Result<()> {
        self.core.configure("support_format_by_code")?;
        self.register_format(code)
    }

    /// Uses exactly one format, without bidding.
    pub fn set_format(&mut self, code: i32) -> Result<()> {
        self.core.configure("set_format")?;
        match format::reader_for(code) {
            Ok(reader) => {
                self.formats.clear();
                self.formats.push(reader);
                self.format_forced = true;
                Ok(())
            }
            Err(err) => Err(self.core.record(err)),
        }
    }

    /// Registers an application-defined format for bidding.
    pub fn add_format_reader(&mut self, reader: impl FormatReader + 'static) -> Result<()> {
        self.core.configure("add_format_reader")?;
        self.formats.push(Box::new(reader));
        Ok(())
    }

    fn register_format(&mut self, code: i32) -> Result<()> {
        let family = code & format::BASE_MASK;
        if self
            .formats
            .iter()
            .any(|reader| reader.code() & format::BASE_MASK == family)
        {
            return Ok(());
        }
        match format::reader_for(code) {
            Ok(reader) => {
                self.formats.push(reader);
                Ok(())
            }
            Err(err) => Err(self.core.record(err)),
        }
    }

    // Options

    /// Applies a comma-separated option string; see [`crate::options`].
    pub fn set_options(&mut self, options: &str) -> Result<()> {
        self.core.configure("set_options")?;
        let formats = &mut self.formats;
        let applied = options::apply_all(options, |module, key, value| {
            offer_format_option(formats, module, key, value)
        });
        applied.map_err(|err| self.core.record(err))
    }

    /// Offers one option to formats and filters.
    pub fn set_option(&mut self, module: Option<&str>, key: &str, value: Option<&str>) -> Result<()> {
        self.set_format_option(module, key, value)
    }

    /// Offers one option to the registered formats.
    pub fn set_format_option(
        &mut self,
        module: Option<&str>,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        self.core.configure("set_format_option")?;
        match offer_format_option(&mut self.formats, module, key, value) {
            Ok(true) => Ok(()),
            Ok(false) => Err(self.core.record(unknown_option(module, key))),
            Err(err) => Err(self.core.record(err)),
        }
    }

    /// Offers one option to the read filters, none of which take options.
    pub fn set_filter_option(
        &mut self,
        module: Option<&str>,
        key: &str,
        _value: Option<&str>,
    ) -> Result<()> {
        self.core.configure("set_filter_option")?;
        Err(self.core.record(unknown_option(module, key)))
    }

    // Callbacks

    fn callbacks_mut(&mut self, operation: &'static str) -> Result<&mut ReadCallbacks<D>> {
        self.core.configure(operation)?;
        Ok(self.callbacks.get_or_insert_with(ReadCallbacks::new))
    }

    /// Binds the open callback, run once before the first read.
    pub fn set_open_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(SessionId, &mut D) -> CallbackResult<()> + Send + 'static,
    {
        self.callbacks_mut("set_open_callback")?.open.bind(Box::new(callback));
        Ok(())
    }

    /// Binds the read callback, which produces the input block by block.
    ///
    /// Returning `None` or an empty buffer ends the current source. The
    /// returned buffer stays pinned until the next read and is dropped before
    /// that read runs.
    pub fn set_read_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(SessionId, &mut D) -> CallbackResult<Option<ReadBuffer>> + Send + 'static,
    {
        self.callbacks_mut("set_read_callback")?.read.bind(Box::new(callback));
        Ok(())
    }

    /// Binds the skip callback; it returns how many bytes it actually skipped.
    pub fn set_skip_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(SessionId, &mut D, i64) -> CallbackResult<i64> + Send + 'static,
    {
        self.callbacks_mut("set_skip_callback")?.skip.bind(Box::new(callback));
        Ok(())
    }

    /// Binds the seek callback; it returns the new absolute position.
    pub fn set_seek_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(SessionId, &mut D, i64, Whence) -> CallbackResult<i64> + Send + 'static,
    {
        self.callbacks_mut("set_seek_callback")?.seek.bind(Box::new(callback));
        Ok(())
    }

    /// Binds the close callback.
    pub fn set_close_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(SessionId, &mut D) -> CallbackResult<()> + Send + 'static,
    {
        self.callbacks_mut("set_close_callback")?.close.bind(Box::new(callback));
        Ok(())
    }

    /// Binds the switch callback, run with the old and the new token when
    /// reading moves to the next source.
    ///
    /// Without it, moving to the next source closes the old token and opens
    /// the new one.
    pub fn set_switch_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(SessionId, &mut D, &mut D) -> CallbackResult<()> + Send + 'static,
    {
        self.callbacks_mut("set_switch_callback")?.switch.bind(Box::new(callback));
        Ok(())
    }

    /// Drops the handler bound to `role`; returns whether one was bound.
    pub fn clear_callback(&mut self, role: Role) -> Result<bool> {
        Ok(self.callbacks_mut("clear_callback")?.unbind(role))
    }

    // Client data

    /// Sets the first client-data token.
    pub fn set_callback_data(&mut self, data: D) -> Result<()> {
        self.set_callback_data_at(0, data)
    }

    /// Replaces the token at `index`.
    pub fn set_callback_data_at(&mut self, index: usize, data: D) -> Result<()> {
        let result = lock_or_recover(&self.data).set(index, data);
        result.map_err(|err| self.core.record(err))
    }

    /// Inserts a token before `index`; `index` equal to the count appends.
    pub fn add_callback_data(&mut self, index: usize, data: D) -> Result<()> {
        let result = lock_or_recover(&self.data).insert(index, data);
        result.map_err(|err| self.core.record(err))
    }

    /// Adds a token after the last one.
    pub fn append_callback_data(&mut self, data: D) -> Result<()> {
        let count = self.callback_data_count();
        self.add_callback_data(count, data)
    }

    /// Adds a token before the first one.
    pub fn prepend_callback_data(&mut self, data: D) -> Result<()> {
        self.add_callback_data(0, data)
    }

    /// Number of client-data tokens.
    pub fn callback_data_count(&self) -> usize {
        lock_or_recover(&self.data).len()
    }

    // Opening

    /// Opens a file, or standard input for `None`.
    pub fn open_filename<P: AsRef<Path>>(&mut self, path: Option<P>, block_size: usize) -> Result<()> {
        let paths = vec![path.map(|p| p.as_ref().to_path_buf())];
        self.open_files(paths, block_size)
    }

    /// Opens several files read one after another as a single input.
    pub fn open_filenames<I, P>(&mut self, paths: I, block_size: usize) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let paths = paths
            .into_iter()
            .map(|p| Some(p.as_ref().to_path_buf()))
            .collect();
        self.open_files(paths, block_size)
    }

    fn open_files(&mut self, paths: Vec<Option<PathBuf>>, block_size: usize) -> Result<()> {
        let block_size = if block_size == 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            block_size
        };
        self.open_transport(Box::new(FileTransport::new(paths, block_size)))
    }

    /// Opens any seekable reader.
    pub fn open_reader<R>(&mut self, reader: R, block_size: usize) -> Result<()>
    where
        R: Read + Seek + Send + 'static,
    {
        let block_size = if block_size == 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            block_size
        };
        self.open_transport(Box::new(ReaderTransport::new(reader, block_size)))
    }

    /// Opens a duplicate of a file descriptor.
    #[cfg(unix)]
    pub fn open_fd(&mut self, fd: impl std::os::fd::AsFd, block_size: usize) -> Result<()> {
        match fd.as_fd().try_clone_to_owned() {
            Ok(owned) => self.open_reader(std::fs::File::from(owned), block_size),
            Err(err) => Err(self.core.record(Error::Io(err))),
        }
    }

    /// Opens the remaining bytes of an application buffer.
    ///
    /// The region stays pinned until the session closes.
    pub fn open_memory(&mut self, buffer: impl AppBuffer + Send + 'static) -> Result<()> {
        self.open_transport(Box::new(MemoryTransport::new(Box::new(buffer))))
    }

    fn open_transport(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        self.core
            .require("open", &[SessionState::Created, SessionState::Configured])?;
        log::debug!("{}: opening", self.core.id);
        match self.open_chain(transport) {
            Ok(()) => {
                self.core.state = SessionState::Opened;
                Ok(())
            }
            Err(err) => {
                // Dropping the partial chain closes the transport.
                self.core.state = SessionState::Fatal;
                Err(self.core.record(err))
            }
        }
    }

    fn open_chain(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        let client_bytes = ByteCounter::default();
        let mut reader = ClientReader::new(transport, client_bytes.clone());
        reader.open()?;

        let mut pushed = Vec::new();
        let top = self.stack_filters(Box::new(reader), &mut pushed)?;
        let mut stream = ReadStream::new(top);
        let format = self.choose_format(&mut stream)?;

        pushed.reverse();
        pushed.push(FilterSlot::new(filter::NONE, "none", client_bytes));
        self.slots = pushed;
        self.format = Some(format);
        self.stream = Some(stream);
        Ok(())
    }

    fn stack_filters(
        &self,
        mut top: Box<dyn Upstream>,
        pushed: &mut Vec<FilterSlot>,
    ) -> Result<Box<dyn Upstream>> {
        if !self.forced_filters.is_empty() {
            for &code in &self.forced_filters {
                let filter = filter::read_filter(code)?;
                top = push_filter(filter.as_ref(), top, pushed)?;
            }
            return Ok(top);
        }
        if self.filters.is_empty() {
            return Ok(top);
        }

        let candidates = self
            .filters
            .iter()
            .map(|&code| filter::read_filter(code))
            .collect::<Result<Vec<_>>>()?;
        let need = candidates.iter().map(|f| f.bid_len()).max().unwrap_or(1);
        for depth in 0..=MAX_FILTER_DEPTH {
            let best = best_filter(&candidates, top.ahead(need)?);
            let Some(index) = best else {
                break;
            };
            if depth == MAX_FILTER_DEPTH {
                return Err(Error::Format(
                    "Input requires too many filters for decoding".into(),
                ));
            }
            let filter = candidates[index].as_ref();
            log::debug!("{}: detected {} filter", self.core.id, filter.name());
            top = push_filter(filter, top, pushed)?;
        }
        Ok(top)
    }

    fn choose_format(&mut self, stream: &mut ReadStream) -> Result<Box<dyn FormatReader>> {
        if self.formats.is_empty() {
            return Err(Error::Format("No formats registered".into()));
        }
        let index = if self.format_forced {
            0
        } else {
            let mut best = None;
            let mut best_bid = -1;
            for (index, reader) in self.formats.iter_mut().enumerate() {
                let bid = reader.bid(stream, best_bid)?;
                if bid > best_bid {
                    best_bid = bid;
                    best = Some(index);
                }
            }
            match best {
                Some(index) if best_bid > 0 => index,
                _ => return Err(Error::UnrecognizedFormat),
            }
        };
        let reader = self.formats.remove(index);
        log::debug!("{}: selected {} format", self.core.id, reader.name());
        Ok(reader)
    }

    // Entries

    /// Reads the next header; `None` marks the end of the archive.
    ///
    /// Unread data of the previous entry is skipped first.
    pub fn next_header(&mut self) -> Result<Option<&Entry>> {
        match self.advance_header() {
            Ok(true) => Ok(Some(&self.entry)),
            Ok(false) => Ok(None),
            Err(err) => Err(self.core.record(err)),
        }
    }

    /// Reads the next header into a caller-owned entry.
    ///
    /// Returns false at the end of the archive.
    pub fn next_header2(&mut self, entry: &mut Entry) -> Result<bool> {
        match self.advance_header() {
            Ok(found) => {
                entry.clone_from(&self.entry);
                Ok(found)
            }
            Err(err) => Err(self.core.record(err)),
        }
    }

    fn advance_header(&mut self) -> Result<bool> {
        self.core.check(
            "next_header",
            &[SessionState::Opened, SessionState::Data, SessionState::Eof],
        )?;
        if self.core.state == SessionState::Eof {
            return Ok(false);
        }
        let (Some(format), Some(stream)) = (self.format.as_mut(), self.stream.as_mut()) else {
            return Err(not_open("next_header", self.core.state));
        };
        if self.core.state == SessionState::Data {
            format.skip_data(stream)?;
        }
        self.header_position = stream.position();
        self.entry.clear();
        if format.read_header(stream, &mut self.entry)? {
            self.file_count += 1;
            self.core.state = SessionState::Data;
            Ok(true)
        } else {
            self.core.state = SessionState::Eof;
            Ok(false)
        }
    }

    /// Reads entry data into the buffer's remaining space and advances its cursor.
    ///
    /// Returns 0 at the end of the entry, or when the buffer has no room.
    pub fn read_data(&mut self, buffer: &mut dyn AppBuffer) -> Result<usize> {
        let result = self.read_into(buffer);
        result.map_err(|err| self.core.record(err))
    }

    fn read_into(&mut self, buffer: &mut dyn AppBuffer) -> Result<usize> {
        self.core.check("read_data", &[SessionState::Data])?;
        let state = self.core.state;
        let Self {
            format: Some(format),
            stream: Some(stream),
            entry,
            ..
        } = self
        else {
            return Err(not_open("read_data", state));
        };
        bridge::transfer(buffer, Release::Commit, |out| {
            if out.is_empty() {
                Ok(0)
            } else {
                format.read_data(stream, entry, out)
            }
        })
    }

    /// Copies the rest of the entry's data into `writer`.
    pub fn read_data_into<W: Write>(&mut self, mut writer: W) -> Result<u64> {
        let mut chunk = vec![0u8; DATA_CHUNK];
        let mut total = 0u64;
        loop {
            let n = self.read_data(&mut io::Cursor::new(&mut chunk[..]))?;
            if n == 0 {
                return Ok(total);
            }
            if let Err(err) = writer.write_all(&chunk[..n]) {
                return Err(self.core.record(Error::Io(err)));
            }
            total += n as u64;
        }
    }

    /// Copies the rest of the entry's data into a duplicate of a file descriptor.
    #[cfg(unix)]
    pub fn read_data_into_fd(&mut self, fd: impl std::os::fd::AsFd) -> Result<u64> {
        match fd.as_fd().try_clone_to_owned() {
            Ok(owned) => self.read_data_into(std::fs::File::from(owned)),
            Err(err) => Err(self.core.record(Error::Io(err))),
        }
    }

    /// Discards the rest of the current entry's data.
    pub fn read_data_skip(&mut self) -> Result<()> {
        let result = self.skip_entry_data();
        result.map_err(|err| self.core.record(err))
    }

    fn skip_entry_data(&mut self) -> Result<()> {
        self.core.check("read_data_skip", &[SessionState::Data])?;
        match (self.format.as_mut(), self.stream.as_mut()) {
            (Some(format), Some(stream)) => format.skip_data(stream),
            _ => Err(not_open("read_data_skip", self.core.state)),
        }
    }

    /// Repositions within the current entry's data, if the format and
    /// transport allow it.
    pub fn seek_data(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let result = self.seek_entry_data(offset, whence);
        result.map_err(|err| self.core.record(err))
    }

    fn seek_entry_data(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        self.core.check("seek_data", &[SessionState::Data])?;
        match (self.format.as_mut(), self.stream.as_mut()) {
            (Some(format), Some(stream)) => format.seek_data(stream, offset, whence),
            _ => Err(not_open("seek_data", self.core.state)),
        }
    }

    // Queries

    /// Code of the selected format, once the session is open.
    pub fn format_code(&self) -> Option<i32> {
        self.format.as_ref().map(|f| f.code())
    }

    /// Name of the selected format, once the session is open.
    pub fn format_name(&self) -> Option<&'static str> {
        self.format.as_ref().map(|f| f.name())
    }

    /// Encryption capabilities of the selected format (`format::CAPS_*`).
    pub fn format_capabilities(&self) -> i32 {
        self.format
            .as_ref()
            .map_or(format::CAPS_NONE, |f| f.capabilities())
    }

    /// Whether the archive has encrypted entries, as far as is known.
    pub fn has_encrypted_entries(&self) -> i32 {
        self.format
            .as_ref()
            .map_or(format::ENCRYPTION_DONT_KNOW, |f| f.has_encrypted_entries())
    }

    /// Stream offset at which the current header started.
    pub fn header_position(&self) -> u64 {
        self.header_position
    }

    /// Number of headers read so far.
    pub fn file_count(&self) -> u64 {
        self.file_count
    }

    /// Number of layers, including the client layer.
    pub fn filter_count(&self) -> usize {
        self.slots.len()
    }

    /// Bytes a layer handed to the layer above it.
    ///
    /// Index 0 is nearest the format; negative indexes count from the client
    /// end, so -1 is the client layer.
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

    /// Closes the transport.
    ///
    /// Closing a session that was never opened only changes its state;
    /// closing twice is an error.
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
            _ => {
                let result = match self.stream.as_mut() {
                    Some(stream) => stream.close(),
                    None => Ok(()),
                };
                self.core.state = SessionState::Closed;
                log::debug!("{}: closed", self.core.id);
                result.map_err(|err| self.core.record(err))
            }
        }
    }

    /// Closes the session if needed and releases every handler and token.
    pub fn free(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let result = match self.core.state {
            SessionState::Closed => Ok(()),
            _ => self.close(),
        };
        self.stream = None;
        self.format = None;
        self.formats.clear();
        self.callbacks = None;
        lock_or_recover(&self.data).clear();
        log::debug!("{}: freed", self.core.id);
        result
    }
}

impl<D: Send + 'static> ReadArchive<D> {
    /// Opens the session through the bound callbacks and registered tokens.
    ///
    /// A read callback and at least one client-data token are required.
    pub fn open1(&mut self) -> Result<()> {
        self.core
            .require("open1", &[SessionState::Created, SessionState::Configured])?;
        if lock_or_recover(&self.data).is_empty() {
            return Err(self
                .core
                .record(Error::InvalidArgument("No client data registered".into())));
        }
        let callbacks = self.callbacks.take().unwrap_or_else(ReadCallbacks::new);
        if !callbacks.read.is_bound() {
            self.callbacks = Some(callbacks);
            return Err(self
                .core
                .record(Error::InvalidArgument("No read callback is registered".into())));
        }
        let transport = CallbackTransport::new(self.core.id, callbacks, Arc::clone(&self.data));
        self.open_transport(Box::new(transport))
    }

    /// Sets the first client-data token and opens through the callbacks.
    pub fn open(&mut self, data: D) -> Result<()> {
        self.core
            .require("open", &[SessionState::Created, SessionState::Configured])?;
        self.set_callback_data(data)?;
        self.open1()
    }
}

impl<D> Default for ReadArchive<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> Drop for ReadArchive<D> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::warn!("{}: error while releasing read session: {}", self.core.id, err);
        }
    }
}

impl<D> Read for ReadArchive<D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_data(&mut io::Cursor::new(buf))
            .map_err(Error::into_io)
    }
}

impl<D> fmt::Debug for ReadArchive<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadArchive")
            .field("id", &self.core.id)
            .field("state", &self.core.state)
            .field("format", &self.format_name())
            .field("file_count", &self.file_count)
            .finish_non_exhaustive()
    }
}

fn offer_format_option(
    formats: &mut [Box<dyn FormatReader>],
    module: Option<&str>,
    key: &str,
    value: Option<&str>,
) -> Result<bool> {
    let mut accepted = false;
    for reader in formats
        .iter_mut()
        .filter(|reader| options::addressed_to(module, reader.name()))
    {
        accepted |= reader.set_option(key, value)?;
    }
    Ok(accepted)
}

fn unknown_option(module: Option<&str>, key: &str) -> Error {
    Error::UnknownOption {
        module: module.map(str::to_string),
        option: key.to_string(),
    }
}

fn not_open(operation: &'static str, state: SessionState) -> Error {
    Error::InvalidState { operation, state }
}

fn push_filter(
    filter: &dyn ReadFilter,
    lower: Box<dyn Upstream>,
    pushed: &mut Vec<FilterSlot>,
) -> Result<Box<dyn Upstream>> {
    let bytes = ByteCounter::default();
    let upper = filter.wrap(lower, bytes.clone())?;
    pushed.push(FilterSlot::new(filter.code(), filter.name(), bytes));
    Ok(upper)
}

/// Picks the highest positive bid; earlier candidates win ties.
fn best_filter(candidates: &[Box<dyn ReadFilter>], head: &[u8]) -> Option<usize> {
    let mut best = None;
    let mut best_bid = 0;
    for (index, candidate) in candidates.iter().enumerate() {
        let bid = candidate.bid(head);
        if bid > best_bid {
            best_bid = bid;
            best = Some(index);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ByteBuffer;
    use crate::error::codes;

    fn raw_session(data: &[u8]) -> ReadArchive {
        let mut archive = ReadArchive::new();
        archive.support_filter_all().unwrap();
        archive.support_format_raw().unwrap();
        archive.open_memory(ByteBuffer::direct(data.to_vec())).unwrap();
        archive
    }

    #[test]
    fn test_raw_entry_and_data() {
        let mut archive = raw_session(b"payload");
        assert_eq!(archive.format_name(), Some("raw"));
        let entry = archive.next_header().unwrap().unwrap();
        assert_eq!(entry.pathname(), Some(&b"data"[..]));
        let mut out = ByteBuffer::allocate(32);
        assert_eq!(archive.read_data(&mut out).unwrap(), 7);
        assert_eq!(out.position(), 7);
        assert_eq!(archive.read_data(&mut out).unwrap(), 0);
        assert!(archive.next_header().unwrap().is_none());
        assert!(archive.next_header().unwrap().is_none());
        assert_eq!(archive.file_count(), 1);
        archive.free().unwrap();
    }

    #[test]
    fn test_configuration_after_open_is_rejected() {
        let mut archive = raw_session(b"x");
        let err = archive.support_format_empty().unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert_eq!(archive.errno(), codes::ERRNO_PROGRAMMER);
        assert_eq!(archive.state(), SessionState::Opened);
    }

    #[test]
    fn test_double_close_is_error() {
        let mut archive = raw_session(b"x");
        archive.close().unwrap();
        assert!(matches!(
            archive.close(),
            Err(Error::InvalidState {
                state: SessionState::Closed,
                ..
            })
        ));
    }

    #[test]
    fn test_unrecognized_input() {
        let mut archive: ReadArchive = ReadArchive::new();
        archive.support_format_all().unwrap();
        let err = archive
            .open_memory(ByteBuffer::direct(b"not empty".to_vec()))
            .unwrap_err();
        assert!(matches!(err, Error::UnrecognizedFormat));
        assert_eq!(archive.state(), SessionState::Fatal);
        assert_eq!(archive.errno(), codes::ERRNO_FILE_FORMAT);
        assert_eq!(archive.error_string(), Some("Unrecognized archive format"));
    }

    #[test]
    fn test_empty_input_has_no_entries() {
        let mut archive: ReadArchive = ReadArchive::new();
        archive.support_format_all().unwrap();
        archive.support_format_raw().unwrap();
        archive.open_memory(ByteBuffer::direct(Vec::new())).unwrap();
        assert_eq!(archive.format_code(), Some(format::EMPTY));
        assert!(archive.next_header().unwrap().is_none());
    }

    #[test]
    fn test_read_data_before_header_is_state_error() {
        let mut archive = raw_session(b"abc");
        let mut out = ByteBuffer::allocate(4);
        assert!(matches!(
            archive.read_data(&mut out),
            Err(Error::InvalidState { .. })
        ));
        assert_eq!(archive.state(), SessionState::Opened);
    }

    #[test]
    fn test_filter_slots_without_compression() {
        let mut archive = raw_session(b"abcdef");
        archive.next_header().unwrap();
        archive.read_data_skip().unwrap();
        assert_eq!(archive.filter_count(), 1);
        assert_eq!(archive.filter_name(0), Some("none"));
        assert_eq!(archive.filter_code(-1), Some(filter::NONE));
        assert_eq!(archive.filter_bytes(5), None);
    }

    #[test]
    fn test_unknown_read_option() {
        let mut archive: ReadArchive = ReadArchive::new();
        archive.support_format_raw().unwrap();
        let err = archive.set_options("raw:nonsense=1").unwrap_err();
        assert!(matches!(err, Error::UnknownOption { .. }));
        let err = archive
            .set_filter_option(Some("gzip"), "compression-level", Some("9"))
            .unwrap_err();
        assert_eq!(err.to_string(), "Undefined option: `gzip:compression-level'");
    }

    #[test]
    fn test_open1_requires_data_and_read_callback() {
        let mut archive: ReadArchive<u8> = ReadArchive::new();
        archive.support_format_raw().unwrap();
        let err = archive.open1().unwrap_err();
        assert_eq!(err.to_string(), "No client data registered");
        archive.set_callback_data(1).unwrap();
        let err = archive.open1().unwrap_err();
        assert_eq!(err.to_string(), "No read callback is registered");
        assert_eq!(archive.state(), SessionState::Configured);
    }

    #[test]
    fn test_io_read_impl() {
        let mut archive = raw_session(b"through io::Read");
        archive.next_header().unwrap();
        let mut text = String::new();
        archive.read_to_string(&mut text).unwrap();
        assert_eq!(text, "through io::Read");
    }
}
