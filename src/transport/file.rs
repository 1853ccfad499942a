//! Built-in transports over files, standard streams and `std::io` types.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use super::{Sink, Transport, read_block};
use crate::buffer::bridge::PinnedBlock;
use crate::callback::Whence;
use crate::error::{Error, Result};

enum Source {
    File { file: File, regular: bool },
    Stdin(io::Stdin),
}

impl Source {
    fn open(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => {
                let file = File::open(path).inspect_err(|e| {
                    log::debug!("Failed to open '{}': {}", path.display(), e);
                })?;
                let regular = file.metadata().map(|m| m.is_file()).unwrap_or(false);
                Ok(Source::File { file, regular })
            }
            None => Ok(Source::Stdin(io::stdin())),
        }
    }

    fn seekable(&self) -> bool {
        matches!(self, Source::File { regular: true, .. })
    }
}

/// Reads one or more files in sequence; `None` stands for standard input.
pub(crate) struct FileTransport {
    paths: Vec<Option<PathBuf>>,
    block_size: usize,
    current: usize,
    source: Option<Source>,
}

impl FileTransport {
    pub(crate) fn new(paths: Vec<Option<PathBuf>>, block_size: usize) -> Self {
        Self {
            paths,
            block_size,
            current: 0,
            source: None,
        }
    }

    fn file(&mut self) -> Option<&mut File> {
        match &mut self.source {
            Some(Source::File {
                file,
                regular: true,
            }) => Some(file),
            _ => None,
        }
    }
}

impl Transport for FileTransport {
    fn open(&mut self) -> Result<()> {
        self.current = 0;
        let first = self.paths.first().ok_or_else(|| {
            Error::InvalidArgument("No file names were specified".into())
        })?;
        self.source = Some(Source::open(first.as_ref())?);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<PinnedBlock>> {
        match &mut self.source {
            Some(Source::File { file, .. }) => read_block(file, self.block_size),
            Some(Source::Stdin(stdin)) => read_block(stdin, self.block_size),
            None => Ok(None),
        }
    }

    fn skip(&mut self, request: u64) -> Result<u64> {
        let Some(file) = self.file() else {
            return Ok(0);
        };
        let position = file.stream_position()?;
        let len = file.metadata()?.len();
        let step = request.min(len.saturating_sub(position));
        file.seek(SeekFrom::Start(position + step))?;
        Ok(step)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let target = whence.to_seek_from(offset)?;
        let file = self.file().ok_or(Error::Unsupported { operation: "seek" })?;
        Ok(file.seek(target)?)
    }

    fn can_skip(&self) -> bool {
        self.source.as_ref().is_some_and(Source::seekable)
    }

    fn can_seek(&self) -> bool {
        self.can_skip()
    }

    fn sources(&self) -> usize {
        self.paths.len()
    }

    fn current_source(&self) -> usize {
        self.current
    }

    fn switch_to(&mut self, index: usize) -> Result<()> {
        let path = self
            .paths
            .get(index)
            .ok_or_else(|| Error::InvalidArgument("Invalid index specified.".into()))?;
        self.source = None;
        self.current = index;
        self.source = Some(Source::open(path.as_ref())?);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.source = None;
        Ok(())
    }
}

/// Reads any seekable reader; the reader is dropped with the session.
pub(crate) struct ReaderTransport<R> {
    reader: R,
    block_size: usize,
    seekable: bool,
}

impl<R: Read + Seek + Send> ReaderTransport<R> {
    pub(crate) fn new(reader: R, block_size: usize) -> Self {
        Self {
            reader,
            block_size,
            seekable: false,
        }
    }
}

impl<R: Read + Seek + Send> Transport for ReaderTransport<R> {
    fn open(&mut self) -> Result<()> {
        self.seekable = self.reader.stream_position().is_ok();
        Ok(())
    }

    fn read(&mut self) -> Result<Option<PinnedBlock>> {
        read_block(&mut self.reader, self.block_size)
    }

    fn skip(&mut self, request: u64) -> Result<u64> {
        if !self.seekable {
            return Ok(0);
        }
        let position = self.reader.stream_position()?;
        let end = self.reader.seek(SeekFrom::End(0))?;
        let target = position.saturating_add(request).min(end.max(position));
        self.reader.seek(SeekFrom::Start(target))?;
        Ok(target - position)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        if !self.seekable {
            return Err(Error::Unsupported { operation: "seek" });
        }
        Ok(self.reader.seek(whence.to_seek_from(offset)?)?)
    }

    fn can_skip(&self) -> bool {
        self.seekable
    }

    fn can_seek(&self) -> bool {
        self.seekable
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

enum Output {
    File(File),
    Stdout(io::Stdout),
}

/// Writes to a created file, or to standard output for `None`.
pub(crate) struct FileSink {
    path: Option<PathBuf>,
    output: Option<Output>,
}

impl FileSink {
    pub(crate) fn new(path: Option<PathBuf>) -> Self {
        Self { path, output: None }
    }
}

impl Sink for FileSink {
    fn open(&mut self) -> Result<()> {
        self.output = Some(match &self.path {
            Some(path) => Output::File(File::create(path).inspect_err(|e| {
                log::debug!("Failed to open '{}': {}", path.display(), e);
            })?),
            None => Output::Stdout(io::stdout()),
        });
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        match &mut self.output {
            Some(Output::File(file)) => file.write_all(bytes)?,
            Some(Output::Stdout(stdout)) => stdout.write_all(bytes)?,
            None => return Err(Error::Unsupported { operation: "write before open" }),
        }
        Ok(bytes.len())
    }

    fn close(&mut self) -> Result<()> {
        match self.output.take() {
            Some(Output::File(mut file)) => file.flush()?,
            Some(Output::Stdout(mut stdout)) => stdout.flush()?,
            None => {}
        }
        Ok(())
    }

    fn last_block_hint(&self) -> Option<i32> {
        // Regular files get no trailing padding; stdout keeps full blocks.
        self.path.is_some().then_some(1)
    }
}

/// Writes to any writer; the writer is dropped with the session.
pub(crate) struct WriterSink<W> {
    writer: W,
}

impl<W: Write + Send> WriterSink<W> {
    pub(crate) fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> Sink for WriterSink<W> {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        self.writer.write_all(bytes)?;
        Ok(bytes.len())
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn last_block_hint(&self) -> Option<i32> {
        Some(1)
    }
}
