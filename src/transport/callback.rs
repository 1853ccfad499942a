//! Transports backed by application callbacks.

use std::sync::{Arc, Mutex};

use super::{Sink, Transport};
use crate::buffer::bridge::PinnedBlock;
use crate::callback::{ClientDataList, ReadCallbacks, Role, SessionId, Whence, WriteCallbacks, invoke};
use crate::error::{Error, Result};
use crate::lock_or_recover;

/// Client-data tokens shared between a read session and its transport.
pub(crate) type SharedClientData<D> = Arc<Mutex<ClientDataList<D>>>;

/// Forwards transport operations to the read handlers.
pub(crate) struct CallbackTransport<D> {
    session: SessionId,
    callbacks: ReadCallbacks<D>,
    data: SharedClientData<D>,
    closed: bool,
}

impl<D> CallbackTransport<D> {
    pub(crate) fn new(
        session: SessionId,
        callbacks: ReadCallbacks<D>,
        data: SharedClientData<D>,
    ) -> Self {
        Self {
            session,
            callbacks,
            data,
            closed: false,
        }
    }

    fn open_at(&mut self, index: usize) -> Result<()> {
        let session = self.session;
        if let Some(open) = self.callbacks.open.get_mut() {
            let mut data = lock_or_recover(&self.data);
            let token = data
                .get_mut(index)
                .ok_or_else(|| Error::InvalidArgument("Invalid index specified.".into()))?;
            invoke(Role::Open, || open(session, token))?;
        }
        Ok(())
    }

    /// Runs the close handler once: for the current token, or for every
    /// token when a switch handler kept them all open.
    fn close_sources(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.callbacks.switch.is_bound() {
            let current = lock_or_recover(&self.data).cursor();
            return self.close_at(current);
        }

        let count = lock_or_recover(&self.data).len();
        let mut outcome = Ok(());
        for index in 0..count {
            if let Err(err) = self.close_at(index) {
                outcome = Err(err);
            }
        }
        outcome
    }

    fn close_at(&mut self, index: usize) -> Result<()> {
        let session = self.session;
        if let Some(close) = self.callbacks.close.get_mut() {
            let mut data = lock_or_recover(&self.data);
            if let Some(token) = data.get_mut(index) {
                invoke(Role::Close, || close(session, token))?;
            }
        }
        Ok(())
    }
}

impl<D: Send> Transport for CallbackTransport<D> {
    fn open(&mut self) -> Result<()> {
        lock_or_recover(&self.data).set_cursor(0);
        self.open_at(0)
    }

    fn read(&mut self) -> Result<Option<PinnedBlock>> {
        let session = self.session;
        let read = self
            .callbacks
            .read
            .get_mut()
            .ok_or_else(|| Error::InvalidArgument("No read callback is registered".into()))?;
        let mut data = lock_or_recover(&self.data);
        let token = data.current_mut()?;
        match invoke(Role::Read, || read(session, token))? {
            None => Ok(None),
            Some(buffer) => {
                let block = PinnedBlock::pin(buffer)?;
                Ok((block.len() > 0).then_some(block))
            }
        }
    }

    fn skip(&mut self, request: u64) -> Result<u64> {
        let session = self.session;
        let Some(skip) = self.callbacks.skip.get_mut() else {
            return Ok(0);
        };
        let request = i64::try_from(request).unwrap_or(i64::MAX);
        let mut data = lock_or_recover(&self.data);
        let token = data.current_mut()?;
        let skipped = invoke(Role::Skip, || skip(session, token, request))?;
        u64::try_from(skipped).map_err(|_| Error::TransportStatus {
            operation: "skip",
            status: skipped,
        })
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let session = self.session;
        let seek = self
            .callbacks
            .seek
            .get_mut()
            .ok_or(Error::Unsupported { operation: "seek" })?;
        let mut data = lock_or_recover(&self.data);
        let token = data.current_mut()?;
        let position = invoke(Role::Seek, || seek(session, token, offset, whence))?;
        u64::try_from(position).map_err(|_| Error::TransportStatus {
            operation: "seek",
            status: position,
        })
    }

    fn can_skip(&self) -> bool {
        self.callbacks.skip.is_bound()
    }

    fn can_seek(&self) -> bool {
        self.callbacks.seek.is_bound()
    }

    fn sources(&self) -> usize {
        lock_or_recover(&self.data).len()
    }

    fn current_source(&self) -> usize {
        lock_or_recover(&self.data).cursor()
    }

    fn switch_to(&mut self, index: usize) -> Result<()> {
        let session = self.session;
        let old = self.current_source();

        // The cursor only moves once the handler accepted the switch.
        if let Some(switch) = self.callbacks.switch.get_mut() {
            let mut data = lock_or_recover(&self.data);
            let (from, to) = data
                .pair_mut(old, index)
                .ok_or_else(|| Error::InvalidArgument("Invalid index specified.".into()))?;
            invoke(Role::Switch, || switch(session, from, to))?;
            data.set_cursor(index);
            return Ok(());
        }

        // Without a switch handler, the old source is closed and the new one
        // opened. A failed open leaves the new source to be closed with the
        // session, as for the first one.
        let closed = self.close_at(old);
        lock_or_recover(&self.data).set_cursor(index);
        let opened = self.open_at(index);
        opened.and(closed)
    }

    fn close(&mut self) -> Result<()> {
        self.close_sources()
    }
}

impl<D> Drop for CallbackTransport<D> {
    fn drop(&mut self) {
        if let Err(err) = self.close_sources() {
            log::warn!("{}: close callback failed during cleanup: {}", self.session, err);
        }
    }
}

/// Forwards sink operations to the write handlers.
pub(crate) struct CallbackSink<D> {
    session: SessionId,
    callbacks: WriteCallbacks<D>,
    data: D,
    closed: bool,
    freed: bool,
}

impl<D> CallbackSink<D> {
    pub(crate) fn new(session: SessionId, callbacks: WriteCallbacks<D>, data: D) -> Self {
        Self {
            session,
            callbacks,
            data,
            closed: false,
            freed: false,
        }
    }
}

impl<D: Send> Sink for CallbackSink<D> {
    fn open(&mut self) -> Result<()> {
        let session = self.session;
        let data = &mut self.data;
        match self.callbacks.open.get_mut() {
            Some(open) => invoke(Role::Open, || open(session, data)),
            None => Ok(()),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let session = self.session;
        let data = &mut self.data;
        let write = self
            .callbacks
            .write
            .get_mut()
            .ok_or_else(|| Error::InvalidArgument("No write callback is registered".into()))?;
        invoke(Role::Write, || write(session, data, bytes))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let session = self.session;
        let data = &mut self.data;
        match self.callbacks.close.get_mut() {
            Some(close) => invoke(Role::Close, || close(session, data)),
            None => Ok(()),
        }
    }

    fn free(&mut self) -> Result<()> {
        if self.freed {
            return Ok(());
        }
        self.freed = true;
        let session = self.session;
        let data = &mut self.data;
        match self.callbacks.free.get_mut() {
            Some(free) => invoke(Role::Free, || free(session, data)),
            None => Ok(()),
        }
    }
}

impl<D> Drop for CallbackSink<D> {
    fn drop(&mut self) {
        if self.freed {
            return;
        }
        self.freed = true;
        let session = self.session;
        let data = &mut self.data;
        if let Some(free) = self.callbacks.free.get_mut() {
            if let Err(err) = invoke(Role::Free, || free(session, data)) {
                log::warn!("{}: free callback failed during cleanup: {}", session, err);
            }
        }
    }
}
