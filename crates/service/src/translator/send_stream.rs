use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;

use crate::{
    Error,
    session::{DataSourceId, SendStream},
    translator::StreamId,
};

#[derive(Default)]
struct State {
    started: usize,
    wrappers: Vec<Arc<TranslatedSendStream>>,
    closed: bool,
}

/// One outbound flow of the shared session, shared by every attached
/// stream that sends the same (data source, stream index) pair.
///
/// The underlying stream is started by the first start of any wrapper and
/// stopped by the last stop. It is closed once no wrapper is left.
pub(crate) struct SendStreamDescriptor {
    data_source: DataSourceId,
    stream_index: usize,
    stream: Arc<dyn SendStream>,
    state: Mutex<State>,
}

impl SendStreamDescriptor {
    pub fn new(
        data_source: DataSourceId,
        stream_index: usize,
        stream: Arc<dyn SendStream>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            stream_index,
            data_source,
            stream,
        })
    }

    pub fn matches(&self, data_source: DataSourceId, stream_index: usize) -> bool {
        self.data_source == data_source && self.stream_index == stream_index
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// The wrapper of the owner, created if the owner has none yet.
    pub fn wrap(self: &Arc<Self>, owner: StreamId) -> Option<Arc<TranslatedSendStream>> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }

        if let Some(it) = state.wrappers.iter().find(|it| it.owner == owner) {
            return Some(it.clone());
        }

        let wrapper = Arc::new(TranslatedSendStream {
            descriptor: self.clone(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            owner,
        });

        state.wrappers.push(wrapper.clone());
        Some(wrapper)
    }

    pub fn wrappers(&self, owner: Option<StreamId>) -> Vec<Arc<TranslatedSendStream>> {
        self.state
            .lock()
            .wrappers
            .iter()
            .filter(|it| owner.is_none_or(|owner| it.owner == owner))
            .cloned()
            .collect()
    }

    fn start(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.started == 0 {
            self.stream.start()?;

            log::info!(
                "translator send stream started: ssrc={}, data_source={:?}, index={}",
                self.stream.ssrc(),
                self.data_source,
                self.stream_index
            );
        }

        state.started += 1;
        Ok(())
    }

    fn stop(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        match state.started {
            0 => (),
            1 => {
                // The count drops even if the stream fails to stop, the last
                // release still has to close it.
                state.started = 0;
                self.stream.stop()?;

                log::info!(
                    "translator send stream stopped: ssrc={}, data_source={:?}, index={}",
                    self.stream.ssrc(),
                    self.data_source,
                    self.stream_index
                );
            }
            _ => state.started -= 1,
        }

        Ok(())
    }

    fn release(&self, wrapper: &TranslatedSendStream) {
        let mut state = self.state.lock();
        state
            .wrappers
            .retain(|it| !std::ptr::eq(Arc::as_ptr(it), wrapper));

        if state.wrappers.is_empty() && !state.closed {
            state.closed = true;
            self.stream.close();
        }
    }
}

/// The view one attached stream has of a shared send stream.
pub struct TranslatedSendStream {
    owner: StreamId,
    descriptor: Arc<SendStreamDescriptor>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl TranslatedSendStream {
    pub fn owner(&self) -> StreamId {
        self.owner
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

impl SendStream for TranslatedSendStream {
    fn ssrc(&self) -> u32 {
        self.descriptor.stream.ssrc()
    }

    fn data_source(&self) -> DataSourceId {
        self.descriptor.data_source
    }

    fn stream_index(&self) -> usize {
        self.descriptor.stream_index
    }

    fn start(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::SendStreamClosed);
        }

        if self.started.swap(true, Ordering::Relaxed) {
            return Ok(());
        }

        if let Err(e) = self.descriptor.start() {
            self.started.store(false, Ordering::Relaxed);
            return Err(e);
        }

        Ok(())
    }

    /// Stopping a wrapper that was not started has no effect.
    fn stop(&self) -> Result<(), Error> {
        if !self.started.swap(false, Ordering::Relaxed) {
            return Ok(());
        }

        self.descriptor.stop()
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    fn write(
        &self,
        payload_type: u8,
        payload: &[u8],
        timestamp: u32,
        marker: bool,
    ) -> Result<usize, Error> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::SendStreamClosed);
        }

        if !self.started.load(Ordering::Relaxed) {
            return Ok(0);
        }

        self.descriptor
            .stream
            .write(payload_type, payload, timestamp, marker)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::Relaxed) {
            return;
        }

        if let Err(e) = self.stop() {
            log::warn!(
                "translator send stream stop failed: ssrc={}, owner={}, err={}",
                self.ssrc(),
                self.owner,
                e
            );
        }

        self.descriptor.release(self);
    }
}
