mod descriptor;
pub mod queue;
mod send_stream;

pub use self::{descriptor::StreamId, send_stream::TranslatedSendStream};

use self::{
    descriptor::StreamDescriptor,
    queue::{WriteEntry, WriteQueue},
    send_stream::SendStreamDescriptor,
};

use crate::{
    Connector, Error, Packet, StreamKind,
    format::Format,
    session::{
        DataSourceId, GlobalStats, PacketListener, ReceiveStreamEvent, ReceiveStreamListener,
        RtpSession, SendStream, SessionTransport,
    },
};

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
};

use parking_lot::{Mutex, RwLock};

#[derive(Debug, Clone)]
pub struct TranslatorOptions {
    /// Capacity of each of the data and control write queues.
    pub write_queue_capacity: usize,
}

impl Default for TranslatorOptions {
    fn default() -> Self {
        Self {
            write_queue_capacity: 256,
        }
    }
}

/// A snapshot of the translator counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TranslatorCounters {
    /// Packets written to a destination.
    pub forwarded: u64,
    /// Packets dropped because their SSRC is claimed by another stream.
    pub echoes_dropped: u64,
    /// Entries evicted from a full write queue.
    pub queue_overflows: u64,
    pub malformed: u64,
    /// Failed destination writes.
    pub send_errors: u64,
}

#[derive(Default)]
struct Count(AtomicU64);

impl Count {
    fn add(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct Counters {
    forwarded: Count,
    echoes_dropped: Count,
    malformed: Count,
    send_errors: Count,
}

/// Lets N logical streams share one real RTP session.
///
/// Every packet received on the connector of an attached stream is fed to
/// the shared session and fanned out to the connectors of all the other
/// attached streams. The first stream a SSRC is received on claims it, the
/// same SSRC arriving on another stream afterwards is an echo of a packet
/// the translator forwarded itself and is dropped. Payload types are
/// rewritten per destination through the format tables of the streams.
///
/// Fan-out runs on one writer thread per direction, fed by a bounded queue
/// that evicts its oldest entry when full, so a slow destination never
/// blocks a receive loop.
pub struct Translator {
    session: Arc<dyn RtpSession>,
    streams: RwLock<Vec<Arc<StreamDescriptor>>>,
    // Serializes the check-and-claim of receive SSRCs across streams.
    claims: Mutex<()>,
    send_streams: Mutex<Vec<Arc<SendStreamDescriptor>>>,
    data_queue: Arc<WriteQueue>,
    control_queue: Arc<WriteQueue>,
    writers: Mutex<Vec<JoinHandle<()>>>,
    session_listener: Mutex<Option<Arc<dyn ReceiveStreamListener>>>,
    counters: Counters,
    ids: AtomicU64,
    disposed: AtomicBool,
}

impl Translator {
    pub fn new(session: Arc<dyn RtpSession>, options: TranslatorOptions) -> Result<Arc<Self>, Error> {
        let this = Arc::new(Self {
            data_queue: Arc::new(WriteQueue::new(
                StreamKind::Data,
                options.write_queue_capacity,
            )),
            control_queue: Arc::new(WriteQueue::new(
                StreamKind::Control,
                options.write_queue_capacity,
            )),
            streams: RwLock::new(Vec::with_capacity(8)),
            claims: Mutex::new(()),
            send_streams: Mutex::new(Vec::with_capacity(4)),
            writers: Mutex::new(Vec::with_capacity(2)),
            session_listener: Mutex::new(None),
            counters: Counters::default(),
            ids: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            session,
        });

        this.session
            .initialize(Arc::new(TranslatorTransport(Arc::downgrade(&this))))?;

        // Receive stream events of the shared session are routed to the
        // stream that claims the event SSRC.
        let listener: Arc<dyn ReceiveStreamListener> = {
            let this_ = Arc::downgrade(&this);
            Arc::new(move |event: &ReceiveStreamEvent| {
                if let Some(this) = this_.upgrade() {
                    this.route_event(event);
                }
            })
        };

        this.session.add_receive_stream_listener(listener.clone());
        *this.session_listener.lock() = Some(listener);

        for kind in [StreamKind::Data, StreamKind::Control] {
            let handle = Self::spawn_writer(&this, kind)?;
            this.writers.lock().push(handle);
        }

        Ok(this)
    }

    fn queue(&self, kind: StreamKind) -> &Arc<WriteQueue> {
        match kind {
            StreamKind::Data => &self.data_queue,
            StreamKind::Control => &self.control_queue,
        }
    }

    fn spawn_writer(this: &Arc<Self>, kind: StreamKind) -> Result<JoinHandle<()>, Error> {
        let queue = this.queue(kind).clone();
        let this_ = Arc::downgrade(this);

        let handle = thread::Builder::new()
            .name(format!("translator-{}-writer", kind))
            .spawn(move || {
                while let Some(entry) = queue.pop() {
                    let Some(this) = this_.upgrade() else {
                        break;
                    };

                    this.deliver(kind, entry);
                }

                log::info!("translator writer exited: kind={}", kind);
            })?;

        Ok(handle)
    }

    /// Writes one entry to every destination except the one it came from.
    fn deliver(&self, kind: StreamKind, entry: WriteEntry) {
        let streams = self.streams.read().clone();

        for stream in streams {
            if entry.exclusion == Some(stream.id) {
                continue;
            }

            let mut packet = Packet::new(&entry.bytes);
            if let Some(format) = &entry.format {
                // Without a mapping for the format the source payload type
                // is kept.
                if let Some(pt) = stream.payload_type(format) {
                    if let Err(e) = packet.set_payload_type(pt) {
                        log::trace!("translator rewrite payload type failed: err={}", e);
                    }
                }
            }

            match stream.output(kind).write(packet.as_bytes()) {
                Ok(_) => {
                    self.counters.forwarded.add();
                    stream.notify_packet(kind, &packet);
                }
                Err(e) => {
                    self.counters.send_errors.add();
                    log::warn!(
                        "translator write failed: kind={}, stream={}, err={}",
                        kind,
                        stream.id,
                        e
                    );
                }
            }
        }
    }

    fn stream(&self, id: StreamId) -> Result<Arc<StreamDescriptor>, Error> {
        self.streams
            .read()
            .iter()
            .find(|it| it.id == id)
            .cloned()
            .ok_or(Error::UnknownStream)
    }

    /// Claims the SSRC for the stream unless another stream already did.
    fn claim(&self, stream: &StreamDescriptor, ssrc: u32) -> bool {
        if stream.contains_ssrc(ssrc) {
            return true;
        }

        let _guard = self.claims.lock();
        let claimed_elsewhere = self
            .streams
            .read()
            .iter()
            .any(|it| it.id != stream.id && it.contains_ssrc(ssrc));

        if claimed_elsewhere {
            return false;
        }

        stream.claim_ssrc(ssrc);
        log::info!("translator ssrc claimed: stream={}, ssrc={}", stream.id, ssrc);
        true
    }

    fn on_receive(&self, kind: StreamKind, stream: &StreamDescriptor, packet: &mut Packet) {
        if self.disposed.load(Ordering::Relaxed) {
            return;
        }

        let format = match kind {
            StreamKind::Data => {
                let Ok(ssrc) = packet.ssrc() else {
                    self.counters.malformed.add();
                    return;
                };

                if !self.claim(stream, ssrc) {
                    self.counters.echoes_dropped.add();
                    log::trace!("translator drop echo: stream={}, ssrc={}", stream.id, ssrc);
                    return;
                }

                packet
                    .payload_type()
                    .ok()
                    .and_then(|pt| stream.format(pt))
            }
            StreamKind::Control => {
                if packet.rtcp_ssrc().is_err() {
                    self.counters.malformed.add();
                    return;
                }

                None
            }
        };

        let entry = WriteEntry {
            bytes: packet.to_bytes(),
            exclusion: Some(stream.id),
            format,
        };

        if let Err(e) = self.queue(kind).push(entry) {
            log::trace!("translator enqueue failed: kind={}, err={}", kind, e);
        }

        self.session.receive(kind, packet);
    }

    fn route_event(&self, event: &ReceiveStreamEvent) {
        let ssrc = event.ssrc();
        let streams = self
            .streams
            .read()
            .iter()
            .filter(|it| it.contains_ssrc(ssrc))
            .cloned()
            .collect::<Vec<_>>();

        for stream in streams {
            stream.notify(event);

            if let ReceiveStreamEvent::Bye { .. } = event {
                stream.release_ssrc(ssrc);
            }
        }
    }

    /// Attaches the connector of a stream, its input channels feed the
    /// translator and its output channels join the fan-out.
    pub fn attach(self: &Arc<Self>, connector: Arc<dyn Connector>) -> Result<StreamId, Error> {
        if self.disposed.load(Ordering::Relaxed) {
            return Err(Error::Disposed);
        }

        let id = StreamId(self.ids.fetch_add(1, Ordering::Relaxed) + 1);
        let stream = Arc::new(StreamDescriptor::new(
            id,
            connector.clone(),
            connector.data_output()?,
            connector.control_output()?,
        ));

        for kind in [StreamKind::Data, StreamKind::Control] {
            let this_ = Arc::downgrade(self);
            let stream_ = Arc::downgrade(&stream);

            connector.input(kind)?.set_sink(Arc::new(move |packet: &mut Packet| {
                if let (Some(this), Some(stream)) = (this_.upgrade(), stream_.upgrade()) {
                    this.on_receive(kind, &stream, packet);
                }
            }));
        }

        self.streams.write().push(stream);

        log::info!("translator stream attached: stream={}", id);
        Ok(id)
    }

    /// Removes the stream from the fan-out, closes its send streams and its
    /// connector.
    pub fn detach(&self, id: StreamId) -> Result<(), Error> {
        let stream = {
            let mut streams = self.streams.write();
            let index = streams
                .iter()
                .position(|it| it.id == id)
                .ok_or(Error::UnknownStream)?;

            streams.remove(index)
        };

        let wrappers = self
            .send_streams
            .lock()
            .iter()
            .flat_map(|it| it.wrappers(Some(id)))
            .collect::<Vec<_>>();

        for wrapper in wrappers {
            wrapper.close();
        }

        stream.clear();
        stream.connector.close();

        log::info!("translator stream detached: stream={}", id);
        Ok(())
    }

    pub fn add_format(&self, id: StreamId, payload_type: u8, format: Format) -> Result<(), Error> {
        if self.stream(id)?.add_format(payload_type, format.clone()) {
            self.session.add_format(payload_type, format);
        }

        Ok(())
    }

    pub fn add_receive_stream_listener(
        &self,
        id: StreamId,
        listener: Arc<dyn ReceiveStreamListener>,
    ) -> Result<(), Error> {
        self.stream(id)?.add_listener(listener);
        Ok(())
    }

    pub fn remove_receive_stream_listener(
        &self,
        id: StreamId,
        listener: &Arc<dyn ReceiveStreamListener>,
    ) -> Result<(), Error> {
        self.stream(id)?.remove_listener(listener);
        Ok(())
    }

    /// The listener observes every packet the translator writes to the
    /// connector of the stream, after payload type rewriting.
    pub fn add_packet_listener(
        &self,
        id: StreamId,
        listener: Arc<dyn PacketListener>,
    ) -> Result<(), Error> {
        self.stream(id)?.add_packet_listener(listener);
        Ok(())
    }

    /// The receive streams of the shared session whose SSRC the stream
    /// claims.
    pub fn receive_streams(&self, id: StreamId) -> Result<Vec<u32>, Error> {
        let stream = self.stream(id)?;

        Ok(self
            .session
            .receive_streams()
            .into_iter()
            .filter(|it| stream.contains_ssrc(*it))
            .collect())
    }

    /// The SSRCs claimed by the stream.
    pub fn claimed_ssrcs(&self, id: StreamId) -> Result<Vec<u32>, Error> {
        Ok(self.stream(id)?.ssrcs())
    }

    /// Returns the wrapper of the stream for the shared send stream of the
    /// (data source, stream index) pair, creating the shared stream on
    /// first use.
    pub fn create_send_stream(
        &self,
        id: StreamId,
        data_source: DataSourceId,
        stream_index: usize,
    ) -> Result<Arc<TranslatedSendStream>, Error> {
        if self.disposed.load(Ordering::Relaxed) {
            return Err(Error::Disposed);
        }

        self.stream(id)?;

        let mut send_streams = self.send_streams.lock();
        send_streams.retain(|it| !it.is_closed());

        if let Some(descriptor) = send_streams
            .iter()
            .find(|it| it.matches(data_source, stream_index))
            .cloned()
        {
            if let Some(wrapper) = descriptor.wrap(id) {
                return Ok(wrapper);
            }

            // The last wrapper was closed concurrently, the shared stream is
            // gone and a new one takes its place.
            send_streams.retain(|it| !it.is_closed());
        }

        let stream = self.session.create_send_stream(data_source, stream_index)?;
        let descriptor = SendStreamDescriptor::new(data_source, stream_index, stream);
        send_streams.push(descriptor.clone());

        descriptor.wrap(id).ok_or(Error::SendStreamClosed)
    }

    pub fn send_streams(&self, id: StreamId) -> Result<Vec<Arc<TranslatedSendStream>>, Error> {
        self.stream(id)?;

        Ok(self
            .send_streams
            .lock()
            .iter()
            .flat_map(|it| it.wrappers(Some(id)))
            .collect())
    }

    pub fn local_ssrc(&self) -> u32 {
        self.session.local_ssrc()
    }

    pub fn stats(&self) -> GlobalStats {
        self.session.stats()
    }

    pub fn counters(&self) -> TranslatorCounters {
        TranslatorCounters {
            forwarded: self.counters.forwarded.get(),
            echoes_dropped: self.counters.echoes_dropped.get(),
            queue_overflows: self.data_queue.dropped() + self.control_queue.dropped(),
            malformed: self.counters.malformed.get(),
            send_errors: self.counters.send_errors.get(),
        }
    }

    pub fn streams(&self) -> Vec<StreamId> {
        self.streams.read().iter().map(|it| it.id).collect()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Relaxed)
    }

    /// Detaches every stream, stops both writer threads once they drained
    /// their queue and disposes the shared session.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::Relaxed) {
            return;
        }

        for id in self.streams() {
            if let Err(e) = self.detach(id) {
                log::warn!("translator detach failed: stream={}, err={}", id, e);
            }
        }

        let wrappers = self
            .send_streams
            .lock()
            .drain(..)
            .flat_map(|it| it.wrappers(None))
            .collect::<Vec<_>>();

        for wrapper in wrappers {
            wrapper.close();
        }

        self.data_queue.close();
        self.control_queue.close();

        let current = thread::current().id();
        for handle in self.writers.lock().drain(..) {
            if handle.thread().id() != current && handle.join().is_err() {
                log::error!("translator writer panicked");
            }
        }

        if let Some(listener) = self.session_listener.lock().take() {
            self.session.remove_receive_stream_listener(&listener);
        }

        self.session.dispose();
        log::info!("translator disposed");
    }
}

/// Packets produced by the shared session go to every attached connector,
/// without exclusion or payload type rewriting.
struct TranslatorTransport(Weak<Translator>);

impl SessionTransport for TranslatorTransport {
    fn write(&self, kind: StreamKind, bytes: &[u8]) -> Result<usize, Error> {
        let this = self.0.upgrade().ok_or(Error::Disposed)?;
        if this.is_disposed() {
            return Err(Error::Disposed);
        }

        this.queue(kind).push(WriteEntry {
            bytes: bytes::Bytes::copy_from_slice(bytes),
            exclusion: None,
            format: None,
        })?;

        Ok(bytes.len())
    }
}
