use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering},
};

use bytes::{BufMut, BytesMut};
use codec::{
    packet::FIXED_HEADER_SIZE,
    rtcp::{PacketType, ReportBlock, RtcpIter},
};
use parking_lot::{Mutex, RwLock};
use rand::Rng;

use crate::{
    Connector, Error, Packet, StreamKind,
    format::{Format, FormatTable},
};

/// The identity of a capture source, shared by every send stream that emits
/// the same physical stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataSourceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStreamEvent {
    /// The first data packet of a new synchronization source.
    NewReceiveStream { ssrc: u32 },
    /// A sender or receiver report sent by the source.
    Report { ssrc: u32 },
    /// The source left the session.
    Bye { ssrc: u32 },
}

impl ReceiveStreamEvent {
    pub fn ssrc(&self) -> u32 {
        match self {
            Self::NewReceiveStream { ssrc } | Self::Report { ssrc } | Self::Bye { ssrc } => *ssrc,
        }
    }
}

pub trait ReceiveStreamListener: Send + Sync {
    fn on_event(&self, event: &ReceiveStreamEvent);
}

impl<F> ReceiveStreamListener for F
where
    F: Fn(&ReceiveStreamEvent) + Send + Sync,
{
    fn on_event(&self, event: &ReceiveStreamEvent) {
        self(event)
    }
}

/// Observes packets after they were written to a connector.
pub trait PacketListener: Send + Sync {
    fn on_packet(&self, kind: StreamKind, packet: &Packet);
}

impl<F> PacketListener for F
where
    F: Fn(StreamKind, &Packet) + Send + Sync,
{
    fn on_packet(&self, kind: StreamKind, packet: &Packet) {
        self(kind, packet)
    }
}

/// The statistics collaborator, receives the report blocks of every sender
/// and receiver report.
pub trait ReportObserver: Send + Sync {
    fn on_report(&self, sender: u32, blocks: &[ReportBlock]);
}

/// Where a session writes the packets it produces.
pub trait SessionTransport: Send + Sync {
    fn write(&self, kind: StreamKind, bytes: &[u8]) -> Result<usize, Error>;
}

/// An outbound RTP stream.
pub trait SendStream: Send + Sync {
    fn ssrc(&self) -> u32;

    fn data_source(&self) -> DataSourceId;

    fn stream_index(&self) -> usize;

    fn start(&self) -> Result<(), Error>;

    fn stop(&self) -> Result<(), Error>;

    fn is_started(&self) -> bool;

    /// Packetizes and sends one payload. Nothing is sent while the stream is
    /// stopped, in which case zero is returned.
    fn write(
        &self,
        payload_type: u8,
        payload: &[u8],
        timestamp: u32,
        marker: bool,
    ) -> Result<usize, Error>;

    fn close(&self);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GlobalStats {
    pub received_packets: u64,
    pub received_bytes: u64,
    pub malformed_packets: u64,
    pub sent_packets: u64,
    pub sent_bytes: u64,
    pub bye_packets: u64,
}

/// The RTP session shared by a translator, or owned by an unattached stream
/// handle.
pub trait RtpSession: Send + Sync {
    /// Binds the session to the transport its own packets are written to.
    fn initialize(&self, transport: Arc<dyn SessionTransport>) -> Result<(), Error>;

    /// Feeds a received packet into the session.
    fn receive(&self, kind: StreamKind, packet: &Packet);

    fn add_format(&self, payload_type: u8, format: Format);

    fn add_receive_stream_listener(&self, listener: Arc<dyn ReceiveStreamListener>);

    fn remove_receive_stream_listener(&self, listener: &Arc<dyn ReceiveStreamListener>);

    fn create_send_stream(
        &self,
        data_source: DataSourceId,
        stream_index: usize,
    ) -> Result<Arc<dyn SendStream>, Error>;

    /// The synchronization sources the session receives from.
    fn receive_streams(&self) -> Vec<u32>;

    fn send_streams(&self) -> Vec<Arc<dyn SendStream>>;

    fn local_ssrc(&self) -> u32;

    fn stats(&self) -> GlobalStats;

    fn dispose(&self);
}

#[derive(Default)]
struct Counters {
    received_packets: AtomicU64,
    received_bytes: AtomicU64,
    malformed_packets: AtomicU64,
    sent_packets: AtomicU64,
    sent_bytes: AtomicU64,
    bye_packets: AtomicU64,
}

impl Counters {
    fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    fn snapshot(&self) -> GlobalStats {
        GlobalStats {
            received_packets: self.received_packets.load(Ordering::Relaxed),
            received_bytes: self.received_bytes.load(Ordering::Relaxed),
            malformed_packets: self.malformed_packets.load(Ordering::Relaxed),
            sent_packets: self.sent_packets.load(Ordering::Relaxed),
            sent_bytes: self.sent_bytes.load(Ordering::Relaxed),
            bye_packets: self.bye_packets.load(Ordering::Relaxed),
        }
    }
}

type SharedTransport = Arc<RwLock<Option<Arc<dyn SessionTransport>>>>;

#[derive(Default)]
pub struct SessionOptions {
    /// Random if not set.
    pub local_ssrc: Option<u32>,
    pub report_observer: Option<Arc<dyn ReportObserver>>,
}

/// The default RTP session.
///
/// Tracks the synchronization sources it receives from, turns received
/// RTCP into receive stream events and packetizes the payloads of its send
/// streams.
pub struct Session {
    local_ssrc: u32,
    transport: SharedTransport,
    formats: RwLock<FormatTable>,
    listeners: RwLock<Vec<Arc<dyn ReceiveStreamListener>>>,
    receive_streams: RwLock<Vec<u32>>,
    send_streams: Mutex<Vec<Arc<LocalSendStream>>>,
    observer: Option<Arc<dyn ReportObserver>>,
    counters: Arc<Counters>,
    disposed: AtomicBool,
}

impl Session {
    pub fn new(options: SessionOptions) -> Arc<Self> {
        Arc::new(Self {
            local_ssrc: options.local_ssrc.unwrap_or_else(|| rand::rng().random()),
            transport: Arc::new(RwLock::new(None)),
            formats: RwLock::new(FormatTable::default()),
            listeners: RwLock::new(Vec::with_capacity(4)),
            receive_streams: RwLock::new(Vec::with_capacity(8)),
            send_streams: Mutex::new(Vec::with_capacity(4)),
            observer: options.report_observer,
            counters: Arc::new(Counters::default()),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn format(&self, payload_type: u8) -> Option<Format> {
        self.formats.read().get(payload_type).cloned()
    }

    fn emit(&self, event: ReceiveStreamEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_event(&event);
        }
    }

    fn receive_data(&self, packet: &Packet) -> Result<(), Error> {
        let ssrc = packet.ssrc()?;
        packet.payload()?;

        if ssrc == self.local_ssrc {
            return Ok(());
        }

        let created = {
            let mut streams = self.receive_streams.write();
            if streams.contains(&ssrc) {
                false
            } else {
                streams.push(ssrc);
                true
            }
        };

        if created {
            log::info!("session new receive stream: ssrc={}", ssrc);
            self.emit(ReceiveStreamEvent::NewReceiveStream { ssrc });
        }

        Ok(())
    }

    fn receive_control(&self, packet: &Packet) -> Result<(), Error> {
        for header in RtcpIter::new(packet.as_bytes()) {
            let header = header?;

            match header.packet_type() {
                Some(PacketType::SenderReport | PacketType::ReceiverReport) => {
                    let Some(sender) = header.ssrc() else {
                        continue;
                    };

                    let blocks = header.report_blocks()?;
                    if let Some(observer) = &self.observer {
                        observer.on_report(sender, &blocks);
                    }

                    self.emit(ReceiveStreamEvent::Report { ssrc: sender });
                }
                Some(PacketType::Bye) => {
                    Counters::add(&self.counters.bye_packets, 1);

                    for ssrc in header.bye_sources()? {
                        self.receive_streams.write().retain(|it| *it != ssrc);

                        log::info!("session receive stream bye: ssrc={}", ssrc);
                        self.emit(ReceiveStreamEvent::Bye { ssrc });
                    }
                }
                _ => (),
            }
        }

        Ok(())
    }
}

impl RtpSession for Session {
    fn initialize(&self, transport: Arc<dyn SessionTransport>) -> Result<(), Error> {
        if self.disposed.load(Ordering::Relaxed) {
            return Err(Error::Disposed);
        }

        *self.transport.write() = Some(transport);
        Ok(())
    }

    fn receive(&self, kind: StreamKind, packet: &Packet) {
        if self.disposed.load(Ordering::Relaxed) {
            return;
        }

        Counters::add(&self.counters.received_packets, 1);
        Counters::add(&self.counters.received_bytes, packet.len() as u64);

        let result = match kind {
            StreamKind::Data => self.receive_data(packet),
            StreamKind::Control => self.receive_control(packet),
        };

        if let Err(e) = result {
            Counters::add(&self.counters.malformed_packets, 1);
            log::trace!("session drop malformed packet: kind={}, err={}", kind, e);
        }
    }

    fn add_format(&self, payload_type: u8, format: Format) {
        self.formats.write().insert(payload_type, format);
    }

    fn add_receive_stream_listener(&self, listener: Arc<dyn ReceiveStreamListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|it| Arc::ptr_eq(it, &listener)) {
            listeners.push(listener);
        }
    }

    fn remove_receive_stream_listener(&self, listener: &Arc<dyn ReceiveStreamListener>) {
        self.listeners.write().retain(|it| !Arc::ptr_eq(it, listener));
    }

    fn create_send_stream(
        &self,
        data_source: DataSourceId,
        stream_index: usize,
    ) -> Result<Arc<dyn SendStream>, Error> {
        if self.disposed.load(Ordering::Relaxed) {
            return Err(Error::Disposed);
        }

        let stream = Arc::new(LocalSendStream {
            sequence_number: AtomicU16::new(rand::rng().random()),
            transport: self.transport.clone(),
            counters: self.counters.clone(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            ssrc: self.local_ssrc,
            stream_index,
            data_source,
        });

        {
            let mut streams = self.send_streams.lock();
            streams.retain(|it| !it.closed.load(Ordering::Relaxed));
            streams.push(stream.clone());
        }

        Ok(stream as Arc<dyn SendStream>)
    }

    fn receive_streams(&self) -> Vec<u32> {
        self.receive_streams.read().clone()
    }

    fn send_streams(&self) -> Vec<Arc<dyn SendStream>> {
        self.send_streams
            .lock()
            .iter()
            .filter(|it| !it.closed.load(Ordering::Relaxed))
            .map(|it| it.clone() as Arc<dyn SendStream>)
            .collect()
    }

    fn local_ssrc(&self) -> u32 {
        self.local_ssrc
    }

    fn stats(&self) -> GlobalStats {
        self.counters.snapshot()
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::Relaxed) {
            return;
        }

        for stream in self.send_streams.lock().drain(..) {
            stream.close();
        }

        self.listeners.write().clear();
        self.receive_streams.write().clear();
        *self.transport.write() = None;

        log::info!("session disposed: ssrc={}", self.local_ssrc);
    }
}

struct LocalSendStream {
    ssrc: u32,
    data_source: DataSourceId,
    stream_index: usize,
    sequence_number: AtomicU16,
    started: AtomicBool,
    closed: AtomicBool,
    transport: SharedTransport,
    counters: Arc<Counters>,
}

impl SendStream for LocalSendStream {
    fn ssrc(&self) -> u32 {
        self.ssrc
    }

    fn data_source(&self) -> DataSourceId {
        self.data_source
    }

    fn stream_index(&self) -> usize {
        self.stream_index
    }

    fn start(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::SendStreamClosed);
        }

        self.started.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::SendStreamClosed);
        }

        self.started.store(false, Ordering::Relaxed);
        Ok(())
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

        let Some(transport) = self.transport.read().clone() else {
            return Err(Error::Closed);
        };

        let mut bytes = BytesMut::with_capacity(FIXED_HEADER_SIZE + payload.len());
        bytes.put_u8(0x80);
        bytes.put_u8(((marker as u8) << 7) | (payload_type & 0x7F));
        bytes.put_u16(self.sequence_number.fetch_add(1, Ordering::Relaxed));
        bytes.put_u32(timestamp);
        bytes.put_u32(self.ssrc);
        bytes.put_slice(payload);

        let size = transport.write(StreamKind::Data, &bytes)?;
        Counters::add(&self.counters.sent_packets, 1);
        Counters::add(&self.counters.sent_bytes, bytes.len() as u64);
        Ok(size)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::Relaxed) {
            self.started.store(false, Ordering::Relaxed);
        }
    }
}

/// Writes the packets of an unattached session straight to its connector.
pub struct ConnectorTransport {
    connector: Arc<dyn Connector>,
    listeners: RwLock<Vec<Arc<dyn PacketListener>>>,
}

impl ConnectorTransport {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            connector,
        }
    }

    pub fn add_packet_listener(&self, listener: Arc<dyn PacketListener>) {
        self.listeners.write().push(listener);
    }
}

impl SessionTransport for ConnectorTransport {
    fn write(&self, kind: StreamKind, bytes: &[u8]) -> Result<usize, Error> {
        let size = self.connector.output(kind)?.write(bytes)?;

        let listeners = self.listeners.read().clone();
        if !listeners.is_empty() {
            let packet = Packet::new(bytes);
            for listener in listeners {
                listener.on_packet(kind, &packet);
            }
        }

        Ok(size)
    }
}
