use std::{fmt, sync::Arc};

use parking_lot::RwLock;

use crate::{
    Connector, OutputChannel, Packet, StreamKind,
    format::{Format, FormatTable},
    session::{PacketListener, ReceiveStreamEvent, ReceiveStreamListener},
};

/// The identity of a stream attached to a translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub(crate) u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per stream translator state.
pub(crate) struct StreamDescriptor {
    pub id: StreamId,
    pub connector: Arc<dyn Connector>,
    data_output: Arc<dyn OutputChannel>,
    control_output: Arc<dyn OutputChannel>,
    // Receive SSRCs claimed by this stream, a SSRC is claimed by at most one
    // stream of the translator.
    ssrcs: RwLock<Vec<u32>>,
    formats: RwLock<FormatTable>,
    listeners: RwLock<Vec<Arc<dyn ReceiveStreamListener>>>,
    packet_listeners: RwLock<Vec<Arc<dyn PacketListener>>>,
}

impl StreamDescriptor {
    pub fn new(
        id: StreamId,
        connector: Arc<dyn Connector>,
        data_output: Arc<dyn OutputChannel>,
        control_output: Arc<dyn OutputChannel>,
    ) -> Self {
        Self {
            ssrcs: RwLock::new(Vec::with_capacity(4)),
            formats: RwLock::new(FormatTable::default()),
            listeners: RwLock::new(Vec::with_capacity(4)),
            packet_listeners: RwLock::new(Vec::new()),
            control_output,
            data_output,
            connector,
            id,
        }
    }

    pub fn output(&self, kind: StreamKind) -> &Arc<dyn OutputChannel> {
        match kind {
            StreamKind::Data => &self.data_output,
            StreamKind::Control => &self.control_output,
        }
    }

    pub fn contains_ssrc(&self, ssrc: u32) -> bool {
        self.ssrcs.read().contains(&ssrc)
    }

    pub fn claim_ssrc(&self, ssrc: u32) {
        let mut ssrcs = self.ssrcs.write();
        if !ssrcs.contains(&ssrc) {
            ssrcs.push(ssrc);
        }
    }

    pub fn release_ssrc(&self, ssrc: u32) {
        self.ssrcs.write().retain(|it| *it != ssrc);
    }

    pub fn ssrcs(&self) -> Vec<u32> {
        self.ssrcs.read().clone()
    }

    pub fn add_format(&self, payload_type: u8, format: Format) -> bool {
        self.formats.write().insert(payload_type, format)
    }

    pub fn format(&self, payload_type: u8) -> Option<Format> {
        self.formats.read().get(payload_type).cloned()
    }

    pub fn payload_type(&self, format: &Format) -> Option<u8> {
        self.formats.read().payload_type(format)
    }

    pub fn add_listener(&self, listener: Arc<dyn ReceiveStreamListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|it| Arc::ptr_eq(it, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ReceiveStreamListener>) {
        self.listeners.write().retain(|it| !Arc::ptr_eq(it, listener));
    }

    pub fn add_packet_listener(&self, listener: Arc<dyn PacketListener>) {
        self.packet_listeners.write().push(listener);
    }

    pub fn notify(&self, event: &ReceiveStreamEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_event(event);
        }
    }

    pub fn notify_packet(&self, kind: StreamKind, packet: &Packet) {
        let listeners = self.packet_listeners.read().clone();
        for listener in listeners {
            listener.on_packet(kind, packet);
        }
    }

    pub fn clear(&self) {
        self.listeners.write().clear();
        self.packet_listeners.write().clear();
        self.ssrcs.write().clear();
        self.formats.write().clear();
    }
}
