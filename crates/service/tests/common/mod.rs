#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::{BufMut, BytesMut};
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::RwLock;
use rtp_translator_service::*;

pub const WAIT: Duration = Duration::from_millis(1000);
pub const SILENCE: Duration = Duration::from_millis(100);

#[derive(Default)]
pub struct MemoryInput {
    sink: RwLock<Option<Arc<dyn PacketSink>>>,
    closed: AtomicBool,
}

impl MemoryInput {
    /// Hands the bytes to the registered sink, as the receive loop of a real
    /// channel would.
    pub fn inject(&self, bytes: &[u8]) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }

        let mut packet = Packet::new(bytes);
        if let Some(sink) = self.sink.read().clone() {
            sink.on_packet(&mut packet);
        }
    }
}

impl InputChannel for MemoryInput {
    fn set_sink(&self, sink: Arc<dyn PacketSink>) {
        *self.sink.write() = Some(sink);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

pub struct MemoryOutput {
    sender: Sender<Vec<u8>>,
    receiver: Receiver<Vec<u8>>,
}

impl Default for MemoryOutput {
    fn default() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }
}

impl MemoryOutput {
    pub fn recv(&self) -> Option<Vec<u8>> {
        self.receiver.recv_timeout(WAIT).ok()
    }

    /// True if nothing is written for a short while.
    pub fn is_silent(&self) -> bool {
        self.receiver.recv_timeout(SILENCE).is_err()
    }
}

impl OutputChannel for MemoryOutput {
    fn write(&self, bytes: &[u8]) -> Result<usize, Error> {
        self.sender
            .send(bytes.to_vec())
            .map_err(|_| Error::Closed)?;

        Ok(bytes.len())
    }
}

#[derive(Default)]
pub struct MemoryConnector {
    pub data_input: Arc<MemoryInput>,
    pub control_input: Arc<MemoryInput>,
    pub data_output: Arc<MemoryOutput>,
    pub control_output: Arc<MemoryOutput>,
    closed: AtomicBool,
}

impl MemoryConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

impl Connector for MemoryConnector {
    fn data_input(&self) -> Result<Arc<dyn InputChannel>, Error> {
        Ok(self.data_input.clone() as Arc<dyn InputChannel>)
    }

    fn control_input(&self) -> Result<Arc<dyn InputChannel>, Error> {
        Ok(self.control_input.clone() as Arc<dyn InputChannel>)
    }

    fn data_output(&self) -> Result<Arc<dyn OutputChannel>, Error> {
        Ok(self.data_output.clone() as Arc<dyn OutputChannel>)
    }

    fn control_output(&self) -> Result<Arc<dyn OutputChannel>, Error> {
        Ok(self.control_output.clone() as Arc<dyn OutputChannel>)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::Relaxed) {
            self.data_input.close();
            self.control_input.close();
        }
    }
}

pub fn rtp(ssrc: u32, payload_type: u8, sequence_number: u16, payload: &[u8]) -> Vec<u8> {
    let mut bytes = BytesMut::with_capacity(12 + payload.len());
    bytes.put_u8(0x80);
    bytes.put_u8(payload_type);
    bytes.put_u16(sequence_number);
    bytes.put_u32(160 * sequence_number as u32);
    bytes.put_u32(ssrc);
    bytes.put_slice(payload);
    bytes.to_vec()
}

/// A receiver report from `ssrc` with one block about `source`.
pub fn receiver_report(ssrc: u32, source: u32) -> Vec<u8> {
    let mut bytes = BytesMut::with_capacity(32);
    bytes.put_u8(0x81);
    bytes.put_u8(201);
    bytes.put_u16(7);
    bytes.put_u32(ssrc);
    bytes.put_u32(source);
    bytes.put_u32(0x0a00_0002);
    bytes.put_u32(100);
    bytes.put_u32(12);
    bytes.put_u32(0);
    bytes.put_u32(0);
    bytes.to_vec()
}

pub fn bye(ssrc: u32) -> Vec<u8> {
    let mut bytes = BytesMut::with_capacity(8);
    bytes.put_u8(0x81);
    bytes.put_u8(203);
    bytes.put_u16(1);
    bytes.put_u32(ssrc);
    bytes.to_vec()
}
