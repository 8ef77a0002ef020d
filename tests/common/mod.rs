#![allow(dead_code)]

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket},
    time::Duration,
};

use anyhow::Result;
use bytes::{BufMut, BytesMut};
use rtp_translator::{config::TransportOptions, prelude::PortRange};

pub const WAIT: Duration = Duration::from_millis(1000);
pub const SILENCE: Duration = Duration::from_millis(100);

pub fn options() -> TransportOptions {
    TransportOptions {
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port_range: PortRange::from(40000..49999),
        poll_interval: 20,
        ..Default::default()
    }
}

/// A remote endpoint on the loopback interface.
pub struct Peer(UdpSocket);

impl Peer {
    pub fn new() -> Result<Self> {
        Ok(Self(UdpSocket::bind("127.0.0.1:0")?))
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        Ok(self.0.local_addr()?)
    }

    pub fn send(&self, bytes: &[u8], to: SocketAddr) -> Result<()> {
        self.0.send_to(bytes, to)?;
        Ok(())
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.0.set_read_timeout(Some(timeout)).ok()?;

        let mut buffer = [0u8; 1500];
        let (size, _) = self.0.recv_from(&mut buffer).ok()?;
        Some(buffer[..size].to_vec())
    }

    pub fn recv(&self) -> Option<Vec<u8>> {
        self.recv_timeout(WAIT)
    }

    pub fn is_silent(&self) -> bool {
        self.recv_timeout(SILENCE).is_none()
    }
}

pub fn rtp(ssrc: u32, payload_type: u8, sequence_number: u16, payload: &[u8]) -> Vec<u8> {
    let mut bytes = BytesMut::with_capacity(12 + payload.len());
    bytes.put_u8(0x80);
    bytes.put_u8(payload_type);
    bytes.put_u16(sequence_number);
    bytes.put_u32(3000 * sequence_number as u32);
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
    bytes.put_u32(0);
    bytes.put_u32(1);
    bytes.put_u32(0);
    bytes.put_u32(0);
    bytes.put_u32(0);
    bytes.to_vec()
}
