use num_enum::TryFromPrimitive;

use crate::Error;

const VERSION_MASK: u8 = 0b11000000;
const PADDING_MASK: u8 = 0b00100000;
const COUNT_MASK: u8 = 0b00011111;

pub const HEADER_SIZE: usize = 4;
pub const REPORT_BLOCK_SIZE: usize = 24;
const SENDER_INFO_SIZE: usize = 20;

/// RTCP packet type.
#[repr(u8)]
#[derive(TryFromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    SenderReport = 200,
    ReceiverReport = 201,
    SourceDescription = 202,
    Bye = 203,
    App = 204,
}

/// One individual packet of a compound RTCP packet.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|    RC   |      PT       |             length            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         SSRC of sender                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RtcpHeader<'a> {
    bytes: &'a [u8],
}

impl<'a> RtcpHeader<'a> {
    pub fn version(&self) -> u8 {
        (self.bytes[0] & VERSION_MASK) >> 6
    }

    pub fn has_padding(&self) -> bool {
        self.bytes[0] & PADDING_MASK != 0
    }

    /// reception report count (RC): 5 bits, or the source count of a BYE
    /// and SDES packet.
    pub fn count(&self) -> usize {
        (self.bytes[0] & COUNT_MASK) as usize
    }

    /// The raw packet type byte, feedback messages (205, 206) and other
    /// extensions are not listed in [`PacketType`].
    pub fn kind(&self) -> u8 {
        self.bytes[1]
    }

    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::try_from(self.bytes[1]).ok()
    }

    /// The length of this RTCP packet in bytes, derived from the length
    /// field (32-bit words minus one).
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// The SSRC of the originator, absent for an empty packet.
    pub fn ssrc(&self) -> Option<u32> {
        read_u32(self.bytes, HEADER_SIZE).ok()
    }

    /// The report blocks of a SR or RR packet.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_translator_codec::rtcp::*;
    ///
    /// let buffer = [
    ///     0x81, 0xc9, 0x00, 0x07, 0x00, 0x00, 0x04, 0x57,
    ///     0x00, 0x00, 0x08, 0xae, 0x10, 0x00, 0x00, 0x03,
    ///     0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x20,
    ///     0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    /// ];
    ///
    /// let header = RtcpIter::new(&buffer).next().unwrap().unwrap();
    /// assert_eq!(header.packet_type(), Some(PacketType::ReceiverReport));
    /// assert_eq!(header.ssrc(), Some(1111));
    ///
    /// let blocks = header.report_blocks().unwrap();
    /// assert_eq!(blocks.len(), 1);
    /// assert_eq!(blocks[0].ssrc, 2222);
    /// assert_eq!(blocks[0].fraction_lost, 0x10);
    /// assert_eq!(blocks[0].cumulative_lost, 3);
    /// assert_eq!(blocks[0].highest_sequence, 256);
    /// assert_eq!(blocks[0].jitter, 32);
    /// ```
    pub fn report_blocks(&self) -> Result<Vec<ReportBlock>, Error> {
        let start = match self.packet_type() {
            Some(PacketType::SenderReport) => HEADER_SIZE + 4 + SENDER_INFO_SIZE,
            Some(PacketType::ReceiverReport) => HEADER_SIZE + 4,
            _ => return Ok(Vec::new()),
        };

        let end = start + self.count() * REPORT_BLOCK_SIZE;
        if end > self.bytes.len() {
            return Err(Error::MalformedPacket);
        }

        self.bytes[start..end]
            .chunks_exact(REPORT_BLOCK_SIZE)
            .map(ReportBlock::try_from)
            .collect()
    }

    /// The sources leaving the session, listed by a BYE packet.
    pub fn bye_sources(&self) -> Result<Vec<u32>, Error> {
        if self.packet_type() != Some(PacketType::Bye) {
            return Ok(Vec::new());
        }

        (0..self.count())
            .map(|index| read_u32(self.bytes, HEADER_SIZE + index * 4))
            .collect()
    }
}

/// Walks the individual packets of a compound RTCP packet.
///
/// The iterator stops after the first malformed packet, which it yields as
/// an error.
pub struct RtcpIter<'a> {
    bytes: &'a [u8],
    failed: bool,
}

impl<'a> RtcpIter<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            failed: false,
            bytes,
        }
    }
}

impl<'a> Iterator for RtcpIter<'a> {
    type Item = Result<RtcpHeader<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.bytes.is_empty() {
            return None;
        }

        if self.bytes.len() < HEADER_SIZE {
            self.failed = true;
            return Some(Err(Error::MalformedPacket));
        }

        if (self.bytes[0] & VERSION_MASK) >> 6 != 2 {
            self.failed = true;
            return Some(Err(Error::InvalidVersion));
        }

        let size = (u16::from_be_bytes([self.bytes[2], self.bytes[3]]) as usize + 1) * 4;
        if size > self.bytes.len() {
            self.failed = true;
            return Some(Err(Error::MalformedPacket));
        }

        let (packet, rest) = self.bytes.split_at(size);
        self.bytes = rest;

        Some(Ok(RtcpHeader { bytes: packet }))
    }
}

/// # Report Block
///
/// ```text
///  +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
///  |                 SSRC_1 (SSRC of first source)                 |
///  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  | fraction lost |       cumulative number of packets lost       |
///  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  |           extended highest sequence number received           |
///  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  |                      interarrival jitter                      |
///  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  |                         last SR (LSR)                         |
///  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  |                   delay since last SR (DLSR)                  |
///  +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportBlock {
    /// The SSRC identifier of the source to which the information in this
    /// reception report block pertains.
    pub ssrc: u32,
    /// The fraction of RTP data packets from source SSRC_n lost since the
    /// previous SR or RR packet was sent, expressed as a fixed point
    /// number with the binary point at the left edge of the field.
    pub fraction_lost: u8,
    /// The total number of RTP data packets from source SSRC_n that have
    /// been lost since the beginning of reception (24 bits).
    pub cumulative_lost: u32,
    pub highest_sequence: u32,
    /// An estimate of the statistical variance of the RTP data packet
    /// interarrival time, measured in timestamp units.
    pub jitter: u32,
    pub last_sender_report: u32,
    pub delay_since_last_sender_report: u32,
}

impl TryFrom<&[u8]> for ReportBlock {
    type Error = Error;

    fn try_from(buf: &[u8]) -> Result<Self, Self::Error> {
        if buf.len() < REPORT_BLOCK_SIZE {
            return Err(Error::MalformedPacket);
        }

        Ok(Self {
            ssrc: read_u32(buf, 0)?,
            fraction_lost: buf[4],
            cumulative_lost: read_u32(buf, 4)? & 0x00FF_FFFF,
            highest_sequence: read_u32(buf, 8)?,
            jitter: read_u32(buf, 12)?,
            last_sender_report: read_u32(buf, 16)?,
            delay_since_last_sender_report: read_u32(buf, 20)?,
        })
    }
}

fn read_u32(buf: &[u8], at: usize) -> Result<u32, Error> {
    let bytes = buf.get(at..at + 4).ok_or(Error::MalformedPacket)?;
    Ok(u32::from_be_bytes(bytes.try_into()?))
}

/// Extracts every SSRC a compound RTCP packet reports about: the sender of
/// each SR/RR, the sources of every report block and the BYE sources.
pub fn ssrcs(bytes: &[u8]) -> Result<Vec<u32>, Error> {
    let mut list = Vec::with_capacity(4);
    let mut push = |ssrc: u32| {
        if !list.contains(&ssrc) {
            list.push(ssrc);
        }
    };

    for header in RtcpIter::new(bytes) {
        let header = header?;

        if let Some(ssrc) = header.ssrc() {
            push(ssrc);
        }

        for block in header.report_blocks()? {
            push(block.ssrc);
        }

        for ssrc in header.bye_sources()? {
            push(ssrc);
        }
    }

    Ok(list)
}
