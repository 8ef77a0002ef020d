use std::ops::Range;

use bytes::{BufMut, Bytes, BytesMut};

use crate::Error;

const VERSION_MASK: u8 = 0b11000000;
const PADDING_MASK: u8 = 0b00100000;
const EXTENSION_MASK: u8 = 0b00010000;
const CSRC_COUNT_MASK: u8 = 0b00001111;
const MARKER_MASK: u8 = 0b10000000;
const PAYLOAD_KIND_MASK: u8 = 0b01111111;

pub const FIXED_HEADER_SIZE: usize = 12;
pub const EXTENSION_HEADER_SIZE: usize = 4;
pub const MAX_CSRC_COUNT: usize = 15;

/// In the one-byte header form of extensions, the 16-bit value required
/// by the RTP specification for a header extension, labeled in the RTP
/// specification as "defined by profile", takes the fixed bit pattern
/// 0xBEDE (the first version of this specification was written on the
/// feast day of the Venerable Bede).
pub const ONE_BYTE_EXTENSION_PROFILE: u16 = 0xBEDE;

/// A raw RTP or RTCP packet.
///
/// The packet is a window (`offset`, `length`) over an owned byte buffer.
/// The window does not have to start at the beginning of the buffer, which
/// allows a receive buffer to be reused across packets without copying.
///
/// ```bash
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  |V=2|P|X|  CC   |M|     PT      |       sequence number         |
///  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  |                           timestamp                           |
///  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  |           synchronization source (SSRC) identifier            |
///  +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
///  |            contributing source (CSRC) identifiers             |
///  |                             ....                              |
///  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Every accessor is checked against the window, reading or writing past
/// the end of the window fails with [`Error::MalformedPacket`].
#[derive(Debug, Clone, Default)]
pub struct Packet {
    buffer: BytesMut,
    offset: usize,
    length: usize,
}

impl Packet {
    /// Creates a packet by copying the given bytes.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_translator_codec::packet::Packet;
    ///
    /// let buffer = [
    ///     0x80, 0x60, 0x04, 0xf1, 0xf8, 0x87, 0x3f, 0xad, 0x67, 0xfe,
    ///     0x9d, 0xfc, 0x01, 0x02, 0x03,
    /// ];
    ///
    /// let packet = Packet::new(&buffer);
    /// assert_eq!(packet.len(), 15);
    /// assert_eq!(packet.version().unwrap(), 2);
    /// assert_eq!(packet.payload_type().unwrap(), 96);
    /// assert_eq!(packet.sequence_number().unwrap(), 1265);
    /// assert_eq!(packet.timestamp().unwrap(), 4169613229);
    /// assert_eq!(packet.ssrc().unwrap(), 1744739836);
    /// assert_eq!(packet.payload().unwrap(), &[0x01, 0x02, 0x03]);
    /// ```
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            buffer: BytesMut::from(bytes),
            length: bytes.len(),
            offset: 0,
        }
    }

    /// Creates an empty packet over a zeroed buffer of the given size, the
    /// buffer is filled by [`Packet::receive_buffer`].
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::zeroed(capacity),
            offset: 0,
            length: 0,
        }
    }

    pub fn with_window(buffer: BytesMut, offset: usize, length: usize) -> Result<Self, Error> {
        match offset.checked_add(length) {
            Some(end) if end <= buffer.len() => Ok(Self {
                buffer,
                offset,
                length,
            }),
            _ => Err(Error::MalformedPacket),
        }
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.length]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[self.offset..self.offset + self.length]
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }

    pub fn into_bytes(mut self) -> BytesMut {
        let mut bytes = self.buffer.split_off(self.offset);
        bytes.truncate(self.length);
        bytes
    }

    /// Resets the window and hands out the whole buffer for the next socket
    /// receive. The buffer is resized back to `capacity` if a previous
    /// mutation changed its size.
    pub fn receive_buffer(&mut self, capacity: usize) -> &mut [u8] {
        if self.buffer.len() != capacity {
            self.buffer.resize(capacity, 0);
        }

        self.offset = 0;
        self.length = 0;
        &mut self.buffer[..]
    }

    /// Sets the window to the first `length` bytes of the buffer.
    pub fn reset(&mut self, length: usize) -> Result<(), Error> {
        if length > self.buffer.len() {
            return Err(Error::MalformedPacket);
        }

        self.offset = 0;
        self.length = length;
        Ok(())
    }

    fn range(&self, at: usize, size: usize) -> Result<Range<usize>, Error> {
        match at.checked_add(size) {
            Some(end) if end <= self.length => Ok(self.offset + at..self.offset + end),
            _ => Err(Error::MalformedPacket),
        }
    }

    pub fn read_region(&self, at: usize, size: usize) -> Result<&[u8], Error> {
        let range = self.range(at, size)?;
        Ok(&self.buffer[range])
    }

    pub fn write_region(&mut self, at: usize, data: &[u8]) -> Result<(), Error> {
        let range = self.range(at, data.len())?;
        self.buffer[range].copy_from_slice(data);
        Ok(())
    }

    pub fn read_u8(&self, at: usize) -> Result<u8, Error> {
        Ok(self.read_region(at, 1)?[0])
    }

    pub fn read_u16(&self, at: usize) -> Result<u16, Error> {
        Ok(u16::from_be_bytes(self.read_region(at, 2)?.try_into()?))
    }

    pub fn read_u32(&self, at: usize) -> Result<u32, Error> {
        Ok(u32::from_be_bytes(self.read_region(at, 4)?.try_into()?))
    }

    pub fn write_u16(&mut self, at: usize, value: u16) -> Result<(), Error> {
        self.write_region(at, &value.to_be_bytes())
    }

    pub fn write_u32(&mut self, at: usize, value: u32) -> Result<(), Error> {
        self.write_region(at, &value.to_be_bytes())
    }

    /// Replaces `remove` bytes at window position `at` with `data`, moving
    /// the tail of the window forward or backward by the size difference.
    fn splice(&mut self, at: usize, remove: usize, data: &[u8]) -> Result<(), Error> {
        let range = self.range(at, remove)?;
        let end = self.offset + self.length;
        let length = self.length - remove + data.len();
        let required = self.offset + length;

        if self.buffer.len() < required {
            self.buffer.resize(required, 0);
        }

        self.buffer
            .copy_within(range.end..end, range.start + data.len());
        self.buffer[range.start..range.start + data.len()].copy_from_slice(data);

        // Only trim the buffer when the window owned its tail, a receive
        // buffer keeps its capacity.
        if end == self.buffer.len() && required < end {
            self.buffer.truncate(required);
        }

        self.length = length;
        Ok(())
    }

    /// Appends bytes at the end of the window, growing the buffer if needed.
    pub fn append(&mut self, data: &[u8]) -> Result<(), Error> {
        self.splice(self.length, 0, data)
    }

    /// Removes `size` bytes from the end of the window.
    pub fn shrink(&mut self, size: usize) -> Result<(), Error> {
        if size > self.length {
            return Err(Error::MalformedPacket);
        }

        self.length -= size;
        Ok(())
    }

    /// Reserves room for `size` more bytes after the window.
    pub fn grow(&mut self, size: usize) {
        let end = self.offset + self.length;
        self.buffer.reserve((end + size).saturating_sub(self.buffer.len()));
    }

    /// The number of bytes the buffer holds without reallocating.
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    fn header_byte(&self, at: usize) -> Result<u8, Error> {
        if self.length < FIXED_HEADER_SIZE {
            return Err(Error::MalformedPacket);
        }

        self.read_u8(at)
    }

    fn set_header_byte(&mut self, at: usize, value: u8) -> Result<(), Error> {
        if self.length < FIXED_HEADER_SIZE {
            return Err(Error::MalformedPacket);
        }

        self.write_region(at, &[value])
    }

    /// This field identifies the version of RTP.  The version defined by
    /// this specification is two (2).
    pub fn version(&self) -> Result<u8, Error> {
        Ok((self.header_byte(0)? & VERSION_MASK) >> 6)
    }

    /// If the padding bit is set, the packet contains one or more
    /// additional padding octets at the end which are not part of the
    /// payload.  The last octet of the padding contains a count of how
    /// many padding octets should be ignored, including itself.
    pub fn has_padding(&self) -> Result<bool, Error> {
        Ok(self.header_byte(0)? & PADDING_MASK != 0)
    }

    /// If the extension bit is set, the fixed header MUST be followed by
    /// exactly one header extension.
    pub fn has_extension(&self) -> Result<bool, Error> {
        Ok(self.header_byte(0)? & EXTENSION_MASK != 0)
    }

    /// The CSRC count contains the number of CSRC identifiers that follow
    /// the fixed header.
    pub fn csrc_count(&self) -> Result<usize, Error> {
        Ok((self.header_byte(0)? & CSRC_COUNT_MASK) as usize)
    }

    /// The interpretation of the marker is defined by a profile.  It is
    /// intended to allow significant events such as frame boundaries to
    /// be marked in the packet stream.
    pub fn is_marker(&self) -> Result<bool, Error> {
        Ok(self.header_byte(1)? & MARKER_MASK != 0)
    }

    /// # Test
    ///
    /// ```
    /// use rtp_translator_codec::packet::Packet;
    ///
    /// let mut packet = Packet::new(&[
    ///     0x80, 0x61, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ///     0x04, 0x57,
    /// ]);
    ///
    /// packet.set_marker(true).unwrap();
    /// assert!(packet.is_marker().unwrap());
    /// assert_eq!(packet.payload_type().unwrap(), 97);
    ///
    /// packet.set_marker(false).unwrap();
    /// assert!(!packet.is_marker().unwrap());
    /// assert_eq!(packet.payload_type().unwrap(), 97);
    /// ```
    pub fn set_marker(&mut self, marker: bool) -> Result<(), Error> {
        let byte = self.header_byte(1)?;
        let byte = if marker {
            byte | MARKER_MASK
        } else {
            byte & !MARKER_MASK
        };

        self.set_header_byte(1, byte)
    }

    /// This field identifies the format of the RTP payload and determines
    /// its interpretation by the application.
    pub fn payload_type(&self) -> Result<u8, Error> {
        Ok(self.header_byte(1)? & PAYLOAD_KIND_MASK)
    }

    /// Replaces the 7 payload type bits, the marker bit is preserved.
    pub fn set_payload_type(&mut self, payload_type: u8) -> Result<(), Error> {
        let byte = self.header_byte(1)?;
        self.set_header_byte(1, (byte & MARKER_MASK) | (payload_type & PAYLOAD_KIND_MASK))
    }

    /// The sequence number increments by one for each RTP data packet
    /// sent, and may be used by the receiver to detect packet loss and to
    /// restore packet sequence.
    pub fn sequence_number(&self) -> Result<u16, Error> {
        self.header_byte(0)?;
        self.read_u16(2)
    }

    pub fn set_sequence_number(&mut self, sequence_number: u16) -> Result<(), Error> {
        self.header_byte(0)?;
        self.write_u16(2, sequence_number)
    }

    /// The timestamp reflects the sampling instant of the first octet in
    /// the RTP data packet.
    pub fn timestamp(&self) -> Result<u32, Error> {
        self.header_byte(0)?;
        self.read_u32(4)
    }

    pub fn set_timestamp(&mut self, timestamp: u32) -> Result<(), Error> {
        self.header_byte(0)?;
        self.write_u32(4, timestamp)
    }

    /// The SSRC field identifies the synchronization source.
    pub fn ssrc(&self) -> Result<u32, Error> {
        self.header_byte(0)?;
        self.read_u32(8)
    }

    pub fn set_ssrc(&mut self, ssrc: u32) -> Result<(), Error> {
        self.header_byte(0)?;
        self.write_u32(8, ssrc)
    }

    /// The SSRC of the sender of an RTCP packet, which directly follows the
    /// 4-byte RTCP header.
    pub fn rtcp_ssrc(&self) -> Result<u32, Error> {
        self.read_u32(4)
    }

    /// The CSRC list identifies the contributing sources for the payload
    /// contained in this packet.
    pub fn extract_csrc_list(&self) -> Result<Vec<u32>, Error> {
        let count = self.csrc_count()?;
        let block = self.read_region(FIXED_HEADER_SIZE, count * 4)?;

        Ok(block
            .chunks_exact(4)
            .map(|it| u32::from_be_bytes([it[0], it[1], it[2], it[3]]))
            .collect())
    }

    /// Rewrites the CSRC list, the extension and payload that follow are
    /// moved by the size difference and the CC field is updated.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_translator_codec::packet::Packet;
    ///
    /// let mut packet = Packet::new(&[
    ///     0x80, 0x61, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ///     0x04, 0x57, 0xaa, 0xbb,
    /// ]);
    ///
    /// packet.set_csrc_list(&[1, 2]).unwrap();
    /// assert_eq!(packet.csrc_count().unwrap(), 2);
    /// assert_eq!(packet.extract_csrc_list().unwrap(), vec![1, 2]);
    /// assert_eq!(packet.payload().unwrap(), &[0xaa, 0xbb]);
    /// assert_eq!(packet.len(), 22);
    ///
    /// packet.set_csrc_list(&[]).unwrap();
    /// assert_eq!(packet.csrc_count().unwrap(), 0);
    /// assert_eq!(packet.len(), 14);
    /// ```
    pub fn set_csrc_list(&mut self, csrc_list: &[u32]) -> Result<(), Error> {
        if csrc_list.len() > MAX_CSRC_COUNT {
            return Err(Error::TooManyCsrc);
        }

        let count = self.csrc_count()?;
        let mut block = BytesMut::with_capacity(csrc_list.len() * 4);
        for csrc in csrc_list {
            block.put_u32(*csrc);
        }

        self.splice(FIXED_HEADER_SIZE, count * 4, &block)?;

        let byte = self.header_byte(0)?;
        self.set_header_byte(0, (byte & !CSRC_COUNT_MASK) | csrc_list.len() as u8)
    }

    fn extension_offset(&self) -> Result<usize, Error> {
        Ok(FIXED_HEADER_SIZE + self.csrc_count()? * 4)
    }

    /// The length in bytes of the header extension content, not including
    /// the 4-byte extension header. Zero if the packet has no extension.
    pub fn extension_length(&self) -> Result<usize, Error> {
        if !self.has_extension()? {
            return Ok(0);
        }

        let at = self.extension_offset()?;
        let size = self.read_u16(at + 2)? as usize * 4;
        self.range(at + EXTENSION_HEADER_SIZE, size)?;
        Ok(size)
    }

    /// The size of the fixed header, the CSRC list and the extension.
    pub fn header_length(&self) -> Result<usize, Error> {
        let mut size = self.extension_offset()?;
        if self.has_extension()? {
            size += EXTENSION_HEADER_SIZE + self.extension_length()?;
        }

        self.range(0, size)?;
        Ok(size)
    }

    pub fn padding_length(&self) -> Result<usize, Error> {
        if !self.has_padding()? {
            return Ok(0);
        }

        let size = self.read_u8(self.length - 1)? as usize;
        if size + self.header_length()? > self.length {
            return Err(Error::MalformedPacket);
        }

        Ok(size)
    }

    /// The bytes after the header, padding excluded.
    pub fn payload(&self) -> Result<&[u8], Error> {
        let start = self.header_length()?;
        let size = self.length - start - self.padding_length()?;
        self.read_region(start, size)
    }

    pub fn payload_length(&self) -> Result<usize, Error> {
        Ok(self.payload()?.len())
    }

    /// Adds header extension content.
    ///
    /// If the packet has no extension, a one-byte form extension header
    /// (`0xBEDE` + length in words) is inserted after the CSRC list and the
    /// extension bit is raised. Otherwise the data is appended to the
    /// existing extension and its length field updated. The data is zero
    /// padded to a multiple of 4 bytes.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_translator_codec::packet::Packet;
    ///
    /// let mut packet = Packet::new(&[
    ///     0x80, 0x61, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ///     0x04, 0x57, 0xaa, 0xbb,
    /// ]);
    ///
    /// packet.add_extension(&[0x22, 0xaa, 0x36, 0x3f]).unwrap();
    /// assert!(packet.has_extension().unwrap());
    /// assert_eq!(packet.extension_length().unwrap(), 4);
    /// assert_eq!(packet.read_region(12, 4).unwrap(), &[0xbe, 0xde, 0x00, 0x01]);
    /// assert_eq!(packet.payload().unwrap(), &[0xaa, 0xbb]);
    ///
    /// packet.remove_extension().unwrap();
    /// assert!(!packet.has_extension().unwrap());
    /// assert_eq!(packet.len(), 14);
    /// assert_eq!(packet.payload().unwrap(), &[0xaa, 0xbb]);
    /// ```
    pub fn add_extension(&mut self, data: &[u8]) -> Result<(), Error> {
        let padded = data.len().div_ceil(4) * 4;
        let at = self.extension_offset()?;

        if self.has_extension()? {
            let current = self.extension_length()?;
            let words = u16::try_from((current + padded) / 4).map_err(|_| Error::InvalidExtension)?;

            let mut block = BytesMut::with_capacity(padded);
            block.put_slice(data);
            block.resize(padded, 0);

            self.splice(at + EXTENSION_HEADER_SIZE + current, 0, &block)?;
            self.write_u16(at + 2, words)
        } else {
            let words = u16::try_from(padded / 4).map_err(|_| Error::InvalidExtension)?;

            let mut block = BytesMut::with_capacity(EXTENSION_HEADER_SIZE + padded);
            block.put_u16(ONE_BYTE_EXTENSION_PROFILE);
            block.put_u16(words);
            block.put_slice(data);
            block.resize(EXTENSION_HEADER_SIZE + padded, 0);

            self.splice(at, 0, &block)?;

            let byte = self.header_byte(0)?;
            self.set_header_byte(0, byte | EXTENSION_MASK)
        }
    }

    /// Removes the whole header extension and clears the extension bit.
    pub fn remove_extension(&mut self) -> Result<(), Error> {
        if !self.has_extension()? {
            return Ok(());
        }

        let at = self.extension_offset()?;
        let size = EXTENSION_HEADER_SIZE + self.extension_length()?;
        self.splice(at, size, &[])?;

        let byte = self.header_byte(0)?;
        self.set_header_byte(0, byte & !EXTENSION_MASK)
    }

    /// The extension header profile, `0xBEDE` for the one-byte form.
    pub fn extension_profile(&self) -> Result<Option<u16>, Error> {
        if !self.has_extension()? {
            return Ok(None);
        }

        Ok(Some(self.read_u16(self.extension_offset()?)?))
    }
}

impl From<&[u8]> for Packet {
    fn from(value: &[u8]) -> Self {
        Self::new(value)
    }
}
