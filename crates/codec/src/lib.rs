//! ## RTP: A Transport Protocol for Real-Time Applications
//!
//! [RFC3550]: https://tools.ietf.org/html/rfc3550
//! [RFC5285]: https://tools.ietf.org/html/rfc5285
//!
//! RTP provides end-to-end delivery services for data with real-time
//! characteristics, such as interactive audio and video.  Those services
//! include payload type identification, sequence numbering, timestamping
//! and delivery monitoring.  The data transport is augmented by a control
//! protocol (RTCP) to allow monitoring of the data delivery in a manner
//! scalable to large multicast networks.
//!
//! This crate does not decode packets into owned structures.  A [`Packet`]
//! is a window over a byte buffer, and every header field is read and
//! written in place, which is what a translator that forwards thousands of
//! packets per second actually needs.  Header extensions follow the
//! one-byte form of [RFC5285].
//!
//! [`Packet`]: packet::Packet

pub mod packet;
pub mod rtcp;

use std::array::TryFromSliceError;

#[derive(Debug)]
pub enum Error {
    /// The window is shorter than the structure being accessed, or a field
    /// points outside of the window.
    MalformedPacket,
    InvalidVersion,
    InvalidExtension,
    TooManyCsrc,
    TryFromSliceError(TryFromSliceError),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Self::TryFromSliceError(value)
    }
}
