pub mod format;
pub mod handle;
pub mod ports;
pub mod session;
pub mod transform;
pub mod translator;

pub use codec::packet::Packet;

use std::{fmt, net::SocketAddr, sync::Arc};

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Codec(codec::Error),
    /// A fan-out write failed on one target. Targets after the failed one
    /// were not attempted, the ones before it (`sent`) were.
    PartialSendFailure {
        sent: usize,
        target: SocketAddr,
        error: std::io::Error,
    },
    Closed,
    Disposed,
    UnknownStream,
    SendStreamClosed,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<codec::Error> for Error {
    fn from(value: codec::Error) -> Self {
        Self::Codec(value)
    }
}

/// The two directions of an RTP session transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// RTP
    Data,
    /// RTCP
    Control,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Data => "data",
            Self::Control => "control",
        })
    }
}

/// Receives the packets of an input channel.
///
/// The sink is invoked synchronously on the thread that received the
/// packet, the packet is only borrowed for the duration of the call and is
/// reused for the next receive.
pub trait PacketSink: Send + Sync {
    fn on_packet(&self, packet: &mut Packet);
}

impl<F> PacketSink for F
where
    F: Fn(&mut Packet) + Send + Sync,
{
    fn on_packet(&self, packet: &mut Packet) {
        self(packet)
    }
}

/// The inbound half of a packet channel.
pub trait InputChannel: Send + Sync {
    /// Registers the sink, replacing any previously registered one.
    fn set_sink(&self, sink: Arc<dyn PacketSink>);

    /// Stops the receive loop. Calling it more than once has no effect.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// The outbound half of a packet channel.
pub trait OutputChannel: Send + Sync {
    /// Sends one datagram to every target of the channel.
    fn write(&self, bytes: &[u8]) -> Result<usize, Error>;
}

/// A data and control channel pair, the transport of one logical session.
///
/// Channels are created on first access and the same channel is returned
/// afterwards.
pub trait Connector: Send + Sync {
    fn data_input(&self) -> Result<Arc<dyn InputChannel>, Error>;

    fn control_input(&self) -> Result<Arc<dyn InputChannel>, Error>;

    fn data_output(&self) -> Result<Arc<dyn OutputChannel>, Error>;

    fn control_output(&self) -> Result<Arc<dyn OutputChannel>, Error>;

    /// Tears down both input loops and releases the sockets. Calling it more
    /// than once has no effect.
    fn close(&self);

    fn input(&self, kind: StreamKind) -> Result<Arc<dyn InputChannel>, Error> {
        match kind {
            StreamKind::Data => self.data_input(),
            StreamKind::Control => self.control_input(),
        }
    }

    fn output(&self, kind: StreamKind) -> Result<Arc<dyn OutputChannel>, Error> {
        match kind {
            StreamKind::Data => self.data_output(),
            StreamKind::Control => self.control_output(),
        }
    }
}
