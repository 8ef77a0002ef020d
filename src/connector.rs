use std::{
    io,
    net::{SocketAddr, UdpSocket},
    sync::Arc,
};

use parking_lot::Mutex;
use service::{
    Connector, Error, InputChannel, OutputChannel, StreamKind, transform::PacketTransformer,
};

use crate::{
    channel::{UdpInput, UdpOutput},
    config::TransportOptions,
    statistics::Statistics,
};

#[derive(Default)]
struct Slot {
    socket: Option<Arc<UdpSocket>>,
    input: Option<Arc<UdpInput>>,
    output: Option<Arc<UdpOutput>>,
}

struct State {
    data: Slot,
    control: Slot,
    closed: bool,
}

impl State {
    fn slot(&mut self, kind: StreamKind) -> &mut Slot {
        match kind {
            StreamKind::Data => &mut self.data,
            StreamKind::Control => &mut self.control,
        }
    }
}

/// A local UDP socket pair, the data socket on an even port and the control
/// socket on the odd port right after it.
///
/// Channels are created on first access. Closing the connector stops both
/// receive loops and releases both sockets.
pub struct UdpConnector {
    options: TransportOptions,
    data_addr: SocketAddr,
    control_addr: SocketAddr,
    transformer: Option<Arc<dyn PacketTransformer>>,
    statistics: Statistics,
    state: Mutex<State>,
}

impl UdpConnector {
    pub fn bind(options: &TransportOptions) -> Result<Self, Error> {
        Self::bind_with_transformer(options, None)
    }

    /// Binds the socket pair, every packet sent goes through the transformer
    /// and every packet received goes through it in reverse.
    pub fn bind_with_transformer(
        options: &TransportOptions,
        transformer: Option<Arc<dyn PacketTransformer>>,
    ) -> Result<Self, Error> {
        let (data, control) = Self::bind_pair(options)?;
        let data_addr = data.local_addr()?;
        let control_addr = control.local_addr()?;

        log::info!(
            "udp connector bound: data={}, control={}",
            data_addr,
            control_addr
        );

        Ok(Self {
            state: Mutex::new(State {
                data: Slot {
                    socket: Some(Arc::new(data)),
                    ..Default::default()
                },
                control: Slot {
                    socket: Some(Arc::new(control)),
                    ..Default::default()
                },
                closed: false,
            }),
            statistics: Statistics::default(),
            options: options.clone(),
            control_addr,
            transformer,
            data_addr,
        })
    }

    fn bind_pair(options: &TransportOptions) -> Result<(UdpSocket, UdpSocket), Error> {
        for (data_port, control_port) in options.port_range.pairs() {
            let Ok(data) = UdpSocket::bind(SocketAddr::new(options.bind, data_port)) else {
                continue;
            };

            if let Ok(control) = UdpSocket::bind(SocketAddr::new(options.bind, control_port)) {
                return Ok((data, control));
            }
        }

        Err(Error::Io(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("no free port pair in range {}", options.port_range),
        )))
    }

    pub fn data_addr(&self) -> SocketAddr {
        self.data_addr
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub fn local_addr(&self, kind: StreamKind) -> SocketAddr {
        match kind {
            StreamKind::Data => self.data_addr,
            StreamKind::Control => self.control_addr,
        }
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn udp_input(&self, kind: StreamKind) -> Result<Arc<UdpInput>, Error> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::Closed);
        }

        let slot = state.slot(kind);
        if let Some(input) = &slot.input {
            return Ok(input.clone());
        }

        let socket = slot.socket.clone().ok_or(Error::Closed)?;
        let input = UdpInput::spawn(
            kind,
            socket,
            &self.options,
            self.transformer.clone(),
            self.statistics.clone(),
        )?;

        slot.input = Some(input.clone());
        Ok(input)
    }

    pub fn udp_output(&self, kind: StreamKind) -> Result<Arc<UdpOutput>, Error> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::Closed);
        }

        let slot = state.slot(kind);
        if let Some(output) = &slot.output {
            return Ok(output.clone());
        }

        let socket = slot.socket.clone().ok_or(Error::Closed)?;
        let output = UdpOutput::new(
            kind,
            socket,
            self.transformer.clone(),
            self.statistics.clone(),
        );

        slot.output = Some(output.clone());
        Ok(output)
    }

    /// Adds a remote endpoint to the output channel of the kind.
    pub fn add_target(&self, kind: StreamKind, target: SocketAddr) -> Result<bool, Error> {
        Ok(self.udp_output(kind)?.add_target(target))
    }
}

impl Connector for UdpConnector {
    fn data_input(&self) -> Result<Arc<dyn InputChannel>, Error> {
        Ok(self.udp_input(StreamKind::Data)? as Arc<dyn InputChannel>)
    }

    fn control_input(&self) -> Result<Arc<dyn InputChannel>, Error> {
        Ok(self.udp_input(StreamKind::Control)? as Arc<dyn InputChannel>)
    }

    fn data_output(&self) -> Result<Arc<dyn OutputChannel>, Error> {
        Ok(self.udp_output(StreamKind::Data)? as Arc<dyn OutputChannel>)
    }

    fn control_output(&self) -> Result<Arc<dyn OutputChannel>, Error> {
        Ok(self.udp_output(StreamKind::Control)? as Arc<dyn OutputChannel>)
    }

    fn close(&self) {
        let slots = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }

            state.closed = true;
            [
                std::mem::take(&mut state.data),
                std::mem::take(&mut state.control),
            ]
        };

        // Outside of the lock, a receive loop may be calling into the
        // connector while it is being joined.
        for slot in slots {
            if let Some(input) = slot.input {
                input.close();
            }

            if let Some(output) = slot.output {
                output.close();
            }
        }

        log::info!(
            "udp connector closed: data={}, control={}",
            self.data_addr,
            self.control_addr
        );
    }
}

impl Drop for UdpConnector {
    fn drop(&mut self) {
        self.close();
    }
}
