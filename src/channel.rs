use std::{
    io::ErrorKind,
    net::{SocketAddr, UdpSocket},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use parking_lot::{Mutex, RwLock};
use service::{
    Error, InputChannel, OutputChannel, Packet, PacketSink, StreamKind,
    transform::PacketTransformer,
};

use crate::{
    config::TransportOptions,
    statistics::{Statistics, Stats},
};

/// Anything shorter cannot carry an RTP or RTCP header.
const MIN_PACKET_SIZE: usize = 4;

struct Shared {
    sink: RwLock<Option<Arc<dyn PacketSink>>>,
    closed: AtomicBool,
    alive: AtomicBool,
}

/// The receive half of a UDP channel.
///
/// A dedicated thread receives into one reused packet buffer and hands
/// every datagram to the sink on that thread. The loop exits on the first
/// socket error and is not restarted.
pub struct UdpInput {
    kind: StreamKind,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl UdpInput {
    pub fn spawn(
        kind: StreamKind,
        socket: Arc<UdpSocket>,
        options: &TransportOptions,
        transformer: Option<Arc<dyn PacketTransformer>>,
        statistics: Statistics,
    ) -> Result<Arc<Self>, Error> {
        // The receive call has to return now and then to observe `close`.
        socket.set_read_timeout(Some(options.poll_interval_duration()))?;

        let local_addr = socket.local_addr()?;
        let shared = Arc::new(Shared {
            sink: RwLock::new(None),
            closed: AtomicBool::new(false),
            alive: AtomicBool::new(true),
        });

        let receiver = Receiver {
            sample_interval: options.log_sample_interval,
            shared: shared.clone(),
            mtu: options.mtu,
            transformer,
            statistics,
            local_addr,
            socket,
            kind,
        };

        let worker = thread::Builder::new()
            .name(format!("udp-{}-receiver", kind))
            .spawn(move || receiver.run())?;

        log::info!("udp input started: kind={}, local={}", kind, local_addr);

        Ok(Arc::new(Self {
            worker: Mutex::new(Some(worker)),
            local_addr,
            shared,
            kind,
        }))
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// False once the receive loop has exited, after a close or a socket
    /// error.
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Relaxed)
    }
}

impl InputChannel for UdpInput {
    fn set_sink(&self, sink: Arc<dyn PacketSink>) {
        *self.shared.sink.write() = Some(sink);
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::Relaxed) {
            return;
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            // A sink may close its own channel, the loop exits on its own then.
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }

        log::info!(
            "udp input closed: kind={}, local={}",
            self.kind,
            self.local_addr
        );
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Relaxed)
    }
}

impl Drop for UdpInput {
    fn drop(&mut self) {
        self.close();
    }
}

struct Receiver {
    kind: StreamKind,
    local_addr: SocketAddr,
    socket: Arc<UdpSocket>,
    shared: Arc<Shared>,
    transformer: Option<Arc<dyn PacketTransformer>>,
    statistics: Statistics,
    sample_interval: u64,
    mtu: usize,
}

impl Receiver {
    fn run(self) {
        let mut packet = Packet::with_capacity(self.mtu);
        let mut received = 0u64;

        while !self.shared.closed.load(Ordering::Relaxed) {
            let (size, source) = match self.socket.recv_from(packet.receive_buffer(self.mtu)) {
                Ok(it) => it,
                Err(e) => {
                    // Note: An error is also reported when an ICMP port
                    // unreachable comes back for an earlier send, the socket
                    // itself is still usable.
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock
                            | ErrorKind::TimedOut
                            | ErrorKind::Interrupted
                            | ErrorKind::ConnectionReset
                    ) {
                        continue;
                    }

                    log::error!(
                        "udp input receive failed: kind={}, local={}, err={}",
                        self.kind,
                        self.local_addr,
                        e
                    );

                    break;
                }
            };

            if size < MIN_PACKET_SIZE || packet.reset(size).is_err() {
                self.statistics.add(&[Stats::ErrorPkts(1)]);
                continue;
            }

            self.statistics
                .add(&[Stats::ReceivedPkts(1), Stats::ReceivedBytes(size)]);

            if let Some(transformer) = &self.transformer {
                if !transformer.reverse_transform(&mut packet) {
                    self.statistics.add(&[Stats::DroppedPkts(1)]);
                    continue;
                }
            }

            received += 1;
            if self.sample_interval > 0 && received % self.sample_interval == 0 {
                log::trace!(
                    "udp input sample: kind={}, local={}, source={}, size={}, count={}",
                    self.kind,
                    self.local_addr,
                    source,
                    packet.len(),
                    received
                );
            }

            let sink = self.shared.sink.read().clone();
            if let Some(sink) = sink {
                sink.on_packet(&mut packet);
            }
        }

        self.shared.alive.store(false, Ordering::Relaxed);
        log::info!(
            "udp input loop exited: kind={}, local={}",
            self.kind,
            self.local_addr
        );
    }
}

/// The send half of a UDP channel.
///
/// Every write sends one datagram to each registered target. Targets can be
/// changed from any thread while another thread is writing, a write works
/// on the targets registered when it started.
pub struct UdpOutput {
    kind: StreamKind,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    targets: RwLock<Vec<SocketAddr>>,
    transformer: Option<Arc<dyn PacketTransformer>>,
    statistics: Statistics,
}

impl UdpOutput {
    pub fn new(
        kind: StreamKind,
        socket: Arc<UdpSocket>,
        transformer: Option<Arc<dyn PacketTransformer>>,
        statistics: Statistics,
    ) -> Arc<Self> {
        Arc::new(Self {
            socket: RwLock::new(Some(socket)),
            targets: RwLock::new(Vec::new()),
            transformer,
            statistics,
            kind,
        })
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Returns false if the target is already registered.
    pub fn add_target(&self, target: SocketAddr) -> bool {
        let mut targets = self.targets.write();
        if targets.contains(&target) {
            return false;
        }

        targets.push(target);
        true
    }

    pub fn remove_target(&self, target: &SocketAddr) -> bool {
        let mut targets = self.targets.write();
        let size = targets.len();
        targets.retain(|it| it != target);
        targets.len() != size
    }

    pub fn clear_targets(&self) {
        self.targets.write().clear();
    }

    pub fn targets(&self) -> Vec<SocketAddr> {
        self.targets.read().clone()
    }

    /// Releases the socket, later writes fail with [`Error::Closed`].
    pub fn close(&self) {
        self.socket.write().take();
    }

    fn send(&self, socket: &UdpSocket, bytes: &[u8]) -> Result<usize, Error> {
        let targets = self.targets.read().clone();

        for (index, target) in targets.iter().enumerate() {
            if let Err(error) = socket.send_to(bytes, target) {
                self.statistics.add(&[Stats::SendErrors(1)]);

                log::warn!(
                    "udp output send failed: kind={}, target={}, sent={}, err={}",
                    self.kind,
                    target,
                    index,
                    error
                );

                return Err(Error::PartialSendFailure {
                    target: *target,
                    sent: index,
                    error,
                });
            }

            self.statistics
                .add(&[Stats::SendPkts(1), Stats::SendBytes(bytes.len())]);
        }

        Ok(bytes.len())
    }
}

impl OutputChannel for UdpOutput {
    /// Aborts at the first target that fails, the targets before it have
    /// already received the datagram.
    fn write(&self, bytes: &[u8]) -> Result<usize, Error> {
        let Some(socket) = self.socket.read().clone() else {
            return Err(Error::Closed);
        };

        match &self.transformer {
            Some(transformer) => {
                let mut packet = Packet::new(bytes);
                if !transformer.transform(&mut packet) {
                    self.statistics.add(&[Stats::DroppedPkts(1)]);
                    return Ok(0);
                }

                self.send(&socket, packet.as_bytes())
            }
            None => self.send(&socket, bytes),
        }
    }
}
