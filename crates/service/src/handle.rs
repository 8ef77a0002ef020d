use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    Connector, Error, Packet, StreamKind,
    format::Format,
    session::{
        ConnectorTransport, DataSourceId, GlobalStats, PacketListener, ReceiveStreamListener,
        RtpSession, SendStream,
    },
    translator::{StreamId, Translator},
};

enum Mode {
    Unattached {
        session: Arc<dyn RtpSession>,
        connector: Arc<dyn Connector>,
        transport: Arc<ConnectorTransport>,
    },
    Attached {
        translator: Arc<Translator>,
        id: StreamId,
    },
}

/// The session façade a media stream holds.
///
/// Without a translator the handle owns a private session bound to its
/// connector. With a translator, every operation is forwarded to the
/// translator keyed by the identity of the handle, which keeps a separate
/// payload type table and listener set per handle on top of the shared
/// session.
pub struct StreamHandle {
    mode: Mode,
    disposed: AtomicBool,
}

impl StreamHandle {
    /// Creates a handle that owns the session.
    pub fn new(session: Arc<dyn RtpSession>, connector: Arc<dyn Connector>) -> Result<Self, Error> {
        let transport = Arc::new(ConnectorTransport::new(connector.clone()));
        session.initialize(transport.clone())?;

        for kind in [StreamKind::Data, StreamKind::Control] {
            let session_ = Arc::downgrade(&session);
            connector.input(kind)?.set_sink(Arc::new(move |packet: &mut Packet| {
                if let Some(session) = session_.upgrade() {
                    session.receive(kind, packet);
                }
            }));
        }

        Ok(Self {
            mode: Mode::Unattached {
                session,
                connector,
                transport,
            },
            disposed: AtomicBool::new(false),
        })
    }

    /// Creates a handle attached to the translator.
    pub fn with_translator(
        translator: &Arc<Translator>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, Error> {
        let id = translator.attach(connector)?;

        Ok(Self {
            mode: Mode::Attached {
                translator: translator.clone(),
                id,
            },
            disposed: AtomicBool::new(false),
        })
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.mode, Mode::Attached { .. })
    }

    /// The identity of the handle in its translator.
    pub fn stream_id(&self) -> Option<StreamId> {
        match &self.mode {
            Mode::Attached { id, .. } => Some(*id),
            Mode::Unattached { .. } => None,
        }
    }

    fn check(&self) -> Result<(), Error> {
        if self.disposed.load(Ordering::Relaxed) {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    pub fn add_format(&self, payload_type: u8, format: Format) -> Result<(), Error> {
        self.check()?;

        match &self.mode {
            Mode::Unattached { session, .. } => {
                session.add_format(payload_type, format);
                Ok(())
            }
            Mode::Attached { translator, id } => translator.add_format(*id, payload_type, format),
        }
    }

    pub fn add_receive_stream_listener(
        &self,
        listener: Arc<dyn ReceiveStreamListener>,
    ) -> Result<(), Error> {
        self.check()?;

        match &self.mode {
            Mode::Unattached { session, .. } => {
                session.add_receive_stream_listener(listener);
                Ok(())
            }
            Mode::Attached { translator, id } => {
                translator.add_receive_stream_listener(*id, listener)
            }
        }
    }

    pub fn remove_receive_stream_listener(
        &self,
        listener: &Arc<dyn ReceiveStreamListener>,
    ) -> Result<(), Error> {
        self.check()?;

        match &self.mode {
            Mode::Unattached { session, .. } => {
                session.remove_receive_stream_listener(listener);
                Ok(())
            }
            Mode::Attached { translator, id } => {
                translator.remove_receive_stream_listener(*id, listener)
            }
        }
    }

    /// Observes the packets written to the connector of this handle.
    pub fn add_packet_listener(&self, listener: Arc<dyn PacketListener>) -> Result<(), Error> {
        self.check()?;

        match &self.mode {
            Mode::Unattached { transport, .. } => {
                transport.add_packet_listener(listener);
                Ok(())
            }
            Mode::Attached { translator, id } => translator.add_packet_listener(*id, listener),
        }
    }

    pub fn create_send_stream(
        &self,
        data_source: DataSourceId,
        stream_index: usize,
    ) -> Result<Arc<dyn SendStream>, Error> {
        self.check()?;

        match &self.mode {
            Mode::Unattached { session, .. } => {
                session.create_send_stream(data_source, stream_index)
            }
            Mode::Attached { translator, id } => Ok(translator
                .create_send_stream(*id, data_source, stream_index)?
                as Arc<dyn SendStream>),
        }
    }

    pub fn send_streams(&self) -> Result<Vec<Arc<dyn SendStream>>, Error> {
        self.check()?;

        match &self.mode {
            Mode::Unattached { session, .. } => Ok(session.send_streams()),
            Mode::Attached { translator, id } => Ok(translator
                .send_streams(*id)?
                .into_iter()
                .map(|it| it as Arc<dyn SendStream>)
                .collect()),
        }
    }

    pub fn receive_streams(&self) -> Result<Vec<u32>, Error> {
        self.check()?;

        match &self.mode {
            Mode::Unattached { session, .. } => Ok(session.receive_streams()),
            Mode::Attached { translator, id } => translator.receive_streams(*id),
        }
    }

    pub fn local_ssrc(&self) -> u32 {
        match &self.mode {
            Mode::Unattached { session, .. } => session.local_ssrc(),
            Mode::Attached { translator, .. } => translator.local_ssrc(),
        }
    }

    pub fn stats(&self) -> GlobalStats {
        match &self.mode {
            Mode::Unattached { session, .. } => session.stats(),
            Mode::Attached { translator, .. } => translator.stats(),
        }
    }

    /// Detaches from the translator, or disposes the private session and
    /// closes its connector. Calling it more than once has no effect.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::Relaxed) {
            return;
        }

        match &self.mode {
            Mode::Unattached {
                session, connector, ..
            } => {
                session.dispose();
                connector.close();
            }
            Mode::Attached { translator, id } => {
                if let Err(e) = translator.detach(*id) {
                    log::warn!("stream handle detach failed: stream={}, err={}", id, e);
                }
            }
        }
    }
}
