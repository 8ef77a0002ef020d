use std::sync::Arc;

use crate::Packet;

/// An opaque filter applied to raw packets right after they are received
/// and right before they are sent, such as SRTP protection.
///
/// Both directions work in place. Returning false drops the packet.
pub trait PacketTransformer: Send + Sync {
    /// Applied to an outbound packet.
    fn transform(&self, packet: &mut Packet) -> bool;

    /// Applied to an inbound packet.
    fn reverse_transform(&self, packet: &mut Packet) -> bool;
}

/// Applies several transformers in turn.
///
/// Outbound packets go through the transformers in insertion order, inbound
/// packets in the reverse order, so the last layer added on send is the
/// first one removed on receive.
///
/// # Test
///
/// ```
/// use std::sync::Arc;
/// use rtp_translator_service::{Packet, transform::*};
///
/// struct Trailer(u8);
///
/// impl PacketTransformer for Trailer {
///     fn transform(&self, packet: &mut Packet) -> bool {
///         packet.append(&[self.0]).is_ok()
///     }
///
///     fn reverse_transform(&self, packet: &mut Packet) -> bool {
///         let len = packet.len();
///         if len == 0 || packet.read_u8(len - 1).ok() != Some(self.0) {
///             return false;
///         }
///
///         packet.shrink(1).is_ok()
///     }
/// }
///
/// let chain = TransformChain::default()
///     .with(Arc::new(Trailer(1)))
///     .with(Arc::new(Trailer(2)));
///
/// assert_eq!(chain.len(), 2);
/// assert!(!chain.is_empty());
/// assert!(TransformChain::default().is_empty());
///
/// let mut packet = Packet::new(&[0xaa]);
/// assert!(chain.transform(&mut packet));
/// assert_eq!(packet.as_bytes(), &[0xaa, 1, 2]);
///
/// assert!(chain.reverse_transform(&mut packet));
/// assert_eq!(packet.as_bytes(), &[0xaa]);
///
/// let mut packet = Packet::new(&[0xaa, 2, 1]);
/// assert!(!chain.reverse_transform(&mut packet));
/// ```
#[derive(Clone, Default)]
pub struct TransformChain {
    transformers: Vec<Arc<dyn PacketTransformer>>,
}

impl TransformChain {
    pub fn with(mut self, transformer: Arc<dyn PacketTransformer>) -> Self {
        self.transformers.push(transformer);
        self
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }
}

impl PacketTransformer for TransformChain {
    fn transform(&self, packet: &mut Packet) -> bool {
        self.transformers.iter().all(|it| it.transform(packet))
    }

    fn reverse_transform(&self, packet: &mut Packet) -> bool {
        self.transformers
            .iter()
            .rev()
            .all(|it| it.reverse_transform(packet))
    }
}
