use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, bounded};
use crossbeam_queue::ArrayQueue;
use parking_lot::RwLock;

use crate::{Error, StreamKind, format::Format, translator::StreamId};

/// One packet waiting to be fanned out.
#[derive(Debug, Clone)]
pub struct WriteEntry {
    pub bytes: Bytes,
    /// The format of the source payload type, used to rewrite the payload
    /// type for each destination. Not set for control packets and for
    /// packets produced by the shared session.
    pub format: Option<Format>,
    /// The stream the packet was received on, it is never written back to
    /// it.
    pub exclusion: Option<StreamId>,
}

/// A bounded FIFO of pending writes for one direction.
///
/// Pushing never blocks: when the queue is full the oldest entry is evicted
/// to make room. Closing the queue lets the consumer drain what is left,
/// [`WriteQueue::pop`] then returns `None`.
///
/// # Test
///
/// ```
/// use bytes::Bytes;
/// use rtp_translator_service::{StreamKind, translator::queue::*};
///
/// let queue = WriteQueue::new(StreamKind::Data, 2);
///
/// for index in 0..3u8 {
///     queue.push(WriteEntry {
///         bytes: Bytes::from(vec![index]),
///         format: None,
///         exclusion: None,
///     }).unwrap();
/// }
///
/// assert_eq!(queue.dropped(), 1);
/// assert_eq!(queue.try_pop().unwrap().bytes.as_ref(), &[1]);
/// assert_eq!(queue.try_pop().unwrap().bytes.as_ref(), &[2]);
/// assert!(queue.try_pop().is_none());
///
/// queue.close();
/// assert!(queue.push(WriteEntry {
///     bytes: Bytes::new(),
///     format: None,
///     exclusion: None,
/// }).is_err());
/// ```
pub struct WriteQueue {
    kind: StreamKind,
    entries: ArrayQueue<WriteEntry>,
    // Wakes the consumer, holds at most one pending token.
    signal: RwLock<Option<Sender<()>>>,
    wakeup: Receiver<()>,
    dropped: AtomicU64,
}

impl WriteQueue {
    pub fn new(kind: StreamKind, capacity: usize) -> Self {
        let (signal, wakeup) = bounded(1);

        Self {
            entries: ArrayQueue::new(capacity.max(1)),
            signal: RwLock::new(Some(signal)),
            dropped: AtomicU64::new(0),
            wakeup,
            kind,
        }
    }

    pub fn push(&self, entry: WriteEntry) -> Result<(), Error> {
        let signal = self.signal.read();
        let Some(signal) = signal.as_ref() else {
            return Err(Error::Closed);
        };

        // Evicts the oldest entry and inserts in one step.
        if self.entries.force_push(entry).is_some() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;

            log::warn!(
                "translator write queue full, will not translate packet: kind={}, capacity={}, dropped={}",
                self.kind,
                self.entries.capacity(),
                dropped
            );
        }

        let _ = signal.try_send(());
        Ok(())
    }

    /// Takes the oldest entry without waiting.
    pub fn try_pop(&self) -> Option<WriteEntry> {
        self.entries.pop()
    }

    /// Takes the oldest entry, waiting until one is available. Returns
    /// `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<WriteEntry> {
        loop {
            if let Some(entry) = self.entries.pop() {
                return Some(entry);
            }

            if self.wakeup.recv().is_err() {
                return self.entries.pop();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The number of entries evicted because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.signal.read().is_none()
    }

    pub fn close(&self) {
        drop(self.signal.write().take());
    }
}
