use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

/// The type of information passed to the statistics of a connector.
#[derive(Debug, Clone, Copy)]
pub enum Stats {
    ReceivedBytes(usize),
    SendBytes(usize),
    ReceivedPkts(usize),
    SendPkts(usize),
    ErrorPkts(usize),
    DroppedPkts(usize),
    SendErrors(usize),
}

pub trait Number {
    fn add(&self, value: usize);
    fn get(&self) -> usize;
}

#[derive(Default)]
pub struct Count(AtomicUsize);

impl Number for Count {
    fn add(&self, value: usize) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Traffic counters of the channels of one connector.
#[derive(Default)]
pub struct Counts<T> {
    pub received_bytes: T,
    pub send_bytes: T,
    pub received_pkts: T,
    pub send_pkts: T,
    /// Packets that could not be parsed.
    pub error_pkts: T,
    /// Packets rejected by a transformer.
    pub dropped_pkts: T,
    pub send_errors: T,
}

impl<T: Number> Counts<T> {
    /// # Test
    ///
    /// ```
    /// use rtp_translator::statistics::*;
    ///
    /// let counts = Counts::<Count>::default();
    ///
    /// counts.add(&Stats::ReceivedBytes(1));
    /// assert_eq!(counts.received_bytes.get(), 1);
    ///
    /// counts.add(&Stats::ReceivedPkts(1));
    /// assert_eq!(counts.received_pkts.get(), 1);
    ///
    /// counts.add(&Stats::SendBytes(1));
    /// assert_eq!(counts.send_bytes.get(), 1);
    ///
    /// counts.add(&Stats::DroppedPkts(2));
    /// assert_eq!(counts.dropped_pkts.get(), 2);
    /// ```
    pub fn add(&self, payload: &Stats) {
        match payload {
            Stats::ReceivedBytes(v) => self.received_bytes.add(*v),
            Stats::ReceivedPkts(v) => self.received_pkts.add(*v),
            Stats::SendBytes(v) => self.send_bytes.add(*v),
            Stats::SendPkts(v) => self.send_pkts.add(*v),
            Stats::ErrorPkts(v) => self.error_pkts.add(*v),
            Stats::DroppedPkts(v) => self.dropped_pkts.add(*v),
            Stats::SendErrors(v) => self.send_errors.add(*v),
        }
    }
}

/// A point-in-time copy of [`Counts`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub received_bytes: usize,
    pub send_bytes: usize,
    pub received_pkts: usize,
    pub send_pkts: usize,
    pub error_pkts: usize,
    pub dropped_pkts: usize,
    pub send_errors: usize,
}

/// Shared statistics of a connector, cloned into each of its channels.
#[derive(Default, Clone)]
pub struct Statistics(Arc<Counts<Count>>);

impl Statistics {
    pub fn add(&self, payload: &[Stats]) {
        for item in payload {
            self.0.add(item);
        }
    }

    /// # Test
    ///
    /// ```
    /// use rtp_translator::statistics::*;
    ///
    /// let statistics = Statistics::default();
    /// let reporter = statistics.clone();
    ///
    /// reporter.add(&[Stats::ReceivedPkts(1), Stats::ReceivedBytes(100)]);
    ///
    /// let snapshot = statistics.snapshot();
    /// assert_eq!(snapshot.received_pkts, 1);
    /// assert_eq!(snapshot.received_bytes, 100);
    /// assert_eq!(snapshot.send_pkts, 0);
    /// ```
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            received_bytes: self.0.received_bytes.get(),
            send_bytes: self.0.send_bytes.get(),
            received_pkts: self.0.received_pkts.get(),
            send_pkts: self.0.send_pkts.get(),
            error_pkts: self.0.error_pkts.get(),
            dropped_pkts: self.0.dropped_pkts.get(),
            send_errors: self.0.send_errors.get(),
        }
    }
}
