use std::{fmt, sync::Arc};

use ahash::{HashMap, HashMapExt};

/// The highest payload type number, the field is 7 bits wide.
pub const MAX_PAYLOAD_TYPE: u8 = 127;

/// An opaque media format identity.
///
/// Formats are only ever compared for equality, two formats with the same
/// encoding name, clock rate and channel count are the same format no matter
/// which payload type number a session assigned to them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Format {
    encoding: Arc<str>,
    clock_rate: u32,
    channels: u8,
}

impl Format {
    pub fn new(encoding: &str, clock_rate: u32) -> Self {
        Self::with_channels(encoding, clock_rate, 1)
    }

    pub fn with_channels(encoding: &str, clock_rate: u32, channels: u8) -> Self {
        Self {
            encoding: Arc::from(encoding.to_ascii_lowercase()),
            clock_rate,
            channels,
        }
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.encoding, self.clock_rate)?;
        if self.channels > 1 {
            write!(f, "/{}", self.channels)?;
        }

        Ok(())
    }
}

/// Payload type number to format table of one session or one translated
/// stream.
///
/// # Test
///
/// ```
/// use rtp_translator_service::format::*;
///
/// let mut table = FormatTable::default();
/// let opus = Format::with_channels("opus", 48000, 2);
///
/// assert!(table.insert(97, opus.clone()));
/// assert!(!table.insert(128, opus.clone()));
///
/// assert_eq!(table.get(97), Some(&opus));
/// assert_eq!(table.payload_type(&Format::with_channels("OPUS", 48000, 2)), Some(97));
/// assert_eq!(table.payload_type(&Format::new("opus", 48000)), None);
///
/// // Several numbers may carry the same format, the lowest one is used
/// // for the reverse lookup.
/// assert!(table.insert(111, opus.clone()));
/// assert!(table.insert(100, opus.clone()));
/// assert_eq!(table.get(97), Some(&opus));
/// assert_eq!(table.payload_type(&opus), Some(97));
///
/// assert!(table.insert(97, Format::new("pcmu", 8000)));
/// assert_eq!(table.payload_type(&opus), Some(100));
/// assert_eq!(table.len(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FormatTable {
    formats: HashMap<u8, Format>,
}

impl FormatTable {
    /// Maps the payload type number to the format, replacing any previous
    /// mapping of the number.
    ///
    /// Returns false if the number does not fit in 7 bits.
    pub fn insert(&mut self, payload_type: u8, format: Format) -> bool {
        if payload_type > MAX_PAYLOAD_TYPE {
            return false;
        }

        self.formats.insert(payload_type, format);
        true
    }

    pub fn get(&self, payload_type: u8) -> Option<&Format> {
        self.formats.get(&payload_type)
    }

    /// Reverse lookup of the number assigned to the format, the lowest one
    /// if the format is mapped more than once.
    pub fn payload_type(&self, format: &Format) -> Option<u8> {
        self.formats
            .iter()
            .filter(|(_, it)| *it == format)
            .map(|(pt, _)| *pt)
            .min()
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    pub fn clear(&mut self) {
        self.formats = HashMap::with_capacity(8);
    }
}
