use std::str::FromStr;

use rand::Rng;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A range of local UDP ports, `start..end` with both ends included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn size(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    /// Candidate (data, control) port pairs inside the range.
    ///
    /// RTP uses an even port for data and the next odd port for control.
    /// The walk starts at a random pair and wraps around, so every pair in
    /// the range is visited exactly once.
    ///
    /// # Test
    ///
    /// ```
    /// use rtp_translator_service::ports::*;
    ///
    /// let range = PortRange::from(5000..5007);
    /// let mut pairs = range.pairs().collect::<Vec<_>>();
    /// pairs.sort();
    ///
    /// assert_eq!(pairs, vec![(5000, 5001), (5002, 5003), (5004, 5005), (5006, 5007)]);
    ///
    /// let range = PortRange::from(5001..5004);
    /// assert_eq!(range.pairs().collect::<Vec<_>>(), vec![(5002, 5003)]);
    /// ```
    pub fn pairs(&self) -> impl Iterator<Item = (u16, u16)> {
        let first = self.start.div_ceil(2) as u32 * 2;
        let count = if (self.end as u32) > first {
            (self.end as u32 - first + 1) / 2
        } else {
            0
        };

        let offset = if count > 0 {
            rand::rng().random_range(0..count)
        } else {
            0
        };

        (0..count).map(move |index| {
            let port = first + ((offset + index) % count) * 2;
            (port as u16, port as u16 + 1)
        })
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 5000,
            end: 6000,
        }
    }
}

impl From<std::ops::Range<u16>> for PortRange {
    fn from(range: std::ops::Range<u16>) -> Self {
        assert!(range.start <= range.end);

        Self {
            start: range.start,
            end: range.end,
        }
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Debug)]
pub struct PortRangeParseError(String);

impl std::error::Error for PortRangeParseError {}

impl std::fmt::Display for PortRangeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<std::num::ParseIntError> for PortRangeParseError {
    fn from(error: std::num::ParseIntError) -> Self {
        PortRangeParseError(error.to_string())
    }
}

impl FromStr for PortRange {
    type Err = PortRangeParseError;

    /// # Test
    ///
    /// ```
    /// use rtp_translator_service::ports::*;
    ///
    /// let range: PortRange = "5000..6000".parse().unwrap();
    /// assert_eq!(range.start(), 5000);
    /// assert_eq!(range.end(), 6000);
    ///
    /// assert!("6000..5000".parse::<PortRange>().is_err());
    /// assert!("5000".parse::<PortRange>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once("..")
            .ok_or(PortRangeParseError(s.to_string()))?;

        let start: u16 = start.trim().parse()?;
        let end: u16 = end.trim().parse()?;
        if start > end {
            return Err(PortRangeParseError(s.to_string()));
        }

        Ok(Self { start, end })
    }
}

#[cfg(feature = "serde")]
impl Serialize for PortRange {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for PortRange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(|e| serde::de::Error::custom(e.0))
    }
}
