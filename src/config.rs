use std::{
    fs::read_to_string,
    net::{IpAddr, Ipv4Addr},
    path::Path,
    str::FromStr,
    time::Duration,
};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use service::{ports::PortRange, translator::TranslatorOptions};

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct TransportOptions {
    ///
    /// Local address the socket pairs are bound to.
    ///
    #[serde(default = "TransportOptions::bind")]
    pub bind: IpAddr,
    ///
    /// Port range of the socket pairs, written as `"start..end"`.
    ///
    /// The data socket takes an even port and the control socket the odd
    /// port right after it, so the range must hold at least one such pair.
    ///
    #[serde(default = "TransportOptions::port_range")]
    pub port_range: PortRange,
    ///
    /// Maximum Transmission Unit (MTU) size for network packets.
    ///
    /// This is the size of the receive buffer, larger datagrams are
    /// truncated by the socket.
    ///
    #[serde(default = "TransportOptions::mtu")]
    pub mtu: usize,
    ///
    /// Receive loop poll interval in milliseconds.
    ///
    /// A blocked receive wakes up at least this often to check whether the
    /// channel was closed.
    ///
    #[serde(default = "TransportOptions::poll_interval")]
    pub poll_interval: u64,
    ///
    /// Log every Nth received packet at trace level, 0 disables it.
    ///
    #[serde(default)]
    pub log_sample_interval: u64,
}

impl TransportOptions {
    fn bind() -> IpAddr {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    }

    fn port_range() -> PortRange {
        PortRange::default()
    }

    fn mtu() -> usize {
        1500
    }

    fn poll_interval() -> u64 {
        100
    }

    pub fn poll_interval_duration(&self) -> Duration {
        Duration::from_millis(self.poll_interval.max(1))
    }
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            bind: Self::bind(),
            port_range: Self::port_range(),
            mtu: Self::mtu(),
            poll_interval: Self::poll_interval(),
            log_sample_interval: 0,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Translator {
    ///
    /// Capacity of each write queue of the translator.
    ///
    /// When a queue is full the oldest queued packet is dropped to make
    /// room for the newest one.
    ///
    #[serde(default = "Translator::write_queue_capacity")]
    pub write_queue_capacity: usize,
}

impl Translator {
    fn write_queue_capacity() -> usize {
        TranslatorOptions::default().write_queue_capacity
    }

    pub fn options(&self) -> TranslatorOptions {
        TranslatorOptions {
            write_queue_capacity: self.write_queue_capacity,
        }
    }
}

impl Default for Translator {
    fn default() -> Self {
        Self {
            write_queue_capacity: Self::write_queue_capacity(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    ///
    /// log level
    ///
    /// An enum representing the available verbosity levels of the logger.
    ///
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Serialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub transport: TransportOptions,
    #[serde(default)]
    pub translator: Translator,
}

impl Config {
    /// Loads the configuration from a JSON5 file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_to_string(path)?.parse()
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    /// # Test
    ///
    /// ```
    /// use rtp_translator::config::*;
    ///
    /// let config: Config = r#"{
    ///     log: { level: "debug" },
    ///     transport: { "port-range": "40000..40100", mtu: 1200 },
    /// }"#
    /// .parse()
    /// .unwrap();
    ///
    /// assert_eq!(config.log.level, LogLevel::Debug);
    /// assert_eq!(config.transport.port_range.start(), 40000);
    /// assert_eq!(config.transport.mtu, 1200);
    /// assert_eq!(config.transport.poll_interval, 100);
    /// assert_eq!(config.translator.write_queue_capacity, 256);
    /// ```
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(serde_json5::from_str::<Self>(value)?)
    }
}
