pub mod channel;
pub mod config;
pub mod connector;
pub mod statistics;

pub mod prelude {
    pub use codec::{packet::*, rtcp};

    pub use service::{
        format::*,
        handle::*,
        ports::*,
        session::*,
        transform::*,
        translator::{queue::*, *},
        *,
    };

    pub use super::{
        channel::*,
        config::{Config, TransportOptions},
        connector::*,
        statistics::*,
    };
}

use self::config::Log;

/// Installs the logger at the configured level.
///
/// Calling it again fails, the first logger stays installed.
pub fn init_logger(config: &Log) -> anyhow::Result<()> {
    simple_logger::init_with_level(config.level.as_level())?;
    Ok(())
}
