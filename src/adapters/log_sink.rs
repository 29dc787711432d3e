//! Process logger: console output plus the BLE log relay.
//!
//! [`BridgeLogger`] forwards every record to the platform console (the
//! ESP-IDF logger on hardware, stderr on the host) and offers a formatted
//! copy, `[L][target]: message`, to the [`LogRelay`]. The relay drops the
//! line until the maintenance service subscribes.

use std::sync::Arc;

use log::{LevelFilter, Log, Metadata, Record};

use crate::app::log_relay::{LogRelay, level_letter, level_number};

pub struct BridgeLogger {
    relay: Arc<LogRelay>,
    #[cfg(target_os = "espidf")]
    console: esp_idf_svc::log::EspLogger,
}

impl BridgeLogger {
    pub fn new(relay: Arc<LogRelay>) -> Self {
        Self {
            relay,
            #[cfg(target_os = "espidf")]
            console: esp_idf_svc::log::EspLogger::new(),
        }
    }

    /// Install as the global logger. Fails if one is already installed.
    pub fn install(relay: Arc<LogRelay>, level: LevelFilter) -> Result<(), log::SetLoggerError> {
        let logger: &'static Self = Box::leak(Box::new(Self::new(relay)));
        log::set_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    pub fn relay_line(record: &Record<'_>) -> String {
        format!(
            "[{}][{}]: {}",
            level_letter(record.level()),
            record.target(),
            record.args()
        )
    }
}

impl Log for BridgeLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        #[cfg(target_os = "espidf")]
        self.console.log(record);
        #[cfg(not(target_os = "espidf"))]
        eprintln!("{} ({}): {}", level_letter(record.level()), record.target(), record.args());

        if self.relay.is_subscribed() {
            self.relay
                .offer(level_number(record.level()), Self::relay_line(record));
        }
    }

    fn flush(&self) {}
}
