//! Maintenance service: BLE mode, command channel and log relay.
//!
//! ```text
//!  Service 7b691dff-…
//!   ├─ mode        (R/W/N, 1 byte)        always
//!   ├─ command     (R/W/N, UTF-8)         always
//!   ├─ log         (R/N,   UTF-8)         relay enabled
//!   └─ log level   (R/W/N, 1 byte)        relay enabled
//! ```
//!
//! This type only owns the characteristics. Writes are routed here by the
//! controller after they have crossed the deferred queue.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{
    CharacteristicHandle, Descriptor, GattError, GattServer, Permissions, Properties,
    ServiceHandle,
};
use crate::app::security::SecurityMode;

pub const MAINTENANCE_SERVICE_UUID: &str = "7b691dff-9062-4192-b46a-692e0da81d91";
pub const MODE_CHARACTERISTIC_UUID: &str = "9484a6ab-54c9-4432-bff9-13bada528ab7";
pub const COMMAND_CHARACTERISTIC_UUID: &str = "87a7b1e2-3c7e-4c8a-9b5d-2f8c6d0e4a11";
pub const LOG_CHARACTERISTIC_UUID: &str = "a1083f3b-0ad6-49e0-8a9d-56eb5bf462ca";
pub const LOG_LEVEL_CHARACTERISTIC_UUID: &str = "d2af61d2-5086-4a99-94e9-6638edc3d14c";

/// Largest value written to a text characteristic.
pub const MAX_TEXT_VALUE_LEN: usize = 512;

/// Highest numeric log level (very verbose).
pub const MAX_LOG_LEVEL: u8 = 7;

/// Which service groups are exposed over BLE. Persisted; changing it
/// restarts the device.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BleMode {
    /// Everything goes over BLE: components plus the full log relay.
    BleOnly = 0,
    /// Components over BLE; verbose logging is left to the network logger.
    #[default]
    Mixed = 1,
    /// Components are served over Wi-Fi; BLE keeps only the maintenance service.
    WifiOnly = 2,
}

/// Relay level cap when another transport carries the full log.
const SHARED_TRANSPORT_LOG_LEVEL: u8 = 4; // Config

impl BleMode {
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    pub const fn component_services_exposed(self) -> bool {
        !matches!(self, Self::WifiOnly)
    }

    /// Relay level at boot. Only `BleOnly` relays above Config.
    pub fn initial_log_level(self, configured: u8) -> u8 {
        match self {
            Self::BleOnly => configured,
            Self::Mixed | Self::WifiOnly => configured.min(SHARED_TRANSPORT_LOG_LEVEL),
        }
    }
}

impl TryFrom<u8> for BleMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(Self::BleOnly),
            1 => Ok(Self::Mixed),
            2 => Ok(Self::WifiOnly),
            other => Err(other),
        }
    }
}

/// Characteristics owned by the maintenance service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceCharacteristic {
    Mode,
    Command,
    Log,
    LogLevel,
}

/// Remove colour runs (`ESC [` … `m`) from a log line.
///
/// An unterminated run is dropped up to the end of the line.
pub fn strip_log_escapes(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut chars = message.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            for skipped in chars.by_ref() {
                if skipped == 'm' {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// Cut `text` to at most `max` bytes on a character boundary.
pub fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

pub struct MaintenanceService {
    service: ServiceHandle,
    mode: CharacteristicHandle,
    command: CharacteristicHandle,
    log: Option<CharacteristicHandle>,
    log_level: Option<CharacteristicHandle>,
    current_log_level: u8,
}

impl MaintenanceService {
    /// Create and start the service.
    pub fn setup<G: GattServer>(
        gatt: &mut G,
        security: SecurityMode,
        mode: BleMode,
        log_level: u8,
        log_relay: bool,
    ) -> Result<Self, GattError> {
        info!("Setting up maintenance service");
        let log_level = mode.initial_log_level(log_level);
        let service = gatt.get_or_create_service(MAINTENANCE_SERVICE_UUID)?;

        let mode_char = create(
            gatt,
            service,
            security,
            MODE_CHARACTERISTIC_UUID,
            true,
            "BLE Mode (0=BLE, 1=mixed, 2=WiFi)",
        )?;
        gatt.set_value(mode_char, &[mode.as_byte()]);

        let command = create(
            gatt,
            service,
            security,
            COMMAND_CHARACTERISTIC_UUID,
            true,
            "BLE command",
        )?;

        let (log, log_level_char) = if log_relay {
            let log = create(
                gatt,
                service,
                security,
                LOG_CHARACTERISTIC_UUID,
                false,
                "Log messages",
            )?;
            let level = create(
                gatt,
                service,
                security,
                LOG_LEVEL_CHARACTERISTIC_UUID,
                true,
                "Log level (0=None, 4=Config, 5=Debug)",
            )?;
            gatt.set_value(level, &[log_level]);
            (Some(log), Some(level))
        } else {
            debug!("Log relay disabled");
            (None, None)
        };

        gatt.start_service(service)?;

        Ok(Self {
            service,
            mode: mode_char,
            command,
            log,
            log_level: log_level_char,
            current_log_level: log_level,
        })
    }

    pub fn service(&self) -> ServiceHandle {
        self.service
    }

    pub fn command_characteristic(&self) -> CharacteristicHandle {
        self.command
    }

    pub fn relays_logs(&self) -> bool {
        self.log.is_some()
    }

    /// Which maintenance characteristic `handle` is, if any.
    pub fn role(&self, handle: CharacteristicHandle) -> Option<MaintenanceCharacteristic> {
        if handle == self.mode {
            Some(MaintenanceCharacteristic::Mode)
        } else if handle == self.command {
            Some(MaintenanceCharacteristic::Command)
        } else if Some(handle) == self.log {
            Some(MaintenanceCharacteristic::Log)
        } else if Some(handle) == self.log_level {
            Some(MaintenanceCharacteristic::LogLevel)
        } else {
            None
        }
    }

    pub fn log_level(&self) -> u8 {
        self.current_log_level
    }

    /// Set and publish the relay level. Levels above
    /// [`MAX_LOG_LEVEL`] are rejected.
    pub fn set_log_level<G: GattServer>(&mut self, gatt: &mut G, level: u8) -> bool {
        if level > MAX_LOG_LEVEL {
            warn!("Ignoring log level {} (max {})", level, MAX_LOG_LEVEL);
            return false;
        }
        self.current_log_level = level;
        if let Some(handle) = self.log_level {
            gatt.set_value(handle, &[level]);
            gatt.notify(handle);
        }
        true
    }

    pub fn publish_mode<G: GattServer>(&self, gatt: &mut G, mode: BleMode) {
        gatt.set_value(self.mode, &[mode.as_byte()]);
        gatt.notify(self.mode);
    }

    pub fn publish_command_result<G: GattServer>(&self, gatt: &mut G, result: &str) {
        let text = truncate_utf8(result, MAX_TEXT_VALUE_LEN);
        gatt.set_value(self.command, text.as_bytes());
        gatt.notify(self.command);
    }

    /// Relay one log line if its level passes the filter.
    ///
    /// Must not log: it runs for every relayed record.
    pub fn relay_log<G: GattServer>(&self, gatt: &mut G, level: u8, message: &str) -> bool {
        let Some(handle) = self.log else {
            return false;
        };
        if level == 0 || level > self.current_log_level {
            return false;
        }
        let clean = strip_log_escapes(message);
        let text = truncate_utf8(&clean, MAX_TEXT_VALUE_LEN);
        gatt.set_value(handle, text.as_bytes());
        gatt.notify(handle);
        true
    }
}

fn create<G: GattServer>(
    gatt: &mut G,
    service: ServiceHandle,
    security: SecurityMode,
    uuid: &str,
    writable: bool,
    description: &str,
) -> Result<CharacteristicHandle, GattError> {
    let mut properties = Properties::READ | Properties::NOTIFY;
    if writable {
        properties = properties | Properties::WRITE;
    }
    let handle = gatt.create_characteristic(
        service,
        uuid,
        properties,
        Permissions::for_access(security, writable),
    )?;
    gatt.add_descriptor(
        handle,
        Descriptor::UserDescription(description.to_string()),
        Permissions::for_access(security, false),
    )?;
    gatt.add_descriptor(
        handle,
        Descriptor::ClientConfiguration,
        Permissions::for_access(security, true),
    )?;
    Ok(handle)
}
