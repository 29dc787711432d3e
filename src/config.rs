//! Controller configuration
//!
//! Everything the controller needs before `setup()`: security, initial
//! BLE mode, log relay, the fixed pass key and which components and custom
//! commands are exposed. Stored as a postcard blob in NVS or provisioned as
//! JSON.

use serde::{Deserialize, Serialize};

use crate::app::commands::validate_command_name;
use crate::app::maintenance::{BleMode, MAX_LOG_LEVEL};
use crate::app::ports::ConfigError;
use crate::app::security::{DEFAULT_PASS_KEY, MAX_PASS_KEY, SecurityMode};

/// Where one host component is exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentBinding {
    pub object_id: String,
    pub service_uuid: String,
    pub characteristic_uuid: String,
    /// Attach a client configuration descriptor (notify subscription).
    #[serde(default = "default_true")]
    pub use_cccd: bool,
}

/// A custom command declared in configuration; its trigger is wired in code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBinding {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    // --- Security ---
    pub security_mode: SecurityMode,
    /// Pass key answered to pass-key requests (six digits max).
    pub pass_key: u32,

    // --- Maintenance ---
    /// Mode used until one has been persisted.
    pub initial_ble_mode: BleMode,
    /// Relay threshold (0=None … 7=VeryVerbose).
    pub log_level: u8,
    /// Expose the log relay characteristics.
    pub log_relay: bool,

    // --- Exposure ---
    pub components: Vec<ComponentBinding>,
    pub commands: Vec<CommandBinding>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            security_mode: SecurityMode::Encrypted,
            pass_key: DEFAULT_PASS_KEY,
            initial_ble_mode: BleMode::Mixed,
            log_level: 4, // Config
            log_relay: true,
            components: Vec::new(),
            commands: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// UUIDs are 8–36 characters of hex digits and dashes.
pub fn is_valid_uuid(uuid: &str) -> bool {
    (8..=36).contains(&uuid.len()) && uuid.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

impl ControllerConfig {
    /// Parse a provisioning document. Missing fields take their defaults;
    /// the result is validated.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(text).map_err(|_| ConfigError::Corrupted)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pass_key > MAX_PASS_KEY {
            return Err(ConfigError::ValidationFailed(
                "pass_key must be at most six digits",
            ));
        }
        if self.log_level > MAX_LOG_LEVEL {
            return Err(ConfigError::ValidationFailed("log_level must be 0–7"));
        }
        for binding in &self.components {
            if binding.object_id.is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "component object_id is empty",
                ));
            }
            if !is_valid_uuid(&binding.service_uuid) || !is_valid_uuid(&binding.characteristic_uuid)
            {
                return Err(ConfigError::ValidationFailed(
                    "component UUIDs must be 8–36 hex digits or dashes",
                ));
            }
        }
        for (i, command) in self.commands.iter().enumerate() {
            if validate_command_name(&command.name).is_err() {
                return Err(ConfigError::ValidationFailed(
                    "command names are [a-z0-9-]+ and not built-in",
                ));
            }
            if self.commands[..i].iter().any(|c| c.name == command.name) {
                return Err(ConfigError::ValidationFailed("duplicate command name"));
            }
        }
        Ok(())
    }
}
