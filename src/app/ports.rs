//! Port traits: the hexagonal boundary between the controller and the outside world.
//!
//! ```text
//!   GATT adapter ─┐                      ┌─▶ HostPlatform (components, restart)
//!                 ├─▶ BleController ─────┼─▶ PreferenceStore (mode, Wi-Fi record)
//!   RadioCallbacks◀┘   (loop thread)      └─▶ ConfigPort (controller config)
//! ```
//!
//! Driven adapters implement these traits. The
//! [`BleController`](super::controller::BleController) consumes them via
//! generics, so the domain core never touches the radio stack directly.
//!
//! [`RadioCallbacks`] points the other way: the transport calls it from
//! its own task, and the implementation must only enqueue work.

use core::fmt;

use crate::app::components::ComponentRef;
use crate::app::security::SecurityMode;
use crate::app::wifi_settings::WifiSettings;
use crate::config::ControllerConfig;

// ───────────────────────────────────────────────────────────────
// GATT attribute vocabulary
// ───────────────────────────────────────────────────────────────

/// Opaque service handle issued by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceHandle(pub u16);

/// Opaque characteristic handle issued by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle(pub u16);

/// Characteristic property bits (values match `ESP_GATT_CHAR_PROP_BIT_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Properties(u8);

impl Properties {
    pub const READ: Self = Self(0x02);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for Properties {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Attribute permission bits (values match `ESP_GATT_PERM_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions(u16);

impl Permissions {
    pub const READ: Self = Self(0x0001);
    pub const READ_ENC_MITM: Self = Self(0x0004);
    pub const WRITE: Self = Self(0x0010);
    pub const WRITE_ENC_MITM: Self = Self(0x0040);

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Permissions for an attribute under the given security mode.
    ///
    /// Applied to characteristics and to each of their descriptors.
    pub fn for_access(security: SecurityMode, writable: bool) -> Self {
        match (security.is_enabled(), writable) {
            (true, true) => Self::READ_ENC_MITM | Self::WRITE_ENC_MITM,
            (true, false) => Self::READ_ENC_MITM,
            (false, true) => Self::READ | Self::WRITE,
            (false, false) => Self::READ,
        }
    }
}

impl core::ops::BitOr for Permissions {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Descriptors this controller attaches to characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    /// `0x2901` Characteristic User Description.
    UserDescription(String),
    /// `0x2902` Client Characteristic Configuration (notify enable).
    ClientConfiguration,
}

impl Descriptor {
    /// 16-bit SIG-assigned descriptor UUID.
    pub const fn uuid16(&self) -> u16 {
        match self {
            Self::UserDescription(_) => 0x2901,
            Self::ClientConfiguration => 0x2902,
        }
    }
}

/// Address of a bonded remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BondedDevice {
    pub address: [u8; 6],
}

impl fmt::Display for BondedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.address;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}

// ───────────────────────────────────────────────────────────────
// GATT server port (driven adapter: controller → radio stack)
// ───────────────────────────────────────────────────────────────

/// The GATT-like capability consumed by the controller.
///
/// Advertising, encryption primitives and bond storage live behind this
/// trait; the controller only calls into them.
pub trait GattServer {
    /// Bring up the radio stack and register the GATT application.
    fn init(&mut self, device_name: &str) -> Result<(), GattError>;

    /// Install the callback sink for writes, connections and security
    /// events. Only the first installation succeeds.
    fn install_callbacks(
        &mut self,
        callbacks: std::sync::Arc<dyn RadioCallbacks>,
    ) -> Result<(), GattError>;

    /// Set pairing parameters for the given mode.
    fn configure_security(&mut self, mode: SecurityMode) -> Result<(), GattError>;

    /// Return the service with `uuid`, creating it on first use.
    fn get_or_create_service(&mut self, uuid: &str) -> Result<ServiceHandle, GattError>;

    fn create_characteristic(
        &mut self,
        service: ServiceHandle,
        uuid: &str,
        properties: Properties,
        permissions: Permissions,
    ) -> Result<CharacteristicHandle, GattError>;

    fn add_descriptor(
        &mut self,
        characteristic: CharacteristicHandle,
        descriptor: Descriptor,
        permissions: Permissions,
    ) -> Result<(), GattError>;

    fn start_service(&mut self, service: ServiceHandle) -> Result<(), GattError>;

    fn set_value(&mut self, characteristic: CharacteristicHandle, value: &[u8]);

    fn value(&self, characteristic: CharacteristicHandle) -> Vec<u8>;

    /// Push the current value to subscribed clients.
    fn notify(&mut self, characteristic: CharacteristicHandle);

    fn start_advertising(&mut self) -> Result<(), GattError>;

    fn bonded_devices(&self) -> Vec<BondedDevice>;

    fn remove_bond(&mut self, device: &BondedDevice) -> Result<(), GattError>;
}

/// Callbacks the transport invokes from its own task context.
///
/// Implementations must not touch loop-owned state; they may only answer
/// synchronously with precomputed values and enqueue work.
pub trait RadioCallbacks: Send + Sync {
    fn on_write(&self, characteristic: CharacteristicHandle, data: &[u8]);
    fn on_connect(&self);
    fn on_disconnect(&self);
    /// Return the pass key the peer must enter.
    fn on_pass_key_request(&self) -> u32;
    fn on_pass_key_notify(&self, pass_key: u32);
    /// Return whether to accept the peer's security request.
    fn on_security_request(&self) -> bool;
    /// Return whether to accept the numeric comparison value.
    fn on_confirm_pin(&self, pin: u32) -> bool;
    fn on_authentication_complete(&self, success: bool);
}

// ───────────────────────────────────────────────────────────────
// Host platform port
// ───────────────────────────────────────────────────────────────

/// Services provided by the surrounding firmware.
pub trait HostPlatform {
    /// Advertised device name.
    fn device_name(&self) -> String;

    /// Build timestamp of the running image.
    fn build_timestamp(&self) -> String;

    /// Every component known to the host, of every supported kind.
    fn components(&self) -> Vec<ComponentRef>;

    /// Reboot the device. On hardware this does not return.
    fn restart(&mut self);

    /// Point the station interface at the given network.
    fn apply_wifi_override(&mut self, settings: &WifiSettings);
}

// ───────────────────────────────────────────────────────────────
// Preference store (driven adapter: controller ↔ NVS)
// ───────────────────────────────────────────────────────────────

/// Fixed-size records addressed by a 32-bit hash key.
pub trait PreferenceStore {
    /// Read a record. Returns the number of bytes written to `buf`.
    fn load(&self, key: u32, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a record atomically.
    fn save(&mut self, key: u32, data: &[u8]) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Configuration port
// ───────────────────────────────────────────────────────────────

/// Loads and persists the controller configuration.
///
/// Implementations MUST call [`ControllerConfig::validate`] before
/// persisting.
pub trait ConfigPort {
    /// Returns [`ControllerConfig::default()`] if nothing is stored.
    fn load_config(&self) -> Result<ControllerConfig, ConfigError>;

    fn save_config(&mut self, config: &ControllerConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`GattServer`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattError {
    /// Controller or host stack failed to initialise or enable.
    StackInit,
    /// The stack did not confirm an operation in time.
    Timeout,
    /// Attribute table is full.
    NoResources,
    /// Handle was not issued by this server.
    UnknownHandle,
    /// UUID is not 16, 32 or 128 bits of hex.
    InvalidUuid,
    /// A callback sink is already installed.
    CallbacksAlreadyInstalled,
    /// Stack returned an error code.
    Stack(i32),
}

impl fmt::Display for GattError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackInit => write!(f, "BLE stack initialisation failed"),
            Self::Timeout => write!(f, "BLE stack did not respond"),
            Self::NoResources => write!(f, "GATT attribute table full"),
            Self::UnknownHandle => write!(f, "unknown GATT handle"),
            Self::InvalidUuid => write!(f, "malformed UUID"),
            Self::CallbacksAlreadyInstalled => write!(f, "radio callbacks already installed"),
            Self::Stack(code) => write!(f, "BLE stack error {}", code),
        }
    }
}

/// Errors from [`ConfigPort`] operations.
#[derive(Debug)]
pub enum ConfigError {
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

/// Errors from [`PreferenceStore`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "storage I/O error"),
        }
    }
}
