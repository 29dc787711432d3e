//! Unified error types for the controller.
//!
//! Port-level errors live next to their traits in [`crate::app::ports`];
//! this module wraps them so `main` and the setup path share one type.

use core::fmt;

use crate::app::ports::{ConfigError, GattError, StorageError};

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    /// Controller setup aborted.
    Setup(SetupError),
    /// GATT transport operation failed.
    Gatt(GattError),
    /// Preference store operation failed.
    Storage(StorageError),
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup(e) => write!(f, "setup: {e}"),
            Self::Gatt(e) => write!(f, "gatt: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Setup errors
// ---------------------------------------------------------------------------

/// Why `setup()` left the controller in the failed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupError {
    /// Radio stack failed to start or enable.
    RadioInit(GattError),
    /// The maintenance service could not be created.
    MaintenanceService(GattError),
    /// `setup()` called twice.
    AlreadySetUp,
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RadioInit(e) => write!(f, "radio initialisation failed: {e}"),
            Self::MaintenanceService(e) => write!(f, "maintenance service: {e}"),
            Self::AlreadySetUp => write!(f, "controller already set up"),
        }
    }
}

impl From<SetupError> for Error {
    fn from(e: SetupError) -> Self {
        Self::Setup(e)
    }
}

impl From<GattError> for Error {
    fn from(e: GattError) -> Self {
        Self::Gatt(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
