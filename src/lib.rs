//! BLE controller firmware library.
//!
//! Exposes component state over GATT characteristics, a maintenance
//! service (BLE mode, text commands, log relay) and pass-key pairing.
//! All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod deferred;
pub mod error;

pub use app::controller::BleController;
pub use error::{Error, Result};
