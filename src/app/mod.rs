//! Application core: controller logic behind port traits.
//!
//! Nothing here touches the radio or flash directly. The transport,
//! preference store and host firmware are reached through the traits in
//! [`ports`], so the whole layer runs in host tests.

pub mod commands;
pub mod components;
pub mod controller;
pub mod handler;
pub mod log_relay;
pub mod maintenance;
pub mod ports;
pub mod registry;
pub mod security;
pub mod wifi_settings;
