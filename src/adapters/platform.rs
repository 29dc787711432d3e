//! Host platform adapter.
//!
//! Implements [`HostPlatform`]: device identity, the firmware build
//! timestamp, the component list, restart and the Wi-Fi override.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_restart()` and `esp_wifi_set_config()`.
//! - **all other targets**: restarts and applied overrides are recorded so
//!   tests can assert on them.

use log::{info, warn};

use crate::app::components::ComponentRef;
use crate::app::ports::HostPlatform;
use crate::app::wifi_settings::WifiSettings;

/// Build timestamp baked in by `build.rs`.
pub const BUILD_TIMESTAMP: &str = env!("BLECTL_BUILD_TIMESTAMP");

pub struct DevicePlatform {
    device_name: String,
    build_timestamp: String,
    components: Vec<ComponentRef>,
    #[cfg(not(target_os = "espidf"))]
    restarts: u32,
    #[cfg(not(target_os = "espidf"))]
    applied_wifi: Option<WifiSettings>,
}

impl DevicePlatform {
    pub fn new(device_name: &str) -> Self {
        Self {
            device_name: device_name.to_string(),
            build_timestamp: BUILD_TIMESTAMP.to_string(),
            components: Vec::new(),
            #[cfg(not(target_os = "espidf"))]
            restarts: 0,
            #[cfg(not(target_os = "espidf"))]
            applied_wifi: None,
        }
    }

    /// Replace the build timestamp (tests, reproducible images).
    #[must_use]
    pub fn with_build_timestamp(mut self, timestamp: &str) -> Self {
        self.build_timestamp = timestamp.to_string();
        self
    }

    pub fn add_component(&mut self, component: ComponentRef) {
        self.components.push(component);
    }

    pub fn component(&self, object_id: &str) -> Option<&ComponentRef> {
        self.components.iter().find(|c| c.object_id() == object_id)
    }

    #[cfg(target_os = "espidf")]
    fn platform_restart(&mut self) {
        // SAFETY: esp_restart never returns.
        unsafe { esp_idf_svc::sys::esp_restart() };
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_restart(&mut self) {
        self.restarts += 1;
    }

    #[cfg(target_os = "espidf")]
    fn platform_apply_wifi(&mut self, settings: &WifiSettings) {
        use esp_idf_svc::sys::*;
        // SAFETY: wifi_config_t is a plain C union; zero is valid.
        let mut config: wifi_config_t = unsafe { core::mem::zeroed() };
        // SAFETY: the `sta` member is the one written and read below.
        unsafe {
            let ssid = settings.ssid.as_bytes();
            config.sta.ssid[..ssid.len()].copy_from_slice(ssid);
            let password = settings.password.as_bytes();
            config.sta.password[..password.len()].copy_from_slice(password);
            config.sta.scan_method = if settings.hidden {
                wifi_scan_method_t_WIFI_ALL_CHANNEL_SCAN
            } else {
                wifi_scan_method_t_WIFI_FAST_SCAN
            };
        }
        // SAFETY: `config` outlives the call; the driver copies it.
        let ret = unsafe { esp_wifi_set_config(wifi_interface_t_WIFI_IF_STA, &mut config) };
        if ret != ESP_OK {
            warn!("Platform: WIFI override not applied ({}), station not running", ret);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_apply_wifi(&mut self, settings: &WifiSettings) {
        self.applied_wifi = Some(settings.clone());
    }
}

#[cfg(not(target_os = "espidf"))]
impl DevicePlatform {
    pub fn restart_count(&self) -> u32 {
        self.restarts
    }

    pub fn applied_wifi(&self) -> Option<&WifiSettings> {
        self.applied_wifi.as_ref()
    }
}

impl HostPlatform for DevicePlatform {
    fn device_name(&self) -> String {
        self.device_name.clone()
    }

    fn build_timestamp(&self) -> String {
        self.build_timestamp.clone()
    }

    fn components(&self) -> Vec<ComponentRef> {
        self.components.clone()
    }

    fn restart(&mut self) {
        warn!("Platform: restarting");
        self.platform_restart();
    }

    fn apply_wifi_override(&mut self, settings: &WifiSettings) {
        info!(
            "Platform: WIFI override '{}' (hidden={})",
            settings.ssid, settings.hidden
        );
        self.platform_apply_wifi(settings);
    }
}
