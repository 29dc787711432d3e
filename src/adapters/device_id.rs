//! Device identity derived from the ESP32 factory MAC address.
//!
//! The advertised BLE name is `blectl-xxyyzz` (last 3 bytes of the 6-byte
//! MAC in lowercase hex), stable across reboots because the MAC is burned
//! into eFuse.

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Advertised name, at most 29 bytes so it fits one advertising packet.
pub type DeviceName = heapless::String<29>;

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// `<prefix>-xxyyzz`; the prefix is cut so the result always fits.
pub fn device_name(prefix: &str, mac: &MacAddress) -> DeviceName {
    use core::fmt::Write;
    let mut name = DeviceName::new();
    let prefix = crate::app::maintenance::truncate_utf8(prefix, 22);
    let _ = write!(name, "{}-{:02x}{:02x}{:02x}", prefix, mac[3], mac[4], mac[5]);
    name
}
