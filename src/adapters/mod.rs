//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements        | Connects to                |
//! |-------------|-------------------|----------------------------|
//! | `gatt`      | GattServer        | Bluedroid / in-memory table|
//! | `nvs`       | PreferenceStore   | NVS / in-memory store      |
//! |             | ConfigPort        |                            |
//! | `platform`  | HostPlatform      | esp_restart, Wi-Fi driver  |
//! | `entities`  | entity traits     | local component state      |
//! | `log_sink`  | log::Log          | console + BLE log relay    |
//! | `device_id` | -                 | eFuse MAC → device name    |

pub mod device_id;
pub mod entities;
pub mod gatt;
pub mod log_sink;
pub mod nvs;
pub mod platform;
