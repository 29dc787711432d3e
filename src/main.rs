//! BLE controller firmware: main entry point.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     Adapters (outer ring)                     │
//! │                                                               │
//! │  BleGattAdapter   NvsAdapter        DevicePlatform            │
//! │  (GattServer)     (Prefs+Config)    (HostPlatform)            │
//! │  BridgeLogger     Local* entities                             │
//! │                                                               │
//! │  ──────────────── Port Trait Boundary ──────────────────      │
//! │                                                               │
//! │  ┌───────────────────────────────────────────────────────┐    │
//! │  │          BleController (loop thread only)             │    │
//! │  │  registry · commands · maintenance · pairing          │    │
//! │  └───────────────────────────────────────────────────────┘    │
//! │        ▲ DeferredQueue (radio task → loop)                    │
//! └───────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::{PinDriver, Pull};
use esp_idf_hal::peripherals::Peripherals;
use log::{LevelFilter, info, warn};

use blectl::adapters::device_id;
use blectl::adapters::entities::{ChangeLog, LocalBinarySensor, LocalSensor, LocalSwitch};
use blectl::adapters::gatt::BleGattAdapter;
use blectl::adapters::log_sink::BridgeLogger;
use blectl::adapters::nvs::NvsAdapter;
use blectl::adapters::platform::DevicePlatform;
use blectl::app::commands::CommandResultSender;
use blectl::app::components::ComponentRef;
use blectl::app::log_relay::LogRelay;
use blectl::app::ports::ConfigPort;
use blectl::config::ControllerConfig;
use blectl::{BleController, Error};

/// Loop period; one deferred closure is handled per iteration.
const LOOP_INTERVAL_MS: u32 = 10;

/// Service used for the built-in entities when config binds none.
const DEFAULT_SERVICE_UUID: &str = "4fafc201-1fb5-459e-8fcc-c5c9c331914b";
const DEFAULT_BINDINGS: [(&str, &str); 3] = [
    ("client_connected", "beb5483e-36e1-4688-b7f5-ea07361b26a8"),
    ("uptime", "1c95d5e3-d8f7-413a-bf3d-7a2e5d7be87e"),
    ("relay", "6e400002-b5a3-f393-e0a9-e50e24dcca9e"),
];

type Controller = BleController<BleGattAdapter, DevicePlatform, NvsAdapter>;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    let relay = Arc::new(LogRelay::new());
    BridgeLogger::install(Arc::clone(&relay), LevelFilter::Debug)
        .map_err(|e| anyhow::anyhow!("logger: {}", e))?;

    info!("BLE controller v{} ({})", env!("CARGO_PKG_VERSION"), env!("BLECTL_BUILD_TIMESTAMP"));

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let nvs = NvsAdapter::new().map_err(Error::from)?;
    let config = match nvs.load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            ControllerConfig::default()
        }
    };

    // ── 3. Host entities ──────────────────────────────────────
    let peripherals = Peripherals::take()?;
    let relay_pin = RefCell::new(PinDriver::output(peripherals.pins.gpio2)?);
    // BOOT button: a press moves component services between BLE and Wi-Fi.
    let mut mode_button = PinDriver::input(peripherals.pins.gpio0)?;
    mode_button.set_pull(Pull::Up)?;

    let changes = ChangeLog::new();
    let connected = LocalBinarySensor::new("Client Connected", &changes);
    let uptime = LocalSensor::new("Uptime", &changes);
    let relay_switch = Rc::new(LocalSwitch::new("Relay", &changes).with_action(move |on| {
        let mut pin = relay_pin.borrow_mut();
        let result = if on { pin.set_high() } else { pin.set_low() };
        if let Err(e) = result {
            warn!("Relay GPIO write failed: {}", e);
        }
    }));

    let mac = device_id::read_mac();
    let mut platform = DevicePlatform::new(&device_id::device_name("blectl", &mac));
    platform.add_component(ComponentRef::BinarySensor(connected.clone()));
    platform.add_component(ComponentRef::Sensor(uptime.clone()));
    platform.add_component(ComponentRef::Switch(relay_switch));

    // ── 4. Controller ─────────────────────────────────────────
    let use_default_bindings = config.components.is_empty();
    let custom_commands = config.commands.clone();
    let mut controller: Controller =
        BleController::new(config, BleGattAdapter::new(), platform, nvs);

    if use_default_bindings {
        for (object_id, characteristic) in DEFAULT_BINDINGS {
            if let Some(component) = controller.platform().component(object_id).cloned() {
                controller.register_component(
                    &component,
                    DEFAULT_SERVICE_UUID,
                    characteristic,
                    true,
                );
            }
        }
    }

    register_custom_commands(&mut controller, &custom_commands);

    controller.add_on_show_pass_key_callback(|key| info!("Pairing pass key: {}", key));
    controller.add_on_authentication_complete_callback(|ok| {
        info!("Pairing {}", if ok { "succeeded" } else { "failed" });
    });
    {
        let connected = connected.clone();
        controller.add_on_connected_callback(move || connected.publish_state(true));
    }
    controller.add_on_disconnected_callback(move || connected.publish_state(false));
    controller.set_log_relay(relay);

    controller.setup().map_err(Error::from)?;
    controller.dump_config();

    // ── 5. Loop ───────────────────────────────────────────────
    let boot = Instant::now();
    let mut last_uptime = 0u64;
    let mut button_was_down = false;
    loop {
        controller.tick();

        let button_down = mode_button.is_low();
        if button_down && !button_was_down {
            info!("Mode button pressed");
            controller.toggle_component_services();
        }
        button_was_down = button_down;

        let secs = boot.elapsed().as_secs();
        if secs != last_uptime {
            last_uptime = secs;
            uptime.publish_state(secs as f32);
        }

        for object_id in changes.drain() {
            if let Some(component) = controller.platform().component(&object_id).cloned() {
                controller.on_component_update(&component);
            }
        }

        FreeRtos::delay_ms(LOOP_INTERVAL_MS);
    }
}

/// Wire triggers for the custom commands named in config. With none
/// configured, `uptime` and `heap` are offered.
fn register_custom_commands(
    controller: &mut Controller,
    bindings: &[blectl::config::CommandBinding],
) {
    let defaults = [
        ("uptime", "Seconds since boot"),
        ("heap", "Free heap in bytes"),
    ];
    let requested: Vec<(String, String)> = if bindings.is_empty() {
        defaults
            .iter()
            .map(|(n, d)| ((*n).to_string(), (*d).to_string()))
            .collect()
    } else {
        bindings
            .iter()
            .map(|b| (b.name.clone(), b.description.clone()))
            .collect()
    };

    let boot = Instant::now();
    for (name, description) in requested {
        let result = match name.as_str() {
            "uptime" => controller.register_command(
                &name,
                &description,
                move |_args: &[String], sender: CommandResultSender| {
                    sender.send(format!("Up {} s.", boot.elapsed().as_secs()));
                },
            ),
            "heap" => controller.register_command(
                &name,
                &description,
                |_args: &[String], sender: CommandResultSender| {
                    // SAFETY: read-only heap statistics query.
                    let free = unsafe { esp_idf_svc::sys::esp_get_free_heap_size() };
                    sender.send(format!("Free heap {} bytes.", free));
                },
            ),
            other => {
                warn!("No trigger for custom command '{}'", other);
                continue;
            }
        };
        if let Err(e) = result {
            warn!("Custom command '{}' rejected: {}", name, e);
        }
    }
}
