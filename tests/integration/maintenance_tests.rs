//! Maintenance service: BLE mode persistence and restart, log relay,
//! log level, and setup failure paths.

use std::sync::Arc;

use blectl::adapters::gatt::BleGattAdapter;
use blectl::app::controller::ControllerState;
use blectl::app::log_relay::LogRelay;
use blectl::app::maintenance::{
    BleMode, COMMAND_CHARACTERISTIC_UUID, LOG_CHARACTERISTIC_UUID, LOG_LEVEL_CHARACTERISTIC_UUID,
    MAINTENANCE_SERVICE_UUID, MODE_CHARACTERISTIC_UUID,
};
use blectl::app::ports::{Descriptor, GattError, GattServer, PreferenceStore};
use blectl::app::wifi_settings::fnv1_hash;
use blectl::config::ControllerConfig;
use blectl::error::SetupError;

use crate::mock_host::{
    DEVICE_NAME, DOOR_UUID, TestController, build, build_with, client_write, last_notification,
    prefs, running,
};

fn stored_mode(ctl: &TestController) -> Option<u8> {
    let mut buf = [0u8; 1];
    ctl.prefs()
        .load(fnv1_hash("BLEMaintenanceMode"), &mut buf)
        .ok()
        .map(|_| buf[0])
}

fn characteristic_value(ctl: &TestController, uuid: &str) -> Vec<u8> {
    let handle = ctl.gatt().characteristic_by_uuid(uuid).unwrap();
    ctl.gatt().value(handle)
}

fn running_with_relay(config: ControllerConfig) -> (TestController, Arc<LogRelay>) {
    let (mut ctl, _host) = build(config);
    let relay = Arc::new(LogRelay::new());
    ctl.set_log_relay(Arc::clone(&relay));
    ctl.setup().unwrap();
    (ctl, relay)
}

// ── Setup ─────────────────────────────────────────────────────

#[test]
fn setup_brings_up_stack_and_advertises() {
    let (ctl, _host) = running();
    assert_eq!(ctl.state(), ControllerState::Running);
    assert_eq!(ctl.gatt().device_name(), DEVICE_NAME);
    assert!(ctl.gatt().is_advertising());
    assert!(ctl.gatt().is_service_started(MAINTENANCE_SERVICE_UUID));
    assert_eq!(ctl.current_ble_mode(), BleMode::Mixed);
    // Mode characteristic reflects the active mode.
    let mode = ctl
        .gatt()
        .characteristic_by_uuid(MODE_CHARACTERISTIC_UUID)
        .unwrap();
    assert_eq!(ctl.gatt().value(mode), vec![1]);
    assert_eq!(
        ctl.gatt().descriptors(mode)[0],
        Descriptor::UserDescription("BLE Mode (0=BLE, 1=mixed, 2=WiFi)".into())
    );
}

#[test]
fn setup_twice_is_rejected() {
    let (mut ctl, _host) = running();
    assert_eq!(ctl.setup(), Err(SetupError::AlreadySetUp));
    assert_eq!(ctl.state(), ControllerState::Running);
}

#[test]
fn radio_failure_marks_controller_failed() {
    let mut gatt = BleGattAdapter::new();
    gatt.fail_init();
    let (mut ctl, _host) = build_with(ControllerConfig::default(), gatt, prefs());

    assert_eq!(ctl.setup(), Err(SetupError::RadioInit(GattError::StackInit)));
    assert!(ctl.is_failed());
    assert!(ctl.maintenance().is_none());

    // The loop is inert.
    ctl.loop_handle().defer(|c: &mut TestController| c.execute_command("help"));
    ctl.tick();
    assert_eq!(ctl.pending_work(), 1);
}

#[test]
fn maintenance_service_failure_marks_controller_failed() {
    let mut gatt = BleGattAdapter::new();
    gatt.fail_service(MAINTENANCE_SERVICE_UUID);
    let (mut ctl, _host) = build_with(ControllerConfig::default(), gatt, prefs());

    assert_eq!(
        ctl.setup(),
        Err(SetupError::MaintenanceService(GattError::NoResources))
    );
    assert!(ctl.is_failed());
    assert!(ctl.gatt().characteristic_by_uuid(DOOR_UUID).is_none());
}

#[test]
fn second_controller_on_same_transport_keeps_first_owner() {
    let (first, _first_host) = build(ControllerConfig::default());
    let mut gatt = BleGattAdapter::new();
    gatt.install_callbacks(Arc::new(first.loop_handle())).unwrap();

    let (mut second, _host) = build_with(ControllerConfig::default(), gatt, prefs());
    second.setup().unwrap();

    second.gatt().client_connect();
    assert_eq!(second.pending_work(), 0);
    assert_eq!(first.pending_work(), 1);
}

// ── BLE mode ──────────────────────────────────────────────────

#[test]
fn mode_write_persists_and_restarts_at_end_of_tick() {
    let (mut ctl, _host) = running();
    let mode = ctl
        .gatt()
        .characteristic_by_uuid(MODE_CHARACTERISTIC_UUID)
        .unwrap();

    ctl.gatt().client_write(mode, &[0]);
    assert_eq!(ctl.platform().restart_count(), 0);
    ctl.tick();

    assert_eq!(ctl.current_ble_mode(), BleMode::BleOnly);
    assert_eq!(stored_mode(&ctl), Some(0));
    assert_eq!(ctl.gatt().last_notification(mode), Some(vec![0]));
    assert_eq!(ctl.platform().restart_count(), 1);

    // Only once.
    ctl.tick();
    assert_eq!(ctl.platform().restart_count(), 1);
}

#[test]
fn automation_switches_component_services() {
    let (mut ctl, _host) = running();
    ctl.set_component_services_enabled(true);
    assert_eq!(ctl.platform().restart_count(), 0, "already mixed");

    ctl.toggle_component_services();
    assert_eq!(ctl.current_ble_mode(), BleMode::WifiOnly);
    assert_eq!(stored_mode(&ctl), Some(2));
    ctl.tick();
    assert_eq!(ctl.platform().restart_count(), 1);

    ctl.switch_ble_mode(BleMode::BleOnly);
    assert_eq!(stored_mode(&ctl), Some(0));
    assert_eq!(last_notification(&ctl, MODE_CHARACTERISTIC_UUID), Some(vec![0]));
}

#[test]
fn automation_before_setup_is_ignored() {
    let (mut ctl, _host) = build(ControllerConfig::default());
    ctl.switch_ble_mode(BleMode::WifiOnly);
    assert_eq!(ctl.current_ble_mode(), BleMode::Mixed);
    assert_eq!(stored_mode(&ctl), None);
}

#[test]
fn same_mode_write_is_a_no_op() {
    let (mut ctl, _host) = running();
    client_write(&mut ctl, MODE_CHARACTERISTIC_UUID, &[1]);
    assert_eq!(stored_mode(&ctl), None);
    assert_eq!(ctl.platform().restart_count(), 0);
}

#[test]
fn invalid_mode_writes_are_ignored() {
    let (mut ctl, _host) = running();
    client_write(&mut ctl, MODE_CHARACTERISTIC_UUID, &[3]);
    client_write(&mut ctl, MODE_CHARACTERISTIC_UUID, &[0xff]);
    client_write(&mut ctl, MODE_CHARACTERISTIC_UUID, &[0, 0]);
    client_write(&mut ctl, MODE_CHARACTERISTIC_UUID, &[]);
    assert_eq!(ctl.current_ble_mode(), BleMode::Mixed);
    assert_eq!(stored_mode(&ctl), None);
    assert_eq!(ctl.platform().restart_count(), 0);
}

#[test]
fn stored_mode_wins_over_configured_mode() {
    let mut store = prefs();
    store
        .save(fnv1_hash("BLEMaintenanceMode"), &[BleMode::WifiOnly.as_byte()])
        .unwrap();
    let (mut ctl, _host) = build_with(ControllerConfig::default(), BleGattAdapter::new(), store);
    ctl.setup().unwrap();

    assert_eq!(ctl.current_ble_mode(), BleMode::WifiOnly);
    assert!(ctl.registry().is_empty());
    assert!(ctl.gatt().characteristic_by_uuid(DOOR_UUID).is_none());
    assert!(
        ctl.gatt()
            .characteristic_by_uuid(LOG_CHARACTERISTIC_UUID)
            .is_some()
    );
}

#[test]
fn corrupt_stored_mode_falls_back_to_config() {
    let mut store = prefs();
    store.save(fnv1_hash("BLEMaintenanceMode"), &[9]).unwrap();
    let config = ControllerConfig {
        initial_ble_mode: BleMode::WifiOnly,
        ..Default::default()
    };
    let (mut ctl, _host) = build_with(config, BleGattAdapter::new(), store);
    ctl.setup().unwrap();
    assert_eq!(ctl.current_ble_mode(), BleMode::WifiOnly);
}

#[test]
fn wifi_mode_byte_hides_components() {
    let (mut ctl, _host) = running();
    client_write(&mut ctl, MODE_CHARACTERISTIC_UUID, &[2]);
    assert_eq!(ctl.current_ble_mode(), BleMode::WifiOnly);
    assert_eq!(stored_mode(&ctl), Some(2));

    // After the restart, components are served over Wi-Fi only.
    let mut store = prefs();
    store.save(fnv1_hash("BLEMaintenanceMode"), &[2]).unwrap();
    let (mut rebooted, _host) =
        build_with(ControllerConfig::default(), BleGattAdapter::new(), store);
    rebooted.setup().unwrap();
    assert_eq!(rebooted.current_ble_mode(), BleMode::WifiOnly);
    assert!(rebooted.registry().is_empty());
    assert!(rebooted.gatt().characteristic_by_uuid(DOOR_UUID).is_none());
    assert!(
        rebooted
            .gatt()
            .characteristic_by_uuid(COMMAND_CHARACTERISTIC_UUID)
            .is_some()
    );
}

#[test]
fn ble_only_mode_exposes_components_and_full_log_level() {
    let (ctl, relay) = running_with_relay(ControllerConfig {
        initial_ble_mode: BleMode::BleOnly,
        log_level: 6,
        ..Default::default()
    });
    assert!(ctl.gatt().characteristic_by_uuid(DOOR_UUID).is_some());
    assert!(ctl.maintenance().unwrap().relays_logs());
    assert!(relay.is_subscribed());
    assert_eq!(ctl.maintenance().unwrap().log_level(), 6);
    assert_eq!(characteristic_value(&ctl, LOG_LEVEL_CHARACTERISTIC_UUID), vec![6]);
}

#[test]
fn shared_modes_start_relay_at_config_level() {
    let (ctl, _relay) = running_with_relay(ControllerConfig {
        initial_ble_mode: BleMode::Mixed,
        log_level: 6,
        ..Default::default()
    });
    assert_eq!(ctl.maintenance().unwrap().log_level(), 4);
}

// ── Log relay ─────────────────────────────────────────────────

#[test]
fn log_lines_are_relayed_without_colour_codes() {
    let (mut ctl, relay) = running_with_relay(ControllerConfig::default());
    assert!(relay.is_subscribed());

    relay.offer(3, "\x1b[0;32m[I][wifi]: connected\x1b[0m".into());
    ctl.tick();

    let log = ctl
        .gatt()
        .characteristic_by_uuid(LOG_CHARACTERISTIC_UUID)
        .unwrap();
    assert_eq!(
        ctl.gatt().last_notification(log),
        Some(b"[I][wifi]: connected".to_vec())
    );
}

#[test]
fn log_lines_above_level_are_filtered() {
    let (mut ctl, relay) = running_with_relay(ControllerConfig::default());
    relay.offer(5, "[D][loop]: tick".into());
    relay.offer(1, "[E][nvs]: write failed".into());
    ctl.tick();

    let log = ctl
        .gatt()
        .characteristic_by_uuid(LOG_CHARACTERISTIC_UUID)
        .unwrap();
    assert_eq!(
        ctl.gatt().notifications(log),
        vec![b"[E][nvs]: write failed".to_vec()]
    );

    client_write(&mut ctl, LOG_LEVEL_CHARACTERISTIC_UUID, &[5]);
    assert_eq!(
        last_notification(&ctl, LOG_LEVEL_CHARACTERISTIC_UUID),
        Some(vec![5])
    );
    relay.offer(5, "[D][loop]: tick".into());
    ctl.tick();
    assert_eq!(
        ctl.gatt().last_notification(log),
        Some(b"[D][loop]: tick".to_vec())
    );
}

#[test]
fn verbose_relay_level_opens_log_facade() {
    let (mut ctl, _relay) = running_with_relay(ControllerConfig::default());
    client_write(&mut ctl, LOG_LEVEL_CHARACTERISTIC_UUID, &[7]);
    assert_eq!(ctl.maintenance().unwrap().log_level(), 7);
    assert_eq!(log::max_level(), log::LevelFilter::Trace);
}

#[test]
fn relay_drains_at_most_one_buffer_per_tick() {
    let (mut ctl, relay) = running_with_relay(ControllerConfig::default());
    for i in 0..12 {
        relay.offer(3, format!("line {}", i));
    }
    ctl.tick();
    let log = ctl
        .gatt()
        .characteristic_by_uuid(LOG_CHARACTERISTIC_UUID)
        .unwrap();
    let relayed = ctl.gatt().notifications(log);
    assert_eq!(relayed.len(), 8);
    assert_eq!(relayed[0], b"line 0".to_vec());
    assert_eq!(relay.dropped(), 4);
}

#[test]
fn relay_not_subscribed_when_disabled() {
    let (ctl, relay) = running_with_relay(ControllerConfig {
        log_relay: false,
        ..Default::default()
    });
    assert!(!relay.is_subscribed());
    assert!(ctl.gatt().characteristic_by_uuid(LOG_CHARACTERISTIC_UUID).is_none());
}

#[test]
fn log_level_write_validates_range() {
    let (mut ctl, _host) = running();
    client_write(&mut ctl, LOG_LEVEL_CHARACTERISTIC_UUID, &[8]);
    client_write(&mut ctl, LOG_LEVEL_CHARACTERISTIC_UUID, &[1, 2]);
    assert_eq!(ctl.maintenance().unwrap().log_level(), 4);
    client_write(&mut ctl, LOG_LEVEL_CHARACTERISTIC_UUID, &[7]);
    assert_eq!(ctl.maintenance().unwrap().log_level(), 7);
}

#[test]
fn log_characteristic_is_read_only() {
    let (mut ctl, _host) = running();
    let log = ctl
        .gatt()
        .characteristic_by_uuid(LOG_CHARACTERISTIC_UUID)
        .unwrap();
    client_write(&mut ctl, LOG_CHARACTERISTIC_UUID, b"spoofed");
    assert!(ctl.gatt().value(log).is_empty());
}
