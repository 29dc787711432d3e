//! Host components exposed as characteristics: initial publish, state
//! updates as notifications, and client writes decoded into actions.

use blectl::adapters::entities::LocalSensor;
use blectl::app::components::{
    BinarySensorEntity, ComponentRef, FanDirection, FanEntity, SwitchEntity,
};
use blectl::app::ports::{Descriptor, Permissions, Properties};
use blectl::app::security::SecurityMode;
use blectl::config::ControllerConfig;

use crate::mock_host::{
    DOOR_UUID, FAN_UUID, RELAY_UUID, SERVICE_UUID, STATUS_UUID, TEMPERATURE_UUID, build,
    characteristic, client_write, forward_changes, last_notification, running,
};

#[test]
fn every_kind_is_exposed_in_one_service() {
    let (ctl, _host) = running();
    assert_eq!(ctl.registry().len(), 5);
    assert!(ctl.gatt().is_service_started(SERVICE_UUID));

    let service = ctl.gatt().service_of(characteristic(&ctl, DOOR_UUID));
    for uuid in [TEMPERATURE_UUID, STATUS_UUID, RELAY_UUID, FAN_UUID] {
        assert_eq!(ctl.gatt().service_of(characteristic(&ctl, uuid)), service);
    }
}

#[test]
fn only_switch_and_fan_accept_writes() {
    let (ctl, _host) = running();
    for uuid in [DOOR_UUID, TEMPERATURE_UUID, STATUS_UUID] {
        let props = ctl.gatt().properties(characteristic(&ctl, uuid)).unwrap();
        assert!(props.contains(Properties::READ | Properties::NOTIFY));
        assert!(!props.contains(Properties::WRITE), "{} must be read-only", uuid);
    }
    for uuid in [RELAY_UUID, FAN_UUID] {
        let props = ctl.gatt().properties(characteristic(&ctl, uuid)).unwrap();
        assert!(props.contains(Properties::WRITE));
    }
}

#[test]
fn descriptors_carry_name_and_cccd() {
    let (ctl, _host) = running();
    let relay = characteristic(&ctl, RELAY_UUID);
    assert_eq!(
        ctl.gatt().descriptors(relay),
        &[
            Descriptor::UserDescription("Relay".into()),
            Descriptor::ClientConfiguration,
        ]
    );
}

#[test]
fn encrypted_mode_requires_mitm() {
    let (ctl, _host) = running();
    assert_eq!(ctl.gatt().security_mode(), Some(SecurityMode::Encrypted));
    let relay = ctl.gatt().permissions(characteristic(&ctl, RELAY_UUID)).unwrap();
    assert!(relay.contains(Permissions::WRITE_ENC_MITM));
    assert!(!relay.contains(Permissions::WRITE));
}

#[test]
fn open_mode_uses_plain_permissions() {
    let (mut ctl, _host) = build(ControllerConfig {
        security_mode: SecurityMode::Disabled,
        ..Default::default()
    });
    ctl.setup().unwrap();
    let door = ctl.gatt().permissions(characteristic(&ctl, DOOR_UUID)).unwrap();
    assert_eq!(door, Permissions::READ);
}

#[test]
fn current_state_published_at_setup() {
    let (ctl, _host) = running();
    assert_eq!(last_notification(&ctl, DOOR_UUID), Some(vec![0, 0]));
    assert_eq!(
        last_notification(&ctl, FAN_UUID),
        Some(b"fan=off speed=0/3 oscillating=no direction=forward".to_vec())
    );
}

#[test]
fn sensor_updates_notify() {
    let (mut ctl, host) = running();

    host.door.publish_state(true);
    host.temperature.publish_state(21.5);
    host.status.publish_state("ok");
    forward_changes(&mut ctl, &host);

    assert_eq!(last_notification(&ctl, DOOR_UUID), Some(vec![1, 0]));
    assert_eq!(
        last_notification(&ctl, TEMPERATURE_UUID),
        Some(21.5f32.to_le_bytes().to_vec())
    );
    assert_eq!(last_notification(&ctl, STATUS_UUID), Some(b"ok".to_vec()));
}

#[test]
fn direct_update_hooks() {
    let (mut ctl, _host) = running();
    ctl.on_sensor_update("temperature", -4.0);
    ctl.on_text_sensor_update("status", "degraded");
    assert_eq!(
        last_notification(&ctl, TEMPERATURE_UUID),
        Some((-4.0f32).to_le_bytes().to_vec())
    );
    assert_eq!(last_notification(&ctl, STATUS_UUID), Some(b"degraded".to_vec()));

    // Unknown ids are dropped.
    ctl.on_binary_sensor_update("window", true);
}

#[test]
fn updates_before_setup_are_dropped() {
    let (mut ctl, host) = build(ControllerConfig::default());
    host.door.publish_state(true);
    forward_changes(&mut ctl, &host);
    assert!(ctl.gatt().characteristic_by_uuid(DOOR_UUID).is_none());
}

#[test]
fn switch_write_turns_relay_on_and_off() {
    let (mut ctl, host) = running();

    client_write(&mut ctl, RELAY_UUID, &[1]);
    assert!(host.relay.state());
    assert_eq!(host.relay_actions.borrow().as_slice(), &[true]);

    forward_changes(&mut ctl, &host);
    assert_eq!(last_notification(&ctl, RELAY_UUID), Some(vec![1, 0]));

    client_write(&mut ctl, RELAY_UUID, &[0, 0]);
    assert!(!host.relay.state());
    assert_eq!(host.relay_actions.borrow().as_slice(), &[true, false]);
}

#[test]
fn empty_switch_write_is_ignored() {
    let (mut ctl, host) = running();
    client_write(&mut ctl, RELAY_UUID, &[]);
    assert!(host.relay_actions.borrow().is_empty());
}

#[test]
fn writes_to_sensors_are_ignored() {
    let (mut ctl, host) = running();
    client_write(&mut ctl, DOOR_UUID, &[1]);
    assert!(!host.door.state());
    assert!(host.changes.is_empty());
}

#[test]
fn fan_write_performs_one_call() {
    let (mut ctl, host) = running();
    client_write(
        &mut ctl,
        FAN_UUID,
        b"fan=on speed=2/3 oscillating=yes direction=reverse",
    );

    assert_eq!(host.fan.perform_count(), 1);
    let state = host.fan.state();
    assert!(state.on);
    assert_eq!(state.speed, 2);
    assert!(state.oscillating);
    assert_eq!(state.direction, FanDirection::Reverse);

    forward_changes(&mut ctl, &host);
    assert_eq!(
        last_notification(&ctl, FAN_UUID),
        Some(b"fan=on speed=2/3 oscillating=yes direction=reverse".to_vec())
    );
}

#[test]
fn fan_accepts_bare_tokens() {
    let (mut ctl, host) = running();
    client_write(&mut ctl, FAN_UUID, b"on 3 oscillating");
    let state = host.fan.state();
    assert!(state.on);
    assert_eq!(state.speed, 3);
    assert!(state.oscillating);
    assert_eq!(host.fan.perform_count(), 1);
}

#[test]
fn fan_legacy_single_byte() {
    let (mut ctl, host) = running();
    client_write(&mut ctl, FAN_UUID, &[1]);
    assert!(host.fan.state().on);
    client_write(&mut ctl, FAN_UUID, &[0]);
    assert!(!host.fan.state().on);
    assert_eq!(host.fan.perform_count(), 2);
}

#[test]
fn fan_speed_range_is_zero_to_count() {
    let (mut ctl, host) = running();
    client_write(&mut ctl, FAN_UUID, b"speed=9");
    assert_eq!(host.fan.perform_count(), 0);

    client_write(&mut ctl, FAN_UUID, b"fan=on speed=2 bogus");
    assert_eq!(host.fan.perform_count(), 1);
    assert!(host.fan.state().on);
    assert_eq!(host.fan.state().speed, 2);

    // Zero is in range and stops the fan's speed stage.
    client_write(&mut ctl, FAN_UUID, b"speed=0");
    assert_eq!(host.fan.perform_count(), 2);
    assert_eq!(host.fan.state().speed, 0);
}

#[test]
fn fan_update_hook_uses_current_state() {
    let (mut ctl, host) = running();
    client_write(&mut ctl, FAN_UUID, b"on");
    ctl.on_fan_update("fan");
    assert_eq!(
        last_notification(&ctl, FAN_UUID),
        Some(b"fan=on speed=0/3 oscillating=no direction=forward".to_vec())
    );
    assert!(host.fan.state().on);
}

#[test]
fn late_registration_is_ignored() {
    let (mut ctl, host) = running();
    let extra = LocalSensor::new("Humidity", &host.changes);
    ctl.register_component(
        &ComponentRef::Sensor(extra),
        SERVICE_UUID,
        "0000aa01-0000-1000-8000-00805f9b34fb",
        true,
    );
    assert_eq!(ctl.registry().registered_count(), 5);
    assert!(
        ctl.gatt()
            .characteristic_by_uuid("0000aa01-0000-1000-8000-00805f9b34fb")
            .is_none()
    );
}

#[test]
fn registered_but_absent_component_is_skipped() {
    let (mut ctl, _host) = build(ControllerConfig {
        components: vec![blectl::config::ComponentBinding {
            object_id: "ghost".into(),
            service_uuid: SERVICE_UUID.into(),
            characteristic_uuid: "0000aa02-0000-1000-8000-00805f9b34fb".into(),
            use_cccd: false,
        }],
        ..Default::default()
    });
    ctl.setup().unwrap();
    assert_eq!(ctl.registry().registered_count(), 6);
    assert_eq!(ctl.registry().len(), 5);
    assert!(ctl.registry().handler("ghost").is_none());
}
