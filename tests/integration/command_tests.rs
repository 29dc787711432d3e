//! Commands written to the command characteristic, end to end: client
//! write → deferred queue → dispatch → result notified on the same
//! characteristic.

use std::cell::RefCell;
use std::rc::Rc;

use blectl::app::commands::{CommandError, CommandResultSender};
use blectl::app::maintenance::{BleMode, COMMAND_CHARACTERISTIC_UUID, MODE_CHARACTERISTIC_UUID};
use blectl::app::ports::{BondedDevice, PreferenceStore};
use blectl::app::wifi_settings::{self, RECORD_LEN, WifiSettings, WifiSettingsError};
use blectl::config::ControllerConfig;

use crate::mock_host::{
    BUILD_TIMESTAMP, TestController, build_with, client_write, last_notification, prefs, running,
    run_until_idle, text_value,
};

fn command(controller: &mut TestController, line: &str) -> String {
    client_write(controller, COMMAND_CHARACTERISTIC_UUID, line.as_bytes());
    text_value(controller, COMMAND_CHARACTERISTIC_UUID)
}

fn stored_wifi(controller: &TestController) -> Result<WifiSettings, WifiSettingsError> {
    let mut buf = [0u8; RECORD_LEN];
    let len = controller
        .prefs()
        .load(wifi_settings::preference_key(BUILD_TIMESTAMP), &mut buf)
        .expect("record stored");
    WifiSettings::decode(&buf[..len])
}

#[test]
fn help_lists_every_command() {
    let (mut ctl, _host) = running();
    assert_eq!(
        command(&mut ctl, "help"),
        "Available: help ble-services wifi-config pairings version log-level, \
         'help <cmd>' for more."
    );
    // The result is also pushed to subscribers.
    assert_eq!(
        last_notification(&ctl, COMMAND_CHARACTERISTIC_UUID),
        Some(text_value(&ctl, COMMAND_CHARACTERISTIC_UUID).into_bytes())
    );
}

#[test]
fn help_for_one_command() {
    let (mut ctl, _host) = running();
    assert_eq!(
        command(&mut ctl, "help version"),
        "version: show the firmware build time"
    );
    assert!(command(&mut ctl, "help wifi-config").starts_with("wifi-config [<ssid> <password>"));
    assert_eq!(command(&mut ctl, "help nope"), "Unknown BLE command 'nope'");
}

#[test]
fn unknown_command_is_reported() {
    let (mut ctl, _host) = running();
    assert_eq!(command(&mut ctl, "reboot now"), "Unknown BLE command 'reboot'");
}

#[test]
fn blank_line_is_ignored() {
    let (mut ctl, _host) = running();
    assert_eq!(command(&mut ctl, "   "), "");
}

#[test]
fn version_reports_build_timestamp() {
    let (mut ctl, _host) = running();
    assert_eq!(command(&mut ctl, "version"), BUILD_TIMESTAMP);
}

#[test]
fn ble_services_query_and_toggle() {
    let (mut ctl, _host) = running();
    assert_eq!(
        command(&mut ctl, "ble-services"),
        "Non-maintenance services are enabled."
    );
    assert_eq!(ctl.platform().restart_count(), 0);

    assert_eq!(
        command(&mut ctl, "ble-services off"),
        "Non-maintenance services are disabled."
    );
    assert_eq!(ctl.current_ble_mode(), BleMode::WifiOnly);
    // Byte 2 on the wire: components move to Wi-Fi.
    assert_eq!(
        last_notification(&ctl, MODE_CHARACTERISTIC_UUID),
        Some(vec![2])
    );
    assert_eq!(ctl.platform().restart_count(), 1);
}

#[test]
fn log_level_get_and_set() {
    let (mut ctl, _host) = running();
    assert_eq!(command(&mut ctl, "log-level"), "Log level is 4.");
    assert_eq!(command(&mut ctl, "log-level 5"), "Log level is 5.");
    // Out of range: unchanged.
    assert_eq!(command(&mut ctl, "log-level 9"), "Log level is 5.");
    assert_eq!(command(&mut ctl, "log-level loud"), "Log level is 5.");
}

#[test]
fn wifi_config_set_show_and_clear() {
    let (mut ctl, _host) = running();
    assert_eq!(
        command(&mut ctl, "wifi-config"),
        "No WIFI configuration override present."
    );

    assert_eq!(
        command(&mut ctl, "wifi-config home secret123"),
        "WIFI configuration for 'home' stored."
    );
    let expected = WifiSettings::new("home", "secret123", false).unwrap();
    assert_eq!(ctl.platform().applied_wifi(), Some(&expected));
    assert_eq!(stored_wifi(&ctl), Ok(expected));
    assert_eq!(command(&mut ctl, "wifi-config"), "WIFI configuration: home");

    assert_eq!(
        command(&mut ctl, "wifi-config clear"),
        "WIFI configuration cleared, rebooting."
    );
    assert_eq!(stored_wifi(&ctl), Err(WifiSettingsError::EmptySsid));
    assert_eq!(ctl.platform().restart_count(), 1);
    assert_eq!(
        command(&mut ctl, "wifi-config"),
        "No WIFI configuration override present."
    );
}

#[test]
fn wifi_config_hidden_network() {
    let (mut ctl, _host) = running();
    command(&mut ctl, "wifi-config lab pa55word hidden");
    assert_eq!(stored_wifi(&ctl).map(|w| w.hidden), Ok(true));
}

#[test]
fn wifi_config_rejects_bad_input() {
    let (mut ctl, _host) = running();
    let long_ssid = "s".repeat(33);
    assert_eq!(
        command(&mut ctl, &format!("wifi-config {} secret123", long_ssid)),
        "Invalid WIFI configuration: SSID longer than 32 bytes."
    );
    assert_eq!(
        command(&mut ctl, "wifi-config a b c d"),
        "Invalid arguments, see 'help wifi-config'."
    );
    assert!(ctl.platform().applied_wifi().is_none());
}

#[test]
fn stored_override_applied_at_setup() {
    let mut store = prefs();
    let settings = WifiSettings::new("office", "hunter22", false).unwrap();
    store
        .save(wifi_settings::preference_key(BUILD_TIMESTAMP), &settings.encode())
        .unwrap();

    let (mut ctl, _host) = build_with(ControllerConfig::default(), Default::default(), store);
    ctl.setup().unwrap();
    assert_eq!(ctl.platform().applied_wifi(), Some(&settings));
    assert_eq!(command(&mut ctl, "wifi-config"), "WIFI configuration: office");
}

#[test]
fn failed_clear_is_reported_and_does_not_reboot() {
    let mut store = prefs();
    let settings = WifiSettings::new("office", "hunter22", false).unwrap();
    store
        .save(wifi_settings::preference_key(BUILD_TIMESTAMP), &settings.encode())
        .unwrap();
    store.fill_up();

    let (mut ctl, _host) = build_with(ControllerConfig::default(), Default::default(), store);
    ctl.setup().unwrap();
    assert_eq!(
        command(&mut ctl, "wifi-config clear"),
        "WIFI configuration could not be cleared: storage full."
    );
    assert_eq!(ctl.platform().restart_count(), 0);
    assert_eq!(command(&mut ctl, "wifi-config"), "WIFI configuration: office");
    assert_eq!(stored_wifi(&ctl), Ok(settings));
}

#[test]
fn override_from_another_build_is_ignored() {
    let mut store = prefs();
    let settings = WifiSettings::new("office", "hunter22", false).unwrap();
    store
        .save(
            wifi_settings::preference_key("2023-01-01 00:00:00"),
            &settings.encode(),
        )
        .unwrap();

    let (mut ctl, _host) = build_with(ControllerConfig::default(), Default::default(), store);
    ctl.setup().unwrap();
    assert!(ctl.platform().applied_wifi().is_none());
}

#[test]
fn pairings_list_and_clear() {
    let (mut ctl, _host) = running();
    assert_eq!(command(&mut ctl, "pairings"), "No bonded devices.");

    ctl.gatt_mut().add_bond(BondedDevice {
        address: [0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22],
    });
    ctl.gatt_mut().add_bond(BondedDevice {
        address: [1, 2, 3, 4, 5, 6],
    });
    assert_eq!(
        command(&mut ctl, "pairings"),
        "Bonded devices: aa:bb:cc:00:11:22, 01:02:03:04:05:06"
    );
    assert_eq!(command(&mut ctl, "pairings clear"), "Removed 2 bonded device(s).");
    assert_eq!(command(&mut ctl, "pairings"), "No bonded devices.");
}

#[test]
fn custom_command_answers_on_a_later_tick() {
    let (mut ctl, _host) = running();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    // Registration after setup is still accepted for commands.
    let echo = move |args: &[String], sender: CommandResultSender| {
        sink.borrow_mut().push(args.to_vec());
        sender.send(args.join(" "));
    };
    ctl.register_command("echo", "repeat the arguments", echo)
        .unwrap();

    let handle = crate::mock_host::characteristic(&ctl, COMMAND_CHARACTERISTIC_UUID);
    ctl.gatt().client_write(handle, b"echo hello  world");
    ctl.tick();
    // Trigger ran, the answer is still queued.
    assert_eq!(seen.borrow().as_slice(), &[vec!["hello".to_string(), "world".to_string()]]);
    assert_eq!(ctl.pending_work(), 1);
    assert_eq!(text_value(&ctl, COMMAND_CHARACTERISTIC_UUID), "");

    run_until_idle(&mut ctl);
    assert_eq!(text_value(&ctl, COMMAND_CHARACTERISTIC_UUID), "hello world");
}

#[test]
fn custom_command_result_from_another_thread() {
    let (mut ctl, _host) = running();
    let slow = |_args: &[String], sender: CommandResultSender| {
        std::thread::spawn(move || sender.send("done"))
            .join()
            .unwrap();
    };
    ctl.register_command("slow", "answer from a worker", slow)
        .unwrap();
    assert_eq!(command(&mut ctl, "slow"), "done");
}

#[test]
fn custom_command_names_are_checked() {
    let (mut ctl, _host) = running();
    let noop = |_args: &[String], _sender: CommandResultSender| {};
    assert_eq!(ctl.register_command("help", "", noop), Err(CommandError::Reserved));
    assert_eq!(ctl.register_command("", "", noop), Err(CommandError::EmptyName));
    assert_eq!(
        ctl.register_command("Bad Name", "", noop),
        Err(CommandError::InvalidCharacter('B'))
    );
    ctl.register_command("ping", "", noop).unwrap();
    assert_eq!(ctl.register_command("ping", "", noop), Err(CommandError::Duplicate));
    assert!(ctl.commands().find("ping").is_some_and(|c| c.is_custom()));
}

#[test]
fn long_results_are_truncated() {
    let (mut ctl, _host) = running();
    ctl.register_command("flood", "", |_args: &[String], sender: CommandResultSender| {
        sender.send("x".repeat(600));
    })
    .unwrap();
    assert_eq!(command(&mut ctl, "flood").len(), 512);
}
