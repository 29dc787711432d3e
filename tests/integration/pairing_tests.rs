//! Pairing events and connection bookkeeping. Radio callbacks answer
//! synchronously; observers only ever run inside `tick()`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use blectl::app::ports::RadioCallbacks;
use blectl::app::security::PairingState;
use blectl::config::ControllerConfig;
use blectl::deferred::DEFERRED_QUEUE_CAPACITY;

use crate::mock_host::{TestController, build, run_until_idle, running};

fn with_pass_key_log(ctl: &mut TestController) -> Rc<RefCell<Vec<String>>> {
    let shown = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&shown);
    ctl.add_on_show_pass_key_callback(move |key| sink.borrow_mut().push(key.to_string()));
    shown
}

#[test]
fn pass_key_request_answers_configured_key() {
    let (mut ctl, _host) = build(ControllerConfig {
        pass_key: 4321,
        ..Default::default()
    });
    ctl.setup().unwrap();

    assert_eq!(ctl.gatt().request_pass_key(), Some(4321));
    assert_eq!(ctl.pairing_state(), PairingState::Idle);
    run_until_idle(&mut ctl);
    assert_eq!(ctl.pairing_state(), PairingState::PassKeyRequested);
}

#[test]
fn show_pass_key_observers_run_on_tick() {
    let (mut ctl, _host) = build(ControllerConfig::default());
    let shown = with_pass_key_log(&mut ctl);
    ctl.setup().unwrap();

    ctl.gatt().notify_pass_key(42);
    assert!(shown.borrow().is_empty(), "observer ran on the radio side");

    run_until_idle(&mut ctl);
    assert_eq!(shown.borrow().as_slice(), &["000042".to_string()]);
    assert_eq!(
        ctl.pairing_state(),
        PairingState::PassKeyNotified { pass_key: 42 }
    );
}

#[test]
fn security_request_and_numeric_comparison_are_accepted() {
    let (mut ctl, _host) = running();
    assert_eq!(ctl.gatt().request_security(), Some(true));
    assert_eq!(ctl.gatt().confirm_pin(123_456), Some(true));
    run_until_idle(&mut ctl);
    assert_eq!(ctl.pairing_state(), PairingState::Idle);
}

#[test]
fn authentication_outcome_reaches_observers() {
    let (mut ctl, _host) = build(ControllerConfig::default());
    let outcomes = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&outcomes);
    ctl.add_on_authentication_complete_callback(move |ok| sink.borrow_mut().push(ok));
    ctl.setup().unwrap();

    ctl.gatt().notify_pass_key(999_999);
    ctl.gatt().complete_authentication(true);
    run_until_idle(&mut ctl);
    assert_eq!(outcomes.borrow().as_slice(), &[true]);
    assert_eq!(ctl.last_authentication_outcome(), Some(true));
    assert_eq!(ctl.pairing_state(), PairingState::Idle);

    ctl.gatt().complete_authentication(false);
    run_until_idle(&mut ctl);
    assert_eq!(outcomes.borrow().as_slice(), &[true, false]);
    assert_eq!(ctl.last_authentication_outcome(), Some(false));
}

#[test]
fn disconnect_abandons_pairing_session() {
    let (mut ctl, _host) = running();
    ctl.gatt().client_connect();
    ctl.gatt().request_pass_key();
    run_until_idle(&mut ctl);
    assert_eq!(ctl.pairing_state(), PairingState::PassKeyRequested);

    ctl.gatt().client_disconnect();
    run_until_idle(&mut ctl);
    assert_eq!(ctl.pairing_state(), PairingState::Idle);
    assert_eq!(ctl.last_authentication_outcome(), None);
}

#[test]
fn connection_observers_and_client_count() {
    let (mut ctl, _host) = build(ControllerConfig::default());
    let connects = Rc::new(Cell::new(0));
    let disconnects = Rc::new(Cell::new(0));
    {
        let c = Rc::clone(&connects);
        ctl.add_on_connected_callback(move || c.set(c.get() + 1));
        let d = Rc::clone(&disconnects);
        ctl.add_on_disconnected_callback(move || d.set(d.get() + 1));
    }
    ctl.setup().unwrap();

    ctl.gatt().client_connect();
    ctl.gatt().client_connect();
    run_until_idle(&mut ctl);
    assert_eq!(connects.get(), 2);
    assert_eq!(ctl.connected_clients(), 2);

    ctl.gatt().client_disconnect();
    ctl.gatt().client_disconnect();
    ctl.gatt().client_disconnect();
    run_until_idle(&mut ctl);
    assert_eq!(disconnects.get(), 3);
    assert_eq!(ctl.connected_clients(), 0);
    assert!(ctl.gatt().is_advertising());
}

#[test]
fn one_deferred_closure_per_tick() {
    let (mut ctl, _host) = running();
    for _ in 0..3 {
        ctl.gatt().client_connect();
    }
    assert_eq!(ctl.pending_work(), 3);
    ctl.tick();
    assert_eq!(ctl.pending_work(), 2);
    assert_eq!(ctl.connected_clients(), 1);
}

#[test]
fn events_from_other_threads_run_in_order_on_the_loop() {
    let (mut ctl, _host) = build(ControllerConfig::default());
    let shown = with_pass_key_log(&mut ctl);
    ctl.setup().unwrap();

    let handle = ctl.loop_handle();
    let workers: Vec<_> = (0..4u32)
        .map(|i| {
            let handle = handle.clone();
            std::thread::spawn(move || {
                assert_eq!(handle.on_pass_key_request(), 123_456);
                handle.on_pass_key_notify(i);
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(ctl.pending_work(), 8);
    run_until_idle(&mut ctl);
    let mut keys = shown.borrow().clone();
    keys.sort();
    assert_eq!(keys, ["000000", "000001", "000002", "000003"]);
}

#[test]
fn full_queue_drops_events_without_blocking() {
    let (mut ctl, _host) = running();
    let handle: Arc<dyn RadioCallbacks> = Arc::new(ctl.loop_handle());
    for _ in 0..DEFERRED_QUEUE_CAPACITY + 4 {
        handle.on_connect();
    }
    // The answer is still given synchronously.
    assert_eq!(handle.on_pass_key_request(), 123_456);
    assert_eq!(ctl.pending_work(), DEFERRED_QUEUE_CAPACITY);

    run_until_idle(&mut ctl);
    assert_eq!(ctl.connected_clients(), DEFERRED_QUEUE_CAPACITY as u32);
}

#[test]
fn no_work_runs_before_setup() {
    let (mut ctl, _host) = build(ControllerConfig::default());
    let handle = ctl.loop_handle();
    handle.on_connect();
    ctl.tick();
    assert_eq!(ctl.pending_work(), 1);
    assert_eq!(ctl.connected_clients(), 0);
}
