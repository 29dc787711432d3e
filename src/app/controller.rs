//! BLE controller: owns the registry, commands, maintenance service and
//! pairing state, and runs them on the application loop.
//!
//! ```text
//!   radio task                     │  loop thread
//!   ───────────                    │  ───────────
//!   GattServer ─▶ LoopHandle ──────┼─▶ DeferredQueue ─▶ tick()
//!                 (RadioCallbacks) │                      ├─ handle_write → maintenance / commands / handler
//!                                  │                      ├─ pairing transitions + observers
//!                                  │                      ├─ relay buffered log lines
//!                                  │                      └─ pending restart
//!   host platform ─────────────────┼─▶ on_*_update() ─▶ registry ─▶ notify
//! ```
//!
//! All loop-owned state is mutated only inside `tick()` and the `on_*`
//! methods, which the host calls from the loop thread.

use std::rc::Rc;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::app::commands::{
    CommandContext, CommandError, CommandResultSender, CommandSet, CustomCommandTrigger,
};
use crate::app::components::{
    BinarySensorEntity, ComponentRef, ComponentValue, Entity, SensorEntity, SwitchEntity,
    TextSensorEntity,
};
use crate::app::handler::CharacteristicDescriptor;
use crate::app::log_relay::{LOG_RELAY_DEPTH, LogRelay, level_filter};
use crate::app::maintenance::{BleMode, MaintenanceCharacteristic, MaintenanceService};
use crate::app::ports::{
    BondedDevice, CharacteristicHandle, GattServer, HostPlatform, PreferenceStore, RadioCallbacks,
};
use crate::app::registry::HandlerRegistry;
use crate::app::security::{PairingState, PairingStateMachine, SecurityMode};
use crate::app::wifi_settings::{self, RECORD_LEN, WifiSettings, WifiSettingsError, fnv1_hash};
use crate::config::ControllerConfig;
use crate::deferred::DeferredQueue;
use crate::error::SetupError;

/// Preference name of the persisted BLE mode.
const BLE_MODE_PREFERENCE: &str = "BLEMaintenanceMode";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Constructed,
    Running,
    Failed,
}

// ───────────────────────────────────────────────────────────────
// LoopHandle: the only part of the controller other threads see
// ───────────────────────────────────────────────────────────────

/// Cloneable, thread-safe handle that enqueues work for the loop.
pub struct LoopHandle<C> {
    queue: Arc<DeferredQueue<C>>,
    pass_key: u32,
}

impl<C> Clone for LoopHandle<C> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            pass_key: self.pass_key,
        }
    }
}

impl<C> LoopHandle<C> {
    /// Run `work` on the loop thread during a later tick.
    pub fn defer<F>(&self, work: F) -> bool
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.queue.push(work)
    }
}

impl<G, P, S> RadioCallbacks for LoopHandle<BleController<G, P, S>>
where
    G: GattServer + 'static,
    P: HostPlatform + 'static,
    S: PreferenceStore + 'static,
{
    fn on_write(&self, characteristic: CharacteristicHandle, data: &[u8]) {
        let data = data.to_vec();
        self.defer(move |ctl| ctl.handle_write(characteristic, &data));
    }

    fn on_connect(&self) {
        self.defer(|ctl| ctl.handle_connect());
    }

    fn on_disconnect(&self) {
        self.defer(|ctl| ctl.handle_disconnect());
    }

    fn on_pass_key_request(&self) -> u32 {
        self.defer(|ctl| ctl.pairing.pass_key_requested());
        self.pass_key
    }

    fn on_pass_key_notify(&self, pass_key: u32) {
        self.defer(move |ctl| ctl.pairing.pass_key_notified(pass_key));
    }

    fn on_security_request(&self) -> bool {
        self.defer(|ctl| ctl.pairing.security_requested());
        true
    }

    fn on_confirm_pin(&self, pin: u32) -> bool {
        self.defer(move |ctl| ctl.pairing.pin_confirmed(pin));
        true
    }

    fn on_authentication_complete(&self, success: bool) {
        self.defer(move |ctl| ctl.pairing.authentication_completed(success));
    }
}

// ───────────────────────────────────────────────────────────────
// BleController
// ───────────────────────────────────────────────────────────────

pub struct BleController<G, P, S> {
    config: ControllerConfig,
    gatt: G,
    platform: P,
    prefs: S,
    state: ControllerState,
    ble_mode: BleMode,
    registry: HandlerRegistry,
    commands: Rc<CommandSet>,
    maintenance: Option<MaintenanceService>,
    pairing: PairingStateMachine,
    on_connected: Vec<Box<dyn FnMut()>>,
    on_disconnected: Vec<Box<dyn FnMut()>>,
    connected_clients: u32,
    wifi_override: Option<WifiSettings>,
    log_relay: Option<Arc<LogRelay>>,
    queue: Arc<DeferredQueue<BleController<G, P, S>>>,
    restart_pending: bool,
}

impl<G, P, S> BleController<G, P, S>
where
    G: GattServer + 'static,
    P: HostPlatform + 'static,
    S: PreferenceStore + 'static,
{
    pub fn new(config: ControllerConfig, gatt: G, platform: P, prefs: S) -> Self {
        let mut registry = HandlerRegistry::new();
        for binding in &config.components {
            registry.register(
                &binding.object_id,
                CharacteristicDescriptor {
                    service_uuid: binding.service_uuid.clone(),
                    characteristic_uuid: binding.characteristic_uuid.clone(),
                    use_cccd: binding.use_cccd,
                },
            );
        }
        let ble_mode = config.initial_ble_mode;
        Self {
            config,
            gatt,
            platform,
            prefs,
            state: ControllerState::Constructed,
            ble_mode,
            registry,
            commands: Rc::new(CommandSet::with_builtins()),
            maintenance: None,
            pairing: PairingStateMachine::new(),
            on_connected: Vec::new(),
            on_disconnected: Vec::new(),
            connected_clients: 0,
            wifi_override: None,
            log_relay: None,
            queue: Arc::new(DeferredQueue::new()),
            restart_pending: false,
        }
    }

    // ── Pre-setup configuration ───────────────────────────────

    /// Expose `component` on the given characteristic. Must precede `setup()`.
    pub fn register_component(
        &mut self,
        component: &ComponentRef,
        service_uuid: &str,
        characteristic_uuid: &str,
        use_cccd: bool,
    ) {
        if self.state != ControllerState::Constructed {
            warn!(
                "Late registration of {:?} ignored; services are already built",
                component
            );
            return;
        }
        self.registry.register(
            component.object_id(),
            CharacteristicDescriptor {
                service_uuid: service_uuid.to_string(),
                characteristic_uuid: characteristic_uuid.to_string(),
                use_cccd,
            },
        );
    }

    pub fn register_command(
        &mut self,
        name: &str,
        description: &str,
        trigger: impl Fn(&[String], CommandResultSender) + 'static,
    ) -> Result<(), CommandError> {
        let trigger: CustomCommandTrigger = Rc::new(trigger);
        Rc::make_mut(&mut self.commands).register_custom(name, description, trigger)
    }

    pub fn add_on_show_pass_key_callback(&mut self, callback: impl FnMut(&str) + 'static) {
        self.pairing.add_on_show_pass_key(callback);
    }

    pub fn add_on_authentication_complete_callback(
        &mut self,
        callback: impl FnMut(bool) + 'static,
    ) {
        self.pairing.add_on_authentication_complete(callback);
    }

    pub fn add_on_connected_callback(&mut self, callback: impl FnMut() + 'static) {
        self.on_connected.push(Box::new(callback));
    }

    pub fn add_on_disconnected_callback(&mut self, callback: impl FnMut() + 'static) {
        self.on_disconnected.push(Box::new(callback));
    }

    /// Source of log lines for the log characteristic.
    pub fn set_log_relay(&mut self, relay: Arc<LogRelay>) {
        self.log_relay = Some(relay);
    }

    // ── Setup ─────────────────────────────────────────────────

    pub fn setup(&mut self) -> Result<(), SetupError> {
        if self.state != ControllerState::Constructed {
            return Err(SetupError::AlreadySetUp);
        }
        info!("Setting up BLE controller...");

        self.initialize_ble_mode();

        let device_name = self.platform.device_name();
        if let Err(e) = self.gatt.init(&device_name) {
            error!("BLE could not be set up: {}", e);
            self.state = ControllerState::Failed;
            return Err(SetupError::RadioInit(e));
        }

        let callbacks: Arc<dyn RadioCallbacks> = Arc::new(self.loop_handle());
        if let Err(e) = self.gatt.install_callbacks(callbacks) {
            error!("Another BLE controller already owns this transport ({}), keeping it", e);
        }

        self.configure_security();
        self.setup_wifi_override();

        match MaintenanceService::setup(
            &mut self.gatt,
            self.config.security_mode,
            self.ble_mode,
            self.config.log_level,
            self.config.log_relay,
        ) {
            Ok(service) => self.maintenance = Some(service),
            Err(e) => {
                error!("Maintenance service could not be created: {}", e);
                self.state = ControllerState::Failed;
                return Err(SetupError::MaintenanceService(e));
            }
        }

        if self.ble_mode.component_services_exposed() {
            let components = self.platform.components();
            self.registry
                .setup_handlers(&components, &mut self.gatt, self.config.security_mode);
            self.registry.publish_all(&mut self.gatt);
        } else {
            info!("Component services are not exposed in {:?}", self.ble_mode);
        }

        if let Err(e) = self.gatt.start_advertising() {
            warn!("Advertising could not be started: {}", e);
        }

        // Subscribe only once the log characteristic is live.
        if let (Some(relay), Some(maintenance)) = (&self.log_relay, &self.maintenance) {
            if maintenance.relays_logs() {
                relay.subscribe();
                raise_max_log_level(maintenance.log_level());
            }
        }

        self.state = ControllerState::Running;
        info!("BLE controller set up in {:?}", self.ble_mode);
        Ok(())
    }

    fn initialize_ble_mode(&mut self) {
        let key = fnv1_hash(BLE_MODE_PREFERENCE);
        let mut buf = [0u8; 1];
        self.ble_mode = match self.prefs.load(key, &mut buf) {
            Ok(1) => match BleMode::try_from(buf[0]) {
                Ok(mode) => mode,
                Err(raw) => {
                    warn!("Stored BLE mode {} is invalid, using default", raw);
                    self.config.initial_ble_mode
                }
            },
            _ => {
                debug!("No stored BLE mode, using {:?}", self.config.initial_ble_mode);
                self.config.initial_ble_mode
            }
        };
    }

    fn configure_security(&mut self) {
        let mode = self.config.security_mode;
        match mode {
            SecurityMode::Encrypted if !self.pairing.has_show_pass_key_observer() => {
                warn!("Security is enabled but nothing shows the pass key");
            }
            SecurityMode::Disabled if self.pairing.has_show_pass_key_observer() => {
                warn!("Pass key observers registered but security is disabled");
            }
            _ => {}
        }
        if let Err(e) = self.gatt.configure_security(mode) {
            warn!("Security parameters could not be set: {}", e);
        }
    }

    fn setup_wifi_override(&mut self) {
        let key = wifi_settings::preference_key(&self.platform.build_timestamp());
        let mut buf = [0u8; RECORD_LEN];
        let len = match self.prefs.load(key, &mut buf) {
            Ok(len) => len,
            Err(_) => {
                debug!("No WIFI override stored");
                return;
            }
        };
        match WifiSettings::decode(&buf[..len]) {
            Ok(settings) => {
                info!("Applying stored WIFI override for '{}'", settings.ssid);
                self.platform.apply_wifi_override(&settings);
                self.wifi_override = Some(settings);
            }
            Err(WifiSettingsError::EmptySsid) => debug!("WIFI override is cleared"),
            Err(e) => warn!("Ignoring stored WIFI override: {}", e),
        }
    }

    pub fn dump_config(&self) {
        info!("BLE controller:");
        info!("  State: {:?}", self.state);
        info!("  BLE mode: {:?}", self.ble_mode);
        info!("  Security: {}", self.config.security_mode.as_str());
        info!("  Log level: {}", self.log_level());
        info!(
            "  Components: {} registered, {} exposed",
            self.registry.registered_count(),
            self.registry.len()
        );
        let names: Vec<&str> = self.commands.names().collect();
        info!("  Commands: {}", names.join(" "));
    }

    // ── Loop ──────────────────────────────────────────────────

    /// One loop iteration: at most one deferred closure, buffered log
    /// lines, then a pending restart.
    pub fn tick(&mut self) {
        if self.state != ControllerState::Running {
            return;
        }
        let queue = Arc::clone(&self.queue);
        queue.drain_one(self);

        self.relay_pending_logs();

        if self.restart_pending {
            self.restart_pending = false;
            info!("Restarting to apply BLE settings");
            self.platform.restart();
        }
    }

    /// Drain at most one buffer's worth, so lines produced while relaying
    /// wait for the next tick.
    fn relay_pending_logs(&mut self) {
        let (Some(relay), Some(maintenance)) = (&self.log_relay, &self.maintenance) else {
            return;
        };
        for _ in 0..LOG_RELAY_DEPTH {
            let Some(line) = relay.next_line() else {
                break;
            };
            maintenance.relay_log(&mut self.gatt, line.level, &line.text);
        }
    }

    pub fn loop_handle(&self) -> LoopHandle<Self> {
        LoopHandle {
            queue: Arc::clone(&self.queue),
            pass_key: self.config.pass_key,
        }
    }

    pub fn pending_work(&self) -> usize {
        self.queue.len()
    }

    // ── Transport events (already on the loop thread) ─────────

    fn handle_write(&mut self, characteristic: CharacteristicHandle, data: &[u8]) {
        let role = self
            .maintenance
            .as_ref()
            .and_then(|m| m.role(characteristic));
        if let Some(role) = role {
            match role {
                MaintenanceCharacteristic::Mode => self.on_mode_written(data),
                MaintenanceCharacteristic::LogLevel => self.on_log_level_written(data),
                MaintenanceCharacteristic::Command => {
                    let line = String::from_utf8_lossy(data).into_owned();
                    self.execute_command(&line);
                }
                MaintenanceCharacteristic::Log => warn!("Log characteristic is read-only"),
            }
            return;
        }

        match self.registry.handler_for_characteristic(characteristic) {
            Some(handler) => handler.on_write(data),
            None => warn!("Write to unknown characteristic {:?}", characteristic),
        }
    }

    fn on_mode_written(&mut self, data: &[u8]) {
        let [raw] = data else {
            warn!("BLE mode write must be 1 byte, got {}", data.len());
            return;
        };
        match BleMode::try_from(*raw) {
            Ok(mode) => self.set_ble_mode(mode),
            Err(raw) => warn!("Unsupported BLE mode {} ignored", raw),
        }
    }

    fn on_log_level_written(&mut self, data: &[u8]) {
        let [level] = data else {
            warn!("Log level write must be 1 byte, got {}", data.len());
            return;
        };
        self.set_log_level(*level);
    }

    /// Run one command line and publish its result.
    pub fn execute_command(&mut self, line: &str) {
        let commands = Rc::clone(&self.commands);
        commands.dispatch(line, self);
    }

    fn handle_connect(&mut self) {
        self.connected_clients += 1;
        info!("BLE client connected ({} total)", self.connected_clients);
        for callback in &mut self.on_connected {
            callback();
        }
    }

    fn handle_disconnect(&mut self) {
        self.connected_clients = self.connected_clients.saturating_sub(1);
        info!("BLE client disconnected ({} left)", self.connected_clients);
        self.pairing.reset();
        for callback in &mut self.on_disconnected {
            callback();
        }
        if let Err(e) = self.gatt.start_advertising() {
            warn!("Advertising could not be restarted: {}", e);
        }
    }

    fn request_restart(&mut self) {
        self.restart_pending = true;
    }

    // ── Automations ───────────────────────────────────────────

    /// Change the BLE mode from firmware code. Persists the mode and
    /// restarts at the end of the current tick; a no-op for the active mode.
    pub fn switch_ble_mode(&mut self, mode: BleMode) {
        if self.state != ControllerState::Running {
            warn!("BLE mode cannot change before setup");
            return;
        }
        self.set_ble_mode(mode);
    }

    /// `true` exposes component services over BLE (mixed), `false` moves
    /// them to Wi-Fi only.
    pub fn set_component_services_enabled(&mut self, enabled: bool) {
        let mode = if enabled { BleMode::Mixed } else { BleMode::WifiOnly };
        self.switch_ble_mode(mode);
    }

    pub fn toggle_component_services(&mut self) {
        let enabled = self.ble_mode.component_services_exposed();
        self.set_component_services_enabled(!enabled);
    }

    // ── Host component updates ────────────────────────────────

    pub fn on_binary_sensor_update(&mut self, object_id: &str, state: bool) {
        self.update_component_state(object_id, &ComponentValue::Bool(state));
    }

    pub fn on_sensor_update(&mut self, object_id: &str, state: f32) {
        self.update_component_state(object_id, &ComponentValue::Float(state));
    }

    pub fn on_text_sensor_update(&mut self, object_id: &str, state: &str) {
        self.update_component_state(object_id, &ComponentValue::Text(state.to_string()));
    }

    pub fn on_switch_update(&mut self, object_id: &str, state: bool) {
        self.update_component_state(object_id, &ComponentValue::Bool(state));
    }

    pub fn on_fan_update(&mut self, object_id: &str) {
        let Some(handler) = self.registry.handler(object_id) else {
            debug!("Fan '{}' is not exposed, update dropped", object_id);
            return;
        };
        let value = handler.component().current_value();
        self.update_component_state(object_id, &value);
    }

    /// Publish the current state of `component`, whatever its kind.
    pub fn on_component_update(&mut self, component: &ComponentRef) {
        match component {
            ComponentRef::BinarySensor(c) => self.on_binary_sensor_update(c.object_id(), c.state()),
            ComponentRef::Sensor(c) => self.on_sensor_update(c.object_id(), c.state()),
            ComponentRef::TextSensor(c) => self.on_text_sensor_update(c.object_id(), &c.state()),
            ComponentRef::Switch(c) => self.on_switch_update(c.object_id(), c.state()),
            ComponentRef::Fan(c) => self.on_fan_update(c.object_id()),
        }
    }

    fn update_component_state(&mut self, object_id: &str, value: &ComponentValue) {
        if self.state != ControllerState::Running {
            return;
        }
        if !self.registry.publish(&mut self.gatt, object_id, value) {
            debug!("'{}' is not exposed over BLE, update dropped", object_id);
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn is_failed(&self) -> bool {
        self.state == ControllerState::Failed
    }

    pub fn current_ble_mode(&self) -> BleMode {
        self.ble_mode
    }

    pub fn pairing_state(&self) -> PairingState {
        self.pairing.state()
    }

    pub fn last_authentication_outcome(&self) -> Option<bool> {
        self.pairing.last_outcome()
    }

    pub fn connected_clients(&self) -> u32 {
        self.connected_clients
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn commands(&self) -> &CommandSet {
        &self.commands
    }

    pub fn maintenance(&self) -> Option<&MaintenanceService> {
        self.maintenance.as_ref()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn gatt(&self) -> &G {
        &self.gatt
    }

    pub fn gatt_mut(&mut self) -> &mut G {
        &mut self.gatt
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn prefs(&self) -> &S {
        &self.prefs
    }
}

/// Let records at the relay level through the `log` facade. The filter is
/// only ever raised, so the console keeps at least its boot level.
fn raise_max_log_level(level: u8) {
    let wanted = level_filter(level);
    if wanted > log::max_level() {
        log::set_max_level(wanted);
    }
}

// ───────────────────────────────────────────────────────────────
// Command context
// ───────────────────────────────────────────────────────────────

impl<G, P, S> CommandContext for BleController<G, P, S>
where
    G: GattServer + 'static,
    P: HostPlatform + 'static,
    S: PreferenceStore + 'static,
{
    fn ble_mode(&self) -> BleMode {
        self.ble_mode
    }

    /// Persist, publish, then restart at the end of the tick.
    fn set_ble_mode(&mut self, mode: BleMode) {
        if mode == self.ble_mode {
            debug!("BLE mode already {:?}", mode);
            return;
        }
        let key = fnv1_hash(BLE_MODE_PREFERENCE);
        if let Err(e) = self.prefs.save(key, &[mode.as_byte()]) {
            error!("BLE mode could not be stored: {}", e);
            return;
        }
        info!("BLE mode {:?} -> {:?}", self.ble_mode, mode);
        self.ble_mode = mode;
        if let Some(maintenance) = &self.maintenance {
            maintenance.publish_mode(&mut self.gatt, mode);
        }
        self.request_restart();
    }

    fn log_level(&self) -> u8 {
        self.maintenance
            .as_ref()
            .map_or(self.config.log_level, MaintenanceService::log_level)
    }

    fn set_log_level(&mut self, level: u8) {
        match &mut self.maintenance {
            Some(maintenance) => {
                if maintenance.set_log_level(&mut self.gatt, level) {
                    info!("Log level set to {}", level);
                    if maintenance.relays_logs() && self.log_relay.is_some() {
                        raise_max_log_level(level);
                    }
                }
            }
            None => warn!("Log level cannot change before setup"),
        }
    }

    fn wifi_override_ssid(&self) -> Option<String> {
        self.wifi_override.as_ref().map(|w| w.ssid.to_string())
    }

    fn set_wifi_credentials(
        &mut self,
        ssid: &str,
        password: &str,
        hidden: bool,
    ) -> Result<(), String> {
        let settings = WifiSettings::new(ssid, password, hidden).map_err(|e| e.to_string())?;
        let key = wifi_settings::preference_key(&self.platform.build_timestamp());
        self.prefs
            .save(key, &settings.encode())
            .map_err(|e| e.to_string())?;
        info!("WIFI override for '{}' stored", settings.ssid);
        self.platform.apply_wifi_override(&settings);
        self.wifi_override = Some(settings);
        Ok(())
    }

    fn clear_wifi_credentials_and_reboot(&mut self) -> Result<(), String> {
        let key = wifi_settings::preference_key(&self.platform.build_timestamp());
        if let Err(e) = self.prefs.save(key, &WifiSettings::cleared_record()) {
            error!("WIFI override could not be cleared: {}", e);
            return Err(e.to_string());
        }
        info!("WIFI override cleared");
        self.wifi_override = None;
        self.request_restart();
        Ok(())
    }

    fn bonded_devices(&self) -> Vec<BondedDevice> {
        self.gatt.bonded_devices()
    }

    fn clear_bonded_devices(&mut self) -> usize {
        let devices = self.gatt.bonded_devices();
        let mut removed = 0;
        for device in &devices {
            match self.gatt.remove_bond(device) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Bond {} could not be removed: {}", device, e),
            }
        }
        removed
    }

    fn build_version(&self) -> String {
        self.platform.build_timestamp()
    }

    fn send_command_result(&mut self, result: &str) {
        debug!("Command result: {}", result);
        match &self.maintenance {
            Some(maintenance) => maintenance.publish_command_result(&mut self.gatt, result),
            None => warn!("Command result dropped, maintenance service not set up"),
        }
    }

    fn result_sender(&self) -> CommandResultSender {
        let handle = self.loop_handle();
        CommandResultSender::new(move |result: String| {
            handle.defer(move |ctl| ctl.send_command_result(&result));
        })
    }
}
