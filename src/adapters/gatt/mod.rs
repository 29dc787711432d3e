//! BLE GATT server adapter.
//!
//! Implements [`GattServer`], the radio side of the controller.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GATT server (see `esp_impl`).
//!   Attribute creation is asynchronous in Bluedroid; each call blocks
//!   until the matching GATTS event arrives.
//! - **all other targets**: in-memory attribute table. Tests drive it as
//!   a client would (`client_write`, `client_connect`, security events)
//!   and inspect values and notifications.
//!
//! Both backends keep a local copy of every characteristic value, so
//! [`GattServer::value`] never touches the stack.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::app::ports::{
    BondedDevice, CharacteristicHandle, Descriptor, GattError, GattServer, Permissions,
    Properties, RadioCallbacks, ServiceHandle,
};
use crate::app::security::SecurityMode;

#[cfg(target_os = "espidf")]
mod esp_impl;

/// Attribute handles reserved per service.
pub const HANDLES_PER_SERVICE: u16 = 30;

// ───────────────────────────────────────────────────────────────
// UUID parsing
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattUuid {
    Uuid16(u16),
    Uuid32(u32),
    Uuid128(u128),
}

impl GattUuid {
    /// Parse `180f`, `0000180f` or the dashed 128-bit form.
    pub fn parse(text: &str) -> Option<Self> {
        let mut value: u128 = 0;
        let mut digits = 0usize;
        for c in text.chars() {
            if c == '-' {
                continue;
            }
            let d = c.to_digit(16)?;
            digits += 1;
            if digits > 32 {
                return None;
            }
            value = (value << 4) | u128::from(d);
        }
        match digits {
            4 => Some(Self::Uuid16(value as u16)),
            8 => Some(Self::Uuid32(value as u32)),
            32 => Some(Self::Uuid128(value)),
            _ => None,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Attribute table
// ───────────────────────────────────────────────────────────────

#[derive(Debug)]
struct ServiceRecord {
    handle: ServiceHandle,
    started: bool,
}

#[derive(Debug)]
struct CharacteristicRecord {
    service: ServiceHandle,
    uuid: String,
    properties: Properties,
    permissions: Permissions,
    descriptors: Vec<Descriptor>,
    value: Vec<u8>,
}

pub struct BleGattAdapter {
    device_name: String,
    initialized: bool,
    advertising: bool,
    security: Option<SecurityMode>,
    callbacks: Option<Arc<dyn RadioCallbacks>>,
    services: HashMap<String, ServiceRecord>,
    characteristics: HashMap<CharacteristicHandle, CharacteristicRecord>,
    #[cfg(not(target_os = "espidf"))]
    sim: SimState,
}

#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
struct SimState {
    next_handle: u16,
    fail_init: bool,
    failing_service: Option<String>,
    notifications: Vec<(CharacteristicHandle, Vec<u8>)>,
    bonds: Vec<BondedDevice>,
}

impl BleGattAdapter {
    pub fn new() -> Self {
        Self {
            device_name: String::new(),
            initialized: false,
            advertising: false,
            security: None,
            callbacks: None,
            services: HashMap::new(),
            characteristics: HashMap::new(),
            #[cfg(not(target_os = "espidf"))]
            sim: SimState {
                next_handle: 1,
                ..SimState::default()
            },
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    pub fn security_mode(&self) -> Option<SecurityMode> {
        self.security
    }

    pub fn is_service_started(&self, uuid: &str) -> bool {
        self.services.get(uuid).is_some_and(|s| s.started)
    }

    pub fn characteristic_by_uuid(&self, uuid: &str) -> Option<CharacteristicHandle> {
        self.characteristics
            .iter()
            .find(|(_, c)| c.uuid == uuid)
            .map(|(h, _)| *h)
    }

    pub fn properties(&self, characteristic: CharacteristicHandle) -> Option<Properties> {
        self.characteristics.get(&characteristic).map(|c| c.properties)
    }

    pub fn permissions(&self, characteristic: CharacteristicHandle) -> Option<Permissions> {
        self.characteristics
            .get(&characteristic)
            .map(|c| c.permissions)
    }

    pub fn descriptors(&self, characteristic: CharacteristicHandle) -> &[Descriptor] {
        self.characteristics
            .get(&characteristic)
            .map(|c| c.descriptors.as_slice())
            .unwrap_or(&[])
    }

    /// Service a characteristic belongs to.
    pub fn service_of(&self, characteristic: CharacteristicHandle) -> Option<ServiceHandle> {
        self.characteristics.get(&characteristic).map(|c| c.service)
    }

    fn record_mut(
        &mut self,
        characteristic: CharacteristicHandle,
    ) -> Result<&mut CharacteristicRecord, GattError> {
        self.characteristics
            .get_mut(&characteristic)
            .ok_or(GattError::UnknownHandle)
    }
}

impl Default for BleGattAdapter {
    fn default() -> Self {
        Self::new()
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation client side (host only)
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl BleGattAdapter {
    /// Make the next `init()` fail.
    pub fn fail_init(&mut self) {
        self.sim.fail_init = true;
    }

    /// Make creation of the service with `uuid` fail.
    pub fn fail_service(&mut self, uuid: &str) {
        self.sim.failing_service = Some(uuid.to_string());
    }

    fn allocate_handle(&mut self) -> Result<u16, GattError> {
        let handle = self.sim.next_handle;
        self.sim.next_handle = handle.checked_add(1).ok_or(GattError::NoResources)?;
        Ok(handle)
    }

    /// Values pushed through `notify` for `characteristic`, oldest first.
    pub fn notifications(&self, characteristic: CharacteristicHandle) -> Vec<Vec<u8>> {
        self.sim
            .notifications
            .iter()
            .filter(|(h, _)| *h == characteristic)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn last_notification(&self, characteristic: CharacteristicHandle) -> Option<Vec<u8>> {
        self.notifications(characteristic).pop()
    }

    pub fn add_bond(&mut self, device: BondedDevice) {
        self.sim.bonds.push(device);
    }

    fn callbacks(&self) -> Option<&Arc<dyn RadioCallbacks>> {
        if self.callbacks.is_none() {
            warn!("GATT(sim): no callbacks installed, event dropped");
        }
        self.callbacks.as_ref()
    }

    /// A client writes `data` to `characteristic`.
    pub fn client_write(&self, characteristic: CharacteristicHandle, data: &[u8]) {
        if let Some(cb) = self.callbacks() {
            cb.on_write(characteristic, data);
        }
    }

    pub fn client_connect(&self) {
        if let Some(cb) = self.callbacks() {
            cb.on_connect();
        }
    }

    pub fn client_disconnect(&self) {
        if let Some(cb) = self.callbacks() {
            cb.on_disconnect();
        }
    }

    /// The peer asks for the pass key; returns the key answered.
    pub fn request_pass_key(&self) -> Option<u32> {
        self.callbacks().map(|cb| cb.on_pass_key_request())
    }

    pub fn notify_pass_key(&self, pass_key: u32) {
        if let Some(cb) = self.callbacks() {
            cb.on_pass_key_notify(pass_key);
        }
    }

    pub fn request_security(&self) -> Option<bool> {
        self.callbacks().map(|cb| cb.on_security_request())
    }

    pub fn confirm_pin(&self, pin: u32) -> Option<bool> {
        self.callbacks().map(|cb| cb.on_confirm_pin(pin))
    }

    pub fn complete_authentication(&self, success: bool) {
        if let Some(cb) = self.callbacks() {
            cb.on_authentication_complete(success);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// GattServer implementation
// ───────────────────────────────────────────────────────────────

impl GattServer for BleGattAdapter {
    fn init(&mut self, device_name: &str) -> Result<(), GattError> {
        if self.initialized {
            return Ok(());
        }
        self.platform_init(device_name)?;
        self.device_name = device_name.to_string();
        self.initialized = true;
        info!("GATT: stack up as '{}'", device_name);
        Ok(())
    }

    fn install_callbacks(&mut self, callbacks: Arc<dyn RadioCallbacks>) -> Result<(), GattError> {
        if self.callbacks.is_some() {
            return Err(GattError::CallbacksAlreadyInstalled);
        }
        #[cfg(target_os = "espidf")]
        esp_impl::install_callbacks(Arc::clone(&callbacks))?;
        self.callbacks = Some(callbacks);
        Ok(())
    }

    fn configure_security(&mut self, mode: SecurityMode) -> Result<(), GattError> {
        #[cfg(target_os = "espidf")]
        esp_impl::configure_security(mode)?;
        debug!("GATT: security {}", mode.as_str());
        self.security = Some(mode);
        Ok(())
    }

    fn get_or_create_service(&mut self, uuid: &str) -> Result<ServiceHandle, GattError> {
        if let Some(service) = self.services.get(uuid) {
            return Ok(service.handle);
        }
        let parsed = GattUuid::parse(uuid).ok_or(GattError::InvalidUuid)?;
        let handle = self.platform_create_service(uuid, parsed)?;
        debug!("GATT: service {} -> {:?}", uuid, handle);
        self.services.insert(
            uuid.to_string(),
            ServiceRecord {
                handle,
                started: false,
            },
        );
        Ok(handle)
    }

    fn create_characteristic(
        &mut self,
        service: ServiceHandle,
        uuid: &str,
        properties: Properties,
        permissions: Permissions,
    ) -> Result<CharacteristicHandle, GattError> {
        if !self.services.values().any(|s| s.handle == service) {
            return Err(GattError::UnknownHandle);
        }
        let parsed = GattUuid::parse(uuid).ok_or(GattError::InvalidUuid)?;
        let handle = self.platform_add_characteristic(service, parsed, properties, permissions)?;
        self.characteristics.insert(
            handle,
            CharacteristicRecord {
                service,
                uuid: uuid.to_string(),
                properties,
                permissions,
                descriptors: Vec::new(),
                value: Vec::new(),
            },
        );
        Ok(handle)
    }

    fn add_descriptor(
        &mut self,
        characteristic: CharacteristicHandle,
        descriptor: Descriptor,
        permissions: Permissions,
    ) -> Result<(), GattError> {
        let service = self.record_mut(characteristic)?.service;
        self.platform_add_descriptor(service, &descriptor, permissions)?;
        self.record_mut(characteristic)?.descriptors.push(descriptor);
        Ok(())
    }

    fn start_service(&mut self, service: ServiceHandle) -> Result<(), GattError> {
        let record = self
            .services
            .values_mut()
            .find(|s| s.handle == service)
            .ok_or(GattError::UnknownHandle)?;
        if record.started {
            return Ok(());
        }
        #[cfg(target_os = "espidf")]
        esp_impl::start_service(service.0)?;
        record.started = true;
        Ok(())
    }

    fn set_value(&mut self, characteristic: CharacteristicHandle, value: &[u8]) {
        let Ok(record) = self.record_mut(characteristic) else {
            return;
        };
        record.value.clear();
        record.value.extend_from_slice(value);
        #[cfg(target_os = "espidf")]
        esp_impl::set_attribute_value(characteristic.0, value);
    }

    fn value(&self, characteristic: CharacteristicHandle) -> Vec<u8> {
        self.characteristics
            .get(&characteristic)
            .map(|c| c.value.clone())
            .unwrap_or_default()
    }

    fn notify(&mut self, characteristic: CharacteristicHandle) {
        let Some(record) = self.characteristics.get(&characteristic) else {
            return;
        };
        #[cfg(target_os = "espidf")]
        esp_impl::notify(characteristic.0, &record.value);
        #[cfg(not(target_os = "espidf"))]
        {
            let value = record.value.clone();
            self.sim.notifications.push((characteristic, value));
        }
    }

    fn start_advertising(&mut self) -> Result<(), GattError> {
        if !self.initialized {
            return Err(GattError::StackInit);
        }
        #[cfg(target_os = "espidf")]
        esp_impl::start_advertising(&self.device_name)?;
        self.advertising = true;
        Ok(())
    }

    fn bonded_devices(&self) -> Vec<BondedDevice> {
        #[cfg(target_os = "espidf")]
        {
            esp_impl::bonded_devices()
        }
        #[cfg(not(target_os = "espidf"))]
        {
            self.sim.bonds.clone()
        }
    }

    fn remove_bond(&mut self, device: &BondedDevice) -> Result<(), GattError> {
        #[cfg(target_os = "espidf")]
        {
            esp_impl::remove_bond(device)
        }
        #[cfg(not(target_os = "espidf"))]
        {
            let before = self.sim.bonds.len();
            self.sim.bonds.retain(|d| d != device);
            if self.sim.bonds.len() == before {
                return Err(GattError::UnknownHandle);
            }
            Ok(())
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Platform-specific
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
impl BleGattAdapter {
    fn platform_init(&mut self, device_name: &str) -> Result<(), GattError> {
        esp_impl::init(device_name)
    }

    fn platform_create_service(
        &mut self,
        _uuid: &str,
        parsed: GattUuid,
    ) -> Result<ServiceHandle, GattError> {
        esp_impl::create_service(parsed, HANDLES_PER_SERVICE).map(ServiceHandle)
    }

    fn platform_add_characteristic(
        &mut self,
        service: ServiceHandle,
        uuid: GattUuid,
        properties: Properties,
        permissions: Permissions,
    ) -> Result<CharacteristicHandle, GattError> {
        esp_impl::add_characteristic(service.0, uuid, properties, permissions)
            .map(CharacteristicHandle)
    }

    fn platform_add_descriptor(
        &mut self,
        service: ServiceHandle,
        descriptor: &Descriptor,
        permissions: Permissions,
    ) -> Result<(), GattError> {
        esp_impl::add_descriptor(service.0, descriptor, permissions).map(|_| ())
    }
}

#[cfg(not(target_os = "espidf"))]
impl BleGattAdapter {
    fn platform_init(&mut self, device_name: &str) -> Result<(), GattError> {
        if self.sim.fail_init {
            warn!("GATT(sim): init of '{}' forced to fail", device_name);
            return Err(GattError::StackInit);
        }
        Ok(())
    }

    fn platform_create_service(
        &mut self,
        uuid: &str,
        _parsed: GattUuid,
    ) -> Result<ServiceHandle, GattError> {
        if self.sim.failing_service.as_deref() == Some(uuid) {
            return Err(GattError::NoResources);
        }
        self.allocate_handle().map(ServiceHandle)
    }

    fn platform_add_characteristic(
        &mut self,
        _service: ServiceHandle,
        _uuid: GattUuid,
        _properties: Properties,
        _permissions: Permissions,
    ) -> Result<CharacteristicHandle, GattError> {
        // Declaration and value attributes.
        self.allocate_handle()?;
        self.allocate_handle().map(CharacteristicHandle)
    }

    fn platform_add_descriptor(
        &mut self,
        _service: ServiceHandle,
        _descriptor: &Descriptor,
        _permissions: Permissions,
    ) -> Result<(), GattError> {
        self.allocate_handle().map(|_| ())
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
