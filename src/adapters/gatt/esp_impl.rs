//! ESP-IDF Bluedroid backend for `BleGattAdapter`.
//!
//! Compiled only for `target_os = "espidf"`. Bluedroid reports attribute
//! creation through GATTS events on its own task; setup calls here block
//! until the matching event arrives or [`SETUP_TIMEOUT_MS`] elapses.
//!
//! Runtime events (writes, connections, security) are forwarded to the
//! installed [`RadioCallbacks`], which only enqueue work for the loop.
//!
//! All public items are `pub(super)` to keep them private to the adapter.

use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use log::{debug, error, info, warn};

use esp_idf_svc::sys::*;

use super::GattUuid;
use crate::app::maintenance::MAX_TEXT_VALUE_LEN;
use crate::app::ports::{
    BondedDevice, Descriptor, GattError, Permissions, Properties, RadioCallbacks,
};
use crate::app::security::SecurityMode;

/// How long a setup call waits for its GATTS event.
const SETUP_TIMEOUT_MS: u32 = 1000;
const SETUP_POLL_MS: u32 = 10;

const APP_ID: u16 = 0;

// ── Static bridge state ───────────────────────────────────────────────────────
//
// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures. These statics bridge the callback context to the adapter.

static CALLBACKS: OnceLock<Arc<dyn RadioCallbacks>> = OnceLock::new();

static GATTS_IF: AtomicU32 = AtomicU32::new(ESP_GATT_IF_NONE as u32);
static CONN_ID: AtomicU32 = AtomicU32::new(0);
static CONNECTED: AtomicBool = AtomicBool::new(false);

/// Descriptor handles; writes to them (CCCD) stay inside the stack.
static DESCRIPTOR_HANDLES: Mutex<Vec<u16>> = Mutex::new(Vec::new());

/// Bumped by every setup-relevant GATTS event.
static SETUP_SEQ: AtomicU32 = AtomicU32::new(0);
static SETUP_STATUS: AtomicI32 = AtomicI32::new(0);
static SETUP_HANDLE: AtomicU32 = AtomicU32::new(0);

fn publish_setup_event(status: esp_gatt_status_t, handle: u16) {
    SETUP_STATUS.store(status as i32, Ordering::Relaxed);
    SETUP_HANDLE.store(u32::from(handle), Ordering::Relaxed);
    SETUP_SEQ.fetch_add(1, Ordering::Release);
}

/// Run `start`, then wait for the next setup event and return its handle.
fn call_and_wait(what: &str, start: impl FnOnce() -> esp_err_t) -> Result<u16, GattError> {
    let seq = SETUP_SEQ.load(Ordering::Acquire);
    let ret = start();
    if ret != ESP_OK {
        warn!("GATT(espidf): {} failed to start ({})", what, ret);
        return Err(GattError::Stack(ret));
    }
    let mut waited = 0;
    while SETUP_SEQ.load(Ordering::Acquire) == seq {
        if waited >= SETUP_TIMEOUT_MS {
            warn!("GATT(espidf): {} timed out", what);
            return Err(GattError::Timeout);
        }
        std::thread::sleep(std::time::Duration::from_millis(u64::from(SETUP_POLL_MS)));
        waited += SETUP_POLL_MS;
    }
    let status = SETUP_STATUS.load(Ordering::Relaxed);
    if status != esp_gatt_status_t_ESP_GATT_OK as i32 {
        warn!("GATT(espidf): {} rejected (status={})", what, status);
        return Err(GattError::Stack(status));
    }
    Ok(SETUP_HANDLE.load(Ordering::Relaxed) as u16)
}

fn check(what: &str, ret: esp_err_t) -> Result<(), GattError> {
    if ret == ESP_OK {
        Ok(())
    } else {
        error!("GATT(espidf): {} failed ({})", what, ret);
        Err(GattError::Stack(ret))
    }
}

fn to_esp_uuid(uuid: GattUuid) -> esp_bt_uuid_t {
    // SAFETY: esp_bt_uuid_t is a plain C struct; all-zero is valid.
    let mut t: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    match uuid {
        GattUuid::Uuid16(v) => {
            t.len = ESP_UUID_LEN_16 as u16;
            t.uuid.uuid16 = v;
        }
        GattUuid::Uuid32(v) => {
            t.len = ESP_UUID_LEN_32 as u16;
            t.uuid.uuid32 = v;
        }
        GattUuid::Uuid128(v) => {
            t.len = ESP_UUID_LEN_128 as u16;
            t.uuid.uuid128 = v.to_le_bytes();
        }
    }
    t
}

// ── Stack bring-up ────────────────────────────────────────────────────────────

pub(super) fn init(device_name: &str) -> Result<(), GattError> {
    let name = std::ffi::CString::new(device_name).map_err(|_| GattError::StackInit)?;
    // SAFETY: called once from the main task before any other BLE API.
    unsafe {
        esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

        let mut bt_cfg = esp_bt_controller_config_t::default();
        check("bt_controller_init", esp_bt_controller_init(&mut bt_cfg))
            .map_err(|_| GattError::StackInit)?;
        check(
            "bt_controller_enable",
            esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE),
        )
        .map_err(|_| GattError::StackInit)?;
        check("bluedroid_init", esp_bluedroid_init()).map_err(|_| GattError::StackInit)?;
        check("bluedroid_enable", esp_bluedroid_enable()).map_err(|_| GattError::StackInit)?;

        check(
            "gap_register_callback",
            esp_ble_gap_register_callback(Some(gap_event_handler)),
        )?;
        check(
            "gatts_register_callback",
            esp_ble_gatts_register_callback(Some(gatts_event_handler)),
        )?;
        check("set_device_name", esp_ble_gap_set_device_name(name.as_ptr()))?;
        check("set_local_mtu", esp_ble_gatt_set_local_mtu(517))?;
    }

    // SAFETY: GATTS callback is registered above.
    call_and_wait("app_register", || unsafe { esp_ble_gatts_app_register(APP_ID) })?;
    info!(
        "GATT(espidf): Bluedroid up (gatts_if={})",
        GATTS_IF.load(Ordering::Relaxed)
    );
    Ok(())
}

pub(super) fn install_callbacks(callbacks: Arc<dyn RadioCallbacks>) -> Result<(), GattError> {
    CALLBACKS
        .set(callbacks)
        .map_err(|_| GattError::CallbacksAlreadyInstalled)
}

pub(super) fn configure_security(mode: SecurityMode) -> Result<(), GattError> {
    let (auth_req, iocap) = match mode {
        SecurityMode::Disabled => (esp_ble_auth_req_t_ESP_LE_AUTH_NO_BOND, ESP_IO_CAP_NONE),
        SecurityMode::Encrypted => (esp_ble_auth_req_t_ESP_LE_AUTH_REQ_SC_MITM, ESP_IO_CAP_OUT),
        SecurityMode::Bonded => (
            esp_ble_auth_req_t_ESP_LE_AUTH_REQ_SC_MITM_BOND,
            ESP_IO_CAP_OUT,
        ),
    };
    let iocap = iocap as esp_ble_io_cap_t;
    let key_size: u8 = 16;
    let keys: u8 = (ESP_BLE_ENC_KEY_MASK | ESP_BLE_ID_KEY_MASK) as u8;

    // SAFETY: each pointer refers to a local that outlives the call; the
    // stack copies the value.
    unsafe {
        check(
            "auth_req",
            esp_ble_gap_set_security_param(
                esp_ble_sm_param_t_ESP_BLE_SM_AUTHEN_REQ_MODE,
                &auth_req as *const _ as *mut _,
                core::mem::size_of_val(&auth_req) as u8,
            ),
        )?;
        check(
            "iocap",
            esp_ble_gap_set_security_param(
                esp_ble_sm_param_t_ESP_BLE_SM_IOCAP_MODE,
                &iocap as *const _ as *mut _,
                core::mem::size_of_val(&iocap) as u8,
            ),
        )?;
        check(
            "key_size",
            esp_ble_gap_set_security_param(
                esp_ble_sm_param_t_ESP_BLE_SM_MAX_KEY_SIZE,
                &key_size as *const _ as *mut _,
                1,
            ),
        )?;
        check(
            "init_key",
            esp_ble_gap_set_security_param(
                esp_ble_sm_param_t_ESP_BLE_SM_SET_INIT_KEY,
                &keys as *const _ as *mut _,
                1,
            ),
        )?;
        check(
            "rsp_key",
            esp_ble_gap_set_security_param(
                esp_ble_sm_param_t_ESP_BLE_SM_SET_RSP_KEY,
                &keys as *const _ as *mut _,
                1,
            ),
        )?;
    }
    info!("GATT(espidf): security {}", mode.as_str());
    Ok(())
}

// ── Attribute table ───────────────────────────────────────────────────────────

pub(super) fn create_service(uuid: GattUuid, num_handles: u16) -> Result<u16, GattError> {
    let gatts_if = GATTS_IF.load(Ordering::Relaxed) as esp_gatt_if_t;
    let mut id = esp_gatt_srvc_id_t {
        id: esp_gatt_id_t {
            uuid: to_esp_uuid(uuid),
            inst_id: 0,
        },
        is_primary: true,
    };
    // SAFETY: `id` lives until the call returns; Bluedroid copies it.
    call_and_wait("create_service", || unsafe {
        esp_ble_gatts_create_service(gatts_if, &mut id, num_handles)
    })
}

fn attribute_control() -> esp_attr_control_t {
    esp_attr_control_t {
        auto_rsp: ESP_GATT_AUTO_RSP as u8,
    }
}

pub(super) fn add_characteristic(
    service: u16,
    uuid: GattUuid,
    properties: Properties,
    permissions: Permissions,
) -> Result<u16, GattError> {
    let mut esp_uuid = to_esp_uuid(uuid);
    let mut empty = [0u8; 1];
    let mut value = esp_attr_value_t {
        attr_max_len: MAX_TEXT_VALUE_LEN as u16,
        attr_len: 0,
        attr_value: empty.as_mut_ptr(),
    };
    let mut control = attribute_control();
    // SAFETY: all pointers refer to locals that outlive the call.
    call_and_wait("add_char", || unsafe {
        esp_ble_gatts_add_char(
            service,
            &mut esp_uuid,
            permissions.bits() as esp_gatt_perm_t,
            properties.bits() as esp_gatt_char_prop_t,
            &mut value,
            &mut control,
        )
    })
}

pub(super) fn add_descriptor(
    service: u16,
    descriptor: &Descriptor,
    permissions: Permissions,
) -> Result<u16, GattError> {
    let mut esp_uuid = to_esp_uuid(GattUuid::Uuid16(descriptor.uuid16()));
    let mut initial: Vec<u8> = match descriptor {
        Descriptor::UserDescription(text) => text.as_bytes().to_vec(),
        Descriptor::ClientConfiguration => vec![0, 0],
    };
    let mut value = esp_attr_value_t {
        attr_max_len: initial.len().max(2) as u16,
        attr_len: initial.len() as u16,
        attr_value: initial.as_mut_ptr(),
    };
    let mut control = attribute_control();
    // SAFETY: all pointers refer to locals that outlive the call.
    let handle = call_and_wait("add_char_descr", || unsafe {
        esp_ble_gatts_add_char_descr(
            service,
            &mut esp_uuid,
            permissions.bits() as esp_gatt_perm_t,
            &mut value,
            &mut control,
        )
    })?;
    if let Ok(mut handles) = DESCRIPTOR_HANDLES.lock() {
        handles.push(handle);
    }
    Ok(handle)
}

pub(super) fn start_service(service: u16) -> Result<(), GattError> {
    // SAFETY: `service` was issued by CREATE_EVT.
    call_and_wait("start_service", || unsafe { esp_ble_gatts_start_service(service) })
        .map(|_| ())
}

pub(super) fn set_attribute_value(handle: u16, value: &[u8]) {
    // SAFETY: Bluedroid copies `value` before returning.
    let ret = unsafe { esp_ble_gatts_set_attr_value(handle, value.len() as u16, value.as_ptr()) };
    if ret != ESP_OK {
        debug!("GATT(espidf): set_attr_value({}) failed ({})", handle, ret);
    }
}

pub(super) fn notify(handle: u16, value: &[u8]) {
    if !CONNECTED.load(Ordering::Acquire) {
        return;
    }
    let gatts_if = GATTS_IF.load(Ordering::Relaxed) as esp_gatt_if_t;
    let conn_id = CONN_ID.load(Ordering::Relaxed) as u16;
    let mut buf = value.to_vec();
    // SAFETY: `buf` outlives the call; Bluedroid copies the payload.
    unsafe {
        esp_ble_gatts_send_indicate(
            gatts_if,
            conn_id,
            handle,
            buf.len() as u16,
            buf.as_mut_ptr(),
            false,
        );
    }
}

// ── Advertising ───────────────────────────────────────────────────────────────

fn adv_params() -> esp_ble_adv_params_t {
    esp_ble_adv_params_t {
        adv_int_min: 0x20,
        adv_int_max: 0x40,
        adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
        own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
        channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
        adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
        // SAFETY: remaining fields are plain data; zero is valid.
        ..unsafe { core::mem::zeroed() }
    }
}

pub(super) fn start_advertising(device_name: &str) -> Result<(), GattError> {
    // SAFETY: zeroed adv data is valid; only the flags below are set.
    let mut data: esp_ble_adv_data_t = unsafe { core::mem::zeroed() };
    data.set_scan_rsp = false;
    data.include_name = true;
    data.include_txpower = true;
    data.flag = (ESP_BLE_ADV_FLAG_GEN_DISC | ESP_BLE_ADV_FLAG_BREDR_NOT_SPT) as u8;
    // Advertising starts from ADV_DATA_SET_COMPLETE.
    // SAFETY: `data` lives until the call returns; Bluedroid copies it.
    check("config_adv_data", unsafe { esp_ble_gap_config_adv_data(&mut data) })?;
    info!("GATT(espidf): advertising as '{}'", device_name);
    Ok(())
}

fn restart_advertising() {
    let mut params = adv_params();
    // SAFETY: `params` lives until the call returns.
    let ret = unsafe { esp_ble_gap_start_advertising(&mut params) };
    if ret != ESP_OK {
        warn!("GATT(espidf): start_advertising failed ({})", ret);
    }
}

// ── Bonds ─────────────────────────────────────────────────────────────────────

pub(super) fn bonded_devices() -> Vec<BondedDevice> {
    // SAFETY: plain query of the bond table.
    let mut count = unsafe { esp_ble_get_bond_device_num() };
    if count <= 0 {
        return Vec::new();
    }
    // SAFETY: zeroed bond records are valid output slots.
    let mut list: Vec<esp_ble_bond_dev_t> =
        (0..count).map(|_| unsafe { core::mem::zeroed() }).collect();
    // SAFETY: `list` holds `count` slots.
    let ret = unsafe { esp_ble_get_bond_device_list(&mut count, list.as_mut_ptr()) };
    if ret != ESP_OK {
        warn!("GATT(espidf): bond list query failed ({})", ret);
        return Vec::new();
    }
    list.truncate(count.max(0) as usize);
    list.iter()
        .map(|d| BondedDevice { address: d.bd_addr })
        .collect()
}

pub(super) fn remove_bond(device: &BondedDevice) -> Result<(), GattError> {
    let mut addr = device.address;
    // SAFETY: `addr` is a 6-byte buffer that outlives the call.
    check("remove_bond", unsafe { esp_ble_remove_bond_device(addr.as_mut_ptr()) })
}

// ── Event handlers (Bluedroid task) ───────────────────────────────────────────

unsafe extern "C" fn gap_event_handler(
    event: esp_gap_ble_cb_event_t,
    param: *mut esp_ble_gap_cb_param_t,
) {
    let callbacks = CALLBACKS.get();
    // SAFETY: Bluedroid passes a valid parameter block for the event.
    let param = unsafe { &mut *param };
    match event {
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_DATA_SET_COMPLETE_EVT => restart_advertising(),
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_PASSKEY_REQ_EVT => {
            let key = callbacks.map_or(0, |cb| cb.on_pass_key_request());
            // SAFETY: union member matches the event.
            unsafe {
                esp_ble_passkey_reply(param.ble_security.ble_req.bd_addr.as_mut_ptr(), true, key);
            }
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_PASSKEY_NOTIF_EVT => {
            // SAFETY: union member matches the event.
            let key = unsafe { param.ble_security.key_notif.passkey };
            if let Some(cb) = callbacks {
                cb.on_pass_key_notify(key);
            }
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_SEC_REQ_EVT => {
            let accept = callbacks.is_some_and(|cb| cb.on_security_request());
            // SAFETY: union member matches the event.
            unsafe {
                esp_ble_gap_security_rsp(param.ble_security.ble_req.bd_addr.as_mut_ptr(), accept);
            }
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_NC_REQ_EVT => {
            // SAFETY: union member matches the event.
            let pin = unsafe { param.ble_security.key_notif.passkey };
            let accept = callbacks.is_some_and(|cb| cb.on_confirm_pin(pin));
            // SAFETY: union member matches the event.
            unsafe {
                esp_ble_confirm_reply(param.ble_security.key_notif.bd_addr.as_mut_ptr(), accept);
            }
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_AUTH_CMPL_EVT => {
            // SAFETY: union member matches the event.
            let success = unsafe { param.ble_security.auth_cmpl.success };
            if let Some(cb) = callbacks {
                cb.on_authentication_complete(success);
            }
        }
        _ => {}
    }
}

unsafe extern "C" fn gatts_event_handler(
    event: esp_gatts_cb_event_t,
    gatts_if: esp_gatt_if_t,
    param: *mut esp_ble_gatts_cb_param_t,
) {
    // SAFETY: Bluedroid passes a valid parameter block for the event.
    let param = unsafe { &*param };
    match event {
        esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
            GATTS_IF.store(u32::from(gatts_if), Ordering::Relaxed);
            // SAFETY: union member matches the event.
            let status = unsafe { param.reg.status };
            publish_setup_event(status, 0);
        }
        esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
            // SAFETY: union member matches the event.
            let p = unsafe { &param.create };
            publish_setup_event(p.status, p.service_handle);
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
            // SAFETY: union member matches the event.
            let p = unsafe { &param.add_char };
            publish_setup_event(p.status, p.attr_handle);
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_DESCR_EVT => {
            // SAFETY: union member matches the event.
            let p = unsafe { &param.add_char_descr };
            publish_setup_event(p.status, p.attr_handle);
        }
        esp_gatts_cb_event_t_ESP_GATTS_START_EVT => {
            // SAFETY: union member matches the event.
            let p = unsafe { &param.start };
            publish_setup_event(p.status, p.service_handle);
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
            // SAFETY: union member matches the event.
            let conn_id = unsafe { param.connect.conn_id };
            CONN_ID.store(u32::from(conn_id), Ordering::Relaxed);
            CONNECTED.store(true, Ordering::Release);
            if let Some(cb) = CALLBACKS.get() {
                cb.on_connect();
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
            CONNECTED.store(false, Ordering::Release);
            if let Some(cb) = CALLBACKS.get() {
                cb.on_disconnect();
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
            // SAFETY: union member matches the event.
            let p = unsafe { &param.write };
            if p.is_prep {
                return;
            }
            let is_descriptor = DESCRIPTOR_HANDLES
                .lock()
                .is_ok_and(|handles| handles.contains(&p.handle));
            if is_descriptor {
                return;
            }
            // SAFETY: Bluedroid guarantees `value` points at `len` bytes.
            let data = unsafe { core::slice::from_raw_parts(p.value, usize::from(p.len)) };
            if let Some(cb) = CALLBACKS.get() {
                cb.on_write(crate::app::ports::CharacteristicHandle(p.handle), data);
            }
        }
        _ => {}
    }
}
