//! Characteristic handlers: one characteristic bound to one component.
//!
//! A handler pairs a [`ComponentRef`] with the [`ValueCodec`] for its kind.
//! The codec decides how outgoing state is encoded and whether (and how)
//! client writes are applied. Codecs live in a static table, one per
//! [`ComponentKind`]; the registry picks them by kind.
//!
//! Wire encodings:
//!
//! | Kind          | Outgoing                       | Writes                  |
//! |---------------|--------------------------------|-------------------------|
//! | binary sensor | u16 LE (0/1)                   | ignored                 |
//! | sensor        | f32 LE                         | ignored                 |
//! | text sensor   | UTF-8 bytes                    | ignored                 |
//! | switch        | u16 LE (0/1)                   | non-zero byte → on      |
//! | fan           | `fan=on speed=3/5 ...` text    | legacy byte or tokens   |

use log::{debug, info, warn};

use crate::app::components::{
    ComponentKind, ComponentRef, ComponentValue, FanCall, FanDirection, FanState, FanTraits,
};
use crate::app::ports::{
    CharacteristicHandle, Descriptor, GattError, GattServer, Permissions, Properties,
};
use crate::app::security::SecurityMode;

/// Speed count that is implied and therefore not printed.
const CANONICAL_SPEED_COUNT: u16 = 100;

/// Where a component is exposed. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    pub service_uuid: String,
    pub characteristic_uuid: String,
    /// Attach a client configuration descriptor so clients can subscribe.
    pub use_cccd: bool,
}

// ───────────────────────────────────────────────────────────────
// Codec table
// ───────────────────────────────────────────────────────────────

/// Per-kind encode/decode rules.
pub struct ValueCodec {
    pub kind: ComponentKind,
    pub writable: bool,
    encode: fn(&ComponentRef, &ComponentValue) -> Vec<u8>,
    apply_write: fn(&ComponentRef, &[u8]),
}

static CODECS: [ValueCodec; 5] = [
    ValueCodec {
        kind: ComponentKind::BinarySensor,
        writable: false,
        encode: encode_plain,
        apply_write: ignore_write,
    },
    ValueCodec {
        kind: ComponentKind::Sensor,
        writable: false,
        encode: encode_plain,
        apply_write: ignore_write,
    },
    ValueCodec {
        kind: ComponentKind::TextSensor,
        writable: false,
        encode: encode_plain,
        apply_write: ignore_write,
    },
    ValueCodec {
        kind: ComponentKind::Switch,
        writable: true,
        encode: encode_plain,
        apply_write: apply_switch_write,
    },
    ValueCodec {
        kind: ComponentKind::Fan,
        writable: true,
        encode: encode_fan,
        apply_write: apply_fan_write,
    },
];

/// Codec for `kind`.
pub fn codec_for(kind: ComponentKind) -> &'static ValueCodec {
    // The table holds one entry per kind, in declaration order.
    &CODECS[kind as usize]
}

/// Generic single-value encoding.
pub fn encode_value(value: &ComponentValue) -> Vec<u8> {
    match value {
        ComponentValue::Bool(b) => u16::from(*b).to_le_bytes().to_vec(),
        ComponentValue::Float(f) => f.to_le_bytes().to_vec(),
        ComponentValue::Text(s) => s.as_bytes().to_vec(),
    }
}

fn encode_plain(_component: &ComponentRef, value: &ComponentValue) -> Vec<u8> {
    encode_value(value)
}

fn ignore_write(component: &ComponentRef, _raw: &[u8]) {
    debug!("Ignoring write to read-only {:?}", component);
}

fn apply_switch_write(component: &ComponentRef, raw: &[u8]) {
    let ComponentRef::Switch(switch) = component else {
        return;
    };
    if raw.is_empty() {
        warn!("Empty write to switch '{}' ignored", switch.object_id());
        return;
    }
    if raw.iter().any(|&b| b != 0) {
        info!("Switch '{}' turned on over BLE", switch.object_id());
        switch.turn_on();
    } else {
        info!("Switch '{}' turned off over BLE", switch.object_id());
        switch.turn_off();
    }
}

// ───────────────────────────────────────────────────────────────
// Fan text protocol
// ───────────────────────────────────────────────────────────────

/// Render the fan line, e.g. `fan=on speed=3/5 oscillating=yes direction=reverse`.
pub fn encode_fan_state(on: bool, traits: &FanTraits, state: &FanState) -> String {
    let mut line = String::from(if on { "fan=on" } else { "fan=off" });
    if traits.speed {
        line.push_str(&format!(" speed={}", state.speed));
        if traits.speed_count != CANONICAL_SPEED_COUNT {
            line.push_str(&format!("/{}", traits.speed_count));
        }
    }
    if traits.oscillation {
        line.push_str(if state.oscillating {
            " oscillating=yes"
        } else {
            " oscillating=no"
        });
    }
    if traits.direction {
        line.push_str(" direction=");
        line.push_str(state.direction.as_str());
    }
    line
}

fn encode_fan(component: &ComponentRef, value: &ComponentValue) -> Vec<u8> {
    match (component, value) {
        (ComponentRef::Fan(fan), ComponentValue::Bool(on)) => {
            encode_fan_state(*on, &fan.traits(), &fan.state()).into_bytes()
        }
        (_, other) => encode_value(other),
    }
}

/// Parse a fan write into one call.
///
/// A single byte is the legacy on/off form. Anything longer is split on
/// whitespace; each token may carry the encoder's `key=` prefix.
/// Unrecognised tokens are logged and skipped.
pub fn parse_fan_payload(raw: &[u8], traits: &FanTraits) -> FanCall {
    let mut call = FanCall::default();
    if raw.len() == 1 {
        call.state = Some(raw[0] != 0);
        return call;
    }

    let text = String::from_utf8_lossy(raw);
    for token in text.split_whitespace() {
        let (key, value) = match token.split_once('=') {
            Some((k, v)) => (Some(k), v),
            None => (None, token),
        };
        if !apply_fan_token(&mut call, key, value, traits) {
            warn!("Ignoring unrecognised fan token '{}'", token);
        }
    }
    call
}

fn apply_fan_token(call: &mut FanCall, key: Option<&str>, value: &str, traits: &FanTraits) -> bool {
    let any = key.is_none();
    let is = |name: &str| any || key == Some(name);

    if is("fan") {
        match value {
            "on" => {
                call.state = Some(true);
                return true;
            }
            "off" => {
                call.state = Some(false);
                return true;
            }
            _ => {}
        }
    }
    if traits.speed && is("speed") {
        let digits = value.split_once('/').map_or(value, |(n, _max)| n);
        if let Ok(speed) = digits.parse::<u16>() {
            if speed > traits.speed_count {
                warn!(
                    "Fan speed {} outside supported range 0..={}",
                    speed, traits.speed_count
                );
                // Consumed but not applied.
                return true;
            }
            call.speed = Some(speed);
            return true;
        }
    }
    if traits.oscillation && is("oscillating") {
        match value {
            "yes" | "oscillating" => {
                call.oscillating = Some(true);
                return true;
            }
            "no" => {
                call.oscillating = Some(false);
                return true;
            }
            _ => {}
        }
    }
    if traits.direction && is("direction") {
        match value {
            "forward" => {
                call.direction = Some(FanDirection::Forward);
                return true;
            }
            "reverse" => {
                call.direction = Some(FanDirection::Reverse);
                return true;
            }
            _ => {}
        }
    }
    false
}

fn apply_fan_write(component: &ComponentRef, raw: &[u8]) {
    let ComponentRef::Fan(fan) = component else {
        return;
    };
    let call = parse_fan_payload(raw, &fan.traits());
    if call.is_empty() {
        warn!("Fan '{}' write carried no usable tokens", fan.object_id());
        return;
    }
    debug!("Fan '{}' perform {:?}", fan.object_id(), call);
    fan.perform(&call);
}

// ───────────────────────────────────────────────────────────────
// CharacteristicHandler
// ───────────────────────────────────────────────────────────────

/// Owns one characteristic for one component.
pub struct CharacteristicHandler {
    component: ComponentRef,
    descriptor: CharacteristicDescriptor,
    codec: &'static ValueCodec,
    characteristic: Option<CharacteristicHandle>,
}

impl CharacteristicHandler {
    pub fn new(component: ComponentRef, descriptor: CharacteristicDescriptor) -> Self {
        let codec = codec_for(component.kind());
        Self {
            component,
            descriptor,
            codec,
            characteristic: None,
        }
    }

    pub fn component(&self) -> &ComponentRef {
        &self.component
    }

    pub fn descriptor(&self) -> &CharacteristicDescriptor {
        &self.descriptor
    }

    pub fn characteristic(&self) -> Option<CharacteristicHandle> {
        self.characteristic
    }

    pub fn can_receive_writes(&self) -> bool {
        self.codec.writable
    }

    /// Create the characteristic and its descriptors.
    pub fn setup<G: GattServer>(
        &mut self,
        gatt: &mut G,
        security: SecurityMode,
    ) -> Result<CharacteristicHandle, GattError> {
        let service = gatt.get_or_create_service(&self.descriptor.service_uuid)?;

        let mut properties = Properties::READ | Properties::NOTIFY;
        if self.can_receive_writes() {
            properties = properties | Properties::WRITE;
        }
        let permissions = Permissions::for_access(security, self.can_receive_writes());

        let handle = gatt.create_characteristic(
            service,
            &self.descriptor.characteristic_uuid,
            properties,
            permissions,
        )?;
        gatt.add_descriptor(
            handle,
            Descriptor::UserDescription(self.component.name().to_string()),
            Permissions::for_access(security, false),
        )?;
        if self.descriptor.use_cccd {
            gatt.add_descriptor(
                handle,
                Descriptor::ClientConfiguration,
                Permissions::for_access(security, true),
            )?;
        }
        gatt.start_service(service)?;

        info!(
            "Exposed {:?} as {} / {}",
            self.component, self.descriptor.service_uuid, self.descriptor.characteristic_uuid
        );
        self.characteristic = Some(handle);
        Ok(handle)
    }

    pub fn encode(&self, value: &ComponentValue) -> Vec<u8> {
        (self.codec.encode)(&self.component, value)
    }

    /// Publish `value` and notify subscribers.
    pub fn send_value<G: GattServer>(&self, gatt: &mut G, value: &ComponentValue) {
        let Some(handle) = self.characteristic else {
            debug!("{:?} has no characteristic yet", self.component);
            return;
        };
        let bytes = self.encode(value);
        gatt.set_value(handle, &bytes);
        gatt.notify(handle);
    }

    /// Decode a client write and apply it to the component.
    pub fn on_write(&self, raw: &[u8]) {
        (self.codec.apply_write)(&self.component, raw);
    }
}
