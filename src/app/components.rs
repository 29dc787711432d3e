//! Host component references.
//!
//! Components are owned by the host firmware; the controller only holds
//! shared references and talks to them through the entity traits below.
//! Each supported kind is one [`ComponentRef`] variant.

use std::rc::Rc;

/// Common identity of every host entity.
pub trait Entity {
    /// Stable identifier used as the registry key.
    fn object_id(&self) -> &str;
    /// Human readable name, published as the user description.
    fn name(&self) -> &str;
}

pub trait BinarySensorEntity: Entity {
    fn state(&self) -> bool;
}

pub trait SensorEntity: Entity {
    fn state(&self) -> f32;
}

pub trait TextSensorEntity: Entity {
    fn state(&self) -> String;
}

pub trait SwitchEntity: Entity {
    fn state(&self) -> bool;
    fn turn_on(&self);
    fn turn_off(&self);
}

pub trait FanEntity: Entity {
    fn traits(&self) -> FanTraits;
    fn state(&self) -> FanState;
    /// Apply every field set in `call` as one state change.
    fn perform(&self, call: &FanCall);
}

// ── Kinds & values ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    BinarySensor,
    Sensor,
    TextSensor,
    Switch,
    Fan,
}

impl ComponentKind {
    pub const ALL: [Self; 5] = [
        Self::BinarySensor,
        Self::Sensor,
        Self::TextSensor,
        Self::Switch,
        Self::Fan,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::BinarySensor => "binary_sensor",
            Self::Sensor => "sensor",
            Self::TextSensor => "text_sensor",
            Self::Switch => "switch",
            Self::Fan => "fan",
        }
    }
}

/// A state value published over a characteristic.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentValue {
    Bool(bool),
    Float(f32),
    Text(String),
}

/// Shared handle to a host entity, tagged by kind.
#[derive(Clone)]
pub enum ComponentRef {
    BinarySensor(Rc<dyn BinarySensorEntity>),
    Sensor(Rc<dyn SensorEntity>),
    TextSensor(Rc<dyn TextSensorEntity>),
    Switch(Rc<dyn SwitchEntity>),
    Fan(Rc<dyn FanEntity>),
}

impl ComponentRef {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::BinarySensor(_) => ComponentKind::BinarySensor,
            Self::Sensor(_) => ComponentKind::Sensor,
            Self::TextSensor(_) => ComponentKind::TextSensor,
            Self::Switch(_) => ComponentKind::Switch,
            Self::Fan(_) => ComponentKind::Fan,
        }
    }

    pub fn object_id(&self) -> &str {
        match self {
            Self::BinarySensor(c) => c.object_id(),
            Self::Sensor(c) => c.object_id(),
            Self::TextSensor(c) => c.object_id(),
            Self::Switch(c) => c.object_id(),
            Self::Fan(c) => c.object_id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::BinarySensor(c) => c.name(),
            Self::Sensor(c) => c.name(),
            Self::TextSensor(c) => c.name(),
            Self::Switch(c) => c.name(),
            Self::Fan(c) => c.name(),
        }
    }

    /// Current state as it would be published on change.
    pub fn current_value(&self) -> ComponentValue {
        match self {
            Self::BinarySensor(c) => ComponentValue::Bool(c.state()),
            Self::Sensor(c) => ComponentValue::Float(c.state()),
            Self::TextSensor(c) => ComponentValue::Text(c.state()),
            Self::Switch(c) => ComponentValue::Bool(c.state()),
            Self::Fan(c) => ComponentValue::Bool(c.state().on),
        }
    }
}

impl core::fmt::Debug for ComponentRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}({})", self.kind().label(), self.object_id())
    }
}

// ── Fan model ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FanDirection {
    #[default]
    Forward,
    Reverse,
}

impl FanDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Reverse => "reverse",
        }
    }
}

/// Facets a fan supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanTraits {
    pub speed: bool,
    /// Highest speed level; writes accept `0..=speed_count`.
    pub speed_count: u16,
    pub oscillation: bool,
    pub direction: bool,
}

impl FanTraits {
    /// On/off only.
    pub const fn basic() -> Self {
        Self {
            speed: false,
            speed_count: 0,
            oscillation: false,
            direction: false,
        }
    }

    pub const fn full(speed_count: u16) -> Self {
        Self {
            speed: true,
            speed_count,
            oscillation: true,
            direction: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FanState {
    pub on: bool,
    pub speed: u16,
    pub oscillating: bool,
    pub direction: FanDirection,
}

/// A requested fan state change; unset fields are left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FanCall {
    pub state: Option<bool>,
    pub speed: Option<u16>,
    pub oscillating: Option<bool>,
    pub direction: Option<FanDirection>,
}

impl FanCall {
    pub fn is_empty(&self) -> bool {
        self.state.is_none()
            && self.speed.is_none()
            && self.oscillating.is_none()
            && self.direction.is_none()
    }

    /// Fold the call into `state`.
    pub fn apply_to(&self, state: &mut FanState) {
        if let Some(on) = self.state {
            state.on = on;
        }
        if let Some(speed) = self.speed {
            state.speed = speed;
        }
        if let Some(osc) = self.oscillating {
            state.oscillating = osc;
        }
        if let Some(dir) = self.direction {
            state.direction = dir;
        }
    }
}
