//! Local host entities.
//!
//! Plain in-memory implementations of the entity traits. Firmware wires
//! them to hardware through switch actions; tests use them directly.
//! Every state change is recorded in a shared [`ChangeLog`], which the
//! main loop drains into the controller's update hooks.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::app::components::{
    BinarySensorEntity, Entity, FanCall, FanEntity, FanState, FanTraits, SensorEntity,
    SwitchEntity, TextSensorEntity,
};

/// `Living Room Fan` → `living_room_fan`.
pub fn object_id_from_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'A'..='Z' => c.to_ascii_lowercase(),
            'a'..='z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Ids of entities whose state changed since the last drain.
#[derive(Clone, Default)]
pub struct ChangeLog(Rc<RefCell<Vec<String>>>);

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, object_id: &str) {
        let mut ids = self.0.borrow_mut();
        if !ids.iter().any(|id| id == object_id) {
            ids.push(object_id.to_string());
        }
    }

    pub fn drain(&self) -> Vec<String> {
        core::mem::take(&mut *self.0.borrow_mut())
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

struct Identity {
    object_id: String,
    name: String,
    changes: ChangeLog,
}

impl Identity {
    fn new(name: &str, changes: &ChangeLog) -> Self {
        Self {
            object_id: object_id_from_name(name),
            name: name.to_string(),
            changes: changes.clone(),
        }
    }
}

macro_rules! impl_entity {
    ($ty:ty) => {
        impl Entity for $ty {
            fn object_id(&self) -> &str {
                &self.id.object_id
            }
            fn name(&self) -> &str {
                &self.id.name
            }
        }
    };
}

// ── Binary sensor ─────────────────────────────────────────────

pub struct LocalBinarySensor {
    id: Identity,
    state: Cell<bool>,
}

impl LocalBinarySensor {
    pub fn new(name: &str, changes: &ChangeLog) -> Rc<Self> {
        Rc::new(Self {
            id: Identity::new(name, changes),
            state: Cell::new(false),
        })
    }

    pub fn publish_state(&self, state: bool) {
        if self.state.replace(state) != state {
            self.id.changes.record(&self.id.object_id);
        }
    }
}

impl_entity!(LocalBinarySensor);

impl BinarySensorEntity for LocalBinarySensor {
    fn state(&self) -> bool {
        self.state.get()
    }
}

// ── Sensor ────────────────────────────────────────────────────

pub struct LocalSensor {
    id: Identity,
    state: Cell<f32>,
}

impl LocalSensor {
    pub fn new(name: &str, changes: &ChangeLog) -> Rc<Self> {
        Rc::new(Self {
            id: Identity::new(name, changes),
            state: Cell::new(f32::NAN),
        })
    }

    /// Every reading counts as a change, even an identical one.
    pub fn publish_state(&self, state: f32) {
        self.state.set(state);
        self.id.changes.record(&self.id.object_id);
    }
}

impl_entity!(LocalSensor);

impl SensorEntity for LocalSensor {
    fn state(&self) -> f32 {
        self.state.get()
    }
}

// ── Text sensor ───────────────────────────────────────────────

pub struct LocalTextSensor {
    id: Identity,
    state: RefCell<String>,
}

impl LocalTextSensor {
    pub fn new(name: &str, changes: &ChangeLog) -> Rc<Self> {
        Rc::new(Self {
            id: Identity::new(name, changes),
            state: RefCell::new(String::new()),
        })
    }

    pub fn publish_state(&self, state: &str) {
        *self.state.borrow_mut() = state.to_string();
        self.id.changes.record(&self.id.object_id);
    }
}

impl_entity!(LocalTextSensor);

impl TextSensorEntity for LocalTextSensor {
    fn state(&self) -> String {
        self.state.borrow().clone()
    }
}

// ── Switch ────────────────────────────────────────────────────

pub struct LocalSwitch {
    id: Identity,
    state: Cell<bool>,
    action: Option<Box<dyn Fn(bool)>>,
}

impl LocalSwitch {
    pub fn new(name: &str, changes: &ChangeLog) -> Self {
        Self {
            id: Identity::new(name, changes),
            state: Cell::new(false),
            action: None,
        }
    }

    /// Run `action` with the new state before it is published.
    #[must_use]
    pub fn with_action(mut self, action: impl Fn(bool) + 'static) -> Self {
        self.action = Some(Box::new(action));
        self
    }

    fn write_state(&self, state: bool) {
        if let Some(action) = &self.action {
            action(state);
        }
        if self.state.replace(state) != state {
            self.id.changes.record(&self.id.object_id);
        }
    }
}

impl_entity!(LocalSwitch);

impl SwitchEntity for LocalSwitch {
    fn state(&self) -> bool {
        self.state.get()
    }

    fn turn_on(&self) {
        self.write_state(true);
    }

    fn turn_off(&self) {
        self.write_state(false);
    }
}

// ── Fan ───────────────────────────────────────────────────────

pub struct LocalFan {
    id: Identity,
    traits: FanTraits,
    state: Cell<FanState>,
    performed: Cell<u32>,
}

impl LocalFan {
    pub fn new(name: &str, traits: FanTraits, changes: &ChangeLog) -> Rc<Self> {
        Rc::new(Self {
            id: Identity::new(name, changes),
            traits,
            state: Cell::new(FanState::default()),
            performed: Cell::new(0),
        })
    }

    /// How many state changes have been performed.
    pub fn perform_count(&self) -> u32 {
        self.performed.get()
    }
}

impl_entity!(LocalFan);

impl FanEntity for LocalFan {
    fn traits(&self) -> FanTraits {
        self.traits
    }

    fn state(&self) -> FanState {
        self.state.get()
    }

    fn perform(&self, call: &FanCall) {
        let mut state = self.state.get();
        call.apply_to(&mut state);
        self.state.set(state);
        self.performed.set(self.performed.get() + 1);
        self.id.changes.record(&self.id.object_id);
    }
}
