//! Handler registry: maps component ids to characteristic descriptors and,
//! after setup, to live [`CharacteristicHandler`]s.

use std::collections::HashMap;

use log::{debug, error, info};

use crate::app::components::{ComponentKind, ComponentRef, ComponentValue};
use crate::app::handler::{CharacteristicDescriptor, CharacteristicHandler};
use crate::app::ports::{CharacteristicHandle, GattServer};
use crate::app::security::SecurityMode;

/// Builds a handler for one component.
pub type HandlerConstructor = fn(ComponentRef, CharacteristicDescriptor) -> CharacteristicHandler;

/// Kinds the registry can expose, with their constructors.
const HANDLER_FACTORY: [(ComponentKind, HandlerConstructor); 5] = [
    (ComponentKind::BinarySensor, CharacteristicHandler::new),
    (ComponentKind::Sensor, CharacteristicHandler::new),
    (ComponentKind::TextSensor, CharacteristicHandler::new),
    (ComponentKind::Switch, CharacteristicHandler::new),
    (ComponentKind::Fan, CharacteristicHandler::new),
];

pub fn constructor_for(kind: ComponentKind) -> Option<HandlerConstructor> {
    HANDLER_FACTORY
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, ctor)| *ctor)
}

#[derive(Default)]
pub struct HandlerRegistry {
    descriptors: HashMap<String, CharacteristicDescriptor>,
    handlers: HashMap<String, CharacteristicHandler>,
    by_characteristic: HashMap<CharacteristicHandle, String>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record where `object_id` should be exposed. Last registration wins.
    pub fn register(&mut self, object_id: &str, descriptor: CharacteristicDescriptor) {
        if self
            .descriptors
            .insert(object_id.to_string(), descriptor)
            .is_some()
        {
            debug!("Replaced characteristic registration for '{}'", object_id);
        }
    }

    pub fn descriptor(&self, object_id: &str) -> Option<&CharacteristicDescriptor> {
        self.descriptors.get(object_id)
    }

    pub fn registered_count(&self) -> usize {
        self.descriptors.len()
    }

    /// Build and set up handlers for every registered component in
    /// `components`. Returns how many were exposed.
    pub fn setup_handlers<G: GattServer>(
        &mut self,
        components: &[ComponentRef],
        gatt: &mut G,
        security: SecurityMode,
    ) -> usize {
        let mut exposed = 0;
        for component in components {
            let Some(descriptor) = self.descriptors.get(component.object_id()) else {
                continue;
            };
            let Some(ctor) = constructor_for(component.kind()) else {
                continue;
            };
            let mut handler = ctor(component.clone(), descriptor.clone());
            match handler.setup(gatt, security) {
                Ok(handle) => {
                    let id = component.object_id().to_string();
                    self.by_characteristic.insert(handle, id.clone());
                    self.handlers.insert(id, handler);
                    exposed += 1;
                }
                Err(e) => {
                    error!("Could not expose {:?}: {}", component, e);
                }
            }
        }
        info!(
            "{} of {} registered components exposed",
            exposed,
            self.descriptors.len()
        );
        exposed
    }

    pub fn handler(&self, object_id: &str) -> Option<&CharacteristicHandler> {
        self.handlers.get(object_id)
    }

    pub fn handler_for_characteristic(
        &self,
        characteristic: CharacteristicHandle,
    ) -> Option<&CharacteristicHandler> {
        self.by_characteristic
            .get(&characteristic)
            .and_then(|id| self.handlers.get(id))
    }

    pub fn handlers(&self) -> impl Iterator<Item = &CharacteristicHandler> {
        self.handlers.values()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Forward a state change. Returns `false` if the component is not exposed.
    pub fn publish<G: GattServer>(
        &self,
        gatt: &mut G,
        object_id: &str,
        value: &ComponentValue,
    ) -> bool {
        match self.handlers.get(object_id) {
            Some(handler) => {
                handler.send_value(gatt, value);
                true
            }
            None => false,
        }
    }

    /// Publish every handler's current component state.
    pub fn publish_all<G: GattServer>(&self, gatt: &mut G) {
        for handler in self.handlers.values() {
            let value = handler.component().current_value();
            handler.send_value(gatt, &value);
        }
    }
}
