use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
};

use eufy_mqtt_common::{ComponentId, DeviceRef, PropertyDescriptor};

use crate::{classifier::Classifier, components::Component};

/// Live components by identity. At most one component exists per identity.
pub struct Registry {
    classifier: Classifier,
    experimental: bool,
    components: HashMap<ComponentId, Arc<Component>>,
}

impl Registry {
    pub fn new(classifier: Classifier, experimental: bool) -> Self {
        Self { classifier, experimental, components: HashMap::new() }
    }

    /// The registered component for `property`, creating it on first sight.
    /// `None` when the classifier omits the property.
    pub fn get_or_create(
        &mut self,
        device: &DeviceRef,
        property: &PropertyDescriptor,
    ) -> Option<Arc<Component>> {
        let id = ComponentId::new(device, property);

        let out = match self.components.entry(id) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let kind = self.classifier.classify(property, self.experimental)?;
                let component = Arc::new(Component::new(device, property.clone(), kind));
                tracing::debug!("Created {kind} {}", component.id);
                entry.insert(component).clone()
            }
        };

        Some(out)
    }

    pub fn get(&self, id: &ComponentId) -> Option<Arc<Component>> {
        self.components.get(id).cloned()
    }

    /// Component for the property called `name` on `device`
    pub fn find(&self, device: &DeviceRef, name: &str) -> Option<Arc<Component>> {
        self.components
            .values()
            .find(|c| &c.device == device && c.property.name == name)
            .cloned()
    }

    pub fn remove(&mut self, device: &DeviceRef, property: &PropertyDescriptor) -> Option<Arc<Component>> {
        self.components.remove(&ComponentId::new(device, property))
    }

    pub fn for_device(&self, device: &DeviceRef) -> Vec<Arc<Component>> {
        self.components.values().filter(|c| &c.device == device).cloned().collect()
    }

    pub fn all(&self) -> Vec<Arc<Component>> {
        self.components.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}
