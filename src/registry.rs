//! Resource registry.
//!
//! `ViewResources` maps tag and attribute names to behavior descriptors, and
//! converter names to value converters. A view-local registry holds a shared
//! (never owned) reference to its parent and resolves misses by delegating
//! upward; the application-global registry sits at the root of the chain.
//! Registration is append-mostly: it happens while resources load, never
//! during compile or bind.

use crate::behavior::BehaviorDescriptor;
use crate::error::{Result, TemplatingError};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

/// Value converter resource: transforms values on their way into the view
/// and, for two-way bindings, back out of it.
pub trait ValueConverter {
    fn to_view(&self, value: Value) -> Value;

    fn from_view(&self, value: Value) -> Value {
        value
    }
}

pub struct ViewResources {
    parent: Option<Rc<ViewResources>>,
    elements: RefCell<HashMap<String, Rc<BehaviorDescriptor>>>,
    attributes: RefCell<HashMap<String, Rc<BehaviorDescriptor>>>,
    known_attributes: RefCell<HashMap<String, String>>,
    converters: RefCell<HashMap<String, Rc<dyn ValueConverter>>>,
}

impl ViewResources {
    pub fn new_root() -> Rc<Self> {
        Rc::new(ViewResources {
            parent: None,
            elements: RefCell::new(HashMap::new()),
            attributes: RefCell::new(HashMap::new()),
            known_attributes: RefCell::new(HashMap::new()),
            converters: RefCell::new(HashMap::new()),
        })
    }

    /// A view-local registry delegating misses to `parent`.
    pub fn new_child(parent: &Rc<ViewResources>) -> Rc<Self> {
        Rc::new(ViewResources {
            parent: Some(parent.clone()),
            elements: RefCell::new(HashMap::new()),
            attributes: RefCell::new(HashMap::new()),
            known_attributes: RefCell::new(HashMap::new()),
            converters: RefCell::new(HashMap::new()),
        })
    }

    pub fn register_element(&self, name: &str, descriptor: Rc<BehaviorDescriptor>) -> Result<()> {
        Self::register_descriptor(&self.elements, name, descriptor, "element")
    }

    pub fn register_attribute(&self, name: &str, descriptor: Rc<BehaviorDescriptor>) -> Result<()> {
        Self::register_descriptor(&self.attributes, name, descriptor, "attribute")
    }

    /// Re-registering the identical descriptor is a no-op; a different
    /// descriptor under the same name is a configuration error.
    fn register_descriptor(
        map: &RefCell<HashMap<String, Rc<BehaviorDescriptor>>>,
        name: &str,
        descriptor: Rc<BehaviorDescriptor>,
        kind: &str,
    ) -> Result<()> {
        let mut map = map.borrow_mut();
        if let Some(existing) = map.get(name) {
            if Rc::ptr_eq(existing, &descriptor) {
                return Ok(());
            }
            return Err(TemplatingError::DuplicateResource {
                name: name.to_string(),
            });
        }
        debug!(name, kind, "registered behavior resource");
        map.insert(name.to_string(), descriptor);
        Ok(())
    }

    pub fn register_value_converter(
        &self,
        name: &str,
        converter: Rc<dyn ValueConverter>,
    ) -> Result<()> {
        let mut converters = self.converters.borrow_mut();
        if let Some(existing) = converters.get(name) {
            if Rc::ptr_eq(existing, &converter) {
                return Ok(());
            }
            return Err(TemplatingError::DuplicateResource {
                name: name.to_string(),
            });
        }
        debug!(name, "registered value converter");
        converters.insert(name.to_string(), converter);
        Ok(())
    }

    /// Alias a DOM attribute name to the property name it binds as.
    pub fn register_known_attribute(&self, attribute: &str, property: &str) {
        self.known_attributes
            .borrow_mut()
            .insert(attribute.to_string(), property.to_string());
    }

    pub fn get_element(&self, name: &str) -> Option<Rc<BehaviorDescriptor>> {
        self.elements.borrow().get(name).cloned().or_else(|| {
            self.parent
                .as_ref()
                .and_then(|parent| parent.get_element(name))
        })
    }

    pub fn get_attribute(&self, name: &str) -> Option<Rc<BehaviorDescriptor>> {
        self.attributes.borrow().get(name).cloned().or_else(|| {
            self.parent
                .as_ref()
                .and_then(|parent| parent.get_attribute(name))
        })
    }

    pub fn get_known_attribute(&self, attribute: &str) -> Option<String> {
        self.known_attributes
            .borrow()
            .get(attribute)
            .cloned()
            .or_else(|| {
                self.parent
                    .as_ref()
                    .and_then(|parent| parent.get_known_attribute(attribute))
            })
    }

    pub fn get_value_converter(&self, name: &str) -> Option<Rc<dyn ValueConverter>> {
        self.converters.borrow().get(name).cloned().or_else(|| {
            self.parent
                .as_ref()
                .and_then(|parent| parent.get_value_converter(name))
        })
    }
}
