//! Behavior descriptors and the view-model boundary.
//!
//! A behavior is one reusable component kind: a custom element, a plain
//! custom attribute, or a template controller. The descriptor records its
//! compile-time and runtime metadata once, at construction, and is immutable
//! afterwards (builders consume themselves, so there is no re-configure
//! path). Capability flags are declared by the view-model factory rather
//! than sniffed off instances.

use crate::binding::BindingMode;
use crate::container::Container;
use crate::factory::ViewFactory;
use markup5ever_rcdom::Handle;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// The object a view's binding expressions evaluate against.
pub type BindingContext = Rc<RefCell<dyn ViewModel>>;

/// Identity comparison for binding contexts.
pub fn same_context(a: &BindingContext, b: &BindingContext) -> bool {
    Rc::ptr_eq(a, b)
}

/// A view-model: dynamic property access plus optional lifecycle hooks.
///
/// Hooks default to no-ops; whether the engine invokes them at all is
/// governed by the descriptor's [`Capabilities`], declared once by the
/// [`ViewModelFactory`].
pub trait ViewModel {
    fn get_value(&self, property: &str) -> Option<Value>;

    /// Returns false when the property is unknown or read-only.
    fn set_value(&mut self, property: &str, value: Value) -> bool;

    fn created(&mut self) {}
    fn bind(&mut self, _scope: &BindingContext) {}
    fn unbind(&mut self) {}
    fn attached(&mut self) {}
    fn detached(&mut self) {}

    /// Change-handler dispatch: `handler` is the name declared on the
    /// bindable property, not the property name itself.
    fn property_changed(&mut self, _handler: &str, _new_value: &Value, _old_value: &Value) {}

    /// Delivery point for declared child tracking.
    fn children_changed(&mut self, _property: &str, _children: &[Handle]) {}
}

/// Constructs view-model instances for one behavior kind and declares which
/// lifecycle hooks those instances implement.
pub trait ViewModelFactory {
    fn create(&self, container: &Rc<Container>) -> BindingContext;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}

/// Lifecycle conformance flags, computed once per descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub handles_created: bool,
    pub handles_bind: bool,
    pub handles_unbind: bool,
    pub handles_attached: bool,
    pub handles_detached: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Capabilities {
            handles_created: true,
            handles_bind: true,
            handles_unbind: true,
            handles_attached: true,
            handles_detached: true,
        }
    }
}

/// The three behavior variants over one common core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BehaviorKind {
    /// Tag-based custom element.
    Element,
    /// Plain custom attribute attached to a host element.
    Attribute,
    /// Content-lifting attribute: the host element is compiled into a
    /// nested view factory the controller manages.
    TemplateController,
}

/// One declared bindable property.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindableProperty {
    pub name: String,
    /// DOM attribute form; hyphenated from the name unless overridden.
    pub attribute: String,
    pub change_handler: Option<String>,
    pub default_value: Option<Value>,
    pub default_mode: BindingMode,
}

impl BindableProperty {
    pub fn new(name: &str) -> Self {
        BindableProperty {
            name: name.to_string(),
            attribute: hyphenate(name),
            change_handler: None,
            default_value: None,
            default_mode: BindingMode::OneWay,
        }
    }

    pub fn with_attribute(mut self, attribute: &str) -> Self {
        self.attribute = attribute.to_string();
        self
    }

    pub fn with_change_handler(mut self, handler: &str) -> Self {
        self.change_handler = Some(handler.to_string());
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn with_mode(mut self, mode: BindingMode) -> Self {
        self.default_mode = mode;
        self
    }
}

/// DOM attribute form of a property name: `itemsSource`/`items_source`
/// both become `items-source`.
pub fn hyphenate(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else if c == '_' {
            out.push('-');
        } else {
            out.push(c);
        }
    }
    out
}

/// Declared child tracking: keep `property` on the view-model in sync with
/// the host's top-level child elements matching `selector`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildDescriptor {
    pub property: String,
    pub selector: String,
}

/// Immutable metadata for one behavior kind.
pub struct BehaviorDescriptor {
    pub name: String,
    pub kind: BehaviorKind,
    pub properties: Vec<BindableProperty>,
    pub capabilities: Capabilities,
    pub child_descriptor: Option<ChildDescriptor>,
    vm_factory: Rc<dyn ViewModelFactory>,
    view_factory: RefCell<Option<Rc<ViewFactory>>>,
}

impl fmt::Debug for BehaviorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("properties", &self.properties)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl BehaviorDescriptor {
    pub fn builder(
        name: &str,
        kind: BehaviorKind,
        vm_factory: Rc<dyn ViewModelFactory>,
    ) -> DescriptorBuilder {
        DescriptorBuilder {
            name: name.to_string(),
            kind,
            properties: Vec::new(),
            child_descriptor: None,
            vm_factory,
        }
    }

    pub fn create_view_model(&self, container: &Rc<Container>) -> BindingContext {
        self.vm_factory.create(container)
    }

    pub fn property_by_name(&self, name: &str) -> Option<&BindableProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn property_by_attribute(&self, attribute: &str) -> Option<&BindableProperty> {
        self.properties.iter().find(|p| p.attribute == attribute)
    }

    /// Attach a compiled template to a custom-element descriptor. Configured
    /// exactly once; elements without one render their host's children
    /// untouched.
    pub fn set_view_factory(&self, factory: Rc<ViewFactory>) {
        let mut slot = self.view_factory.borrow_mut();
        assert!(slot.is_none(), "view factory already configured for '{}'", self.name);
        *slot = Some(factory);
    }

    pub fn view_factory(&self) -> Option<Rc<ViewFactory>> {
        self.view_factory.borrow().clone()
    }
}

pub struct DescriptorBuilder {
    name: String,
    kind: BehaviorKind,
    properties: Vec<BindableProperty>,
    child_descriptor: Option<ChildDescriptor>,
    vm_factory: Rc<dyn ViewModelFactory>,
}

impl DescriptorBuilder {
    pub fn bindable(mut self, property: BindableProperty) -> Self {
        self.properties.push(property);
        self
    }

    pub fn children(mut self, property: &str, selector: &str) -> Self {
        self.child_descriptor = Some(ChildDescriptor {
            property: property.to_string(),
            selector: selector.to_string(),
        });
        self
    }

    pub fn build(self) -> Rc<BehaviorDescriptor> {
        // The single explicit reflection step: conformance is read off the
        // factory once and frozen on the descriptor.
        let capabilities = self.vm_factory.capabilities();
        Rc::new(BehaviorDescriptor {
            name: self.name,
            kind: self.kind,
            properties: self.properties,
            capabilities,
            child_descriptor: self.child_descriptor,
            vm_factory: self.vm_factory,
            view_factory: RefCell::new(None),
        })
    }
}

/// Map-backed view-model for application data contexts and tests.
#[derive(Debug, Default, Clone)]
pub struct DataModel {
    values: Map<String, Value>,
}

impl DataModel {
    pub fn new(values: Map<String, Value>) -> Self {
        DataModel { values }
    }

    /// Builds a binding context from a JSON object literal; any other value
    /// yields an empty model.
    pub fn context(value: Value) -> BindingContext {
        let values = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Rc::new(RefCell::new(DataModel { values }))
    }
}

impl ViewModel for DataModel {
    fn get_value(&self, property: &str) -> Option<Value> {
        self.values.get(property).cloned()
    }

    fn set_value(&mut self, property: &str, value: Value) -> bool {
        self.values.insert(property.to_string(), value);
        true
    }
}
