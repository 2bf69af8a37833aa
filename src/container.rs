//! Scoped dependency resolution for behavior construction.
//!
//! The factory creates one child container per behavior-bearing element and
//! registers the per-element values a view-model may ask for: the host
//! element, the element's view slot, the view resources registry, the bound
//! view factory (for template controllers), and the sibling behaviors
//! declared on the same element. Misses resolve through the parent chain.

use crate::binding::ObserverLocator;
use crate::controller::ControllerRef;
use crate::factory::BoundViewFactory;
use crate::registry::ViewResources;
use crate::slot::ViewSlot;
use markup5ever_rcdom::Handle;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub struct Container {
    parent: Option<Rc<Container>>,
    locator: Rc<ObserverLocator>,
    element: RefCell<Option<Handle>>,
    view_slot: RefCell<Option<Rc<RefCell<ViewSlot>>>>,
    resources: RefCell<Option<Rc<ViewResources>>>,
    bound_view_factory: RefCell<Option<Rc<BoundViewFactory>>>,
    controllers: RefCell<HashMap<String, ControllerRef>>,
}

impl Container {
    pub fn new_root(locator: Rc<ObserverLocator>) -> Rc<Self> {
        Rc::new(Container {
            parent: None,
            locator,
            element: RefCell::new(None),
            view_slot: RefCell::new(None),
            resources: RefCell::new(None),
            bound_view_factory: RefCell::new(None),
            controllers: RefCell::new(HashMap::new()),
        })
    }

    pub fn create_child(self: &Rc<Self>) -> Rc<Container> {
        Rc::new(Container {
            parent: Some(self.clone()),
            locator: self.locator.clone(),
            element: RefCell::new(None),
            view_slot: RefCell::new(None),
            resources: RefCell::new(None),
            bound_view_factory: RefCell::new(None),
            controllers: RefCell::new(HashMap::new()),
        })
    }

    pub fn locator(&self) -> &Rc<ObserverLocator> {
        &self.locator
    }

    pub fn register_element(&self, element: Handle) {
        *self.element.borrow_mut() = Some(element);
    }

    pub fn register_view_slot(&self, slot: Rc<RefCell<ViewSlot>>) {
        *self.view_slot.borrow_mut() = Some(slot);
    }

    pub fn register_resources(&self, resources: Rc<ViewResources>) {
        *self.resources.borrow_mut() = Some(resources);
    }

    pub fn register_bound_view_factory(&self, factory: Rc<BoundViewFactory>) {
        *self.bound_view_factory.borrow_mut() = Some(factory);
    }

    /// Per-element singleton provider for a behavior declared at this
    /// element; siblings can resolve each other by resource name.
    pub fn register_controller(&self, name: &str, controller: ControllerRef) {
        self.controllers
            .borrow_mut()
            .insert(name.to_string(), controller);
    }

    pub fn get_element(&self) -> Option<Handle> {
        self.element
            .borrow()
            .clone()
            .or_else(|| self.parent.as_ref().and_then(|p| p.get_element()))
    }

    pub fn get_view_slot(&self) -> Option<Rc<RefCell<ViewSlot>>> {
        self.view_slot
            .borrow()
            .clone()
            .or_else(|| self.parent.as_ref().and_then(|p| p.get_view_slot()))
    }

    pub fn get_resources(&self) -> Option<Rc<ViewResources>> {
        self.resources
            .borrow()
            .clone()
            .or_else(|| self.parent.as_ref().and_then(|p| p.get_resources()))
    }

    pub fn get_bound_view_factory(&self) -> Option<Rc<BoundViewFactory>> {
        self.bound_view_factory
            .borrow()
            .clone()
            .or_else(|| self.parent.as_ref().and_then(|p| p.get_bound_view_factory()))
    }

    pub fn get_controller(&self, name: &str) -> Option<ControllerRef> {
        self.controllers
            .borrow()
            .get(name)
            .cloned()
            .or_else(|| self.parent.as_ref().and_then(|p| p.get_controller(name)))
    }
}
