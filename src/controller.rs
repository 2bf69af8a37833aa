//! Behavior controllers: the runtime instance tying a descriptor, its
//! view-model, its property observers, and (for elements and template
//! controllers) a nested view or view slot together.
//!
//! A controller funnels the lifecycle into the view-model according to the
//! descriptor's frozen capability flags, and drives its per-property
//! sub-bindings. Binding a property suspends the observer's change-handler
//! dispatch, syncs the initial value, then resumes so the handler fires for
//! real changes only, never for the initial write.

use crate::behavior::{BehaviorDescriptor, BindingContext, ViewModel, same_context};
use crate::binding::{
    BehaviorPropertyObserver, Binding, BindingTarget, ObserverLocator, SourceExpression,
};
use crate::dom;
use crate::instruction::PropertyAssignment;
use crate::registry::ViewResources;
use crate::slot::ViewSlot;
use crate::view::View;
use markup5ever_rcdom::Handle;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::container::Container;

pub type ControllerRef = Rc<RefCell<Controller>>;

struct BoundProperty {
    observer: Rc<BehaviorPropertyObserver>,
    binding: Option<Rc<Binding>>,
}

pub struct Controller {
    descriptor: Rc<BehaviorDescriptor>,
    view_model: BindingContext,
    view: Option<View>,
    slot: Option<Rc<RefCell<ViewSlot>>>,
    scope: Option<BindingContext>,
    bound_properties: Vec<BoundProperty>,
    is_created: bool,
    is_attached: bool,
}

impl Controller {
    /// Instantiate the behavior's view-model and wire one observer per
    /// bindable property. Literal assignments seed observer and view-model
    /// immediately; expression assignments become sub-bindings driven at
    /// bind time. An assignment's explicit mode wins over the property's
    /// default mode.
    pub fn create(
        descriptor: Rc<BehaviorDescriptor>,
        container: &Rc<Container>,
        assignments: &[PropertyAssignment],
        resources: Rc<ViewResources>,
        locator: Rc<ObserverLocator>,
    ) -> ControllerRef {
        let view_model = descriptor.create_view_model(container);
        let mut bound_properties = Vec::new();

        for property in &descriptor.properties {
            let mut initial = property.default_value.clone().unwrap_or(Value::Null);
            let mut binding_source: Option<(SourceExpression, crate::binding::BindingMode)> = None;

            for assignment in assignments {
                match assignment {
                    PropertyAssignment::Literal { property: name, value } if *name == property.name => {
                        initial = value.clone();
                    }
                    PropertyAssignment::Expression { property: name, source, mode }
                        if *name == property.name =>
                    {
                        binding_source =
                            Some((source.clone(), mode.unwrap_or(property.default_mode)));
                    }
                    _ => {}
                }
            }

            view_model
                .borrow_mut()
                .set_value(&property.name, initial.clone());

            let observer = BehaviorPropertyObserver::new(
                locator.task_queue().clone(),
                &view_model,
                &property.name,
                property.change_handler.clone(),
                initial,
            );

            let binding = binding_source.map(|(source, mode)| {
                Binding::new(
                    BindingTarget::BehaviorProperty {
                        observer: observer.clone(),
                    },
                    source,
                    mode,
                    resources.clone(),
                    locator.clone(),
                )
            });

            bound_properties.push(BoundProperty { observer, binding });
        }

        Rc::new(RefCell::new(Controller {
            descriptor,
            view_model,
            view: None,
            slot: None,
            scope: None,
            bound_properties,
            is_created: false,
            is_attached: false,
        }))
    }

    pub fn descriptor(&self) -> &Rc<BehaviorDescriptor> {
        &self.descriptor
    }

    pub fn view_model(&self) -> &BindingContext {
        &self.view_model
    }

    pub fn view(&self) -> Option<&View> {
        self.view.as_ref()
    }

    pub fn set_view(&mut self, view: View) {
        self.view = Some(view);
    }

    pub fn take_view(&mut self) -> Option<View> {
        self.view.take()
    }

    pub fn slot(&self) -> Option<&Rc<RefCell<ViewSlot>>> {
        self.slot.as_ref()
    }

    pub fn set_slot(&mut self, slot: Rc<RefCell<ViewSlot>>) {
        self.slot = Some(slot);
    }

    /// Observer for one bindable property, by name.
    pub fn observer(&self, property: &str) -> Option<&Rc<BehaviorPropertyObserver>> {
        self.bound_properties
            .iter()
            .map(|p| &p.observer)
            .find(|o| o.property() == property)
    }

    /// Fires exactly once, after construction wiring is done.
    pub fn created(&mut self) {
        if self.is_created {
            return;
        }
        self.is_created = true;
        if self.descriptor.capabilities.handles_created {
            self.view_model.borrow_mut().created();
        }
    }

    pub fn bind(&mut self, scope: &BindingContext) {
        if let Some(current) = &self.scope {
            if same_context(current, scope) {
                return;
            }
            self.unbind();
        }
        self.scope = Some(scope.clone());

        for property in &self.bound_properties {
            if let Some(binding) = &property.binding {
                property.observer.suspend_self_notification();
                binding.bind(scope);
                property.observer.sync_now();
                property.observer.resume_self_notification();
            }
        }

        if self.descriptor.capabilities.handles_bind {
            self.view_model.borrow_mut().bind(scope);
        }

        // The behavior's own view binds against the view-model; views the
        // view-model stamped into its slot stay on the outer scope.
        if let Some(view) = &mut self.view {
            view.bind(&self.view_model, true);
        }
        if let Some(slot) = &self.slot {
            slot.borrow_mut().bind(scope);
        }
    }

    pub fn unbind(&mut self) {
        if self.scope.is_none() {
            return;
        }

        if let Some(slot) = &self.slot {
            slot.borrow_mut().unbind();
        }
        if let Some(view) = &mut self.view {
            view.unbind();
        }
        if self.descriptor.capabilities.handles_unbind {
            self.view_model.borrow_mut().unbind();
        }
        for property in self.bound_properties.iter().rev() {
            if let Some(binding) = &property.binding {
                binding.unbind();
            }
        }
        self.scope = None;
    }

    pub fn attached(&mut self) {
        if self.is_attached {
            return;
        }
        self.is_attached = true;

        if self.descriptor.capabilities.handles_attached {
            self.view_model.borrow_mut().attached();
        }
        if let Some(view) = &mut self.view {
            view.attached();
        }
        if let Some(slot) = &self.slot {
            slot.borrow_mut().attached();
        }
    }

    pub fn detached(&mut self) {
        if !self.is_attached {
            return;
        }
        self.is_attached = false;

        if let Some(slot) = &self.slot {
            slot.borrow_mut().detached();
        }
        if let Some(view) = &mut self.view {
            view.detached();
        }
        if self.descriptor.capabilities.handles_detached {
            self.view_model.borrow_mut().detached();
        }
    }
}

/// Keeps a `children`-declared view-model property in sync with the host
/// element's matching child elements. Slots holding views under the host
/// call `sync` after every structural mutation; the synchronized view-model
/// must not itself mutate that slot from `children_changed`.
pub struct ChildSynchronizer {
    host: Handle,
    property: String,
    selector: String,
    view_model: Weak<RefCell<dyn ViewModel>>,
}

impl ChildSynchronizer {
    pub fn new(
        host: Handle,
        property: &str,
        selector: &str,
        view_model: &BindingContext,
    ) -> Rc<Self> {
        Rc::new(ChildSynchronizer {
            host,
            property: property.to_string(),
            selector: selector.to_string(),
            view_model: Rc::downgrade(view_model),
        })
    }

    pub fn sync(&self) {
        let vm = match self.view_model.upgrade() {
            Some(vm) => vm,
            None => return,
        };
        let matches: Vec<Handle> = dom::child_nodes(&self.host)
            .into_iter()
            .filter(|node| crate::content::matches_selector(node, &self.selector))
            .collect();
        vm.borrow_mut().children_changed(&self.property, &matches);
    }
}
