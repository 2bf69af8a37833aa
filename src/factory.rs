//! View factories: compiled templates turned into live views.
//!
//! Instantiation deep-clones the annotated template, builds the
//! index-addressed target table in a single traversal, then applies each
//! target instruction against its resolved node. A factory whose markers
//! disagree with its instruction list is a broken compile artifact, so
//! resolution failures panic rather than surface as recoverable errors.

use crate::behavior::BindingContext;
use crate::binding::{Binding, BindingMode, BindingTarget, SourceExpression};
use crate::container::Container;
use crate::content::{self, ContentSelector};
use crate::controller::{ChildSynchronizer, Controller, ControllerRef};
use crate::dom;
use crate::instruction::{
    BehaviorRequest, InjectorLink, InstructionKind, TargetInstruction, CONTENT_TAG, MARKER_PREFIX,
    TARGET_ATTR,
};
use crate::registry::ViewResources;
use crate::slot::ViewSlot;
use crate::view::View;
use markup5ever_rcdom::Handle;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    /// Create the view unbound even when a binding context is supplied.
    pub suppress_bind: bool,
    /// System-controlled views always follow their parent's context on
    /// bind-from-parent; application-controlled views keep their own.
    pub system_controlled: bool,
}

pub struct ViewFactory {
    template: Handle,
    instructions: Vec<TargetInstruction>,
    resources: Rc<ViewResources>,
}

impl fmt::Debug for ViewFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewFactory")
            .field("instructions", &self.instructions.len())
            .finish_non_exhaustive()
    }
}

impl ViewFactory {
    pub fn new(
        template: Handle,
        instructions: Vec<TargetInstruction>,
        resources: Rc<ViewResources>,
    ) -> Rc<Self> {
        Rc::new(ViewFactory {
            template,
            instructions,
            resources,
        })
    }

    pub fn resources(&self) -> &Rc<ViewResources> {
        &self.resources
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Instantiate one view. Node positions are deterministic: the same
    /// factory resolves the same instruction index to the structurally same
    /// node in every clone.
    pub fn create(
        &self,
        container: &Rc<Container>,
        binding_context: Option<&BindingContext>,
        options: CreateOptions,
    ) -> View {
        let fragment = dom::deep_clone(&self.template);
        let targets = self.resolve_targets(&fragment);
        let locator = container.locator().clone();

        let mut containers: HashMap<usize, Rc<Container>> = HashMap::new();
        let mut bindings: Vec<Rc<Binding>> = Vec::new();
        let mut controllers: Vec<ControllerRef> = Vec::new();
        let mut content_selectors: Vec<ContentSelector> = Vec::new();
        let mut anchored_slots: Vec<Rc<RefCell<ViewSlot>>> = Vec::new();
        // Placeholder nodes projected into an inner slot-bearing view become
        // pass-throughs over copies of that view's slot list; keyed by node
        // identity, filled by the host's instruction, consumed by the
        // placeholder's own (which always comes later in document order).
        let mut pass_through: HashMap<usize, Vec<ContentSelector>> = HashMap::new();

        for instruction in &self.instructions {
            let target = targets[instruction.index].clone();

            match &instruction.kind {
                InstructionKind::ContentExpression(interpolation) => {
                    let text = dom::new_text("");
                    dom::replace_node(&target, &text);
                    let binding = Binding::new(
                        BindingTarget::Text { node: text },
                        SourceExpression::Interpolation(interpolation.clone()),
                        BindingMode::OneWay,
                        self.resources.clone(),
                        locator.clone(),
                    );
                    bindings.push(binding);
                }

                InstructionKind::ContentSelector { selector, fallback } => {
                    let anchor = dom::new_comment("weft-content");
                    dom::replace_node(&target, &anchor);
                    let mut content_selector =
                        ContentSelector::new(anchor, selector.clone(), fallback.clone());
                    if let Some(nested) = pass_through.remove(&(Rc::as_ptr(&target) as usize)) {
                        content_selector.install_nested(nested);
                    }
                    content_selector.update_fallback(container, binding_context);
                    content_selectors.push(content_selector);
                }

                InstructionKind::Lifted {
                    controller: request,
                    factory,
                } => {
                    let child = container.create_child();
                    let slot = Rc::new(RefCell::new(ViewSlot::new_anchored(target.clone())));
                    anchored_slots.push(slot.clone());
                    child.register_view_slot(slot.clone());
                    child.register_resources(self.resources.clone());
                    child.register_bound_view_factory(BoundViewFactory::new(
                        factory.clone(),
                        child.clone(),
                    ));

                    let controller = Controller::create(
                        request.descriptor.clone(),
                        &child,
                        &request.assignments,
                        self.resources.clone(),
                        locator.clone(),
                    );
                    controller.borrow_mut().set_slot(slot);
                    child.register_controller(&request.descriptor.name, controller.clone());
                    controllers.push(controller);
                }

                InstructionKind::Element {
                    injector,
                    element,
                    attribute_behaviors,
                    bindings: binding_requests,
                    template,
                } => {
                    let element_container =
                        self.element_container(container, *injector, &target, &mut containers);

                    if injector.is_some() {
                        element_container.register_resources(self.resources.clone());
                        let slot = Rc::new(RefCell::new(ViewSlot::new(target.clone())));
                        element_container.register_view_slot(slot.clone());
                        if let Some(template_factory) = template {
                            element_container.register_bound_view_factory(BoundViewFactory::new(
                                template_factory.clone(),
                                element_container.clone(),
                            ));
                        }

                        if let Some(request) = element {
                            let controller = self.apply_element_behavior(
                                request,
                                &element_container,
                                &target,
                                &slot,
                                binding_context,
                                &mut pass_through,
                            );
                            controllers.push(controller);
                        }

                        for request in attribute_behaviors {
                            let controller = Controller::create(
                                request.descriptor.clone(),
                                &element_container,
                                &request.assignments,
                                self.resources.clone(),
                                locator.clone(),
                            );
                            element_container
                                .register_controller(&request.descriptor.name, controller.clone());
                            controllers.push(controller);
                        }
                    }

                    for request in binding_requests {
                        bindings.push(Binding::new(
                            BindingTarget::Attribute {
                                node: target.clone(),
                                name: request.attribute.clone(),
                            },
                            request.source.clone(),
                            request.mode,
                            self.resources.clone(),
                            locator.clone(),
                        ));
                    }
                }
            }
        }

        for controller in &controllers {
            controller.borrow_mut().created();
        }

        let mut view = View::new(fragment);
        view.bindings = bindings;
        view.controllers = controllers;
        view.anchored_slots = anchored_slots;
        view.system_controlled = options.system_controlled;
        *view.content_selectors_mut() = content_selectors;

        if let Some(context) = binding_context {
            if !options.suppress_bind {
                view.bind(context, false);
            }
        }
        view
    }

    /// Custom-element wiring: instantiate the element's own template,
    /// project the host's authored children into its content selectors, and
    /// hand the assembled inner view to the controller.
    fn apply_element_behavior(
        &self,
        request: &BehaviorRequest,
        element_container: &Rc<Container>,
        host: &Handle,
        slot: &Rc<RefCell<ViewSlot>>,
        binding_context: Option<&BindingContext>,
        pass_through: &mut HashMap<usize, Vec<ContentSelector>>,
    ) -> ControllerRef {
        let locator = element_container.locator().clone();
        let controller = Controller::create(
            request.descriptor.clone(),
            element_container,
            &request.assignments,
            self.resources.clone(),
            locator,
        );
        element_container.register_controller(&request.descriptor.name, controller.clone());

        if let Some(inner_factory) = request.descriptor.view_factory() {
            let authored = dom::detach_children(host);
            let mut inner_view = inner_factory.create(
                element_container,
                None,
                CreateOptions {
                    suppress_bind: true,
                    system_controlled: true,
                },
            );
            inner_view.append_nodes_to(host);

            // A projected placeholder is not distributed as a node; its slot
            // redistributes over a copy of the inner view's slot list.
            let mut projected: Vec<Handle> = Vec::new();
            for node in authored {
                if dom::element_tag(&node).as_deref() == Some(CONTENT_TAG) {
                    let copies = inner_view
                        .content_selectors_mut()
                        .iter()
                        .map(ContentSelector::copy_for_nested)
                        .collect();
                    pass_through.insert(Rc::as_ptr(&node) as usize, copies);
                } else {
                    projected.push(node);
                }
            }
            content::distribute(&projected, inner_view.content_selectors_mut(), 0);
            for selector in inner_view.content_selectors_mut() {
                selector.update_fallback(element_container, binding_context);
            }
            inner_view.set_owner(Rc::downgrade(&controller));
            controller.borrow_mut().set_view(inner_view);
        }

        if let Some(child_descriptor) = &request.descriptor.child_descriptor {
            let hook = ChildSynchronizer::new(
                host.clone(),
                &child_descriptor.property,
                &child_descriptor.selector,
                controller.borrow().view_model(),
            );
            hook.sync();
            slot.borrow_mut().add_child_hook(hook);
        }

        controller
    }

    fn element_container(
        &self,
        root: &Rc<Container>,
        injector: Option<InjectorLink>,
        element: &Handle,
        containers: &mut HashMap<usize, Rc<Container>>,
    ) -> Rc<Container> {
        match injector {
            Some(link) => {
                let parent = link
                    .parent_injector_id
                    .and_then(|id| containers.get(&id).cloned())
                    .unwrap_or_else(|| root.clone());
                let child = parent.create_child();
                child.register_element(element.clone());
                containers.insert(link.injector_id, child.clone());
                child
            }
            None => root.clone(),
        }
    }

    /// Walk the cloned fragment once, filling the target table from marker
    /// attributes and comments. Any disagreement between markers and the
    /// instruction list is a contract violation.
    fn resolve_targets(&self, fragment: &Handle) -> Vec<Handle> {
        let mut table: Vec<Option<Handle>> = vec![None; self.instructions.len()];
        collect_targets(fragment, &mut table);
        table
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.unwrap_or_else(|| panic!("no target node for index {index}")))
            .collect()
    }
}

fn collect_targets(node: &Handle, table: &mut Vec<Option<Handle>>) {
    for child in dom::child_nodes(node) {
        let index = if let Some(value) = dom::remove_attribute(&child, TARGET_ATTR) {
            Some(
                value
                    .parse::<usize>()
                    .unwrap_or_else(|_| panic!("malformed target index '{value}'")),
            )
        } else {
            dom::comment_text(&child)
                .and_then(|text| text.strip_prefix(MARKER_PREFIX).map(str::to_string))
                .map(|rest| {
                    rest.parse::<usize>()
                        .unwrap_or_else(|_| panic!("malformed target marker 'weft:{rest}'"))
                })
        };

        if let Some(index) = index {
            assert!(index < table.len(), "target index {index} out of range");
            assert!(table[index].is_none(), "duplicate target index {index}");
            table[index] = Some(child.clone());
        }

        collect_targets(&child, table);
    }
}

/// A factory paired with the container it will instantiate under; handed to
/// template controllers so they can stamp views on demand.
pub struct BoundViewFactory {
    factory: Rc<ViewFactory>,
    container: Rc<Container>,
}

impl BoundViewFactory {
    pub fn new(factory: Rc<ViewFactory>, container: Rc<Container>) -> Rc<Self> {
        Rc::new(BoundViewFactory { factory, container })
    }

    pub fn factory(&self) -> &Rc<ViewFactory> {
        &self.factory
    }

    pub fn create(&self, context: Option<&BindingContext>) -> View {
        self.factory.create(
            &self.container,
            context,
            CreateOptions {
                suppress_bind: false,
                system_controlled: true,
            },
        )
    }
}
