//! Template compiler: annotated markup in, view factory out.
//!
//! One depth-first pass over the parsed fragment. Nodes needing runtime
//! action are stamped with an explicit index (a `weft-target` attribute on
//! elements, a `weft:N` comment standing in for text interpolations and
//! lifted elements) and a matching instruction is emitted. Template
//! controllers lift their host element out into a nested factory compiled
//! with its own index namespace; the placeholder comment left behind anchors
//! the controller's view slot at instantiation.
//!
//! Attribute classification precedence on an element: binding-language
//! recognition first, then custom-attribute behaviors, then bindable
//! properties of the element behavior, then plain attribute bindings.
//! Anything unrecognized stays a static attribute.

use crate::behavior::BehaviorKind;
use crate::binding::{AttributeExpression, BindingLanguage, DefaultBindingLanguage};
use crate::dom;
use crate::error::{Result, TemplatingError};
use crate::factory::ViewFactory;
use crate::instruction::{
    BehaviorRequest, BindingRequest, InjectorLink, InstructionKind, PropertyAssignment,
    TargetInstruction, CONTENT_TAG, MARKER_PREFIX, TARGET_ATTR,
};
use crate::registry::ViewResources;
use markup5ever_rcdom::Handle;
use serde_json::Value;
use std::rc::Rc;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Compile content selectors for native shadow-root projection instead
    /// of emulated distribution. Carried through for callers that target a
    /// real DOM; the emulated pipeline ignores it.
    pub target_shadow_dom: bool,
}

pub struct ViewCompiler {
    language: Rc<dyn BindingLanguage>,
}

impl Default for ViewCompiler {
    fn default() -> Self {
        ViewCompiler::new(Rc::new(DefaultBindingLanguage))
    }
}

struct CompileState {
    instructions: Vec<TargetInstruction>,
    next_injector: usize,
}

impl ViewCompiler {
    pub fn new(language: Rc<dyn BindingLanguage>) -> Self {
        ViewCompiler { language }
    }

    /// Parse and compile markup. A lone root `<template>` wrapper is
    /// unwrapped so loaders can store templates either bare or wrapped.
    pub fn compile_str(
        &self,
        markup: &str,
        resources: &Rc<ViewResources>,
        options: &CompileOptions,
    ) -> Result<Rc<ViewFactory>> {
        let parsed = dom::parse_fragment_str(markup);
        let children = dom::child_nodes(&parsed);
        let elements: Vec<&Handle> = children.iter().filter(|n| dom::is_element(n)).collect();

        let fragment = match elements.as_slice() {
            [only] if dom::element_tag(only).as_deref() == Some("template") => {
                let fragment = dom::new_fragment();
                let contents = dom::template_contents(only).unwrap_or_else(|| (*only).clone());
                for child in dom::detach_children(&contents) {
                    dom::append(&fragment, &child);
                }
                fragment
            }
            _ => parsed,
        };
        self.compile(fragment, resources, options)
    }

    /// Compile a fragment in place: the fragment itself becomes the
    /// factory's annotated template.
    pub fn compile(
        &self,
        fragment: Handle,
        resources: &Rc<ViewResources>,
        options: &CompileOptions,
    ) -> Result<Rc<ViewFactory>> {
        let mut state = CompileState {
            instructions: Vec::new(),
            next_injector: 0,
        };
        self.compile_children(&fragment, resources, options, &mut state, None)?;
        debug!(
            instructions = state.instructions.len(),
            "compiled template fragment"
        );
        Ok(ViewFactory::new(
            fragment,
            state.instructions,
            resources.clone(),
        ))
    }

    fn compile_children(
        &self,
        parent: &Handle,
        resources: &Rc<ViewResources>,
        options: &CompileOptions,
        state: &mut CompileState,
        parent_injector: Option<usize>,
    ) -> Result<()> {
        for child in dom::child_nodes(parent) {
            if dom::is_text(&child) {
                self.compile_text(&child, resources, state);
            } else if dom::is_element(&child) {
                self.compile_element(&child, resources, options, state, parent_injector)?;
            }
        }
        Ok(())
    }

    fn compile_text(&self, node: &Handle, resources: &Rc<ViewResources>, state: &mut CompileState) {
        let text = match dom::text_of(node) {
            Some(text) => text,
            None => return,
        };
        if let Some(interpolation) = self.language.parse_text(resources, &text) {
            let index = state.instructions.len();
            let marker = dom::new_comment(&format!("{MARKER_PREFIX}{index}"));
            dom::replace_node(node, &marker);
            state.instructions.push(TargetInstruction {
                index,
                kind: InstructionKind::ContentExpression(interpolation),
            });
        }
    }

    fn compile_element(
        &self,
        element: &Handle,
        resources: &Rc<ViewResources>,
        options: &CompileOptions,
        state: &mut CompileState,
        parent_injector: Option<usize>,
    ) -> Result<()> {
        let tag = match dom::element_tag(element) {
            Some(tag) => tag,
            None => return Ok(()),
        };

        if tag == CONTENT_TAG {
            return self.compile_content_placeholder(element, resources, options, state);
        }

        if let Some((attr_name, descriptor)) =
            self.find_template_controller(element, resources, &tag)?
        {
            return self.lift_element(element, &attr_name, descriptor, resources, options, state);
        }

        let element_behavior = resources.get_element(&tag);
        let mut element_assignments: Vec<PropertyAssignment> = Vec::new();
        let mut attribute_behaviors: Vec<BehaviorRequest> = Vec::new();
        let mut bindings: Vec<BindingRequest> = Vec::new();

        for (name, value) in dom::attribute_list(element) {
            if name == TARGET_ATTR {
                continue;
            }
            let parsed = self
                .language
                .parse_attribute(resources, element, &name, &value);
            // A recognized binding command always becomes an instruction
            // below; the authored attribute must not survive as a literal.
            if parsed.is_some() {
                dom::remove_attribute(element, &name);
            }
            let base = attribute_base(&name).to_string();

            if let Some(descriptor) = resources.get_attribute(&base) {
                attribute_behaviors.push(BehaviorRequest {
                    descriptor,
                    assignments: vec![value_assignment(parsed, &value)],
                });
                continue;
            }

            if let Some(behavior) = &element_behavior {
                match &parsed {
                    Some(expression) => {
                        let property = behavior
                            .property_by_attribute(&expression.target)
                            .or_else(|| behavior.property_by_name(&expression.target));
                        if let Some(property) = property {
                            element_assignments.push(PropertyAssignment::Expression {
                                property: property.name.clone(),
                                source: expression.source.clone(),
                                mode: expression.mode,
                            });
                            continue;
                        }
                    }
                    None => {
                        if let Some(property) = behavior.property_by_attribute(&name) {
                            element_assignments.push(PropertyAssignment::Literal {
                                property: property.name.clone(),
                                value: Value::String(value.clone()),
                            });
                            continue;
                        }
                    }
                }
            }

            if let Some(expression) = parsed {
                bindings.push(BindingRequest {
                    attribute: expression.target.clone(),
                    source: expression.source,
                    mode: expression
                        .mode
                        .unwrap_or(crate::binding::BindingMode::OneWay),
                });
            }
        }

        let has_behaviors = element_behavior.is_some() || !attribute_behaviors.is_empty();

        // A direct <template> child of a behavior-bearing element compiles
        // into a factory the behaviors can stamp on demand.
        let mut template_factory = None;
        if has_behaviors {
            if let Some(template_child) = dom::child_nodes(element)
                .into_iter()
                .find(|n| dom::element_tag(n).as_deref() == Some("template"))
            {
                let nested = dom::new_fragment();
                let contents =
                    dom::template_contents(&template_child).unwrap_or(template_child.clone());
                for node in dom::detach_children(&contents) {
                    dom::append(&nested, &node);
                }
                dom::remove_from_parent(&template_child);
                template_factory = Some(self.compile(nested, resources, options)?);
            }
        }

        let injector = if has_behaviors {
            let injector_id = state.next_injector;
            state.next_injector += 1;
            Some(InjectorLink {
                injector_id,
                parent_injector_id: parent_injector,
            })
        } else {
            None
        };

        if has_behaviors || !bindings.is_empty() {
            let index = state.instructions.len();
            dom::set_attribute(element, TARGET_ATTR, &index.to_string());
            state.instructions.push(TargetInstruction {
                index,
                kind: InstructionKind::Element {
                    injector,
                    element: element_behavior.map(|descriptor| BehaviorRequest {
                        descriptor,
                        assignments: element_assignments,
                    }),
                    attribute_behaviors,
                    bindings,
                    template: template_factory,
                },
            });
        }

        let child_injector = injector.map(|link| link.injector_id).or(parent_injector);
        self.compile_children(element, resources, options, state, child_injector)
    }

    /// `<weft-content select="...">`: the element becomes a projection
    /// anchor; any children compile into the slot's fallback factory.
    fn compile_content_placeholder(
        &self,
        element: &Handle,
        resources: &Rc<ViewResources>,
        options: &CompileOptions,
        state: &mut CompileState,
    ) -> Result<()> {
        let selector = dom::get_attribute(element, "select").filter(|s| !s.trim().is_empty());

        let defaults = dom::detach_children(element);
        let fallback = if defaults.iter().any(significant_node) {
            let nested = dom::new_fragment();
            for node in defaults {
                dom::append(&nested, &node);
            }
            Some(self.compile(nested, resources, options)?)
        } else {
            None
        };

        let index = state.instructions.len();
        dom::set_attribute(element, TARGET_ATTR, &index.to_string());
        state.instructions.push(TargetInstruction {
            index,
            kind: InstructionKind::ContentSelector { selector, fallback },
        });
        Ok(())
    }

    /// At most one template controller per element; stacking is expressed by
    /// nesting, and two controller attributes on one element would leave
    /// their relative order ambiguous.
    fn find_template_controller(
        &self,
        element: &Handle,
        resources: &Rc<ViewResources>,
        tag: &str,
    ) -> Result<Option<(String, Rc<crate::behavior::BehaviorDescriptor>)>> {
        let mut found: Option<(String, Rc<crate::behavior::BehaviorDescriptor>)> = None;
        for (name, _) in dom::attribute_list(element) {
            let base = attribute_base(&name);
            if let Some(descriptor) = resources.get_attribute(base) {
                if descriptor.kind == BehaviorKind::TemplateController {
                    if let Some((first, _)) = &found {
                        return Err(TemplatingError::MultipleTemplateControllers {
                            tag: tag.to_string(),
                            first: attribute_base(first).to_string(),
                            second: base.to_string(),
                        });
                    }
                    found = Some((name, descriptor));
                }
            }
        }
        Ok(found)
    }

    fn lift_element(
        &self,
        element: &Handle,
        attr_name: &str,
        descriptor: Rc<crate::behavior::BehaviorDescriptor>,
        resources: &Rc<ViewResources>,
        options: &CompileOptions,
        state: &mut CompileState,
    ) -> Result<()> {
        let value = dom::remove_attribute(element, attr_name).unwrap_or_default();
        let parsed = self
            .language
            .parse_attribute(resources, element, attr_name, &value);
        let assignments = vec![value_assignment(parsed, &value)];

        let index = state.instructions.len();
        let placeholder = dom::new_comment(&format!("{MARKER_PREFIX}{index}"));
        dom::replace_node(element, &placeholder);
        // Reserve the slot so the nested compile sees a stable index.
        state.instructions.push(TargetInstruction {
            index,
            kind: InstructionKind::ContentSelector {
                selector: None,
                fallback: None,
            },
        });

        // A lifted <template> host contributes its contents; any other host
        // is carried whole so its own attributes and tag still render.
        let nested = dom::new_fragment();
        match dom::template_contents(element) {
            Some(contents) if dom::element_tag(element).as_deref() == Some("template") => {
                for node in dom::detach_children(&contents) {
                    dom::append(&nested, &node);
                }
            }
            _ => dom::append(&nested, element),
        }
        let factory = self.compile(nested, resources, options)?;

        state.instructions[index] = TargetInstruction {
            index,
            kind: InstructionKind::Lifted {
                controller: BehaviorRequest {
                    descriptor,
                    assignments,
                },
                factory,
            },
        };
        Ok(())
    }
}

/// Attribute name with any binding command stripped: `if.bind` yields `if`.
fn attribute_base(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// Custom attributes and template controllers funnel their single attribute
/// value into the behavior's `value` property.
fn value_assignment(parsed: Option<AttributeExpression>, raw: &str) -> PropertyAssignment {
    match parsed {
        Some(expression) => PropertyAssignment::Expression {
            property: "value".to_string(),
            source: expression.source,
            mode: expression.mode,
        },
        None => PropertyAssignment::Literal {
            property: "value".to_string(),
            value: Value::String(raw.to_string()),
        },
    }
}

fn significant_node(node: &Handle) -> bool {
    dom::is_element(node)
        || dom::text_of(node)
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{
        BehaviorDescriptor, BindableProperty, BindingContext, Capabilities, DataModel,
        ViewModelFactory,
    };
    use crate::binding::BindingMode;
    use crate::container::Container;

    struct PlainFactory;

    impl ViewModelFactory for PlainFactory {
        fn create(&self, _container: &Rc<Container>) -> BindingContext {
            use std::cell::RefCell;
            Rc::new(RefCell::new(DataModel::default()))
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }
    }

    fn compiler() -> ViewCompiler {
        ViewCompiler::default()
    }

    fn compile(markup: &str, resources: &Rc<ViewResources>) -> Result<Rc<ViewFactory>> {
        compiler().compile_str(markup, resources, &CompileOptions::default())
    }

    #[test]
    fn test_text_interpolation_emits_marker() {
        let resources = ViewResources::new_root();
        let factory = compile("<div>Hello ${name}!</div>", &resources).unwrap();
        assert_eq!(factory.instruction_count(), 1);
    }

    #[test]
    fn test_static_markup_emits_nothing() {
        let resources = ViewResources::new_root();
        let factory = compile("<div class=\"x\">static</div>", &resources).unwrap();
        assert_eq!(factory.instruction_count(), 0);
    }

    #[test]
    fn test_plain_attribute_binding() {
        let resources = ViewResources::new_root();
        let factory = compile("<a href.bind=\"url\">x</a>", &resources).unwrap();
        assert_eq!(factory.instruction_count(), 1);
    }

    #[test]
    fn test_binding_command_attribute_is_stripped() {
        use crate::binding::{ObserverLocator, TaskQueue};
        use crate::factory::CreateOptions;

        let resources = ViewResources::new_root();
        let factory = compile("<a href.one-time=\"url\">x</a>", &resources).unwrap();

        let container = Container::new_root(ObserverLocator::new(TaskQueue::new()));
        let scope = DataModel::context(serde_json::json!({ "url": "a" }));
        let view = factory.create(&container, Some(&scope), CreateOptions::default());

        let anchor = &view.nodes()[0];
        assert!(dom::get_attribute(anchor, "href.one-time").is_none());
        assert_eq!(dom::get_attribute(anchor, "href").as_deref(), Some("a"));
    }

    #[test]
    fn test_custom_element_bindable_classification() {
        let resources = ViewResources::new_root();
        resources
            .register_element(
                "my-el",
                BehaviorDescriptor::builder(
                    "my-el",
                    BehaviorKind::Element,
                    Rc::new(PlainFactory),
                )
                .bindable(BindableProperty::new("x").with_mode(BindingMode::OneWay))
                .build(),
            )
            .unwrap();

        let factory = compile("<my-el x.bind=\"val\"></my-el>", &resources).unwrap();
        assert_eq!(factory.instruction_count(), 1);
    }

    #[test]
    fn test_template_controller_lifts_host() {
        let resources = ViewResources::new_root();
        resources
            .register_attribute(
                "when",
                BehaviorDescriptor::builder(
                    "when",
                    BehaviorKind::TemplateController,
                    Rc::new(PlainFactory),
                )
                .bindable(BindableProperty::new("value"))
                .build(),
            )
            .unwrap();

        let factory = compile("<div when.bind=\"show\">inner ${x}</div>", &resources).unwrap();
        // The lifted host leaves a single placeholder instruction behind;
        // the interpolation belongs to the nested factory.
        assert_eq!(factory.instruction_count(), 1);
    }

    #[test]
    fn test_multiple_template_controllers_rejected() {
        let resources = ViewResources::new_root();
        for name in ["when", "repeat"] {
            resources
                .register_attribute(
                    name,
                    BehaviorDescriptor::builder(
                        name,
                        BehaviorKind::TemplateController,
                        Rc::new(PlainFactory),
                    )
                    .bindable(BindableProperty::new("value"))
                    .build(),
                )
                .unwrap();
        }

        let err = compile("<div when.bind=\"a\" repeat.bind=\"b\"></div>", &resources)
            .unwrap_err();
        assert!(matches!(
            err,
            TemplatingError::MultipleTemplateControllers { .. }
        ));
    }

    #[test]
    fn test_content_placeholder_with_fallback() {
        let resources = ViewResources::new_root();
        let factory = compile(
            "<div><weft-content select=\"[slot=x]\"><em>default</em></weft-content></div>",
            &resources,
        )
        .unwrap();
        assert_eq!(factory.instruction_count(), 1);
    }

    #[test]
    fn test_root_template_wrapper_unwrapped() {
        let resources = ViewResources::new_root();
        let factory = compile("<template><div>${x}</div></template>", &resources).unwrap();
        assert_eq!(factory.instruction_count(), 1);
    }
}
