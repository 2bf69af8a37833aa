//! End-to-end pipeline tests: markup through compile, instantiate, bind,
//! mutate, flush.
//!
//! These exercise the seams between compiler, factory, controllers, and the
//! observation layer that the per-module tests cover in isolation.

#[cfg(test)]
mod tests {
    use crate::behavior::{
        BehaviorDescriptor, BehaviorKind, BindableProperty, BindingContext, Capabilities,
        DataModel, ViewModel, ViewModelFactory,
    };
    use crate::binding::{BindingMode, ObserverLocator, TaskQueue};
    use crate::compiler::{CompileOptions, ViewCompiler};
    use crate::container::Container;
    use crate::dom;
    use crate::factory::CreateOptions;
    use crate::registry::{ValueConverter, ViewResources};
    use crate::slot::ViewSlot;
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Fixture {
        container: Rc<Container>,
        resources: Rc<ViewResources>,
        locator: Rc<ObserverLocator>,
        compiler: ViewCompiler,
    }

    fn fixture() -> Fixture {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
        let locator = ObserverLocator::new(TaskQueue::new());
        Fixture {
            container: Container::new_root(locator.clone()),
            resources: ViewResources::new_root(),
            locator,
            compiler: ViewCompiler::default(),
        }
    }

    impl Fixture {
        fn compile(&self, markup: &str) -> Rc<crate::factory::ViewFactory> {
            self.compiler
                .compile_str(markup, &self.resources, &CompileOptions::default())
                .unwrap()
        }

        fn render(&self, markup: &str, scope: &BindingContext) -> crate::view::View {
            self.compile(markup)
                .create(&self.container, Some(scope), CreateOptions::default())
        }
    }

    struct PlainFactory(Capabilities);

    impl ViewModelFactory for PlainFactory {
        fn create(&self, _container: &Rc<Container>) -> BindingContext {
            Rc::new(RefCell::new(DataModel::default()))
        }

        fn capabilities(&self) -> Capabilities {
            self.0
        }
    }

    // The holder is transient, so the nodes must be pulled back out before
    // it drops: rcdom's Drop drains a node's whole subtree.
    fn serialize(view: &crate::view::View) -> String {
        let holder = dom::new_element("div");
        view.append_nodes_to(&holder);
        let markup = dom::serialize_children(&holder);
        view.remove_nodes();
        markup
    }

    // ── Interpolation and attribute bindings ────────────────────────────

    #[test]
    fn test_interpolation_updates_through_flush() {
        let fx = fixture();
        let scope = DataModel::context(json!({ "name": "first" }));
        let view = fx.render("<div>Hello ${name}!</div>", &scope);
        assert_eq!(serialize(&view), "<div>Hello first!</div>");

        fx.locator
            .get_observer(&scope, "name")
            .set_value(json!("second"));
        fx.locator.task_queue().flush();
        assert_eq!(serialize(&view), "<div>Hello second!</div>");
    }

    #[test]
    fn test_one_time_binding_ignores_updates() {
        let fx = fixture();
        let scope = DataModel::context(json!({ "url": "a" }));
        let view = fx.render("<a href.one-time=\"url\">x</a>", &scope);

        fx.locator.get_observer(&scope, "url").set_value(json!("b"));
        fx.locator.task_queue().flush();
        assert_eq!(serialize(&view), "<a href=\"a\">x</a>");
    }

    #[test]
    fn test_value_converter_in_interpolation() {
        struct Upper;
        impl ValueConverter for Upper {
            fn to_view(&self, value: Value) -> Value {
                match value {
                    Value::String(s) => Value::String(s.to_uppercase()),
                    other => other,
                }
            }
        }

        let fx = fixture();
        fx.resources
            .register_value_converter("upper", Rc::new(Upper))
            .unwrap();
        let scope = DataModel::context(json!({ "name": "weft" }));
        let view = fx.render("<b>${name | upper}</b>", &scope);
        assert_eq!(serialize(&view), "<b>WEFT</b>");
    }

    // ── Custom elements ─────────────────────────────────────────────────

    fn register_widget(fx: &Fixture, mode: BindingMode) {
        fx.resources
            .register_element(
                "my-widget",
                BehaviorDescriptor::builder(
                    "my-widget",
                    BehaviorKind::Element,
                    Rc::new(PlainFactory(Capabilities::default())),
                )
                .bindable(BindableProperty::new("x").with_mode(mode))
                .build(),
            )
            .unwrap();
    }

    #[test]
    fn test_custom_element_property_flows_from_scope() {
        let fx = fixture();
        register_widget(&fx, BindingMode::OneWay);

        let scope = DataModel::context(json!({ "val": 42 }));
        let view = fx.render("<my-widget x.bind=\"val\"></my-widget>", &scope);

        let controller = view.controllers()[0].clone();
        assert_eq!(
            controller.borrow().view_model().borrow().get_value("x"),
            Some(json!(42))
        );

        fx.locator.get_observer(&scope, "val").set_value(json!(7));
        fx.locator.task_queue().flush();
        assert_eq!(
            controller.borrow().view_model().borrow().get_value("x"),
            Some(json!(7))
        );
    }

    #[test]
    fn test_two_way_property_writes_back_to_scope() {
        let fx = fixture();
        register_widget(&fx, BindingMode::TwoWay);

        let scope = DataModel::context(json!({ "val": 1 }));
        let view = fx.render("<my-widget x.bind=\"val\"></my-widget>", &scope);

        let controller = view.controllers()[0].clone();
        let observer = controller.borrow().observer("x").unwrap().clone();
        observer.set_value(json!(99));
        fx.locator.task_queue().flush();

        assert_eq!(scope.borrow().get_value("val"), Some(json!(99)));
    }

    #[test]
    fn test_literal_attribute_seeds_bindable() {
        let fx = fixture();
        register_widget(&fx, BindingMode::OneWay);

        let scope = DataModel::context(json!({}));
        let view = fx.render("<my-widget x=\"literal\"></my-widget>", &scope);
        let controller = view.controllers()[0].clone();
        assert_eq!(
            controller.borrow().view_model().borrow().get_value("x"),
            Some(json!("literal"))
        );
    }

    // ── Template controllers ────────────────────────────────────────────

    /// Minimal conditional controller: stamps its factory's view into the
    /// slot while the value is truthy, clears it otherwise.
    struct WhenModel {
        container: Rc<Container>,
        value: Value,
        scope: Option<BindingContext>,
    }

    impl WhenModel {
        fn apply(&self) {
            let slot = self.container.get_view_slot().unwrap();
            let factory = self.container.get_bound_view_factory().unwrap();
            let truthy = matches!(&self.value, Value::Bool(true))
                || matches!(&self.value, Value::Number(n) if n.as_f64() != Some(0.0));
            let mut slot = slot.borrow_mut();
            if truthy && slot.is_empty() {
                slot.add(factory.create(self.scope.as_ref()));
            } else if !truthy && !slot.is_empty() {
                slot.remove_all();
            }
        }
    }

    impl ViewModel for WhenModel {
        fn get_value(&self, property: &str) -> Option<Value> {
            if property == "value" {
                Some(self.value.clone())
            } else {
                None
            }
        }

        fn set_value(&mut self, property: &str, value: Value) -> bool {
            if property == "value" {
                self.value = value;
                true
            } else {
                false
            }
        }

        fn bind(&mut self, scope: &BindingContext) {
            self.scope = Some(scope.clone());
            self.apply();
        }

        fn unbind(&mut self) {
            self.scope = None;
            self.container
                .get_view_slot()
                .unwrap()
                .borrow_mut()
                .remove_all();
        }

        fn property_changed(&mut self, handler: &str, _new: &Value, _old: &Value) {
            if handler == "value_changed" && self.scope.is_some() {
                self.apply();
            }
        }
    }

    struct WhenFactory;

    impl ViewModelFactory for WhenFactory {
        fn create(&self, container: &Rc<Container>) -> BindingContext {
            Rc::new(RefCell::new(WhenModel {
                container: container.clone(),
                value: Value::Null,
                scope: None,
            }))
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                handles_bind: true,
                handles_unbind: true,
                ..Capabilities::default()
            }
        }
    }

    fn register_when(fx: &Fixture) {
        fx.resources
            .register_attribute(
                "when",
                BehaviorDescriptor::builder(
                    "when",
                    BehaviorKind::TemplateController,
                    Rc::new(WhenFactory),
                )
                .bindable(
                    BindableProperty::new("value").with_change_handler("value_changed"),
                )
                .build(),
            )
            .unwrap();
    }

    #[test]
    fn test_template_controller_toggles_lifted_content() {
        let fx = fixture();
        register_when(&fx);

        let scope = DataModel::context(json!({ "show": true, "msg": "hi" }));
        let view = fx.render("<p when.bind=\"show\">${msg}</p>", &scope);
        assert_eq!(serialize(&view), "<p>hi</p><!--weft:0-->");

        fx.locator
            .get_observer(&scope, "show")
            .set_value(json!(false));
        fx.locator.task_queue().flush();
        assert_eq!(serialize(&view), "<!--weft:0-->");

        fx.locator
            .get_observer(&scope, "show")
            .set_value(json!(true));
        fx.locator.task_queue().flush();
        assert_eq!(serialize(&view), "<p>hi</p><!--weft:0-->");
    }

    #[test]
    fn test_lifted_template_host_contributes_contents_only() {
        let fx = fixture();
        register_when(&fx);

        let scope = DataModel::context(json!({ "show": true, "msg": "x" }));
        let view = fx.render("<template when.bind=\"show\"><i>${msg}</i></template>", &scope);
        assert_eq!(serialize(&view), "<i>x</i><!--weft:0-->");
    }

    // ── Content distribution ────────────────────────────────────────────

    fn register_card(fx: &Fixture, inner_markup: &str) {
        let descriptor = BehaviorDescriptor::builder(
            "x-card",
            BehaviorKind::Element,
            Rc::new(PlainFactory(Capabilities::default())),
        )
        .build();
        descriptor.set_view_factory(fx.compile(inner_markup));
        fx.resources.register_element("x-card", descriptor).unwrap();
    }

    #[test]
    fn test_children_distribute_by_selector_first_match_wins() {
        let fx = fixture();
        register_card(
            &fx,
            "<header><weft-content select=\"[data-slot=x]\"></weft-content></header>\
             <section><weft-content></weft-content></section>",
        );

        let scope = DataModel::context(json!({}));
        let view = fx.render(
            "<x-card><em data-slot=\"x\">a</em><p>b</p><em data-slot=\"x\">c</em></x-card>",
            &scope,
        );

        let card = &view.nodes()[0];
        let markup = dom::serialize_children(card);
        assert_eq!(
            markup,
            "<header><em data-slot=\"x\">a</em><em data-slot=\"x\">c</em><!--weft-content--></header>\
             <section><p>b</p><!--weft-content--></section>"
        );
    }

    #[test]
    fn test_unmatched_children_are_dropped() {
        let fx = fixture();
        register_card(
            &fx,
            "<header><weft-content select=\"em\"></weft-content></header>",
        );

        let scope = DataModel::context(json!({}));
        let view = fx.render("<x-card><em>kept</em><p>dropped</p></x-card>", &scope);
        let markup = dom::serialize_children(&view.nodes()[0]);
        assert!(markup.contains("kept"));
        assert!(!markup.contains("dropped"));
    }

    #[test]
    fn test_fallback_renders_when_nothing_projects() {
        let fx = fixture();
        register_card(
            &fx,
            "<header><weft-content select=\"em\"><span>default</span></weft-content></header>",
        );

        let scope = DataModel::context(json!({}));
        let empty = fx.render("<x-card></x-card>", &scope);
        assert!(dom::serialize_children(&empty.nodes()[0]).contains("default"));

        let projected = fx.render("<x-card><em>real</em></x-card>", &scope);
        let markup = dom::serialize_children(&projected.nodes()[0]);
        assert!(markup.contains("real"));
        assert!(!markup.contains("default"));
    }

    #[test]
    fn test_fallback_binds_to_consumer_scope() {
        let fx = fixture();
        register_card(
            &fx,
            "<header><weft-content select=\"em\"><span>${msg}</span></weft-content></header>",
        );

        let scope = DataModel::context(json!({ "msg": "hi" }));
        let view = fx.render("<x-card></x-card>", &scope);
        assert!(dom::serialize_children(&view.nodes()[0]).contains("<span>hi</span>"));

        fx.locator.get_observer(&scope, "msg").set_value(json!("ho"));
        fx.locator.task_queue().flush();
        assert!(dom::serialize_children(&view.nodes()[0]).contains("<span>ho</span>"));
    }

    #[test]
    fn test_projection_passes_through_nested_slot_bearing_element() {
        let fx = fixture();

        let panel = BehaviorDescriptor::builder(
            "y-panel",
            BehaviorKind::Element,
            Rc::new(PlainFactory(Capabilities::default())),
        )
        .build();
        panel.set_view_factory(fx.compile(
            "<header><weft-content select=\"em\"></weft-content></header>\
             <section><weft-content></weft-content></section>",
        ));
        fx.resources.register_element("y-panel", panel).unwrap();

        // x-wrap forwards its own projection point into y-panel, so the
        // consumer's children are matched against y-panel's slots.
        let wrap = BehaviorDescriptor::builder(
            "x-wrap",
            BehaviorKind::Element,
            Rc::new(PlainFactory(Capabilities::default())),
        )
        .build();
        wrap.set_view_factory(fx.compile("<y-panel><weft-content></weft-content></y-panel>"));
        fx.resources.register_element("x-wrap", wrap).unwrap();

        let scope = DataModel::context(json!({}));
        let view = fx.render("<x-wrap><em>a</em><p>b</p></x-wrap>", &scope);

        let markup = dom::serialize_children(&view.nodes()[0]);
        assert_eq!(
            markup,
            "<y-panel><header><em>a</em><!--weft-content--></header>\
             <section><p>b</p><!--weft-content--></section></y-panel>"
        );
    }

    // ── Lifecycle and structural invariants ─────────────────────────────

    #[test]
    fn test_unbind_clears_context_and_rebind_works() {
        let fx = fixture();
        let scope_a = DataModel::context(json!({ "name": "a" }));
        let scope_b = DataModel::context(json!({ "name": "b" }));

        let mut view = fx.render("<div>${name}</div>", &scope_a);
        assert_eq!(serialize(&view), "<div>a</div>");

        view.unbind();
        assert!(view.binding_context().is_none());

        view.bind(&scope_b, false);
        assert_eq!(serialize(&view), "<div>b</div>");
    }

    #[test]
    fn test_view_nodes_return_to_fragment_on_removal() {
        let fx = fixture();
        let scope = DataModel::context(json!({}));
        let view = fx.render("<i>1</i><i>2</i>", &scope);

        let host = dom::new_element("div");
        view.append_nodes_to(&host);
        assert_eq!(dom::child_nodes(&host).len(), 2);

        view.remove_nodes();
        assert!(dom::child_nodes(&host).is_empty());
        // The same view can be placed again from its fragment.
        view.append_nodes_to(&host);
        assert_eq!(dom::serialize_children(&host), "<i>1</i><i>2</i>");
    }

    #[test]
    fn test_positions_deterministic_across_instantiations() {
        let fx = fixture();
        let factory = fx.compile("<span title.bind=\"a\"></span><span title.bind=\"b\"></span>");
        let scope = DataModel::context(json!({ "a": "A", "b": "B" }));

        for _ in 0..4 {
            let view = factory.create(&fx.container, Some(&scope), CreateOptions::default());
            assert_eq!(dom::get_attribute(&view.nodes()[0], "title").unwrap(), "A");
            assert_eq!(dom::get_attribute(&view.nodes()[1], "title").unwrap(), "B");
        }
    }

    #[test]
    fn test_duplicate_registration_rejected_same_pointer_tolerated() {
        let fx = fixture();
        let descriptor = BehaviorDescriptor::builder(
            "dup-el",
            BehaviorKind::Element,
            Rc::new(PlainFactory(Capabilities::default())),
        )
        .build();

        fx.resources
            .register_element("dup-el", descriptor.clone())
            .unwrap();
        // Same descriptor again is a no-op.
        fx.resources
            .register_element("dup-el", descriptor)
            .unwrap();

        let other = BehaviorDescriptor::builder(
            "dup-el",
            BehaviorKind::Element,
            Rc::new(PlainFactory(Capabilities::default())),
        )
        .build();
        assert!(fx.resources.register_element("dup-el", other).is_err());
    }

    #[test]
    fn test_slot_attach_propagates_to_views() {
        let fx = fixture();
        let scope = DataModel::context(json!({ "name": "n" }));
        let view = fx.render("<div>${name}</div>", &scope);

        let host = dom::new_element("main");
        let mut slot = ViewSlot::new(host.clone());
        slot.add(view);
        slot.attached();
        slot.attached();
        assert!(slot.is_attached());
        assert_eq!(dom::serialize_children(&host), "<div>n</div>");

        let views = slot.remove_all();
        assert_eq!(views.len(), 1);
        assert!(dom::child_nodes(&host).is_empty());
    }
}
