//! Binding language and observer runtime.
//!
//! The engine treats the expression grammar as pluggable: anything
//! implementing [`BindingLanguage`] can classify template text and
//! attributes. The default implementation recognizes `${path}` interpolation
//! in text, `name.bind`-style binding commands on attributes, dotted access
//! paths, and `path | converter` pipes, nothing richer.
//!
//! Change propagation is cooperative and single-threaded: writes flow
//! through property observers which queue a diff-and-notify task; a
//! [`TaskQueue::flush`] delivers all pending notifications, including ones
//! enqueued mid-flush.

use crate::behavior::{same_context, BindingContext, ViewModel};
use crate::dom;
use crate::registry::ViewResources;
use lazy_static::lazy_static;
use markup5ever_rcdom::Handle;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

lazy_static! {
    /// `${ ... }` interpolation segments in text content.
    static ref INTERPOLATION_RE: Regex = Regex::new(r"\$\{([^}]+)\}").unwrap();

    /// `target.command` attribute names, e.g. `value.bind`, `items.two-way`.
    static ref BINDING_COMMAND_RE: Regex =
        Regex::new(r"^([a-zA-Z][a-zA-Z0-9_-]*)\.(bind|one-way|two-way|one-time)$").unwrap();

    /// A dotted access path, optionally piped through a converter.
    static ref ACCESS_PATH_RE: Regex =
        Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*(\.[A-Za-z_$][A-Za-z0-9_$]*)*$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BindingMode {
    /// Evaluate once at bind time; never observe.
    OneTime,
    /// Source changes flow to the target.
    OneWay,
    /// Source and target stay in sync.
    TwoWay,
}

// ───────────────────────────────────────────────────────────────────────────
// Expressions
// ───────────────────────────────────────────────────────────────────────────

/// A dotted access path with an optional value-converter pipe.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub path: Vec<String>,
    pub converter: Option<String>,
}

impl Expression {
    /// Parses `a.b.c` or `a.b | converterName`. Returns None for anything
    /// outside that grammar; richer expressions belong to a replacement
    /// [`BindingLanguage`].
    pub fn parse(source: &str) -> Option<Expression> {
        let (path_part, converter) = match source.split_once('|') {
            Some((left, right)) => {
                let name = right.trim();
                if name.is_empty() || !ACCESS_PATH_RE.is_match(name) {
                    return None;
                }
                (left.trim(), Some(name.to_string()))
            }
            None => (source.trim(), None),
        };

        if !ACCESS_PATH_RE.is_match(path_part) {
            return None;
        }
        Some(Expression {
            path: path_part.split('.').map(str::to_string).collect(),
            converter,
        })
    }

    /// The context property this expression observes.
    pub fn root(&self) -> &str {
        &self.path[0]
    }

    pub fn evaluate(&self, scope: &BindingContext, resources: &ViewResources) -> Value {
        let mut value = scope
            .borrow()
            .get_value(&self.path[0])
            .unwrap_or(Value::Null);
        for segment in &self.path[1..] {
            value = value.get(segment).cloned().unwrap_or(Value::Null);
        }
        match &self.converter {
            Some(name) => match resources.get_value_converter(name) {
                Some(converter) => converter.to_view(value),
                None => value,
            },
            None => value,
        }
    }

    /// Only single-segment paths can be written back through `set_value`.
    pub fn is_assignable(&self) -> bool {
        self.path.len() == 1
    }

    pub fn assign(&self, scope: &BindingContext, resources: &ViewResources, value: Value) {
        if !self.is_assignable() {
            return;
        }
        let value = match &self.converter {
            Some(name) => match resources.get_value_converter(name) {
                Some(converter) => converter.from_view(value),
                None => value,
            },
            None => value,
        };
        scope.borrow_mut().set_value(&self.path[0], value);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TextPart {
    Static(String),
    Dynamic(Expression),
}

/// Parsed text content mixing literal runs and `${...}` expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolation {
    pub parts: Vec<TextPart>,
}

impl Interpolation {
    pub fn evaluate(&self, scope: &BindingContext, resources: &ViewResources) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                TextPart::Static(text) => out.push_str(text),
                TextPart::Dynamic(expr) => {
                    out.push_str(&value_to_string(&expr.evaluate(scope, resources)))
                }
            }
        }
        out
    }

    /// Root context properties this interpolation observes.
    pub fn roots(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                TextPart::Dynamic(expr) => Some(expr.root()),
                TextPart::Static(_) => None,
            })
            .collect()
    }
}

/// Rendered display form of a bound value.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Binding language
// ───────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum SourceExpression {
    Path(Expression),
    Interpolation(Interpolation),
}

impl SourceExpression {
    pub fn roots(&self) -> Vec<&str> {
        match self {
            SourceExpression::Path(expr) => vec![expr.root()],
            SourceExpression::Interpolation(interp) => interp.roots(),
        }
    }

    pub fn evaluate(&self, scope: &BindingContext, resources: &ViewResources) -> Value {
        match self {
            SourceExpression::Path(expr) => expr.evaluate(scope, resources),
            SourceExpression::Interpolation(interp) => {
                Value::String(interp.evaluate(scope, resources))
            }
        }
    }
}

/// One recognized data-binding attribute: the target property name (after
/// known-attribute aliasing), the source expression, and an optional
/// explicit mode (None means "use the target's default").
#[derive(Debug, Clone)]
pub struct AttributeExpression {
    pub target: String,
    pub source: SourceExpression,
    pub mode: Option<BindingMode>,
}

/// Pluggable expression-recognition collaborator. Returning None means
/// "not a binding; leave as literal".
pub trait BindingLanguage {
    fn parse_text(&self, resources: &ViewResources, value: &str) -> Option<Interpolation>;

    fn parse_attribute(
        &self,
        resources: &ViewResources,
        element: &Handle,
        name: &str,
        value: &str,
    ) -> Option<AttributeExpression>;
}

#[derive(Debug, Default)]
pub struct DefaultBindingLanguage;

impl BindingLanguage for DefaultBindingLanguage {
    fn parse_text(&self, _resources: &ViewResources, value: &str) -> Option<Interpolation> {
        if !INTERPOLATION_RE.is_match(value) {
            return None;
        }

        let mut parts = Vec::new();
        let mut last_end = 0;
        for caps in INTERPOLATION_RE.captures_iter(value) {
            let whole = caps.get(0).unwrap();
            if whole.start() > last_end {
                parts.push(TextPart::Static(value[last_end..whole.start()].to_string()));
            }
            match Expression::parse(caps.get(1).unwrap().as_str()) {
                Some(expr) => parts.push(TextPart::Dynamic(expr)),
                // Unparseable interpolation bodies render as literal text.
                None => parts.push(TextPart::Static(whole.as_str().to_string())),
            }
            last_end = whole.end();
        }
        if last_end < value.len() {
            parts.push(TextPart::Static(value[last_end..].to_string()));
        }

        if parts.iter().any(|p| matches!(p, TextPart::Dynamic(_))) {
            Some(Interpolation { parts })
        } else {
            None
        }
    }

    fn parse_attribute(
        &self,
        resources: &ViewResources,
        _element: &Handle,
        name: &str,
        value: &str,
    ) -> Option<AttributeExpression> {
        if let Some(caps) = BINDING_COMMAND_RE.captures(name) {
            let raw_target = caps.get(1).unwrap().as_str();
            let target = resources
                .get_known_attribute(raw_target)
                .unwrap_or_else(|| raw_target.to_string());
            let mode = match caps.get(2).unwrap().as_str() {
                "bind" => None,
                "one-way" => Some(BindingMode::OneWay),
                "two-way" => Some(BindingMode::TwoWay),
                "one-time" => Some(BindingMode::OneTime),
                _ => unreachable!(),
            };
            let expr = Expression::parse(value)?;
            return Some(AttributeExpression {
                target,
                source: SourceExpression::Path(expr),
                mode,
            });
        }

        // Interpolated attribute values bind one-way as strings.
        if let Some(interp) = self.parse_text(resources, value) {
            let target = resources
                .get_known_attribute(name)
                .unwrap_or_else(|| name.to_string());
            return Some(AttributeExpression {
                target,
                source: SourceExpression::Interpolation(interp),
                mode: Some(BindingMode::OneWay),
            });
        }

        None
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Task queue and observers
// ───────────────────────────────────────────────────────────────────────────

/// Deferred notification, delivered on the next flush.
pub trait Task {
    fn call(&self);
}

/// Single-threaded FIFO of pending observer notifications. Tasks queued
/// while flushing are processed within the same flush.
#[derive(Default)]
pub struct TaskQueue {
    queue: RefCell<VecDeque<Rc<dyn Task>>>,
}

impl TaskQueue {
    pub fn new() -> Rc<Self> {
        Rc::new(TaskQueue::default())
    }

    pub fn queue_task(&self, task: Rc<dyn Task>) {
        self.queue.borrow_mut().push_back(task);
    }

    pub fn flush(&self) {
        loop {
            let next = self.queue.borrow_mut().pop_front();
            match next {
                Some(task) => task.call(),
                None => break,
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.borrow().is_empty()
    }
}

pub type SubscriberCallback = Rc<dyn Fn(&Value, &Value)>;

/// Observes one property of one binding context. Writes go through
/// `set_value`; there is no dirty-checking poll.
pub struct ContextPropertyObserver {
    context: Weak<RefCell<dyn ViewModel>>,
    property: String,
    task_queue: Rc<TaskQueue>,
    subscribers: RefCell<Vec<(usize, SubscriberCallback)>>,
    next_id: Cell<usize>,
    last_value: RefCell<Value>,
    queued: Cell<bool>,
}

impl ContextPropertyObserver {
    pub fn get_value(&self) -> Value {
        self.context
            .upgrade()
            .and_then(|ctx| ctx.borrow().get_value(&self.property))
            .unwrap_or(Value::Null)
    }

    pub fn set_value(self: &Rc<Self>, value: Value) {
        if let Some(ctx) = self.context.upgrade() {
            ctx.borrow_mut().set_value(&self.property, value);
        }
        self.queue_notification();
    }

    /// Queue a diff-and-notify for an already-applied mutation.
    pub fn queue_notification(self: &Rc<Self>) {
        if !self.queued.replace(true) {
            self.task_queue.queue_task(self.clone());
        }
    }

    pub fn subscribe(&self, callback: SubscriberCallback) -> usize {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.subscribers.borrow_mut().push((id, callback));
        id
    }

    pub fn unsubscribe(&self, id: usize) {
        self.subscribers.borrow_mut().retain(|(sid, _)| *sid != id);
    }

    /// Whether the observed context is still alive.
    pub fn is_live(&self) -> bool {
        self.context.strong_count() > 0
    }
}

impl Task for ContextPropertyObserver {
    fn call(&self) {
        self.queued.set(false);
        let new_value = self.get_value();
        let old_value = self.last_value.replace(new_value.clone());
        if new_value == old_value {
            return;
        }
        let subscribers: Vec<SubscriberCallback> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for subscriber in subscribers {
            subscriber(&new_value, &old_value);
        }
    }
}

/// Caches one observer per (context identity, property) pair.
pub struct ObserverLocator {
    task_queue: Rc<TaskQueue>,
    observers: RefCell<HashMap<(usize, String), Rc<ContextPropertyObserver>>>,
}

impl ObserverLocator {
    pub fn new(task_queue: Rc<TaskQueue>) -> Rc<Self> {
        Rc::new(ObserverLocator {
            task_queue,
            observers: RefCell::new(HashMap::new()),
        })
    }

    pub fn task_queue(&self) -> &Rc<TaskQueue> {
        &self.task_queue
    }

    pub fn get_observer(
        &self,
        context: &BindingContext,
        property: &str,
    ) -> Rc<ContextPropertyObserver> {
        // Contexts drop without notice. Sweeping dead entries on lookup
        // bounds the cache and keeps a reused allocation from aliasing a
        // stale observer under the same pointer key.
        self.observers.borrow_mut().retain(|_, o| o.is_live());

        let key = (Rc::as_ptr(context) as *const () as usize, property.to_string());
        if let Some(existing) = self.observers.borrow().get(&key) {
            return existing.clone();
        }
        let observer = Rc::new(ContextPropertyObserver {
            context: Rc::downgrade(context),
            property: property.to_string(),
            task_queue: self.task_queue.clone(),
            subscribers: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
            last_value: RefCell::new(
                context
                    .borrow()
                    .get_value(property)
                    .unwrap_or(Value::Null),
            ),
            queued: Cell::new(false),
        });
        self.observers.borrow_mut().insert(key, observer.clone());
        observer
    }
}

/// Observer for one bindable property of one behavior instance. Keeps the
/// current value locally, notifies external subscribers on change, and
/// dispatches the declared change handler to the view-model unless
/// self-notification is suspended (it is, during initial bind sync).
pub struct BehaviorPropertyObserver {
    property: String,
    change_handler: Option<String>,
    view_model: Weak<RefCell<dyn ViewModel>>,
    task_queue: Rc<TaskQueue>,
    current: RefCell<Value>,
    old: RefCell<Value>,
    subscribers: RefCell<Vec<(usize, SubscriberCallback)>>,
    next_id: Cell<usize>,
    suspended: Cell<bool>,
    queued: Cell<bool>,
}

impl BehaviorPropertyObserver {
    pub fn new(
        task_queue: Rc<TaskQueue>,
        view_model: &BindingContext,
        property: &str,
        change_handler: Option<String>,
        initial: Value,
    ) -> Rc<Self> {
        Rc::new(BehaviorPropertyObserver {
            property: property.to_string(),
            change_handler,
            view_model: Rc::downgrade(view_model),
            task_queue,
            current: RefCell::new(initial.clone()),
            old: RefCell::new(initial),
            subscribers: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
            suspended: Cell::new(false),
            queued: Cell::new(false),
        })
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn get_value(&self) -> Value {
        self.current.borrow().clone()
    }

    pub fn set_value(self: &Rc<Self>, value: Value) {
        if *self.current.borrow() == value {
            return;
        }
        *self.old.borrow_mut() = self.current.replace(value.clone());
        if let Some(vm) = self.view_model.upgrade() {
            vm.borrow_mut().set_value(&self.property, value);
        }
        if !self.queued.replace(true) {
            self.task_queue.queue_task(self.clone());
        }
    }

    pub fn subscribe(&self, callback: SubscriberCallback) -> usize {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.subscribers.borrow_mut().push((id, callback));
        id
    }

    pub fn unsubscribe(&self, id: usize) {
        self.subscribers.borrow_mut().retain(|(sid, _)| *sid != id);
    }

    pub fn suspend_self_notification(&self) {
        self.suspended.set(true);
    }

    pub fn resume_self_notification(&self) {
        self.suspended.set(false);
    }

    /// Force one synchronous evaluation, as done right after the initial
    /// sub-binding sync during bind.
    pub fn sync_now(&self) {
        self.queued.set(false);
        self.deliver();
    }

    fn deliver(&self) {
        let new_value = self.current.borrow().clone();
        let old_value = self.old.replace(new_value.clone());
        if new_value == old_value {
            return;
        }
        if !self.suspended.get() {
            if let (Some(handler), Some(vm)) = (&self.change_handler, self.view_model.upgrade()) {
                vm.borrow_mut()
                    .property_changed(handler, &new_value, &old_value);
            }
        }
        let subscribers: Vec<SubscriberCallback> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for subscriber in subscribers {
            subscriber(&new_value, &old_value);
        }
    }
}

impl Task for BehaviorPropertyObserver {
    fn call(&self) {
        if self.queued.replace(false) {
            self.deliver();
        }
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Bindings
// ───────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub enum BindingTarget {
    /// A DOM element attribute.
    Attribute { node: Handle, name: String },
    /// A text node's content.
    Text { node: Handle },
    /// A bindable property of a behavior instance.
    BehaviorProperty { observer: Rc<BehaviorPropertyObserver> },
}

struct BoundState {
    scope: BindingContext,
    source_subscriptions: Vec<(Rc<ContextPropertyObserver>, usize)>,
    target_subscription: Option<(Rc<BehaviorPropertyObserver>, usize)>,
}

/// A live connection from a source expression to one target. Bind/unbind are
/// idempotent; binding to a different scope implicitly unbinds first.
pub struct Binding {
    target: BindingTarget,
    source: SourceExpression,
    mode: BindingMode,
    resources: Rc<ViewResources>,
    locator: Rc<ObserverLocator>,
    state: RefCell<Option<BoundState>>,
}

impl Binding {
    pub fn new(
        target: BindingTarget,
        source: SourceExpression,
        mode: BindingMode,
        resources: Rc<ViewResources>,
        locator: Rc<ObserverLocator>,
    ) -> Rc<Self> {
        Rc::new(Binding {
            target,
            source,
            mode,
            resources,
            locator,
            state: RefCell::new(None),
        })
    }

    pub fn is_bound(&self) -> bool {
        self.state.borrow().is_some()
    }

    pub fn bind(self: &Rc<Self>, scope: &BindingContext) {
        if let Some(state) = self.state.borrow().as_ref() {
            if same_context(&state.scope, scope) {
                return;
            }
        }
        if self.is_bound() {
            self.unbind();
        }

        self.update_target(scope);

        let mut source_subscriptions = Vec::new();
        if self.mode != BindingMode::OneTime {
            let weak = Rc::downgrade(self);
            for root in self.source.roots() {
                let observer = self.locator.get_observer(scope, root);
                let weak = weak.clone();
                let id = observer.subscribe(Rc::new(move |_new, _old| {
                    if let Some(binding) = weak.upgrade() {
                        binding.on_source_changed();
                    }
                }));
                source_subscriptions.push((observer, id));
            }
        }

        let target_subscription = match (&self.mode, &self.target, &self.source) {
            (BindingMode::TwoWay, BindingTarget::BehaviorProperty { observer }, SourceExpression::Path(expr))
                if expr.is_assignable() =>
            {
                let weak = Rc::downgrade(self);
                let id = observer.subscribe(Rc::new(move |new, _old| {
                    if let Some(binding) = weak.upgrade() {
                        binding.on_target_changed(new.clone());
                    }
                }));
                Some((observer.clone(), id))
            }
            _ => None,
        };

        *self.state.borrow_mut() = Some(BoundState {
            scope: scope.clone(),
            source_subscriptions,
            target_subscription,
        });
    }

    pub fn unbind(&self) {
        if let Some(state) = self.state.borrow_mut().take() {
            for (observer, id) in state.source_subscriptions {
                observer.unsubscribe(id);
            }
            if let Some((observer, id)) = state.target_subscription {
                observer.unsubscribe(id);
            }
        }
    }

    fn on_source_changed(self: &Rc<Self>) {
        let scope = match self.state.borrow().as_ref() {
            Some(state) => state.scope.clone(),
            None => return,
        };
        self.update_target(&scope);
    }

    fn on_target_changed(self: &Rc<Self>, value: Value) {
        let scope = match self.state.borrow().as_ref() {
            Some(state) => state.scope.clone(),
            None => return,
        };
        if let SourceExpression::Path(expr) = &self.source {
            expr.assign(&scope, &self.resources, value);
            // The context observer diffs, so an echoed write settles without
            // looping.
            self.locator.get_observer(&scope, expr.root()).queue_notification();
        }
    }

    fn update_target(&self, scope: &BindingContext) {
        let value = self.source.evaluate(scope, &self.resources);
        match &self.target {
            BindingTarget::Attribute { node, name } => {
                dom::set_attribute(node, name, &value_to_string(&value));
            }
            BindingTarget::Text { node } => {
                dom::set_text(node, &value_to_string(&value));
            }
            BindingTarget::BehaviorProperty { observer } => {
                observer.set_value(value);
            }
        }
    }
}
