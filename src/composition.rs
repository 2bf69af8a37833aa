//! Dynamic composition: render a view-model/view pair into a slot at
//! runtime, under a completion transaction.
//!
//! A transaction counts outstanding composition work. Participants enlist
//! before starting and signal their notifier when done; completion callbacks
//! run once the count returns to zero. Enlisting after completion is an
//! error, preventing a finished transaction from silently reopening.

use crate::behavior::BindingContext;
use crate::container::Container;
use crate::engine::{ViewEngine, ViewStrategy};
use crate::error::{Result, TemplatingError};
use crate::factory::CreateOptions;
use crate::registry::ViewResources;
use crate::slot::ViewSlot;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::debug;

pub struct CompositionTransaction {
    pending: Cell<usize>,
    completed: Cell<bool>,
    callbacks: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl CompositionTransaction {
    pub fn new() -> Rc<Self> {
        Rc::new(CompositionTransaction {
            pending: Cell::new(0),
            completed: Cell::new(false),
            callbacks: RefCell::new(Vec::new()),
        })
    }

    pub fn is_completed(&self) -> bool {
        self.completed.get()
    }

    pub fn enlist(self: &Rc<Self>) -> Result<TransactionNotifier> {
        if self.completed.get() {
            return Err(TemplatingError::TransactionCompleted);
        }
        self.pending.set(self.pending.get() + 1);
        Ok(TransactionNotifier {
            transaction: self.clone(),
            signaled: Cell::new(false),
        })
    }

    /// Run `callback` when all enlisted work has signaled; immediately if
    /// nothing is outstanding.
    pub fn wait_for_completion(&self, callback: impl FnOnce() + 'static) {
        if self.pending.get() == 0 {
            callback();
            return;
        }
        self.callbacks.borrow_mut().push(Box::new(callback));
    }

    fn signal(&self) {
        let remaining = self.pending.get().saturating_sub(1);
        self.pending.set(remaining);
        if remaining == 0 {
            self.completed.set(true);
            let callbacks = std::mem::take(&mut *self.callbacks.borrow_mut());
            for callback in callbacks {
                callback();
            }
        }
    }
}

/// Hands one enlisted participant's completion signal back to its
/// transaction. Signaling twice is a no-op, and a notifier dropped without
/// an explicit `done` (a participant bailing on an error) signals on drop,
/// so a failed composition cannot strand the transaction's pending count.
pub struct TransactionNotifier {
    transaction: Rc<CompositionTransaction>,
    signaled: Cell<bool>,
}

impl TransactionNotifier {
    pub fn done(&self) {
        if !self.signaled.replace(true) {
            self.transaction.signal();
        }
    }
}

impl Drop for TransactionNotifier {
    fn drop(&mut self) {
        self.done();
    }
}

/// Everything one composition needs: the data, the view source, and where
/// the result lands.
pub struct CompositionContext {
    /// Context the composed view binds against.
    pub view_model: Option<BindingContext>,
    /// Explicit view source; None falls back to the view-model's default
    /// view url.
    pub view: Option<ViewStrategy>,
    /// Default view url consulted when no explicit strategy is given.
    pub default_view_url: Option<String>,
    pub container: Rc<Container>,
    pub resources: Rc<ViewResources>,
    pub slot: Rc<RefCell<ViewSlot>>,
    pub transaction: Option<Rc<CompositionTransaction>>,
}

pub struct CompositionEngine {
    engine: Rc<ViewEngine>,
}

impl CompositionEngine {
    pub fn new(engine: Rc<ViewEngine>) -> Self {
        CompositionEngine { engine }
    }

    /// Compose into the slot: resolve the view strategy, instantiate, bind
    /// against the view-model, and swap out whatever the slot held before.
    pub fn compose(&self, context: CompositionContext) -> Result<()> {
        let notifier = match &context.transaction {
            Some(transaction) => Some(transaction.enlist()?),
            None => None,
        };

        let strategy = context
            .view
            .clone()
            .or_else(|| context.default_view_url.clone().map(ViewStrategy::RelativeUrl))
            .ok_or(TemplatingError::MissingViewStrategy)?;

        let factory = strategy.load_view_factory(&self.engine)?;
        let view = factory.create(
            &context.container,
            context.view_model.as_ref(),
            CreateOptions::default(),
        );

        debug!("composing view into slot");
        let mut slot = context.slot.borrow_mut();
        slot.remove_all();
        slot.add(view);
        drop(slot);

        if let Some(notifier) = notifier {
            notifier.done();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::DataModel;
    use crate::binding::{ObserverLocator, TaskQueue};
    use crate::dom;
    use crate::engine::InMemoryLoader;
    use markup5ever_rcdom::Handle;
    use serde_json::json;

    fn make_engine(templates: &[(&str, &str)]) -> Rc<ViewEngine> {
        let loader = InMemoryLoader::new();
        for (id, markup) in templates {
            loader.register_template(id, markup);
        }
        Rc::new(ViewEngine::new(Rc::new(loader)))
    }

    fn make_context(
        engine: &Rc<ViewEngine>,
        view: Option<ViewStrategy>,
        transaction: Option<Rc<CompositionTransaction>>,
    ) -> (CompositionContext, Handle) {
        let host = dom::new_element("div");
        let container = Container::new_root(ObserverLocator::new(TaskQueue::new()));
        let context = CompositionContext {
            view_model: Some(DataModel::context(json!({ "name": "weft" }))),
            view,
            default_view_url: None,
            container,
            resources: engine.resources().clone(),
            slot: Rc::new(RefCell::new(ViewSlot::new(host.clone()))),
            transaction,
        };
        (context, host)
    }

    #[test]
    fn test_compose_renders_bound_view_into_slot() {
        let engine = make_engine(&[("greeting.html", "<p>Hi ${name}</p>")]);
        let composer = CompositionEngine::new(engine.clone());
        let (context, host) = make_context(
            &engine,
            Some(ViewStrategy::RelativeUrl("greeting.html".to_string())),
            None,
        );

        composer.compose(context).unwrap();
        assert_eq!(dom::serialize_children(&host), "<p>Hi weft</p>");
    }

    #[test]
    fn test_compose_replaces_previous_content() {
        let engine = make_engine(&[
            ("a.html", "<p>A</p>"),
            ("b.html", "<p>B</p>"),
        ]);
        let composer = CompositionEngine::new(engine.clone());

        let (context, host) = make_context(
            &engine,
            Some(ViewStrategy::RelativeUrl("a.html".to_string())),
            None,
        );
        let slot = context.slot.clone();
        let container = context.container.clone();
        composer.compose(context).unwrap();

        let second = CompositionContext {
            view_model: Some(DataModel::context(json!({}))),
            view: Some(ViewStrategy::RelativeUrl("b.html".to_string())),
            default_view_url: None,
            container,
            resources: engine.resources().clone(),
            slot,
            transaction: None,
        };
        composer.compose(second).unwrap();
        assert_eq!(dom::serialize_children(&host), "<p>B</p>");
    }

    #[test]
    fn test_missing_strategy_is_an_error() {
        let engine = make_engine(&[]);
        let composer = CompositionEngine::new(engine.clone());
        let (mut context, _host) = make_context(&engine, None, None);
        context.view_model = Some(DataModel::context(json!({})));

        assert!(matches!(
            composer.compose(context),
            Err(TemplatingError::MissingViewStrategy)
        ));
    }

    #[test]
    fn test_transaction_completion_ordering() {
        let transaction = CompositionTransaction::new();
        let first = transaction.enlist().unwrap();
        let second = transaction.enlist().unwrap();

        let completed = Rc::new(Cell::new(false));
        let flag = completed.clone();
        transaction.wait_for_completion(move || flag.set(true));

        first.done();
        assert!(!completed.get());
        second.done();
        second.done();
        assert!(completed.get());
        assert!(transaction.enlist().is_err());
    }

    #[test]
    fn test_wait_on_idle_transaction_fires_immediately() {
        let transaction = CompositionTransaction::new();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        transaction.wait_for_completion(move || flag.set(true));
        assert!(fired.get());
    }

    #[test]
    fn test_failed_composition_still_signals_transaction() {
        let engine = make_engine(&[]);
        let composer = CompositionEngine::new(engine.clone());
        let transaction = CompositionTransaction::new();
        let (context, _host) = make_context(
            &engine,
            Some(ViewStrategy::RelativeUrl("missing.html".to_string())),
            Some(transaction.clone()),
        );

        let guard = transaction.enlist().unwrap();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        transaction.wait_for_completion(move || flag.set(true));

        // The failed composition must release its own enlistment, leaving
        // only the guard outstanding.
        assert!(composer.compose(context).is_err());
        assert!(!fired.get());
        guard.done();
        assert!(fired.get());
        assert!(transaction.is_completed());
    }

    #[test]
    fn test_compose_with_inline_template_and_transaction() {
        let engine = make_engine(&[]);
        let composer = CompositionEngine::new(engine.clone());
        let transaction = CompositionTransaction::new();
        let (context, host) = make_context(
            &engine,
            Some(ViewStrategy::InlineTemplate("<b>${name}</b>".to_string())),
            Some(transaction.clone()),
        );

        composer.compose(context).unwrap();
        assert!(transaction.is_completed());
        assert_eq!(dom::serialize_children(&host), "<b>weft</b>");
    }
}
