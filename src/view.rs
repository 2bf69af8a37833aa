//! Instantiated views.
//!
//! A `View` is a tree of live DOM nodes plus everything realized within it:
//! bindings, behavior controllers, child views, and content selectors. It
//! implements the aggregate lifecycle over those collections and the node
//! insertion/removal operations that move the view between its private
//! fragment and the live tree.
//!
//! Lifecycle ordering is fixed and mirror-symmetric: bind runs bindings,
//! then controllers, then child views; unbind unwinds child views, then
//! controllers, then bindings, each in reverse order. A behavior's own
//! bindings are therefore consistent before any descendant view observes it.

use crate::behavior::{same_context, BindingContext};
use crate::binding::Binding;
use crate::content::ContentSelector;
use crate::controller::{Controller, ControllerRef};
use crate::dom;
use crate::slot::ViewSlot;
use markup5ever_rcdom::Handle;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub struct View {
    pub(crate) fragment: Handle,
    pub(crate) nodes: Vec<Handle>,
    pub(crate) bindings: Vec<Rc<Binding>>,
    pub(crate) controllers: Vec<ControllerRef>,
    pub(crate) children: Vec<View>,
    pub(crate) content_selectors: Vec<ContentSelector>,
    /// Non-owning back-reference for lifecycle delegation when this view has
    /// no standalone container element (composed views).
    pub(crate) anchored_slots: Vec<Rc<RefCell<ViewSlot>>>,
    pub(crate) owner: Option<Weak<RefCell<Controller>>>,
    pub(crate) binding_context: Option<BindingContext>,
    pub(crate) system_controlled: bool,
    pub(crate) is_bound: bool,
    pub(crate) is_attached: bool,
}

impl View {
    pub fn new(fragment: Handle) -> Self {
        let nodes = dom::child_nodes(&fragment);
        View {
            fragment,
            nodes,
            bindings: Vec::new(),
            controllers: Vec::new(),
            children: Vec::new(),
            content_selectors: Vec::new(),
            anchored_slots: Vec::new(),
            owner: None,
            binding_context: None,
            system_controlled: false,
            is_bound: false,
            is_attached: false,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.is_bound
    }

    pub fn is_attached(&self) -> bool {
        self.is_attached
    }

    pub fn binding_context(&self) -> Option<&BindingContext> {
        self.binding_context.as_ref()
    }

    pub fn nodes(&self) -> &[Handle] {
        &self.nodes
    }

    pub fn controllers(&self) -> &[ControllerRef] {
        &self.controllers
    }

    pub fn set_owner(&mut self, owner: Weak<RefCell<Controller>>) {
        self.owner = Some(owner);
    }

    pub fn add_child_view(&mut self, child: View) {
        self.children.push(child);
    }

    pub fn content_selectors_mut(&mut self) -> &mut Vec<ContentSelector> {
        &mut self.content_selectors
    }

    /// Bind against `context`. `from_parent` marks context propagation from
    /// an enclosing view: a view not controlled by the binding system keeps
    /// the context it was explicitly bound to instead of being re-pointed.
    pub fn bind(&mut self, context: &BindingContext, from_parent: bool) {
        let context = if from_parent && !self.system_controlled {
            match &self.binding_context {
                Some(own) => own.clone(),
                None => context.clone(),
            }
        } else {
            context.clone()
        };

        if self.is_bound {
            if same_context(self.binding_context.as_ref().unwrap(), &context) {
                return;
            }
            self.unbind();
        }

        self.is_bound = true;
        self.binding_context = Some(context.clone());

        for binding in &self.bindings {
            binding.bind(&context);
        }
        for controller in &self.controllers {
            controller.borrow_mut().bind(&context);
        }
        for child in &mut self.children {
            child.bind(&context, true);
        }
    }

    pub fn unbind(&mut self) {
        if !self.is_bound {
            return;
        }
        self.is_bound = false;
        self.binding_context = None;

        for selector in self.content_selectors.iter_mut().rev() {
            if let Some(fallback) = selector.fallback_view_mut() {
                fallback.unbind();
            }
        }
        for child in self.children.iter_mut().rev() {
            child.unbind();
        }
        for controller in self.controllers.iter().rev() {
            controller.borrow_mut().unbind();
        }
        for binding in self.bindings.iter().rev() {
            binding.unbind();
        }
    }

    pub fn attached(&mut self) {
        if self.is_attached {
            return;
        }
        self.is_attached = true;

        // Owner delegation may re-enter this view through the controller's
        // own child-view forwarding; the flag above makes that a no-op, and
        // an owner already mid-notification is skipped.
        if let Some(owner) = self.owner.as_ref().and_then(Weak::upgrade) {
            if let Ok(mut controller) = owner.try_borrow_mut() {
                controller.attached();
            }
        }
        for controller in &self.controllers {
            controller.borrow_mut().attached();
        }
        for child in &mut self.children {
            child.attached();
        }
        for selector in &mut self.content_selectors {
            if let Some(fallback) = selector.fallback_view_mut() {
                fallback.attached();
            }
        }
    }

    pub fn detached(&mut self) {
        if !self.is_attached {
            return;
        }
        self.is_attached = false;

        for selector in self.content_selectors.iter_mut().rev() {
            if let Some(fallback) = selector.fallback_view_mut() {
                fallback.detached();
            }
        }
        for child in self.children.iter_mut().rev() {
            child.detached();
        }
        for controller in self.controllers.iter().rev() {
            controller.borrow_mut().detached();
        }
        if let Some(owner) = self.owner.as_ref().and_then(Weak::upgrade) {
            if let Ok(mut controller) = owner.try_borrow_mut() {
                controller.detached();
            }
        }
    }

    /// Move the view's top-level nodes to the end of `parent`.
    ///
    /// Ownership caution: rcdom parents own their children, and dropping the
    /// last handle to `parent` drains its whole subtree. A view placed in a
    /// transient holder must be pulled back out with [`View::remove_nodes`]
    /// before the holder is dropped, or its content is destroyed with it.
    pub fn append_nodes_to(&self, parent: &Handle) {
        for node in &self.nodes {
            dom::append(parent, node);
        }
        self.restore_anchored_content();
    }

    /// Move the view's top-level nodes into `reference`'s parent, directly
    /// before `reference`.
    pub fn insert_nodes_before(&self, reference: &Handle) {
        if let Some(parent) = dom::parent_of(reference) {
            for node in &self.nodes {
                dom::insert_before(&parent, node, reference);
            }
        }
        self.restore_anchored_content();
    }

    /// Return the view's top-level nodes to its private fragment.
    pub fn remove_nodes(&self) {
        for node in &self.nodes {
            dom::append(&self.fragment, node);
        }
        self.restore_anchored_content();
    }

    /// Content stamped at an anchor comment (template-controller views) is a
    /// sibling of the anchor, not a snapshot node, so it does not travel
    /// when the snapshot moves. Re-anchoring after every move keeps stamped
    /// content with its placeholder; nested controllers restore recursively
    /// through their own views' moves.
    fn restore_anchored_content(&self) {
        for slot in &self.anchored_slots {
            slot.borrow().restore_placement();
        }
    }
}
