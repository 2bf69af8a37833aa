//! View slots: anchored insertion points for whole views.
//!
//! A slot either fills an element (views append to its end) or sits at an
//! anchor comment (views insert directly before it). The latter is how
//! template-controller views land where their lifted element used to be.
//! The slot owns the views it holds and forwards lifecycle to them.
//!
//! Structural mutations notify registered child synchronizers; this is the
//! explicit index maintenance that replaces a separate mutation-observation
//! subsystem.

use crate::behavior::BindingContext;
use crate::controller::ChildSynchronizer;
use crate::dom;
use crate::view::View;
use markup5ever_rcdom::Handle;
use std::rc::Rc;

enum SlotAnchor {
    /// Views fill this element.
    Element(Handle),
    /// Views insert before this (comment) node.
    Before(Handle),
}

pub struct ViewSlot {
    anchor: SlotAnchor,
    children: Vec<View>,
    is_attached: bool,
    binding_context: Option<BindingContext>,
    child_hooks: Vec<Rc<ChildSynchronizer>>,
}

impl ViewSlot {
    pub fn new(element: Handle) -> Self {
        ViewSlot {
            anchor: SlotAnchor::Element(element),
            children: Vec::new(),
            is_attached: false,
            binding_context: None,
            child_hooks: Vec::new(),
        }
    }

    pub fn new_anchored(anchor: Handle) -> Self {
        ViewSlot {
            anchor: SlotAnchor::Before(anchor),
            children: Vec::new(),
            is_attached: false,
            binding_context: None,
            child_hooks: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_attached(&self) -> bool {
        self.is_attached
    }

    pub fn add_child_hook(&mut self, hook: Rc<ChildSynchronizer>) {
        self.child_hooks.push(hook);
    }

    fn place_nodes(&self, view: &View, before_view: Option<&View>) {
        match (&self.anchor, before_view) {
            (SlotAnchor::Element(element), None) => view.append_nodes_to(element),
            (SlotAnchor::Element(_), Some(next)) => {
                if let Some(first) = next.nodes().first() {
                    view.insert_nodes_before(first);
                }
            }
            (SlotAnchor::Before(anchor), None) => view.insert_nodes_before(anchor),
            (SlotAnchor::Before(_), Some(next)) => {
                if let Some(first) = next.nodes().first() {
                    view.insert_nodes_before(first);
                }
            }
        }
    }

    /// Re-insert every held view at the anchor, in order. Called after the
    /// owning view's snapshot nodes move, which carries the anchor comment
    /// but not the stamped siblings that preceded it.
    pub fn restore_placement(&self) {
        if let SlotAnchor::Before(anchor) = &self.anchor {
            for view in &self.children {
                view.insert_nodes_before(anchor);
            }
        }
    }

    fn notify_structure_changed(&self) {
        for hook in &self.child_hooks {
            hook.sync();
        }
    }

    pub fn add(&mut self, mut view: View) {
        self.place_nodes(&view, None);
        if self.is_attached {
            view.attached();
        }
        self.children.push(view);
        self.notify_structure_changed();
    }

    pub fn insert(&mut self, index: usize, mut view: View) {
        if index >= self.children.len() {
            self.add(view);
            return;
        }
        self.place_nodes(&view, Some(&self.children[index]));
        if self.is_attached {
            view.attached();
        }
        self.children.insert(index, view);
        self.notify_structure_changed();
    }

    /// Detach and return the view at `index`; its nodes go back to its
    /// private fragment.
    pub fn remove_at(&mut self, index: usize) -> View {
        let mut view = self.children.remove(index);
        if self.is_attached {
            view.detached();
        }
        view.remove_nodes();
        self.notify_structure_changed();
        view
    }

    pub fn remove_all(&mut self) -> Vec<View> {
        let mut removed: Vec<View> = self.children.drain(..).collect();
        for view in removed.iter_mut() {
            if self.is_attached {
                view.detached();
            }
            view.remove_nodes();
        }
        self.notify_structure_changed();
        removed
    }

    pub fn bind(&mut self, context: &BindingContext) {
        self.binding_context = Some(context.clone());
        for view in &mut self.children {
            view.bind(context, true);
        }
    }

    pub fn unbind(&mut self) {
        self.binding_context = None;
        for view in self.children.iter_mut().rev() {
            view.unbind();
        }
    }

    pub fn attached(&mut self) {
        if self.is_attached {
            return;
        }
        self.is_attached = true;
        for view in &mut self.children {
            view.attached();
        }
    }

    pub fn detached(&mut self) {
        if !self.is_attached {
            return;
        }
        self.is_attached = false;
        for view in self.children.iter_mut().rev() {
            view.detached();
        }
    }
}
