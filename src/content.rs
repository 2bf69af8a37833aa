//! Content distribution (light-DOM shadow-slot emulation).
//!
//! A composed view's projected children are partitioned across the consuming
//! view's content selectors: first matching selector wins, document order is
//! preserved within each selector, unmatched nodes are dropped. Each
//! projection is tracked as a node group so removing one projection leaves
//! the others' nodes untouched. A selector with zero projections renders its
//! fallback content as an owned view and tears it down the moment a real
//! projection arrives.

use crate::behavior::BindingContext;
use crate::container::Container;
use crate::dom;
use crate::factory::{CreateOptions, ViewFactory};
use crate::view::View;
use markup5ever_rcdom::Handle;
use std::rc::Rc;

/// True when `node` matches the limited light-DOM selector grammar:
/// `tag`, `.class`, `#id`, `[attr]`, `[attr=value]`, compounds thereof, and
/// comma-separated alternatives.
pub fn matches_selector(node: &Handle, selector: &str) -> bool {
    selector
        .split(',')
        .any(|part| matches_compound(node, part.trim()))
}

fn matches_compound(node: &Handle, selector: &str) -> bool {
    if !dom::is_element(node) {
        return false;
    }
    if selector.is_empty() || selector == "*" {
        return true;
    }

    let chars: Vec<char> = selector.chars().collect();
    let mut i = 0;

    // Leading tag name.
    if chars[0].is_ascii_alphabetic() {
        let start = i;
        while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '-') {
            i += 1;
        }
        let tag: String = chars[start..i].iter().collect();
        if dom::element_tag(node).as_deref() != Some(tag.to_lowercase().as_str()) {
            return false;
        }
    }

    while i < chars.len() {
        match chars[i] {
            '.' => {
                i += 1;
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '-' || chars[i] == '_') {
                    i += 1;
                }
                let class: String = chars[start..i].iter().collect();
                let has = dom::get_attribute(node, "class")
                    .map(|v| v.split_whitespace().any(|c| c == class))
                    .unwrap_or(false);
                if !has {
                    return false;
                }
            }
            '#' => {
                i += 1;
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '-' || chars[i] == '_') {
                    i += 1;
                }
                let id: String = chars[start..i].iter().collect();
                if dom::get_attribute(node, "id").as_deref() != Some(id.as_str()) {
                    return false;
                }
            }
            '[' => {
                let end = match chars[i..].iter().position(|&c| c == ']') {
                    Some(offset) => i + offset,
                    None => return false,
                };
                let body: String = chars[i + 1..end].iter().collect();
                let ok = match body.split_once('=') {
                    Some((name, value)) => {
                        let value = value.trim_matches(|c| c == '"' || c == '\'');
                        dom::get_attribute(node, name.trim()).as_deref() == Some(value)
                    }
                    None => dom::get_attribute(node, body.trim()).is_some(),
                };
                if !ok {
                    return false;
                }
                i = end + 1;
            }
            _ => return false,
        }
    }
    true
}

/// One projection's nodes within a selector.
pub struct ContentGroup {
    pub id: usize,
    pub nodes: Vec<Handle>,
}

pub struct ContentSelector {
    /// Projected nodes insert immediately before this anchor.
    anchor: Handle,
    /// None is the catch-all slot.
    selector: Option<String>,
    groups: Vec<ContentGroup>,
    fallback_factory: Option<Rc<ViewFactory>>,
    fallback_view: Option<View>,
    /// Pass-through targets: when a placeholder is itself projected into
    /// another slot-bearing view, its projections are redistributed across
    /// these copies of that view's slot list instead of its own anchor.
    nested: Vec<ContentSelector>,
}

impl ContentSelector {
    pub fn new(
        anchor: Handle,
        selector: Option<String>,
        fallback_factory: Option<Rc<ViewFactory>>,
    ) -> Self {
        ContentSelector {
            anchor,
            selector,
            groups: Vec::new(),
            fallback_factory,
            fallback_view: None,
            nested: Vec::new(),
        }
    }

    /// A copy of this slot for a nested slot-bearing view, so redistribution
    /// composes transitively: same anchor and filter, fresh projections.
    pub fn copy_for_nested(&self) -> Self {
        ContentSelector {
            anchor: self.anchor.clone(),
            selector: self.selector.clone(),
            groups: Vec::new(),
            fallback_factory: self.fallback_factory.clone(),
            fallback_view: None,
            nested: Vec::new(),
        }
    }

    /// Turn this slot into a pass-through over `selectors`.
    pub fn install_nested(&mut self, selectors: Vec<ContentSelector>) {
        self.nested = selectors;
    }

    pub fn is_pass_through(&self) -> bool {
        !self.nested.is_empty()
    }

    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }

    pub fn anchor(&self) -> &Handle {
        &self.anchor
    }

    pub fn has_projections(&self) -> bool {
        self.groups.iter().any(|g| !g.nodes.is_empty())
    }

    /// Whether this slot claims `node`. The catch-all takes any element or
    /// non-empty text; filtered slots take matching elements only.
    pub fn matches(&self, node: &Handle) -> bool {
        match &self.selector {
            Some(selector) => matches_selector(node, selector),
            None => {
                dom::is_element(node)
                    || dom::text_of(node)
                        .map(|t| !t.trim().is_empty())
                        .unwrap_or(false)
            }
        }
    }

    pub fn add_group(&mut self, id: usize, nodes: Vec<Handle>) {
        if self.is_pass_through() {
            for node in &nodes {
                match self.nested.iter().position(|s| s.matches(node)) {
                    Some(index) => {
                        let target = &self.nested[index];
                        if let Some(parent) = dom::parent_of(&target.anchor) {
                            dom::insert_before(&parent, node, &target.anchor);
                        }
                    }
                    None => dom::remove_from_parent(node),
                }
            }
            self.groups.push(ContentGroup { id, nodes });
            return;
        }
        for node in &nodes {
            if let Some(parent) = dom::parent_of(&self.anchor) {
                dom::insert_before(&parent, node, &self.anchor);
            }
        }
        self.groups.push(ContentGroup { id, nodes });
    }

    /// Insert a group before the group currently at `index`, keeping the
    /// DOM consistent with group order.
    pub fn insert_group(&mut self, index: usize, id: usize, nodes: Vec<Handle>) {
        if index >= self.groups.len() || self.is_pass_through() {
            self.add_group(id, nodes);
            return;
        }
        let reference = self.groups[index]
            .nodes
            .first()
            .cloned()
            .unwrap_or_else(|| self.anchor.clone());
        if let Some(parent) = dom::parent_of(&reference) {
            for node in &nodes {
                dom::insert_before(&parent, node, &reference);
            }
        }
        self.groups.insert(index, ContentGroup { id, nodes });
    }

    /// Detach and return one projection's nodes; other groups' nodes are
    /// untouched.
    pub fn remove_group(&mut self, id: usize) -> Vec<Handle> {
        let pos = match self.groups.iter().position(|g| g.id == id) {
            Some(pos) => pos,
            None => return Vec::new(),
        };
        let group = self.groups.remove(pos);
        for node in &group.nodes {
            dom::remove_from_parent(node);
        }
        group.nodes
    }

    /// Render or tear down fallback content to match the projection count.
    /// The fallback view and a live projection are never present together.
    /// Pass-through slots have a detached anchor and render no fallback of
    /// their own; the slots behind them keep theirs.
    ///
    /// A fallback created before a scope was available (the host factory
    /// instantiates its inner view unbound) is bound here once one arrives.
    pub fn update_fallback(&mut self, container: &Rc<Container>, scope: Option<&BindingContext>) {
        if self.is_pass_through() {
            return;
        }
        if self.has_projections() {
            if let Some(mut view) = self.fallback_view.take() {
                view.detached();
                view.unbind();
                view.remove_nodes();
            }
            return;
        }

        if let Some(view) = self.fallback_view.as_mut() {
            if let Some(scope) = scope {
                view.bind(scope, false);
            }
            return;
        }
        if let Some(factory) = self.fallback_factory.clone() {
            let options = CreateOptions {
                suppress_bind: scope.is_none(),
                system_controlled: true,
            };
            let view = factory.create(container, scope, options);
            view.insert_nodes_before(&self.anchor);
            self.fallback_view = Some(view);
        }
    }

    pub fn has_fallback_view(&self) -> bool {
        self.fallback_view.is_some()
    }

    /// The live fallback view, if one is rendered. The owning view forwards
    /// unbind/attach/detach through this; bind stays with `update_fallback`,
    /// which knows the consumer scope the fallback belongs to.
    pub fn fallback_view_mut(&mut self) -> Option<&mut View> {
        self.fallback_view.as_mut()
    }
}

/// Partition `nodes` (a source view's top-level children, in document order)
/// across `selectors`: first matching slot wins, unmatched nodes are
/// detached and dropped.
pub fn distribute(nodes: &[Handle], selectors: &mut [ContentSelector], group_id: usize) {
    let mut buckets: Vec<Vec<Handle>> = selectors.iter().map(|_| Vec::new()).collect();

    for node in nodes {
        match selectors.iter().position(|s| s.matches(node)) {
            Some(index) => buckets[index].push(node.clone()),
            None => dom::remove_from_parent(node),
        }
    }

    for (selector, nodes) in selectors.iter_mut().zip(buckets) {
        selector.add_group(group_id, nodes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element_with(tag: &str, attrs: &[(&str, &str)]) -> Handle {
        let el = dom::new_element(tag);
        for (name, value) in attrs {
            dom::set_attribute(&el, name, value);
        }
        el
    }

    #[test]
    fn test_matches_selector_grammar() {
        let el = element_with("div", &[("class", "card big"), ("id", "main"), ("data-slot", "x")]);
        assert!(matches_selector(&el, "div"));
        assert!(matches_selector(&el, ".card"));
        assert!(matches_selector(&el, ".big"));
        assert!(matches_selector(&el, "#main"));
        assert!(matches_selector(&el, "[data-slot]"));
        assert!(matches_selector(&el, "[data-slot=x]"));
        assert!(matches_selector(&el, "div.card#main"));
        assert!(matches_selector(&el, "span, div"));

        assert!(!matches_selector(&el, "span"));
        assert!(!matches_selector(&el, ".missing"));
        assert!(!matches_selector(&el, "[data-slot=y]"));
        assert!(!matches_selector(&dom::new_text("text"), "div"));
    }

    fn anchored_selector(host: &Handle, selector: Option<&str>) -> ContentSelector {
        let anchor = dom::new_comment("weft-content");
        dom::append(host, &anchor);
        ContentSelector::new(anchor, selector.map(str::to_string), None)
    }

    #[test]
    fn test_first_matching_slot_wins_in_order() {
        let host = dom::new_element("div");
        let named = anchored_selector(&host, Some("[data-slot=x]"));
        let default = anchored_selector(&host, None);
        let mut selectors = vec![named, default];

        let a = element_with("a", &[("data-slot", "x")]);
        let b = element_with("b", &[]);
        let c = element_with("c", &[("data-slot", "x")]);
        let source = dom::new_fragment();
        for node in [&a, &b, &c] {
            dom::append(&source, node);
        }

        distribute(&dom::child_nodes(&source), &mut selectors, 0);

        // Host order: a, c (named slot region), then b (default region).
        let tags: Vec<String> = dom::child_nodes(&host)
            .iter()
            .filter_map(dom::element_tag)
            .collect();
        assert_eq!(tags, vec!["a", "c", "b"]);
        assert!(selectors[0].has_projections());
        assert!(selectors[1].has_projections());
    }

    #[test]
    fn test_unmatched_nodes_are_dropped() {
        let host = dom::new_element("div");
        let mut selectors = vec![anchored_selector(&host, Some("[data-slot=x]"))];

        let source = dom::new_fragment();
        let stray = element_with("b", &[]);
        dom::append(&source, &stray);
        distribute(&dom::child_nodes(&source), &mut selectors, 0);

        assert!(dom::child_nodes(&host)
            .iter()
            .all(|n| dom::comment_text(n).is_some()));
        assert!(dom::parent_of(&stray).is_none());
    }

    #[test]
    fn test_remove_group_leaves_siblings() {
        let host = dom::new_element("div");
        let mut selector = anchored_selector(&host, None);

        let a = element_with("a", &[]);
        let b = element_with("b", &[]);
        selector.add_group(1, vec![a.clone()]);
        selector.add_group(2, vec![b.clone()]);
        assert_eq!(dom::child_nodes(&host).len(), 3);

        let removed = selector.remove_group(1);
        assert_eq!(removed.len(), 1);
        assert!(Rc::ptr_eq(&removed[0], &a));
        assert!(dom::parent_of(&b).is_some());
        assert!(selector.has_projections());
    }

    #[test]
    fn test_insert_group_keeps_document_order() {
        let host = dom::new_element("div");
        let mut selector = anchored_selector(&host, None);

        selector.add_group(1, vec![element_with("a", &[])]);
        selector.add_group(3, vec![element_with("c", &[])]);
        selector.insert_group(1, 2, vec![element_with("b", &[])]);

        let tags: Vec<String> = dom::child_nodes(&host)
            .iter()
            .filter_map(dom::element_tag)
            .collect();
        assert_eq!(tags, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_pass_through_routes_into_nested_slots() {
        let inner_host = dom::new_element("section");
        let named = anchored_selector(&inner_host, Some("[data-slot=x]"));
        let default = anchored_selector(&inner_host, None);

        // The forwarding slot's own anchor is detached; projections must
        // land at the nested anchors instead.
        let mut forwarding =
            ContentSelector::new(dom::new_comment("weft-content"), None, None);
        forwarding.install_nested(vec![named.copy_for_nested(), default.copy_for_nested()]);

        let a = element_with("a", &[("data-slot", "x")]);
        let b = element_with("b", &[]);
        forwarding.add_group(0, vec![a.clone(), b.clone()]);

        let tags: Vec<String> = dom::child_nodes(&inner_host)
            .iter()
            .filter_map(dom::element_tag)
            .collect();
        assert_eq!(tags, vec!["a", "b"]);
        assert!(forwarding.has_projections());

        let removed = forwarding.remove_group(0);
        assert_eq!(removed.len(), 2);
        assert!(dom::parent_of(&a).is_none());
        assert!(dom::parent_of(&b).is_none());
    }

    #[test]
    fn test_copy_for_nested_shares_anchor_only() {
        let host = dom::new_element("div");
        let mut selector = anchored_selector(&host, Some("em"));
        selector.add_group(1, vec![element_with("em", &[])]);

        let copy = selector.copy_for_nested();
        assert_eq!(copy.selector(), Some("em"));
        assert!(!copy.has_projections());
        assert!(Rc::ptr_eq(copy.anchor(), selector.anchor()));
    }
}
