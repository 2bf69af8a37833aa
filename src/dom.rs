//! Live DOM substrate.
//!
//! Templates are parsed with html5ever into `RcDom` handles and those same
//! handles back the instantiated views: `Rc<Node>` with `RefCell` children is
//! a single-threaded, interior-mutable tree, which is exactly the execution
//! model the engine runs under. Everything here is a thin structural helper
//! over `markup5ever_rcdom`; no templating semantics live in this module.

use html5ever::serialize::{serialize, SerializeOpts, TraversalScope};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{local_name, namespace_url, ns, parse_fragment, Attribute, LocalName, ParseOpts, QualName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};
use std::cell::RefCell;
use std::rc::Rc;

/// Parse an HTML fragment into a detached fragment root (a `Document` node
/// whose children are the parsed top-level nodes).
pub fn parse_fragment_str(html: &str) -> Handle {
    let context = QualName::new(None, ns!(html), local_name!("body"));
    let dom: RcDom = parse_fragment(RcDom::default(), ParseOpts::default(), context, Vec::new())
        .one(StrTendril::from(html));

    // Fragment parses come back wrapped in a synthetic <html> root; lift its
    // children out into a plain fragment node.
    let fragment = new_fragment();
    let roots = child_nodes(&dom.document);
    for root in roots {
        for child in detach_children(&root) {
            append(&fragment, &child);
        }
    }
    fragment
}

/// A detached container node used as view/template fragment root.
pub fn new_fragment() -> Handle {
    Node::new(NodeData::Document)
}

pub fn new_element(tag: &str) -> Handle {
    Node::new(NodeData::Element {
        name: QualName::new(None, ns!(html), LocalName::from(tag)),
        attrs: RefCell::new(Vec::new()),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    })
}

pub fn new_text(text: &str) -> Handle {
    Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from(text)),
    })
}

pub fn new_comment(text: &str) -> Handle {
    Node::new(NodeData::Comment {
        contents: StrTendril::from(text),
    })
}

pub fn is_element(node: &Handle) -> bool {
    matches!(node.data, NodeData::Element { .. })
}

pub fn is_text(node: &Handle) -> bool {
    matches!(node.data, NodeData::Text { .. })
}

/// Lowercased local tag name, or None for non-elements.
pub fn element_tag(node: &Handle) -> Option<String> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.to_string().to_lowercase()),
        _ => None,
    }
}

pub fn comment_text(node: &Handle) -> Option<String> {
    match &node.data {
        NodeData::Comment { contents } => Some(contents.to_string()),
        _ => None,
    }
}

pub fn text_of(node: &Handle) -> Option<String> {
    match &node.data {
        NodeData::Text { contents } => Some(contents.borrow().to_string()),
        _ => None,
    }
}

pub fn set_text(node: &Handle, value: &str) {
    if let NodeData::Text { contents } = &node.data {
        *contents.borrow_mut() = StrTendril::from(value);
    }
}

pub fn get_attribute(node: &Handle, name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|a| a.name.local.as_ref() == name)
            .map(|a| a.value.to_string()),
        _ => None,
    }
}

pub fn set_attribute(node: &Handle, name: &str, value: &str) {
    if let NodeData::Element { attrs, .. } = &node.data {
        let mut attrs = attrs.borrow_mut();
        if let Some(existing) = attrs.iter_mut().find(|a| a.name.local.as_ref() == name) {
            existing.value = StrTendril::from(value);
        } else {
            attrs.push(Attribute {
                name: QualName::new(None, ns!(), LocalName::from(name)),
                value: StrTendril::from(value),
            });
        }
    }
}

pub fn remove_attribute(node: &Handle, name: &str) -> Option<String> {
    if let NodeData::Element { attrs, .. } = &node.data {
        let mut attrs = attrs.borrow_mut();
        if let Some(pos) = attrs.iter().position(|a| a.name.local.as_ref() == name) {
            return Some(attrs.remove(pos).value.to_string());
        }
    }
    None
}

/// Attribute `(name, value)` pairs in declaration order.
pub fn attribute_list(node: &Handle) -> Vec<(String, String)> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .map(|a| (a.name.local.to_string(), a.value.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}

/// The inert content fragment of a `<template>` element.
pub fn template_contents(node: &Handle) -> Option<Handle> {
    match &node.data {
        NodeData::Element {
            template_contents, ..
        } => template_contents.borrow().clone(),
        _ => None,
    }
}

pub fn child_nodes(node: &Handle) -> Vec<Handle> {
    node.children.borrow().clone()
}

pub fn parent_of(node: &Handle) -> Option<Handle> {
    let weak = node.parent.take();
    let parent = weak.as_ref().and_then(|w| w.upgrade());
    node.parent.set(weak);
    parent
}

pub fn append(parent: &Handle, child: &Handle) {
    remove_from_parent(child);
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(child.clone());
}

/// Insert `node` into `parent` immediately before `reference`.
/// Falls back to append when `reference` is not a child of `parent`.
pub fn insert_before(parent: &Handle, node: &Handle, reference: &Handle) {
    remove_from_parent(node);
    let pos = parent
        .children
        .borrow()
        .iter()
        .position(|c| Rc::ptr_eq(c, reference));
    node.parent.set(Some(Rc::downgrade(parent)));
    match pos {
        Some(i) => parent.children.borrow_mut().insert(i, node.clone()),
        None => parent.children.borrow_mut().push(node.clone()),
    }
}

pub fn remove_from_parent(node: &Handle) {
    if let Some(parent) = parent_of(node) {
        parent
            .children
            .borrow_mut()
            .retain(|c| !Rc::ptr_eq(c, node));
    }
    node.parent.set(None);
}

/// Swap `new` into `old`'s tree position; `old` becomes detached.
pub fn replace_node(old: &Handle, new: &Handle) {
    if let Some(parent) = parent_of(old) {
        insert_before(&parent, new, old);
        remove_from_parent(old);
    }
}

/// Remove and return all children, preserving order.
pub fn detach_children(node: &Handle) -> Vec<Handle> {
    let children: Vec<Handle> = node.children.borrow_mut().drain(..).collect();
    for child in &children {
        child.parent.set(None);
    }
    children
}

/// Structure-sharing-free copy of a subtree. Cloned `<template>` contents are
/// cloned as well, so no instance ever aliases the compiled template's DOM.
pub fn deep_clone(node: &Handle) -> Handle {
    let copy = match &node.data {
        NodeData::Document => Node::new(NodeData::Document),
        NodeData::Doctype {
            name,
            public_id,
            system_id,
        } => Node::new(NodeData::Doctype {
            name: name.clone(),
            public_id: public_id.clone(),
            system_id: system_id.clone(),
        }),
        NodeData::Text { contents } => Node::new(NodeData::Text {
            contents: RefCell::new(contents.borrow().clone()),
        }),
        NodeData::Comment { contents } => Node::new(NodeData::Comment {
            contents: contents.clone(),
        }),
        NodeData::Element {
            name,
            attrs,
            template_contents,
            mathml_annotation_xml_integration_point,
        } => Node::new(NodeData::Element {
            name: name.clone(),
            attrs: RefCell::new(attrs.borrow().clone()),
            template_contents: RefCell::new(
                template_contents.borrow().as_ref().map(deep_clone),
            ),
            mathml_annotation_xml_integration_point: *mathml_annotation_xml_integration_point,
        }),
        NodeData::ProcessingInstruction { target, contents } => {
            Node::new(NodeData::ProcessingInstruction {
                target: target.clone(),
                contents: contents.clone(),
            })
        }
    };

    for child in node.children.borrow().iter() {
        append(&copy, &deep_clone(child));
    }
    copy
}

/// Serialize a node's children back to HTML (markup of the subtree content).
pub fn serialize_children(node: &Handle) -> String {
    let mut buf = Vec::new();
    let serializable: SerializableHandle = node.clone().into();
    let opts = SerializeOpts {
        traversal_scope: TraversalScope::ChildrenOnly(None),
        ..Default::default()
    };
    match serialize(&mut buf, &serializable, opts) {
        Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
        Err(_) => String::new(),
    }
}
