//! Compiler output records.
//!
//! One `TargetInstruction` per template node needing runtime action. Each
//! carries the explicit integer index of its target node; instantiation
//! resolves nodes through an index-addressed table built from the cloned
//! fragment, so compile-time analysis and runtime instantiation agree on
//! node identity structurally rather than by query order.

use crate::behavior::BehaviorDescriptor;
use crate::binding::{BindingMode, Interpolation, SourceExpression};
use serde_json::Value;
use std::rc::Rc;

use crate::factory::ViewFactory;

/// Attribute stamped on target elements, holding the instruction index.
pub const TARGET_ATTR: &str = "weft-target";

/// Prefix of marker comments standing in for non-element targets
/// (text interpolations and lifted elements), e.g. `<!--weft:3-->`.
pub const MARKER_PREFIX: &str = "weft:";

/// Reserved tag for content-projection insertion points.
pub const CONTENT_TAG: &str = "weft-content";

pub struct TargetInstruction {
    pub index: usize,
    pub kind: InstructionKind,
}

pub enum InstructionKind {
    /// Text interpolation: the target is a marker comment replaced at
    /// instantiation by a bound text node.
    ContentExpression(Interpolation),

    /// A content-projection insertion point, with an optional `select`
    /// filter and compiled default content rendered while no projection
    /// claims the slot.
    ContentSelector {
        selector: Option<String>,
        fallback: Option<Rc<ViewFactory>>,
    },

    /// A template controller lifted this element: the target is a
    /// placeholder comment anchoring the controller's view slot.
    Lifted {
        controller: BehaviorRequest,
        factory: Rc<ViewFactory>,
    },

    /// An element carrying behaviors and/or plain bindings.
    Element {
        injector: Option<InjectorLink>,
        element: Option<BehaviorRequest>,
        attribute_behaviors: Vec<BehaviorRequest>,
        bindings: Vec<BindingRequest>,
        /// Compiled contents of a plain nested `<template>` element, made
        /// available to behaviors on this element as a bound view factory.
        template: Option<Rc<ViewFactory>>,
    },
}

/// Scoped-container linkage: nested behavior-bearing elements share the
/// container of their nearest behavior-bearing ancestor.
#[derive(Debug, Clone, Copy)]
pub struct InjectorLink {
    pub injector_id: usize,
    pub parent_injector_id: Option<usize>,
}

/// Attach one behavior with its per-instance attribute values.
pub struct BehaviorRequest {
    pub descriptor: Rc<BehaviorDescriptor>,
    pub assignments: Vec<PropertyAssignment>,
}

pub enum PropertyAssignment {
    /// A literal attribute value assigned once at create time.
    Literal { property: String, value: Value },
    /// A live sub-binding; `mode` of None defers to the property's default.
    Expression {
        property: String,
        source: SourceExpression,
        mode: Option<BindingMode>,
    },
}

/// A plain DOM binding on an element (attribute expression with no behavior
/// involved).
pub struct BindingRequest {
    pub attribute: String,
    pub source: SourceExpression,
    pub mode: BindingMode,
}
