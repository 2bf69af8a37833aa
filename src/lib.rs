//! # weft
//!
//! A view templating and data-binding engine over an in-memory HTML DOM.
//!
//! Templates compile once into view factories: the compiler walks the parsed
//! fragment, stamps every node needing runtime action with an explicit index,
//! and emits one instruction per stamped node. Factories then instantiate
//! views by cloning the annotated template and resolving instructions
//! against an index-addressed target table, so every instantiation lands its
//! bindings and behaviors on the structurally same nodes.
//!
//! ## Pipeline invariants
//!
//! 1. **Explicit targets**: compile-time analysis and runtime instantiation
//!    agree on node identity through stamped indices, never query order.
//!    A factory whose markers disagree with its instructions panics.
//!
//! 2. **Frozen descriptors**: a behavior's metadata, including its
//!    capability flags, is computed once at registration and immutable
//!    afterwards. Lifecycle hooks fire only where capabilities say so.
//!
//! 3. **Lifecycle symmetry**: bind applies bindings, then controllers, then
//!    child views; unbind unwinds the exact mirror in reverse. Attach and
//!    detach are idempotent at every level.
//!
//! 4. **One template controller per element**: stacking is expressed by
//!    nesting templates; two controller attributes on one element is a
//!    compile error.
//!
//! 5. **Cooperative change flow**: observers queue notifications on a task
//!    queue and deliver on flush, diffing values so two-way echoes settle
//!    instead of looping.

mod behavior;
mod binding;
mod compiler;
mod composition;
mod container;
mod content;
mod controller;
mod dom;
mod engine;
mod error;
mod factory;
mod instruction;
mod registry;
mod slot;
mod view;

#[cfg(test)]
mod scenario_tests;

pub use behavior::{
    same_context, BehaviorDescriptor, BehaviorKind, BindableProperty, BindingContext,
    Capabilities, ChildDescriptor, DataModel, DescriptorBuilder, ViewModel, ViewModelFactory,
};
pub use binding::{
    AttributeExpression, BehaviorPropertyObserver, Binding, BindingLanguage, BindingMode,
    BindingTarget, ContextPropertyObserver, DefaultBindingLanguage, Expression, Interpolation,
    ObserverLocator, SourceExpression, Task, TaskQueue, TextPart,
};
pub use compiler::{CompileOptions, ViewCompiler};
pub use composition::{
    CompositionContext, CompositionEngine, CompositionTransaction, TransactionNotifier,
};
pub use container::Container;
pub use content::{distribute, matches_selector, ContentGroup, ContentSelector};
pub use controller::{ChildSynchronizer, Controller, ControllerRef};
pub use dom::{parse_fragment_str, serialize_children};
pub use engine::{
    compute_hash, DirectoryLoader, InMemoryLoader, Loader, ResourceModule, ViewEngine,
    ViewStrategy,
};
pub use error::{Result, TemplatingError};
pub use factory::{BoundViewFactory, CreateOptions, ViewFactory};
pub use instruction::{
    BehaviorRequest, BindingRequest, InjectorLink, InstructionKind, PropertyAssignment,
    TargetInstruction,
};
pub use registry::{ValueConverter, ViewResources};
pub use slot::ViewSlot;
pub use view::View;
