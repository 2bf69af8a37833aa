//! Error taxonomy.
//!
//! Configuration and load failures are recoverable-by-fixing-the-declaration
//! errors and surface as `TemplatingError`. Broken compiler/factory
//! invariants (for example an instruction index with no matching target node)
//! are programming errors and panic at the violation site instead of flowing
//! through this type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplatingError {
    /// A resource name is already mapped to a different descriptor.
    #[error("resource '{name}' is already registered with a different descriptor")]
    DuplicateResource { name: String },

    /// More than one template-controller attribute on a single element.
    /// Controller stacking is expressed by nesting templates, not by
    /// stacking attributes.
    #[error("element <{tag}> carries multiple template controllers: '{first}' and '{second}'")]
    MultipleTemplateControllers {
        tag: String,
        first: String,
        second: String,
    },

    /// Composition was asked to render without any way to obtain a view.
    #[error("no view strategy available: composition requires an explicit view or a view-model with a default view")]
    MissingViewStrategy,

    /// A composition transaction was enlisted after it already completed.
    #[error("composition transaction already completed; late enlistment is not valid")]
    TransactionCompleted,

    #[error("failed to parse template '{url}': {reason}")]
    Parse { url: String, reason: String },

    #[error("loader failed for '{id}': {reason}")]
    Load { id: String, reason: String },

    #[error("unknown resource module '{0}'")]
    UnknownModule(String),
}

pub type Result<T> = std::result::Result<T, TemplatingError>;
