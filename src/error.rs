//! Error taxonomy for schema synchronization and form interpretation.
//!
//! Every variant here is recoverable at its point of origin: sync falls back
//! to cache, materialization falls back to remote URLs, calculations fall
//! back to an indeterminate value. Nothing propagates as a panic.

use thiserror::Error;

/// Failure acquiring or persisting a schema document.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Network/HTTP/parse failure fetching the schema document.
    #[error("schema fetch failed: {0}")]
    Fetch(String),
    /// Fetched document is missing required fields or otherwise malformed.
    /// Treated identically to a fetch failure by the synchronizer.
    #[error("schema document invalid: {0}")]
    Validation(String),
}

/// Failure evaluating a calculated-field formula.
#[derive(Debug, Error, PartialEq)]
pub enum FormulaError {
    /// The formula references a different number of unique variables than
    /// bindings were supplied. The caller treats the result as indeterminate.
    #[error("formula uses {found} unique variables but {provided} bindings were supplied")]
    ArityMismatch { found: usize, provided: usize },
    /// The formula is not a valid arithmetic expression.
    #[error("formula parse error at byte {at}: {message}")]
    Parse { at: usize, message: String },
}

/// A single per-image fetch/decode/write failure during materialization.
/// Never aborts the overall sync; the remote URL stays in the schema.
#[derive(Debug, Clone, Error)]
#[error("failed to materialize image '{url}' as '{filename}': {reason}")]
pub struct ImageMaterializeError {
    pub url: String,
    pub filename: String,
    pub reason: String,
}
