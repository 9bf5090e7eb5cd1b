//! Error types for the editing core.
//!
//! Construction-time failures (registry and configuration misuse) are
//! returned synchronously to the caller. Transaction-time failures are never
//! raised at the call site that triggered an update; they are funneled
//! through the editor's configured error handler and the transaction is
//! rolled back in full.

use thiserror::Error;
use vellum_model::{GraphError, NodeKey, NodeTypeId};

#[derive(Error, Debug)]
pub enum EditorError {
    #[error("unknown node type: {0}")]
    UnknownType(NodeTypeId),

    #[error("duplicate node type registration: {0}")]
    DuplicateType(NodeTypeId),

    #[error("no active editor state; node access is only valid inside update() or read()")]
    NoActiveState,

    #[error("command priority {0} is out of range (expected 0..=4)")]
    InvalidPriority(u32),

    #[error("node transforms failed to converge after {passes} passes")]
    TransformDivergence { passes: usize },

    #[error("selection references node {0}, which is absent from its state")]
    StaleSelection(NodeKey),

    #[error("reconciliation saw dirty key {0} with no node in either state")]
    ReconcileInconsistency(NodeKey),

    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Caller-defined failure surfaced from inside a mutator.
    #[error("{0}")]
    Mutator(String),
}
