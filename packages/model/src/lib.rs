//! # Vellum Document Model
//!
//! Pure data model for the Vellum editing core.
//!
//! This crate holds the types that describe a document: keys, typed nodes,
//! the key-indexed node map, and selections. It knows nothing about
//! transactions, reconciliation, or rendering; those live in
//! `vellum-editor`, which consumes these types the way an evaluator consumes
//! an AST.
//!
//! ## Core Principles
//!
//! 1. **Keys, not references**: nodes address each other by [`NodeKey`],
//!    never by owning pointers. The tree is reconstructed from parent
//!    pointers and child sequences, which must always agree.
//! 2. **Tagged variants over hierarchies**: node behavior is described by a
//!    [`Capabilities`] set and a [`NodeBody`] variant, not a class tree.
//! 3. **Copy-on-write**: [`NodeMap`] stores `Arc<Node>` values so a frozen
//!    snapshot and a working copy share untouched nodes structurally.

pub mod key;
pub mod node;
pub mod selection;

pub use key::NodeKey;
pub use node::{Capabilities, GraphError, Node, NodeBody, NodeMap, NodeTypeId};
pub use selection::{Point, PointKind, Selection};
