//! # Vellum Editor
//!
//! State-management core for structured-document editing. Holds a node
//! graph behind immutable snapshots and funnels every mutation through a
//! transactional update engine.
//!
//! Architecture, outside-in:
//!
//! - [`Editor`] is the handle: committed state, type registry, listener
//!   tables, optional parent editor.
//! - [`TransactionContext`] is the only mutable view of the document. It
//!   exists exactly for the duration of one transaction.
//! - Registered node transforms run to a fixpoint before commit; the
//!   reconciler then diffs old state against new into a
//!   [`MutationReport`] for renderers.
//! - Commands dispatch through priority buckets across the editor's
//!   parent chain, highest priority first, leaf to root.
//!
//! ```
//! use vellum_editor::model::{Capabilities, NodeTypeId};
//! use vellum_editor::{Editor, EditorConfig, TypeRegistration};
//!
//! let editor = Editor::new(
//!     EditorConfig::new("demo")
//!         .with_node_type(TypeRegistration::new("text", Capabilities::text())),
//! )
//! .unwrap();
//!
//! editor.update(|ctx| {
//!     let root = ctx.root_key();
//!     let leaf = ctx.create_text(&NodeTypeId::new("text"), "hello")?;
//!     ctx.insert_child(&root, 0, leaf)?;
//!     Ok(())
//! });
//! assert_eq!(editor.editor_state().version(), 1);
//! ```

pub mod commands;
pub mod editor;
pub mod errors;
pub mod history;
pub mod reconciler;
pub mod registry;
pub mod state;
pub mod transaction;

pub use vellum_model as model;

pub use commands::{
    create_command, CommandToken, COMMAND_PRIORITY_CRITICAL, COMMAND_PRIORITY_EDITOR,
    COMMAND_PRIORITY_HIGH, COMMAND_PRIORITY_LOW, COMMAND_PRIORITY_NORMAL,
};
pub use editor::{
    DeliveryPolicy, Editor, EditorConfig, Renderer, Subscription, UpdateNotice,
};
pub use errors::EditorError;
pub use history::{attach_history, attach_history_with_limit, HistoryHandle, HISTORY_RESTORE_TAG};
pub use reconciler::{reconcile, DirtySets, MutationReport};
pub use registry::{Transform, TypeRegistration, TypeRegistry};
pub use state::{EditorState, StateReader};
pub use transaction::{TransactionContext, UpdateOptions, DEFAULT_TRANSFORM_PASS_LIMIT};
