//! # Command Dispatch Bus
//!
//! High-level intents (cut, paste, focus, drop, …) are modeled as opaque
//! command tokens dispatched with an arbitrary payload. Each editor keeps,
//! per token, five priority buckets of listeners.
//!
//! Dispatch semantics:
//!
//! - Listeners always observe an active working state: dispatching outside a
//!   transaction wraps the dispatch in a fresh one.
//! - Propagation runs leaf-to-root over the dispatching editor's parent
//!   chain.
//! - Buckets are evaluated from priority 4 down to 0 across the whole chain;
//!   within a bucket, editors leaf-to-root, listeners in registration order.
//! - The first listener returning `true` short-circuits the entire dispatch.
//!   This is an OR-reduction, not a fan-out.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::editor::Editor;
use crate::transaction::TransactionContext;

/// Highest priority bucket index; valid priorities are `0..=COMMAND_PRIORITY_CRITICAL`.
pub const COMMAND_PRIORITY_LOW: u32 = 0;
pub const COMMAND_PRIORITY_NORMAL: u32 = 1;
pub const COMMAND_PRIORITY_HIGH: u32 = 2;
pub const COMMAND_PRIORITY_EDITOR: u32 = 3;
pub const COMMAND_PRIORITY_CRITICAL: u32 = 4;

pub(crate) const PRIORITY_BUCKETS: usize = 5;

/// Opaque command identity. Equality is reference identity: two tokens
/// created with the same label are distinct registrations.
#[derive(Clone)]
pub struct CommandToken {
    inner: Rc<str>,
}

/// Mint a new command token. The label is diagnostic only.
pub fn create_command(label: impl Into<String>) -> CommandToken {
    CommandToken {
        inner: Rc::from(label.into().into_boxed_str()),
    }
}

impl CommandToken {
    pub fn label(&self) -> &str {
        &self.inner
    }
}

impl PartialEq for CommandToken {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for CommandToken {}

impl Hash for CommandToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.inner) as *const u8 as usize).hash(state);
    }
}

impl fmt::Debug for CommandToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandToken({})", self.label())
    }
}

/// A command listener: returns `true` to mark the command handled and stop
/// propagation.
pub type CommandListener = Rc<dyn Fn(&mut TransactionContext, &dyn Any) -> bool>;

/// Run the listeners for `token` against the active transaction, walking the
/// propagation chain leaf-to-root, priority buckets high-to-low.
pub(crate) fn trigger_command_listeners(
    ctx: &mut TransactionContext,
    token: &CommandToken,
    payload: &dyn Any,
) -> bool {
    let chain = propagation_chain(ctx.editor());

    for priority in (0..PRIORITY_BUCKETS).rev() {
        for editor in &chain {
            // Snapshot the bucket so listeners may register or cancel
            // registrations while running.
            let listeners: Vec<CommandListener> = {
                let commands = editor.inner().commands.borrow();
                match commands.get(token) {
                    Some(buckets) => buckets[priority]
                        .iter()
                        .map(|(_, listener)| Rc::clone(listener))
                        .collect(),
                    None => continue,
                }
            };

            for listener in listeners {
                if listener(ctx, payload) {
                    tracing::debug!(
                        command = token.label(),
                        priority,
                        editor = editor.namespace(),
                        "command handled"
                    );
                    return true;
                }
            }
        }
    }

    false
}

/// The dispatching editor followed by its ancestors, leaf to root.
pub(crate) fn propagation_chain(editor: &Editor) -> Vec<Editor> {
    let mut chain = vec![editor.clone()];
    let mut cursor = editor.parent();
    while let Some(parent) = cursor {
        cursor = parent.parent();
        chain.push(parent);
    }
    chain
}
