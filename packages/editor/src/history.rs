//! # Snapshot History
//!
//! Undo/redo over committed states. Because states are immutable and share
//! node-map structure, a history entry is just an `Arc` to the snapshot the
//! transaction replaced.
//!
//! Restores go through [`Editor::set_editor_state`] tagged with
//! [`HISTORY_RESTORE_TAG`], which the recording listener skips so a restore
//! never records itself.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::editor::{Editor, Subscription};
use crate::state::EditorState;

/// Tag attached to transactions that restore a historical snapshot.
pub const HISTORY_RESTORE_TAG: &str = "history-restore";

const DEFAULT_HISTORY_LIMIT: usize = 100;

struct History {
    undo: Vec<Arc<EditorState>>,
    redo: Vec<Arc<EditorState>>,
    limit: usize,
}

impl History {
    fn record(&mut self, state: Arc<EditorState>) {
        self.undo.push(state);
        if self.undo.len() > self.limit {
            self.undo.remove(0);
        }
        self.redo.clear();
    }
}

/// Handle over an editor's attached history. Dropping the handle stops
/// recording.
pub struct HistoryHandle {
    editor: Editor,
    history: Rc<RefCell<History>>,
    subscription: Option<Subscription>,
}

impl HistoryHandle {
    pub fn can_undo(&self) -> bool {
        !self.history.borrow().undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.history.borrow().redo.is_empty()
    }

    /// Restore the snapshot preceding the last recorded transaction.
    /// Returns `false` when there is nothing to undo.
    pub fn undo(&self) -> bool {
        let target = {
            let mut history = self.history.borrow_mut();
            let Some(target) = history.undo.pop() else {
                return false;
            };
            history.redo.push(self.editor.editor_state());
            target
        };
        self.editor
            .set_editor_state(target, vec![HISTORY_RESTORE_TAG.to_string()]);
        true
    }

    /// Reapply the most recently undone snapshot. Returns `false` when the
    /// redo stack is empty.
    pub fn redo(&self) -> bool {
        let target = {
            let mut history = self.history.borrow_mut();
            let Some(target) = history.redo.pop() else {
                return false;
            };
            history.undo.push(self.editor.editor_state());
            target
        };
        self.editor
            .set_editor_state(target, vec![HISTORY_RESTORE_TAG.to_string()]);
        true
    }

    pub fn clear(&self) {
        let mut history = self.history.borrow_mut();
        history.undo.clear();
        history.redo.clear();
    }

    /// Stop recording and drop the retained snapshots.
    pub fn detach(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
        self.clear();
    }
}

/// Record every committed transaction on `editor` for undo/redo.
pub fn attach_history(editor: &Editor) -> HistoryHandle {
    attach_history_with_limit(editor, DEFAULT_HISTORY_LIMIT)
}

pub fn attach_history_with_limit(editor: &Editor, limit: usize) -> HistoryHandle {
    let history = Rc::new(RefCell::new(History {
        undo: Vec::new(),
        redo: Vec::new(),
        limit: limit.max(1),
    }));

    let recorder = Rc::clone(&history);
    let subscription = editor.register_update_listener(move |notice| {
        if notice.tags.iter().any(|t| t == HISTORY_RESTORE_TAG) {
            return;
        }
        recorder.borrow_mut().record(Arc::clone(&notice.old_state));
    });

    HistoryHandle {
        editor: editor.clone(),
        history,
        subscription: Some(subscription),
    }
}
