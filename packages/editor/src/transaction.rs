//! # Update Transaction Engine
//!
//! Per-editor state machine: Idle → Updating → Committing → Idle.
//!
//! A transaction installs the current committed state as exclusively-owned
//! working state, runs the caller's mutator synchronously, coalesces any
//! updates queued while the mutator ran, drives registered node transforms
//! to a fixpoint, and freezes the result into a new immutable
//! [`EditorState`]. Reconciliation and listener delivery happen in the
//! commit phase; updates queued by commit-phase listeners drain as fresh
//! transactions before control returns to the original caller. A
//! transaction that touches neither the document nor the selection commits
//! nothing, so the version counter only advances when a new state exists.
//!
//! Failure semantics: an error from the mutator (or a transform, or a stale
//! selection at freeze time) aborts the whole transaction. No new state is
//! produced, dirty sets are discarded, and the error goes to the editor's
//! configured error handler. The editor returns to Idle with its prior
//! committed state untouched.

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;

use vellum_model::{Capabilities, GraphError, Node, NodeKey, NodeMap, NodeTypeId, Selection};

use crate::commands::{trigger_command_listeners, CommandToken};
use crate::editor::{Editor, PendingDelivery, UpdateNotice};
use crate::errors::EditorError;
use crate::reconciler::{reconcile, DirtySets};
use crate::registry::Transform;
use crate::state::EditorState;

/// Default cap on transform fixpoint passes. A tunable, not a contract.
pub const DEFAULT_TRANSFORM_PASS_LIMIT: usize = 20;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Phase {
    Idle,
    Updating,
    Committing,
}

/// Options recognized by [`Editor::update_with_options`].
#[derive(Default)]
pub struct UpdateOptions {
    /// Opaque labels attached to this transaction, delivered to update
    /// listeners and consulted by transform-skip logic.
    pub tags: Vec<String>,
    /// Bypass the transform fixpoint entirely.
    pub skip_transforms: bool,
    /// Force synchronous renderer delivery instead of deferring to an
    /// explicit flush.
    pub discrete: bool,
    /// Reconcile as a full rebuild rather than a dirty-set walk.
    pub force_rebuild: bool,
    /// Invoked once this transaction's reconciliation completes.
    pub on_update: Option<Box<dyn FnOnce()>>,
}

impl UpdateOptions {
    pub fn tagged(tag: impl Into<String>) -> Self {
        UpdateOptions {
            tags: vec![tag.into()],
            ..Default::default()
        }
    }

    pub fn discrete() -> Self {
        UpdateOptions {
            discrete: true,
            ..Default::default()
        }
    }
}

pub(crate) type Mutator = Box<dyn FnOnce(&mut TransactionContext) -> Result<(), EditorError>>;

pub(crate) struct QueuedUpdate {
    pub mutator: Mutator,
    pub options: UpdateOptions,
}

/// Working state of an in-flight transaction, passed explicitly to mutators,
/// transforms, and command listeners. There is no ambient global: code that
/// holds a context holds the one active working state.
pub struct TransactionContext {
    editor: Editor,
    base: Arc<EditorState>,
    map: NodeMap,
    selection: Option<Selection>,
    selection_touched: bool,
    dirty: DirtySets,
    pending_transforms: BTreeSet<NodeKey>,
    tags: Vec<String>,
}

impl TransactionContext {
    fn new(editor: Editor, base: Arc<EditorState>) -> Self {
        let map = base.node_map().clone();
        let selection = base.selection().cloned();
        TransactionContext {
            editor,
            base,
            map,
            selection,
            selection_touched: false,
            dirty: DirtySets::default(),
            pending_transforms: BTreeSet::new(),
            tags: Vec::new(),
        }
    }

    pub fn editor(&self) -> &Editor {
        &self.editor
    }

    /// Version of the committed state this transaction is based on.
    pub fn base_version(&self) -> u64 {
        self.base.version()
    }

    pub fn root_key(&self) -> NodeKey {
        self.map.root_key().clone()
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.map.contains(key)
    }

    pub fn node(&self, key: &NodeKey) -> Result<&Node, EditorError> {
        self.map
            .get(key)
            .ok_or_else(|| GraphError::NodeNotFound(key.clone()).into())
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// Replace the working selection. Ambient selection ownership within
    /// the root's tree transfers to this editor only when the transaction
    /// commits; an aborted transaction leaves the previous owner intact.
    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.selection = selection;
        self.selection_touched = true;
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Construct a detached container node of `type_id`, honoring any
    /// replacement rule registered for it.
    pub fn create_element(&mut self, type_id: &NodeTypeId) -> Result<Node, EditorError> {
        let (actual, capabilities) = self.instantiation(type_id)?;
        Ok(Node::element(actual).with_capabilities(capabilities))
    }

    /// Construct a detached text leaf of `type_id`.
    pub fn create_text(
        &mut self,
        type_id: &NodeTypeId,
        text: impl Into<String>,
    ) -> Result<Node, EditorError> {
        let (actual, capabilities) = self.instantiation(type_id)?;
        Ok(Node::text(actual, text).with_capabilities(capabilities))
    }

    /// Construct a detached decorative leaf of `type_id`.
    pub fn create_decorator(
        &mut self,
        type_id: &NodeTypeId,
        label: impl Into<String>,
    ) -> Result<Node, EditorError> {
        let (actual, capabilities) = self.instantiation(type_id)?;
        Ok(Node::decorator(actual, label).with_capabilities(capabilities))
    }

    fn instantiation(&self, type_id: &NodeTypeId) -> Result<(NodeTypeId, Capabilities), EditorError> {
        let registration = self.editor.inner().registry.instantiation_target(type_id)?;
        Ok((registration.type_id().clone(), registration.capabilities()))
    }

    /// Insert a detached node under `parent` at `index`.
    pub fn insert_child(
        &mut self,
        parent: &NodeKey,
        index: usize,
        node: Node,
    ) -> Result<NodeKey, EditorError> {
        let key = self.map.insert_child(parent, index, node)?;
        self.note_dirty(&key, false);
        self.note_dirty(parent, true);
        Ok(key)
    }

    /// Replace a text leaf's content.
    pub fn set_text(&mut self, key: &NodeKey, text: impl Into<String>) -> Result<(), EditorError> {
        self.map.get_mut(key)?.set_text(text)?;
        self.note_dirty(key, false);
        Ok(())
    }

    /// Atomically relocate `key` under `new_parent` at `index`.
    pub fn move_node(
        &mut self,
        key: &NodeKey,
        new_parent: &NodeKey,
        index: usize,
    ) -> Result<(), EditorError> {
        let old_parent = self.node(key)?.parent().cloned();
        self.map.move_node(key, new_parent, index)?;
        if let Some(old_parent) = old_parent {
            self.note_dirty(&old_parent, true);
        }
        self.note_dirty(new_parent, true);
        self.note_dirty(key, false);
        Ok(())
    }

    /// Remove `key` and its subtree. Returns the removed keys.
    pub fn remove_node(&mut self, key: &NodeKey) -> Result<Vec<NodeKey>, EditorError> {
        // Classify the subtree before it disappears so the dirty sets stay
        // meaningful for renderers.
        let mut classified = Vec::new();
        let mut stack = vec![key.clone()];
        while let Some(k) = stack.pop() {
            if let Some(node) = self.map.get(&k) {
                classified.push((k.clone(), node.is_container()));
                if let Some(children) = node.children() {
                    stack.extend(children.iter().cloned());
                }
            }
        }
        let parent = self.node(key)?.parent().cloned();

        let removed = self.map.remove_subtree(key)?;

        for (k, is_container) in classified {
            if is_container {
                self.dirty.elements.insert(k, true);
            } else {
                self.dirty.leaves.insert(k);
            }
        }
        if let Some(parent) = parent {
            self.note_dirty(&parent, true);
        }
        Ok(removed)
    }

    /// Merge the text of `from` into `into` and remove `from`, marking it
    /// normalized so reconciliation reports the merge as a single
    /// destroyed/updated pair, never a created node.
    pub fn merge_text(&mut self, into: &NodeKey, from: &NodeKey) -> Result<(), EditorError> {
        let addition = self
            .node(from)?
            .text_content()
            .ok_or_else(|| GraphError::NotText(from.clone()))?
            .to_string();
        let existing = self
            .node(into)?
            .text_content()
            .ok_or_else(|| GraphError::NotText(into.clone()))?
            .to_string();

        self.remove_node(from)?;
        self.set_text(into, format!("{existing}{addition}"))?;
        self.dirty.normalized.insert(from.clone());
        Ok(())
    }

    /// Mark a node dirty without changing it, scheduling its transforms for
    /// the next fixpoint pass.
    pub fn mark_dirty(&mut self, key: &NodeKey) -> Result<(), EditorError> {
        if !self.map.contains(key) {
            return Err(GraphError::NodeNotFound(key.clone()).into());
        }
        self.note_dirty(key, false);
        Ok(())
    }

    /// Dispatch a command against this transaction's editor, propagating
    /// leaf-to-root through its parent chain.
    pub fn dispatch(&mut self, token: &CommandToken, payload: &dyn Any) -> bool {
        trigger_command_listeners(self, token, payload)
    }

    fn note_dirty(&mut self, key: &NodeKey, children_changed: bool) {
        let Some((is_container, type_id)) = self
            .map
            .get(key)
            .map(|n| (n.is_container(), n.type_id().clone()))
        else {
            return;
        };
        if is_container {
            let flag = self.dirty.elements.entry(key.clone()).or_insert(false);
            *flag = *flag || children_changed;
        } else {
            self.dirty.leaves.insert(key.clone());
        }
        if self.editor.inner().registry.has_transforms(&type_id) {
            self.pending_transforms.insert(key.clone());
        }
    }

    fn take_pending_transforms(&mut self) -> BTreeSet<NodeKey> {
        std::mem::take(&mut self.pending_transforms)
    }
}

/// Entry point behind [`Editor::update`]: queue when a transaction is in
/// flight, otherwise run one and drain whatever the commit phase queued.
pub(crate) fn update_editor(editor: &Editor, mutator: Mutator, options: UpdateOptions) {
    if editor.inner().phase.get() != Phase::Idle {
        editor
            .inner()
            .queue
            .borrow_mut()
            .push_back(QueuedUpdate { mutator, options });
        return;
    }
    begin_update(editor, mutator, options);
    drain_queued_updates(editor);
}

pub(crate) fn drain_queued_updates(editor: &Editor) {
    while editor.inner().phase.get() == Phase::Idle {
        let next = editor.inner().queue.borrow_mut().pop_front();
        match next {
            Some(queued) => begin_update(editor, queued.mutator, queued.options),
            None => break,
        }
    }
}

pub(crate) fn begin_update<F>(editor: &Editor, mutator: F, options: UpdateOptions)
where
    F: FnOnce(&mut TransactionContext) -> Result<(), EditorError>,
{
    editor.inner().phase.set(Phase::Updating);

    let base = editor.editor_state();
    let mut ctx = TransactionContext::new(editor.clone(), Arc::clone(&base));

    let UpdateOptions {
        tags,
        mut skip_transforms,
        mut discrete,
        mut force_rebuild,
        on_update,
    } = options;
    ctx.tags = tags;
    let mut on_updates: Vec<Box<dyn FnOnce()>> = on_update.into_iter().collect();

    if let Err(err) = mutator(&mut ctx) {
        abort_update(editor, err);
        return;
    }

    // Updates queued while the mutator ran coalesce into this transaction,
    // in submission order.
    loop {
        let queued = editor.inner().queue.borrow_mut().pop_front();
        let Some(queued) = queued else { break };
        let QueuedUpdate { mutator, options } = queued;
        ctx.tags.extend(options.tags);
        skip_transforms |= options.skip_transforms;
        discrete |= options.discrete;
        force_rebuild |= options.force_rebuild;
        if let Some(callback) = options.on_update {
            on_updates.push(callback);
        }
        if let Err(err) = mutator(&mut ctx) {
            abort_update(editor, err);
            return;
        }
    }

    if !skip_transforms {
        if let Err(err) = run_transform_fixpoint(&mut ctx) {
            abort_update(editor, err);
            return;
        }
    }

    commit_update(editor, ctx, base, discrete, force_rebuild, on_updates);
}

/// Run registered transforms until no dirty node has one pending, or fail
/// once the pass cap is exceeded.
fn run_transform_fixpoint(ctx: &mut TransactionContext) -> Result<(), EditorError> {
    let limit = ctx.editor().inner().transform_pass_limit;
    let mut passes = 0;
    loop {
        let pending = ctx.take_pending_transforms();
        if pending.is_empty() {
            return Ok(());
        }
        passes += 1;
        if passes > limit {
            return Err(EditorError::TransformDivergence { passes: limit });
        }
        for key in pending {
            // A transform earlier in this pass may have removed the node.
            if !ctx.contains(&key) {
                continue;
            }
            let type_id = ctx.node(&key)?.type_id().clone();
            let transforms: Vec<Transform> = {
                let registration = ctx.editor().inner().registry.resolve(&type_id)?;
                registration.transforms().to_vec()
            };
            for transform in transforms {
                transform(ctx, &key)?;
            }
        }
    }
}

fn commit_update(
    editor: &Editor,
    ctx: TransactionContext,
    base: Arc<EditorState>,
    discrete: bool,
    force_rebuild: bool,
    on_updates: Vec<Box<dyn FnOnce()>>,
) {
    editor.inner().phase.set(Phase::Committing);
    let TransactionContext {
        map,
        selection,
        selection_touched,
        mut dirty,
        tags,
        ..
    } = ctx;

    // A transaction that touched neither the document nor the selection
    // produces no state: no version bump, no notice, no delivery.
    if dirty.is_empty() && !selection_touched && !force_rebuild {
        for callback in on_updates {
            callback();
        }
        editor.inner().phase.set(Phase::Idle);
        return;
    }

    if let Some(sel) = &selection {
        if let Some(stale) = sel.stale_key(&map) {
            abort_update(editor, EditorError::StaleSelection(stale.clone()));
            return;
        }
    }

    let base_map = base.node_map();

    // Writes that put back identical content are no-op clones; record them
    // so reconciliation skips the update.
    let dirty_keys: Vec<NodeKey> = dirty
        .leaves
        .iter()
        .chain(dirty.elements.keys())
        .cloned()
        .collect();
    for key in &dirty_keys {
        if map.contains(key) && base_map.get(key) == map.get(key) {
            dirty.cloned_unchanged.insert(key.clone());
        }
    }
    // Nodes created and removed within the same transaction never existed in
    // either snapshot; drop them before the defensive reconcile check.
    dirty
        .leaves
        .retain(|k| base_map.contains(k) || map.contains(k));
    dirty
        .elements
        .retain(|k, _| base_map.contains(k) || map.contains(k));

    let version = base.version() + 1;
    let new_state = Arc::new(EditorState::new(Arc::new(map), selection, version));

    let report = match reconcile(Some(&base), &new_state, &dirty, force_rebuild) {
        Ok(report) => report,
        Err(err) => {
            abort_update(editor, err);
            return;
        }
    };

    if selection_touched {
        editor.claim_selection_ownership();
    }
    *editor.inner().state.borrow_mut() = Arc::clone(&new_state);
    tracing::debug!(
        version,
        created = report.created.len(),
        updated = report.updated.len(),
        destroyed = report.destroyed.len(),
        "committed transaction"
    );

    for callback in on_updates {
        callback();
    }

    let delivery = PendingDelivery {
        report,
        old_state: Arc::clone(&base),
        new_state: Arc::clone(&new_state),
    };
    let notice = UpdateNotice {
        old_state: base,
        new_state,
        dirty_leaves: dirty.leaves,
        dirty_elements: dirty.elements,
        tags,
    };
    editor.fire_update_listeners(&notice);

    if discrete || editor.inner().delivery_is_immediate() {
        editor.deliver(delivery);
    } else {
        editor.inner().pending_deliveries.borrow_mut().push(delivery);
    }

    editor.inner().phase.set(Phase::Idle);
}

fn abort_update(editor: &Editor, err: EditorError) {
    editor.inner().phase.set(Phase::Idle);
    tracing::warn!(error = %err, "transaction aborted");
    editor.handle_error(&err);
}
