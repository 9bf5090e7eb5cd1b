//! # Editor Handle
//!
//! An [`Editor`] is a cheaply-cloneable handle over shared single-threaded
//! state: the committed [`EditorState`], the type registry, the transaction
//! queue, listener tables, and the optional parent link. Editors nest;
//! a child holds a strong handle to its parent and parents never hold
//! children, so the chain is acyclic by construction.
//!
//! Renderer delivery is two-phase: committing a transaction always produces
//! the new state and its mutation report synchronously; handing the report
//! to the renderer either happens immediately (`discrete` updates, or the
//! [`DeliveryPolicy::Immediate`] policy) or waits for an explicit
//! [`Editor::flush`].

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use vellum_model::{NodeKey, NodeMap, NodeTypeId};

use crate::commands::{CommandListener, CommandToken, PRIORITY_BUCKETS};
use crate::errors::EditorError;
use crate::reconciler::{reconcile, DirtySets, MutationReport};
use crate::registry::{TypeRegistration, TypeRegistry};
use crate::state::{EditorState, StateReader};
use crate::transaction::{
    self, Phase, QueuedUpdate, TransactionContext, UpdateOptions, DEFAULT_TRANSFORM_PASS_LIMIT,
};

/// Contract consumed from the excluded rendering layer. Report application
/// is assumed idempotent.
pub trait Renderer {
    fn apply_mutation_report(&mut self, report: &MutationReport);
    fn is_active_surface_attached(&self) -> bool;
}

/// When phase-2 (renderer) delivery runs relative to the commit.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum DeliveryPolicy {
    /// Deliver during commit, before control returns to the caller.
    Immediate,
    /// Park reports until [`Editor::flush`]. `discrete` updates still
    /// deliver synchronously.
    #[default]
    Deferred,
}

/// Payload of a state-update notification: fires once per committed
/// transaction.
pub struct UpdateNotice {
    pub old_state: Arc<EditorState>,
    pub new_state: Arc<EditorState>,
    pub dirty_leaves: BTreeSet<NodeKey>,
    pub dirty_elements: BTreeMap<NodeKey, bool>,
    pub tags: Vec<String>,
}

pub(crate) struct PendingDelivery {
    pub report: MutationReport,
    pub old_state: Arc<EditorState>,
    pub new_state: Arc<EditorState>,
}

type UpdateListener = Rc<dyn Fn(&UpdateNotice)>;
type MutationListener = Rc<dyn Fn(&MutationReport)>;
type FlagListener = Rc<dyn Fn(bool)>;

pub(crate) struct EditorInner {
    namespace: String,
    pub(crate) registry: TypeRegistry,
    parent: Option<Editor>,
    pub(crate) state: RefCell<Arc<EditorState>>,
    pub(crate) phase: Cell<Phase>,
    pub(crate) queue: RefCell<VecDeque<QueuedUpdate>>,
    pub(crate) commands:
        RefCell<HashMap<CommandToken, [Vec<(u64, CommandListener)>; PRIORITY_BUCKETS]>>,
    update_listeners: RefCell<Vec<(u64, UpdateListener)>>,
    mutation_listeners: RefCell<Vec<(u64, Option<NodeTypeId>, MutationListener)>>,
    editable_listeners: RefCell<Vec<(u64, FlagListener)>>,
    root_listeners: RefCell<Vec<(u64, FlagListener)>>,
    editable: Cell<bool>,
    error_handler: Box<dyn Fn(&EditorError)>,
    renderer: RefCell<Option<Box<dyn Renderer>>>,
    delivery: DeliveryPolicy,
    pub(crate) transform_pass_limit: usize,
    pub(crate) pending_deliveries: RefCell<Vec<PendingDelivery>>,
    selection_dirty: Cell<bool>,
    /// Meaningful on root editors only: which descendant currently owns
    /// ambient selection.
    selection_owner: RefCell<Weak<EditorInner>>,
    next_listener_id: Cell<u64>,
}

impl EditorInner {
    pub(crate) fn delivery_is_immediate(&self) -> bool {
        self.delivery == DeliveryPolicy::Immediate
    }
}

/// Construction configuration, builder style.
pub struct EditorConfig {
    namespace: String,
    node_types: Vec<TypeRegistration>,
    initial_state: Option<EditorState>,
    editable: bool,
    parent: Option<Editor>,
    error_handler: Option<Box<dyn Fn(&EditorError)>>,
    transform_pass_limit: usize,
    delivery: DeliveryPolicy,
}

impl EditorConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        EditorConfig {
            namespace: namespace.into(),
            node_types: Vec::new(),
            initial_state: None,
            editable: true,
            parent: None,
            error_handler: None,
            transform_pass_limit: DEFAULT_TRANSFORM_PASS_LIMIT,
            delivery: DeliveryPolicy::default(),
        }
    }

    pub fn with_node_type(mut self, registration: TypeRegistration) -> Self {
        self.node_types.push(registration);
        self
    }

    /// Adopt `state` instead of an empty one; applied through a forced
    /// full-rebuild reconciliation.
    pub fn with_initial_state(mut self, state: EditorState) -> Self {
        self.initial_state = Some(state);
        self
    }

    pub fn editable(mut self, editable: bool) -> Self {
        self.editable = editable;
        self
    }

    pub fn with_parent(mut self, parent: Editor) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Sink for transaction failures. Defaults to a `tracing` logger.
    pub fn with_error_handler(mut self, handler: impl Fn(&EditorError) + 'static) -> Self {
        self.error_handler = Some(Box::new(handler));
        self
    }

    pub fn with_transform_pass_limit(mut self, limit: usize) -> Self {
        self.transform_pass_limit = limit;
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryPolicy) -> Self {
        self.delivery = delivery;
        self
    }
}

/// Handle to one editor in a (possibly nested) editor tree.
#[derive(Clone)]
pub struct Editor {
    inner: Rc<EditorInner>,
}

impl Editor {
    /// Construct an editor. Registry and configuration errors are raised
    /// synchronously; everything after construction funnels through the
    /// error handler.
    pub fn new(config: EditorConfig) -> Result<Editor, EditorError> {
        let registry = TypeRegistry::build(config.node_types)?;
        let error_handler = config
            .error_handler
            .unwrap_or_else(|| Box::new(default_error_handler));

        let editor = Editor {
            inner: Rc::new(EditorInner {
                namespace: config.namespace,
                registry,
                parent: config.parent,
                state: RefCell::new(Arc::new(EditorState::empty(NodeTypeId::new("root")))),
                phase: Cell::new(Phase::Idle),
                queue: RefCell::new(VecDeque::new()),
                commands: RefCell::new(HashMap::new()),
                update_listeners: RefCell::new(Vec::new()),
                mutation_listeners: RefCell::new(Vec::new()),
                editable_listeners: RefCell::new(Vec::new()),
                root_listeners: RefCell::new(Vec::new()),
                editable: Cell::new(config.editable),
                error_handler,
                renderer: RefCell::new(None),
                delivery: config.delivery,
                transform_pass_limit: config.transform_pass_limit,
                pending_deliveries: RefCell::new(Vec::new()),
                selection_dirty: Cell::new(false),
                selection_owner: RefCell::new(Weak::new()),
                next_listener_id: Cell::new(0),
            }),
        };

        if let Some(initial) = config.initial_state {
            editor.set_editor_state(Arc::new(initial), Vec::new());
        }
        Ok(editor)
    }

    pub(crate) fn inner(&self) -> &EditorInner {
        &self.inner
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn parent(&self) -> Option<Editor> {
        self.inner.parent.clone()
    }

    /// Outermost editor of this editor's parent chain.
    pub fn root(&self) -> Editor {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// The last committed state. Always readable, including from inside a
    /// transaction (the working state is separate until commit).
    pub fn editor_state(&self) -> Arc<EditorState> {
        self.inner.state.borrow().clone()
    }

    /// Run `f` against a read accessor over the committed state.
    pub fn read<R>(&self, f: impl FnOnce(&StateReader<'_>) -> R) -> R {
        let state = self.editor_state();
        state.read(f)
    }

    /// Begin (or queue) a transaction running `mutator`.
    pub fn update(
        &self,
        mutator: impl FnOnce(&mut TransactionContext) -> Result<(), EditorError> + 'static,
    ) {
        self.update_with_options(mutator, UpdateOptions::default());
    }

    pub fn update_with_options(
        &self,
        mutator: impl FnOnce(&mut TransactionContext) -> Result<(), EditorError> + 'static,
        options: UpdateOptions,
    ) {
        transaction::update_editor(self, Box::new(mutator), options);
    }

    /// Dispatch a command from outside a transaction: wraps the dispatch in
    /// a fresh transaction so listeners always observe an active working
    /// state. Inside a mutator, use [`TransactionContext::dispatch`].
    pub fn dispatch(&self, token: &CommandToken, payload: &dyn Any) -> bool {
        if self.inner.phase.get() != Phase::Idle {
            self.handle_error(&EditorError::NoActiveState);
            return false;
        }
        let mut handled = false;
        transaction::begin_update(
            self,
            |ctx| {
                handled = ctx.dispatch(token, payload);
                Ok(())
            },
            UpdateOptions::default(),
        );
        transaction::drain_queued_updates(self);
        handled
    }

    /// Register a command listener at `priority` (0..=4).
    pub fn register_command(
        &self,
        token: &CommandToken,
        priority: u32,
        listener: impl Fn(&mut TransactionContext, &dyn Any) -> bool + 'static,
    ) -> Result<Subscription, EditorError> {
        if priority as usize >= PRIORITY_BUCKETS {
            return Err(EditorError::InvalidPriority(priority));
        }
        let id = self.next_listener_id();
        let mut commands = self.inner.commands.borrow_mut();
        let buckets = commands
            .entry(token.clone())
            .or_insert_with(|| std::array::from_fn(|_| Vec::new()));
        buckets[priority as usize].push((id, Rc::new(listener)));
        Ok(self.subscription(SubscriptionTarget::Command(token.clone(), priority as usize), id))
    }

    /// Fires once per committed transaction with old/new state, dirty sets,
    /// and the transaction's tags.
    pub fn register_update_listener(
        &self,
        listener: impl Fn(&UpdateNotice) + 'static,
    ) -> Subscription {
        let id = self.next_listener_id();
        self.inner
            .update_listeners
            .borrow_mut()
            .push((id, Rc::new(listener)));
        self.subscription(SubscriptionTarget::Update, id)
    }

    /// Fires with each delivered mutation report, optionally scoped to one
    /// node type.
    pub fn register_mutation_listener(
        &self,
        scope: Option<NodeTypeId>,
        listener: impl Fn(&MutationReport) + 'static,
    ) -> Subscription {
        let id = self.next_listener_id();
        self.inner
            .mutation_listeners
            .borrow_mut()
            .push((id, scope, Rc::new(listener)));
        self.subscription(SubscriptionTarget::Mutation, id)
    }

    pub fn register_editable_listener(&self, listener: impl Fn(bool) + 'static) -> Subscription {
        let id = self.next_listener_id();
        self.inner
            .editable_listeners
            .borrow_mut()
            .push((id, Rc::new(listener)));
        self.subscription(SubscriptionTarget::Editable, id)
    }

    /// Fires when the host reports that the active rendering surface
    /// changed.
    pub fn register_root_listener(&self, listener: impl Fn(bool) + 'static) -> Subscription {
        let id = self.next_listener_id();
        self.inner
            .root_listeners
            .borrow_mut()
            .push((id, Rc::new(listener)));
        self.subscription(SubscriptionTarget::Root, id)
    }

    pub fn is_editable(&self) -> bool {
        self.inner.editable.get()
    }

    pub fn set_editable(&self, editable: bool) {
        if self.inner.editable.replace(editable) == editable {
            return;
        }
        let listeners = self.inner.editable_listeners.borrow().clone();
        for (_, listener) in listeners {
            listener(editable);
        }
    }

    pub fn set_renderer(&self, renderer: Box<dyn Renderer>) {
        *self.inner.renderer.borrow_mut() = Some(renderer);
    }

    /// Adopt a state wholesale (initial state, history restore). The report
    /// is computed as a forced full rebuild.
    pub fn set_editor_state(&self, state: Arc<EditorState>, tags: Vec<String>) {
        let old = {
            let mut slot = self.inner.state.borrow_mut();
            std::mem::replace(&mut *slot, Arc::clone(&state))
        };
        // Full rebuild against the replaced state: nodes only it held are
        // destroyed, survivors are updated.
        let report = match reconcile(Some(&old), &state, &DirtySets::default(), true) {
            Ok(report) => report,
            Err(err) => {
                self.handle_error(&err);
                return;
            }
        };

        let notice = UpdateNotice {
            old_state: Arc::clone(&old),
            new_state: Arc::clone(&state),
            dirty_leaves: BTreeSet::new(),
            dirty_elements: BTreeMap::new(),
            tags,
        };
        self.fire_update_listeners(&notice);

        let delivery = PendingDelivery {
            report,
            old_state: old,
            new_state: state,
        };
        if self.inner.delivery_is_immediate() {
            self.deliver(delivery);
        } else {
            self.inner.pending_deliveries.borrow_mut().push(delivery);
        }
    }

    /// Host signal: the active rendering surface was attached or detached.
    /// A freshly attached surface receives a full-rebuild report.
    pub fn set_surface_attached(&self, attached: bool) {
        let listeners = self.inner.root_listeners.borrow().clone();
        for (_, listener) in listeners {
            listener(attached);
        }
        if attached {
            let state = self.editor_state();
            match reconcile(None, &state, &DirtySets::default(), true) {
                Ok(report) => self.deliver(PendingDelivery {
                    report,
                    old_state: Arc::clone(&state),
                    new_state: state,
                }),
                Err(err) => self.handle_error(&err),
            }
        }
    }

    /// Deliver all parked mutation reports to mutation listeners and the
    /// renderer. Returns how many were delivered.
    pub fn flush(&self) -> usize {
        let pending: Vec<PendingDelivery> =
            self.inner.pending_deliveries.borrow_mut().drain(..).collect();
        let count = pending.len();
        for delivery in pending {
            self.deliver(delivery);
        }
        count
    }

    pub fn has_pending_deliveries(&self) -> bool {
        !self.inner.pending_deliveries.borrow().is_empty()
    }

    /// Whether this editor is the active selection owner within its root's
    /// tree.
    pub fn is_selection_owner(&self) -> bool {
        self.root()
            .inner
            .selection_owner
            .borrow()
            .upgrade()
            .map(|owner| Rc::ptr_eq(&owner, &self.inner))
            .unwrap_or(false)
    }

    pub fn selection_dirty(&self) -> bool {
        self.inner.selection_dirty.get()
    }

    /// Make this editor the ambient selection owner. The previous owner's
    /// selection-dirty flag is cleared before the new owner is marked, so
    /// two editors never simultaneously believe they hold a live selection.
    pub(crate) fn claim_selection_ownership(&self) {
        let root = self.root();
        let previous = root.inner.selection_owner.borrow().upgrade();
        if let Some(previous) = &previous {
            if Rc::ptr_eq(previous, &self.inner) {
                self.inner.selection_dirty.set(true);
                return;
            }
        }
        if let Some(previous) = previous {
            previous.selection_dirty.set(false);
        }
        self.inner.selection_dirty.set(true);
        *root.inner.selection_owner.borrow_mut() = Rc::downgrade(&self.inner);
    }

    pub(crate) fn handle_error(&self, err: &EditorError) {
        (self.inner.error_handler)(err);
    }

    pub(crate) fn fire_update_listeners(&self, notice: &UpdateNotice) {
        let listeners = self.inner.update_listeners.borrow().clone();
        for (_, listener) in listeners {
            listener(notice);
        }
    }

    pub(crate) fn deliver(&self, delivery: PendingDelivery) {
        let listeners = self.inner.mutation_listeners.borrow().clone();
        for (_, scope, listener) in listeners {
            match scope {
                None => listener(&delivery.report),
                Some(type_id) => {
                    let filtered = filter_report_by_type(&delivery, &type_id);
                    if !filtered.is_empty() {
                        listener(&filtered);
                    }
                }
            }
        }

        let mut renderer = self.inner.renderer.borrow_mut();
        if let Some(renderer) = renderer.as_mut() {
            if renderer.is_active_surface_attached() {
                renderer.apply_mutation_report(&delivery.report);
            }
        }
    }

    fn next_listener_id(&self) -> u64 {
        let id = self.inner.next_listener_id.get();
        self.inner.next_listener_id.set(id + 1);
        id
    }

    fn subscription(&self, target: SubscriptionTarget, id: u64) -> Subscription {
        Subscription {
            editor: Rc::downgrade(&self.inner),
            target,
            id,
        }
    }
}

impl std::fmt::Debug for Editor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Editor")
            .field("namespace", &self.inner.namespace)
            .field("version", &self.editor_state().version())
            .finish()
    }
}

fn default_error_handler(err: &EditorError) {
    tracing::error!(error = %err, "unhandled editor error");
}

/// Restrict a report to keys whose node declares `scope` as its type.
/// Created/updated keys resolve against the new state, destroyed keys
/// against the old one.
fn filter_report_by_type(delivery: &PendingDelivery, scope: &NodeTypeId) -> MutationReport {
    let new_map = delivery.new_state.node_map();
    let old_map = delivery.old_state.node_map();
    let matches = |map: &NodeMap, key: &NodeKey| {
        map.get(key).map(|n| n.type_id() == scope).unwrap_or(false)
    };

    MutationReport {
        created: delivery
            .report
            .created
            .iter()
            .filter(|k| matches(new_map, *k))
            .cloned()
            .collect(),
        updated: delivery
            .report
            .updated
            .iter()
            .filter(|k| matches(new_map, *k))
            .cloned()
            .collect(),
        destroyed: delivery
            .report
            .destroyed
            .iter()
            .filter(|k| matches(old_map, *k))
            .cloned()
            .collect(),
        dirty_leaves: delivery.report.dirty_leaves.clone(),
        dirty_elements: delivery.report.dirty_elements.clone(),
    }
}

enum SubscriptionTarget {
    Update,
    Mutation,
    Editable,
    Root,
    Command(CommandToken, usize),
}

/// Cancelable listener registration.
pub struct Subscription {
    editor: Weak<EditorInner>,
    target: SubscriptionTarget,
    id: u64,
}

impl Subscription {
    pub fn cancel(self) {
        let Some(inner) = self.editor.upgrade() else {
            return;
        };
        match self.target {
            SubscriptionTarget::Update => inner
                .update_listeners
                .borrow_mut()
                .retain(|(id, _)| *id != self.id),
            SubscriptionTarget::Mutation => inner
                .mutation_listeners
                .borrow_mut()
                .retain(|(id, _, _)| *id != self.id),
            SubscriptionTarget::Editable => inner
                .editable_listeners
                .borrow_mut()
                .retain(|(id, _)| *id != self.id),
            SubscriptionTarget::Root => inner
                .root_listeners
                .borrow_mut()
                .retain(|(id, _)| *id != self.id),
            SubscriptionTarget::Command(token, priority) => {
                if let Some(buckets) = inner.commands.borrow_mut().get_mut(&token) {
                    buckets[priority].retain(|(id, _)| *id != self.id);
                }
            }
        }
    }
}
