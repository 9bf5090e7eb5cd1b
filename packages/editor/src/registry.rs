//! # Type Registry
//!
//! Maps a declared type identifier to its registration record: capability
//! set, transform functions, and an optional replacement rule.
//!
//! Replacement rules are resolved once, when the registry is built: if a
//! registration declares that it replaces type `X`, instantiating `X` yields
//! the replacing registration directly, keeping later lookups O(1). The
//! registry is populated at editor construction and read-only afterwards.

use std::collections::HashMap;
use std::rc::Rc;

use vellum_model::{Capabilities, NodeKey, NodeTypeId};

use crate::errors::EditorError;
use crate::transaction::TransactionContext;

/// A node transform: runs against one dirty node during the fixpoint pass
/// after a mutator returns. Transforms may mutate further nodes, which marks
/// them dirty and schedules their own transforms.
pub type Transform = Rc<dyn Fn(&mut TransactionContext, &NodeKey) -> Result<(), EditorError>>;

/// Registration record for one node type.
#[derive(Clone)]
pub struct TypeRegistration {
    type_id: NodeTypeId,
    capabilities: Capabilities,
    transforms: Vec<Transform>,
    /// Type this registration replaces: instantiating the replaced type
    /// constructs this one instead.
    replaces: Option<NodeTypeId>,
}

impl TypeRegistration {
    pub fn new(type_id: impl Into<String>, capabilities: Capabilities) -> Self {
        TypeRegistration {
            type_id: NodeTypeId::new(type_id),
            capabilities,
            transforms: Vec::new(),
            replaces: None,
        }
    }

    pub fn with_transform(
        mut self,
        transform: impl Fn(&mut TransactionContext, &NodeKey) -> Result<(), EditorError> + 'static,
    ) -> Self {
        self.transforms.push(Rc::new(transform));
        self
    }

    /// Declare that this type replaces `other` at instantiation time.
    pub fn replaces(mut self, other: impl Into<String>) -> Self {
        self.replaces = Some(NodeTypeId::new(other));
        self
    }

    pub fn type_id(&self) -> &NodeTypeId {
        &self.type_id
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }
}

/// Immutable registry built once at editor construction.
pub struct TypeRegistry {
    entries: HashMap<NodeTypeId, TypeRegistration>,
    /// Requested type → registered type actually constructed, with
    /// replacement rules already applied.
    instantiation: HashMap<NodeTypeId, NodeTypeId>,
}

impl TypeRegistry {
    /// Build from an ordered list of registrations. Later duplicates are
    /// rejected with [`EditorError::DuplicateType`]. A plain container
    /// registration for the root type is added when the caller did not
    /// provide one.
    pub fn build(registrations: Vec<TypeRegistration>) -> Result<Self, EditorError> {
        let mut entries: HashMap<NodeTypeId, TypeRegistration> = HashMap::new();
        for registration in registrations {
            let id = registration.type_id.clone();
            if entries.contains_key(&id) {
                return Err(EditorError::DuplicateType(id));
            }
            entries.insert(id, registration);
        }

        let root = NodeTypeId::new("root");
        entries
            .entry(root)
            .or_insert_with(|| TypeRegistration::new("root", Capabilities::container()));

        // Resolve replacement rules up front so lookups stay O(1).
        let mut instantiation: HashMap<NodeTypeId, NodeTypeId> = HashMap::new();
        for registration in entries.values() {
            if let Some(replaced) = &registration.replaces {
                instantiation.insert(replaced.clone(), registration.type_id.clone());
            }
        }

        Ok(TypeRegistry {
            entries,
            instantiation,
        })
    }

    /// Look up a registration by its declared identifier.
    pub fn resolve(&self, type_id: &NodeTypeId) -> Result<&TypeRegistration, EditorError> {
        self.entries
            .get(type_id)
            .ok_or_else(|| EditorError::UnknownType(type_id.clone()))
    }

    /// Registration actually constructed when `type_id` is instantiated,
    /// with any replacement rule applied.
    pub fn instantiation_target(
        &self,
        type_id: &NodeTypeId,
    ) -> Result<&TypeRegistration, EditorError> {
        let actual = self.instantiation.get(type_id).unwrap_or(type_id);
        // A replacement may point at an unregistered type; surface the
        // original identifier in that case.
        self.entries
            .get(actual)
            .ok_or_else(|| EditorError::UnknownType(type_id.clone()))
    }

    pub fn has_transforms(&self, type_id: &NodeTypeId) -> bool {
        self.entries
            .get(type_id)
            .map(|r| !r.transforms.is_empty())
            .unwrap_or(false)
    }
}
