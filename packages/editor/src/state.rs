//! # Editor State
//!
//! An immutable snapshot of the document: node map, optional selection, and
//! a monotonic version marker. A new instance is produced at the end of
//! every committed transaction; the previous instance serves as the diff
//! baseline for exactly one reconciliation pass and is afterwards retained
//! only for external readers such as an undo history.
//!
//! Key-indexed reads go through the [`EditorState::read`] accessor, which
//! hands the caller a [`StateReader`] scoped to the node map. States are
//! never mutated in place; changing only the selection shares the node map
//! structurally.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use vellum_model::{GraphError, Node, NodeKey, NodeMap, NodeTypeId, Selection};

/// Immutable `{node map, selection, version}` snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EditorState {
    nodes: Arc<NodeMap>,
    selection: Option<Selection>,
    version: u64,
}

impl EditorState {
    pub(crate) fn new(nodes: Arc<NodeMap>, selection: Option<Selection>, version: u64) -> Self {
        EditorState {
            nodes,
            selection,
            version,
        }
    }

    /// Empty state: a lone root container, version zero, no selection.
    pub fn empty(root_type: NodeTypeId) -> Self {
        EditorState {
            nodes: Arc::new(NodeMap::new(root_type)),
            selection: None,
            version: 0,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn node_map(&self) -> &NodeMap {
        &self.nodes
    }

    pub(crate) fn shared_map(&self) -> Arc<NodeMap> {
        Arc::clone(&self.nodes)
    }

    /// Run `f` with the node map active for key-indexed lookups.
    pub fn read<R>(&self, f: impl FnOnce(&StateReader<'_>) -> R) -> R {
        let reader = StateReader {
            map: &self.nodes,
            selection: self.selection.as_ref(),
        };
        f(&reader)
    }

    /// New state sharing this node map, differing only in selection. The
    /// version marker is carried over; only committed transactions advance
    /// it.
    pub fn clone_with_selection(&self, selection: Option<Selection>) -> EditorState {
        EditorState {
            nodes: Arc::clone(&self.nodes),
            selection,
            version: self.version,
        }
    }
}

/// Read accessor over a state's node map.
pub struct StateReader<'a> {
    map: &'a NodeMap,
    selection: Option<&'a Selection>,
}

impl<'a> StateReader<'a> {
    pub fn get(&self, key: &NodeKey) -> Result<&'a Node, GraphError> {
        self.map
            .get(key)
            .ok_or_else(|| GraphError::NodeNotFound(key.clone()))
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.map.contains(key)
    }

    pub fn root(&self) -> &'a Node {
        // The root is present in every map by construction.
        self.map
            .get(self.map.root_key())
            .expect("node map lost its root")
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn selection(&self) -> Option<&'a Selection> {
        self.selection
    }
}
