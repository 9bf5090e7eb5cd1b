//! # Nodes and the Node Map
//!
//! A document is a key-indexed map of typed nodes plus a designated root.
//! Structural operations live here so every caller goes through the same
//! validation:
//!
//! - **Insert**: parent must exist and be a container; index is clamped.
//! - **Move**: atomic relocation; fails rather than creating an orphan or a
//!   cycle.
//! - **Remove**: detaches a node and drops its whole subtree; the root can
//!   never be removed.
//!
//! The map stores `Arc<Node>` values, so cloning a map for a transaction is
//! cheap and mutating a node clones only that node (copy-on-write).

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key::NodeKey;

/// Declared type identifier, resolved against a type registry by the editor.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct NodeTypeId(String);

impl NodeTypeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeTypeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a node is allowed to do, expressed as a flag set rather than a
/// class hierarchy.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Capabilities {
    /// Holds an ordered sequence of children.
    pub container: bool,
    /// Holds editable text content.
    pub text: bool,
    /// Opaque embedded content (images, widgets).
    pub decorative: bool,
}

impl Capabilities {
    pub fn container() -> Self {
        Capabilities {
            container: true,
            ..Default::default()
        }
    }

    pub fn text() -> Self {
        Capabilities {
            text: true,
            ..Default::default()
        }
    }

    pub fn decorative() -> Self {
        Capabilities {
            decorative: true,
            ..Default::default()
        }
    }
}

/// Node content variants.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum NodeBody {
    /// Container node: ordered child keys.
    Element { children: Vec<NodeKey> },
    /// Text leaf.
    Text { text: String },
    /// Decorative leaf (embedded content addressed by an opaque label).
    Decorator { label: String },
}

/// A typed entity in the content tree, addressed by key.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Node {
    key: NodeKey,
    type_id: NodeTypeId,
    capabilities: Capabilities,
    parent: Option<NodeKey>,
    body: NodeBody,
}

impl Node {
    /// Build a container node with a fresh key.
    pub fn element(type_id: NodeTypeId) -> Self {
        Node {
            key: NodeKey::fresh(),
            type_id,
            capabilities: Capabilities::container(),
            parent: None,
            body: NodeBody::Element {
                children: Vec::new(),
            },
        }
    }

    /// Build a text leaf with a fresh key.
    pub fn text(type_id: NodeTypeId, text: impl Into<String>) -> Self {
        Node {
            key: NodeKey::fresh(),
            type_id,
            capabilities: Capabilities::text(),
            parent: None,
            body: NodeBody::Text { text: text.into() },
        }
    }

    /// Build a decorative leaf with a fresh key.
    pub fn decorator(type_id: NodeTypeId, label: impl Into<String>) -> Self {
        Node {
            key: NodeKey::fresh(),
            type_id,
            capabilities: Capabilities::decorative(),
            parent: None,
            body: NodeBody::Decorator {
                label: label.into(),
            },
        }
    }

    /// Rebind this node under a specific key (used for the designated root).
    pub fn with_key(mut self, key: NodeKey) -> Self {
        self.key = key;
        self
    }

    /// Override the declared capability set.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Swap the declared type, keeping key and content (used by replacement
    /// rules in the type registry).
    pub fn with_type(mut self, type_id: NodeTypeId) -> Self {
        self.type_id = type_id;
        self
    }

    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn type_id(&self) -> &NodeTypeId {
        &self.type_id
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn parent(&self) -> Option<&NodeKey> {
        self.parent.as_ref()
    }

    pub fn is_container(&self) -> bool {
        matches!(self.body, NodeBody::Element { .. })
    }

    pub fn children(&self) -> Option<&[NodeKey]> {
        match &self.body {
            NodeBody::Element { children } => Some(children),
            _ => None,
        }
    }

    pub fn text_content(&self) -> Option<&str> {
        match &self.body {
            NodeBody::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn body(&self) -> &NodeBody {
        &self.body
    }

    pub(crate) fn set_parent(&mut self, parent: Option<NodeKey>) {
        self.parent = parent;
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<NodeKey>> {
        match &mut self.body {
            NodeBody::Element { children } => Some(children),
            _ => None,
        }
    }

    /// Replace text content. Fails on non-text nodes.
    pub fn set_text(&mut self, text: impl Into<String>) -> Result<(), GraphError> {
        match &mut self.body {
            NodeBody::Text { text: slot } => {
                *slot = text.into();
                Ok(())
            }
            _ => Err(GraphError::NotText(self.key.clone())),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("node not found: {0}")]
    NodeNotFound(NodeKey),

    #[error("parent not found: {0}")]
    ParentNotFound(NodeKey),

    #[error("node {0} is not a container")]
    NotAContainer(NodeKey),

    #[error("node {0} is not text")]
    NotText(NodeKey),

    #[error("moving {node} under {parent} would create a cycle")]
    CycleDetected { node: NodeKey, parent: NodeKey },

    #[error("the root node cannot be detached")]
    CannotDetachRoot,
}

/// Key → node mapping, one per snapshot.
///
/// Cloning a `NodeMap` clones `Arc` handles, not nodes; a transaction works
/// on such a clone and only materializes copies of the nodes it touches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeMap {
    nodes: HashMap<NodeKey, Arc<Node>>,
    root: NodeKey,
}

impl NodeMap {
    /// Create a map holding a single empty root container of the given type.
    pub fn new(root_type: NodeTypeId) -> Self {
        let root = Node::element(root_type).with_key(NodeKey::root());
        let root_key = root.key().clone();
        let mut nodes = HashMap::new();
        nodes.insert(root_key.clone(), Arc::new(root));
        NodeMap {
            nodes,
            root: root_key,
        }
    }

    pub fn root_key(&self) -> &NodeKey {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn get(&self, key: &NodeKey) -> Option<&Node> {
        self.nodes.get(key).map(Arc::as_ref)
    }

    pub fn keys(&self) -> impl Iterator<Item = &NodeKey> {
        self.nodes.keys()
    }

    /// Mutable access to a node, cloning it out of shared storage if the
    /// snapshot it came from still holds a reference.
    pub fn get_mut(&mut self, key: &NodeKey) -> Result<&mut Node, GraphError> {
        let slot = self
            .nodes
            .get_mut(key)
            .ok_or_else(|| GraphError::NodeNotFound(key.clone()))?;
        Ok(Arc::make_mut(slot))
    }

    /// Insert a detached node under `parent` at `index` (clamped to the
    /// child count). Returns the new node's key.
    pub fn insert_child(
        &mut self,
        parent: &NodeKey,
        index: usize,
        node: Node,
    ) -> Result<NodeKey, GraphError> {
        if !self.contains(parent) {
            return Err(GraphError::ParentNotFound(parent.clone()));
        }
        let key = node.key().clone();

        let parent_node = self.get_mut(parent)?;
        let children = parent_node
            .children_mut()
            .ok_or_else(|| GraphError::NotAContainer(parent.clone()))?;
        let at = index.min(children.len());
        children.insert(at, key.clone());

        let mut node = node;
        node.set_parent(Some(parent.clone()));
        self.nodes.insert(key.clone(), Arc::new(node));
        Ok(key)
    }

    /// Atomically relocate `key` under `new_parent` at `index`.
    pub fn move_node(
        &mut self,
        key: &NodeKey,
        new_parent: &NodeKey,
        index: usize,
    ) -> Result<(), GraphError> {
        if !self.contains(key) {
            return Err(GraphError::NodeNotFound(key.clone()));
        }
        if !self.contains(new_parent) {
            return Err(GraphError::ParentNotFound(new_parent.clone()));
        }
        if self.would_create_cycle(key, new_parent) {
            return Err(GraphError::CycleDetected {
                node: key.clone(),
                parent: new_parent.clone(),
            });
        }

        self.detach(key)?;

        let parent_node = self.get_mut(new_parent)?;
        let children = parent_node
            .children_mut()
            .ok_or_else(|| GraphError::NotAContainer(new_parent.clone()))?;
        let at = index.min(children.len());
        children.insert(at, key.clone());
        self.get_mut(key)?.set_parent(Some(new_parent.clone()));
        Ok(())
    }

    /// Remove `key` and its whole subtree. Returns the removed keys,
    /// depth-first, removed node first.
    pub fn remove_subtree(&mut self, key: &NodeKey) -> Result<Vec<NodeKey>, GraphError> {
        if key == &self.root {
            return Err(GraphError::CannotDetachRoot);
        }
        self.detach(key)?;

        let mut removed = Vec::new();
        let mut stack = vec![key.clone()];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                if let Some(children) = node.children() {
                    stack.extend(children.iter().cloned());
                }
                removed.push(next);
            }
        }
        Ok(removed)
    }

    /// Parent chain of `key`, nearest ancestor first, ending at the root.
    pub fn ancestors(&self, key: &NodeKey) -> Vec<NodeKey> {
        let mut chain = Vec::new();
        let mut cursor = self.get(key).and_then(|n| n.parent().cloned());
        while let Some(parent) = cursor {
            cursor = self.get(&parent).and_then(|n| n.parent().cloned());
            chain.push(parent);
        }
        chain
    }

    fn would_create_cycle(&self, node: &NodeKey, new_parent: &NodeKey) -> bool {
        if node == new_parent {
            return true;
        }
        self.ancestors(new_parent).contains(node)
    }

    /// Unlink `key` from its parent's child sequence, leaving it and its
    /// subtree in the map.
    fn detach(&mut self, key: &NodeKey) -> Result<(), GraphError> {
        if key == &self.root {
            return Err(GraphError::CannotDetachRoot);
        }
        let parent = self
            .get(key)
            .ok_or_else(|| GraphError::NodeNotFound(key.clone()))?
            .parent()
            .cloned();

        if let Some(parent) = parent {
            let parent_node = self.get_mut(&parent)?;
            if let Some(children) = parent_node.children_mut() {
                children.retain(|c| c != key);
            }
            self.get_mut(key)?.set_parent(None);
        }
        Ok(())
    }
}
