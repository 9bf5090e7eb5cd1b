//! # Reconciliation
//!
//! Diffs two editor states into a `{created, updated, destroyed}` mutation
//! report, using the dirty-tracking metadata collected during the
//! transaction that produced the new state.
//!
//! ## Algorithm
//!
//! - **Full rebuild** (no prior state, or an explicit force flag): every key
//!   in the new map is created or updated; keys only in the old map are
//!   destroyed.
//! - **Incremental**: the walk is restricted to dirty keys plus their
//!   structural ancestors up to the root, so a renderer can recompute child
//!   ordering. Keys cloned for write access but left unchanged are skipped.
//! - **Normalization**: keys merged or removed by a normalizing transform
//!   never appear as `updated`; a merged-away key appears exactly once, as
//!   `destroyed`. Re-running reconciliation against an already-normalized
//!   state yields an empty report.
//!
//! Report sets are ordered (`BTreeSet`), so reconciliation is deterministic
//! and idempotent for a fixed input triple. Destroyed keys are computed, and
//! must be delivered, before created/updated ones so listeners never observe
//! a renderer reference to a node the graph has dropped.

use std::collections::{BTreeMap, BTreeSet};

use vellum_model::NodeKey;

use crate::errors::EditorError;
use crate::state::EditorState;

/// Per-transaction dirty-tracking scratch state. Owned exclusively by the
/// in-flight transaction and discarded once reconciliation has consumed it.
#[derive(Clone, Debug, Default)]
pub struct DirtySets {
    /// Dirty leaf keys.
    pub leaves: BTreeSet<NodeKey>,
    /// Dirty container keys → "children order changed" flag.
    pub elements: BTreeMap<NodeKey, bool>,
    /// Keys cloned into the working map but left unchanged.
    pub cloned_unchanged: BTreeSet<NodeKey>,
    /// Keys merged or removed by normalization.
    pub normalized: BTreeSet<NodeKey>,
}

impl DirtySets {
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty() && self.elements.is_empty() && self.normalized.is_empty()
    }
}

/// Minimal change-set between two states, keyed by node key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MutationReport {
    pub created: BTreeSet<NodeKey>,
    pub updated: BTreeSet<NodeKey>,
    pub destroyed: BTreeSet<NodeKey>,
    /// Carried over for external renderers.
    pub dirty_leaves: BTreeSet<NodeKey>,
    pub dirty_elements: BTreeMap<NodeKey, bool>,
}

impl MutationReport {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.destroyed.is_empty()
    }
}

/// Diff `prev` against `next`. `force_full` (or a missing `prev`) triggers
/// the full-rebuild path.
pub fn reconcile(
    prev: Option<&EditorState>,
    next: &EditorState,
    dirty: &DirtySets,
    force_full: bool,
) -> Result<MutationReport, EditorError> {
    let mut report = MutationReport {
        dirty_leaves: dirty.leaves.clone(),
        dirty_elements: dirty.elements.clone(),
        ..Default::default()
    };

    let prev = match (force_full, prev) {
        (false, Some(prev)) => prev,
        _ => {
            full_rebuild(prev, next, &mut report);
            return Ok(report);
        }
    };

    let old_map = prev.node_map();
    let new_map = next.node_map();

    // Destroyed keys first: dirty keys that vanished from the new map.
    let mut candidates: BTreeSet<&NodeKey> = BTreeSet::new();
    candidates.extend(dirty.leaves.iter());
    candidates.extend(dirty.elements.keys());
    candidates.extend(dirty.normalized.iter());

    for key in &candidates {
        let in_old = old_map.contains(key);
        let in_new = new_map.contains(key);
        match (in_old, in_new) {
            (true, false) => {
                report.destroyed.insert((*key).clone());
            }
            (false, false) => {
                // Already-normalized keys are idempotently absent; anything
                // else dirty-but-gone is a defensive failure.
                if !dirty.normalized.contains(key) {
                    return Err(EditorError::ReconcileInconsistency((*key).clone()));
                }
            }
            _ => {}
        }
    }

    for key in &candidates {
        let in_old = old_map.contains(key);
        let in_new = new_map.contains(key);
        if !in_new {
            continue;
        }
        if !in_old {
            report.created.insert((*key).clone());
        } else if !dirty.normalized.contains(key) && !dirty.cloned_unchanged.contains(key) {
            report.updated.insert((*key).clone());
        } else {
            // No-op clone or normalized survivor dirtied elsewhere: skip the
            // node and its ancestor propagation.
            continue;
        }

        // Container dirtiness propagates upward so renderers can recompute
        // ordering. Ancestors present only in the new map are created in
        // their own right.
        for ancestor in new_map.ancestors(key) {
            if old_map.contains(&ancestor) && !report.created.contains(&ancestor) {
                report.updated.insert(ancestor);
            }
        }
    }

    report.updated.retain(|k| !report.created.contains(k));
    Ok(report)
}

fn full_rebuild(prev: Option<&EditorState>, next: &EditorState, report: &mut MutationReport) {
    let new_map = next.node_map();
    let old_map = prev.map(|p| p.node_map());

    if let Some(old_map) = old_map {
        for key in old_map.keys() {
            if !new_map.contains(key) {
                report.destroyed.insert(key.clone());
            }
        }
    }
    for key in new_map.keys() {
        let existed = old_map.map(|m| m.contains(key)).unwrap_or(false);
        if existed {
            report.updated.insert(key.clone());
        } else {
            report.created.insert(key.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vellum_model::{Node, NodeMap, NodeTypeId};

    fn state_from(map: NodeMap, version: u64) -> EditorState {
        EditorState::new(Arc::new(map), None, version)
    }

    fn base_map() -> NodeMap {
        NodeMap::new(NodeTypeId::new("root"))
    }

    #[test]
    fn full_rebuild_reports_everything() {
        let old = state_from(base_map(), 0);
        let mut map = old.node_map().clone();
        let root = map.root_key().clone();
        let leaf = map
            .insert_child(&root, 0, Node::text(NodeTypeId::new("text"), "hi"))
            .unwrap();
        let new = state_from(map, 1);

        let report = reconcile(Some(&old), &new, &DirtySets::default(), true).unwrap();
        assert!(report.created.contains(&leaf));
        assert!(report.updated.contains(&root));
        assert!(report.destroyed.is_empty());
    }

    #[test]
    fn missing_prev_state_forces_full_rebuild() {
        let new = state_from(base_map(), 0);
        let report = reconcile(None, &new, &DirtySets::default(), false).unwrap();
        assert_eq!(report.created.len(), 1);
        assert!(report.updated.is_empty());
    }

    #[test]
    fn incremental_walk_is_restricted_to_dirty_keys() {
        let mut map = base_map();
        let root = map.root_key().clone();
        let a = map
            .insert_child(&root, 0, Node::text(NodeTypeId::new("text"), "a"))
            .unwrap();
        let b = map
            .insert_child(&root, 1, Node::text(NodeTypeId::new("text"), "b"))
            .unwrap();
        let old = state_from(map.clone(), 0);

        map.get_mut(&a).unwrap().set_text("changed").unwrap();
        let new = state_from(map, 1);

        let mut dirty = DirtySets::default();
        dirty.leaves.insert(a.clone());

        let report = reconcile(Some(&old), &new, &dirty, false).unwrap();
        assert!(report.updated.contains(&a));
        assert!(report.updated.contains(&root), "ancestors propagate upward");
        assert!(!report.updated.contains(&b), "untouched siblings are skipped");
    }

    #[test]
    fn cloned_but_unchanged_keys_are_skipped() {
        let mut map = base_map();
        let root = map.root_key().clone();
        let a = map
            .insert_child(&root, 0, Node::text(NodeTypeId::new("text"), "a"))
            .unwrap();
        let old = state_from(map.clone(), 0);
        let new = state_from(map, 1);

        let mut dirty = DirtySets::default();
        dirty.leaves.insert(a.clone());
        dirty.cloned_unchanged.insert(a);

        let report = reconcile(Some(&old), &new, &dirty, false).unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn dirty_key_absent_from_both_states_is_an_inconsistency() {
        let old = state_from(base_map(), 0);
        let new = state_from(old.node_map().clone(), 1);

        let mut dirty = DirtySets::default();
        dirty.leaves.insert(vellum_model::NodeKey::fresh());

        let err = reconcile(Some(&old), &new, &dirty, false).unwrap_err();
        assert!(matches!(err, EditorError::ReconcileInconsistency(_)));
    }

    #[test]
    fn normalized_keys_absent_from_both_states_are_ignored() {
        let old = state_from(base_map(), 0);
        let new = state_from(old.node_map().clone(), 1);

        let mut dirty = DirtySets::default();
        dirty.normalized.insert(vellum_model::NodeKey::fresh());

        let report = reconcile(Some(&old), &new, &dirty, false).unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn reconcile_is_idempotent() {
        let mut map = base_map();
        let root = map.root_key().clone();
        let a = map
            .insert_child(&root, 0, Node::text(NodeTypeId::new("text"), "a"))
            .unwrap();
        let old = state_from(map.clone(), 0);
        map.get_mut(&a).unwrap().set_text("b").unwrap();
        let new = state_from(map, 1);

        let mut dirty = DirtySets::default();
        dirty.leaves.insert(a);

        let first = reconcile(Some(&old), &new, &dirty, false).unwrap();
        let second = reconcile(Some(&old), &new, &dirty, false).unwrap();
        assert_eq!(first, second);
    }
}
