//! # Selection
//!
//! A selection is a range between two points, each anchored to a node key.
//! Points come in two kinds: a character offset inside a text leaf, or a
//! child index inside a container. A point is only meaningful against the
//! snapshot it was taken from; resolving it against a map that no longer
//! holds its key is an error the editor surfaces, never a silent no-op.

use serde::{Deserialize, Serialize};

use crate::key::NodeKey;
use crate::node::NodeMap;

/// How a point's offset is interpreted.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum PointKind {
    /// Character offset inside a text leaf.
    TextOffset,
    /// Index into a container's child sequence.
    ChildIndex,
}

/// One end of a selection range.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Point {
    pub key: NodeKey,
    pub offset: usize,
    pub kind: PointKind,
}

impl Point {
    pub fn text(key: NodeKey, offset: usize) -> Self {
        Point {
            key,
            offset,
            kind: PointKind::TextOffset,
        }
    }

    pub fn child(key: NodeKey, index: usize) -> Self {
        Point {
            key,
            offset: index,
            kind: PointKind::ChildIndex,
        }
    }
}

/// Anchor/focus range. A caret is a collapsed range.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Point,
    pub focus: Point,
}

impl Selection {
    pub fn range(anchor: Point, focus: Point) -> Self {
        Selection { anchor, focus }
    }

    pub fn caret(point: Point) -> Self {
        Selection {
            anchor: point.clone(),
            focus: point,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }

    /// First referenced key missing from `map`, if any. `None` means the
    /// selection is valid against that map.
    pub fn stale_key(&self, map: &NodeMap) -> Option<&NodeKey> {
        [&self.anchor, &self.focus]
            .into_iter()
            .map(|p| &p.key)
            .find(|key| !map.contains(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeTypeId};

    #[test]
    fn caret_is_collapsed() {
        let p = Point::text(NodeKey::fresh(), 3);
        assert!(Selection::caret(p.clone()).is_collapsed());
        assert!(!Selection::range(p, Point::text(NodeKey::fresh(), 0)).is_collapsed());
    }

    #[test]
    fn stale_key_reports_missing_focus() {
        let mut map = NodeMap::new(NodeTypeId::new("root"));
        let root = map.root_key().clone();
        let leaf = map
            .insert_child(&root, 0, Node::text(NodeTypeId::new("text"), "hi"))
            .unwrap();

        let gone = NodeKey::fresh();
        let selection = Selection::range(Point::text(leaf, 0), Point::text(gone.clone(), 0));
        assert_eq!(selection.stale_key(&map), Some(&gone));

        let valid = Selection::caret(Point::child(root, 0));
        assert_eq!(valid.stale_key(&map), None);
    }
}
