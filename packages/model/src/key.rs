//! # Node Keys
//!
//! Every node carries a process-unique key, stable for the node's lifetime
//! and never reused. Keys are opaque strings minted from a process-wide
//! counter; the designated root key is fixed so every editor tree has a
//! predictable anchor.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static KEY_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique node identifier.
///
/// Equality and ordering are by value, but callers must treat the contents
/// as opaque: the only guarantees are uniqueness and stability.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey(String);

impl NodeKey {
    /// Mint a fresh key. Never returns the same key twice in one process.
    pub fn fresh() -> Self {
        NodeKey(KEY_COUNTER.fetch_add(1, Ordering::Relaxed).to_string())
    }

    /// The designated root key shared by every document tree.
    pub fn root() -> Self {
        NodeKey("root".to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == "root"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKey({})", self.0)
    }
}
