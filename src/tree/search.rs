//! Filepath: src/tree/search.rs
//!
//! Reader-side lookups. Every entry point either takes a critical section
//! itself or borrows one from the caller, which bounds the lifetime of any
//! node reference it hands out.

use std::ptr::NonNull;

use super::DynamicSearchTree;
use crate::epoch::CriticalGuard;
use crate::key::{DocId, KeyType};
use crate::leaf::LeafNode;
use crate::node::{NodeBase, NodeRef};

impl DynamicSearchTree {
    /// Smallest stored key with `doc_id' >= doc_id`, tombstones included.
    ///
    /// Looks in the leaf that routes `doc_id` first, then forward along the
    /// sibling chain. Returns `None` on an empty tree or when every stored
    /// doc-id is smaller.
    #[must_use]
    pub fn search(&self, doc_id: DocId) -> Option<KeyType> {
        let guard = self.node_manager.critical_scope();
        self.search_unsafe(doc_id, &guard)
    }

    /// [`search`](Self::search) inside a caller-held critical section.
    #[must_use]
    pub fn search_unsafe(&self, doc_id: DocId, guard: &CriticalGuard<'_>) -> Option<KeyType> {
        let leaf: &LeafNode = self.find_leaf(doc_id, guard)?;
        successor_from(leaf, doc_id).map(|(_, key)| key)
    }

    /// Leaf that routes `doc_id`.
    pub(crate) fn find_leaf<'g>(
        &self,
        doc_id: DocId,
        _guard: &'g CriticalGuard<'_>,
    ) -> Option<&'g LeafNode> {
        let mut node: NonNull<NodeBase> = self.root_ptr()?;

        loop {
            // SAFETY: loaded inside the guard's critical section; retired
            // nodes outlive it.
            match unsafe { NodeBase::classify(node) } {
                NodeRef::Leaf(leaf) => return Some(leaf),
                NodeRef::Internal(inode) => {
                    node = inode.child(inode.find_child_slot(doc_id))?;
                }
            }
        }
    }

    /// Leftmost leaf.
    pub(crate) fn first_leaf<'g>(&self, guard: &'g CriticalGuard<'_>) -> Option<&'g LeafNode> {
        self.find_leaf(DocId::MIN, guard)
    }
}

/// First key `>= target` starting at `leaf` and walking `next` pointers.
///
/// Returns the leaf that held it along with the key.
pub(super) fn successor_from(leaf: &LeafNode, target: DocId) -> Option<(NonNull<LeafNode>, KeyType)> {
    let mut current: NonNull<LeafNode> = NonNull::from(leaf);

    loop {
        // SAFETY: `leaf` and everything reachable from it stay valid for the
        // caller's critical section.
        let node: &LeafNode = unsafe { current.as_ref() };
        if let Some(key) = node.lower_bound(target) {
            return Some((current, key));
        }
        current = node.next()?;
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Fail fast in tests")]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::alloc::NodeManager;
    use crate::config::ReclaimConfig;

    fn tree(shift: u8) -> DynamicSearchTree {
        DynamicSearchTree::new(shift, Arc::new(NodeManager::new(ReclaimConfig::default())))
    }

    #[test]
    fn test_search_returns_successor_across_leaves() {
        let t = tree(1);
        for doc_id in (0..40).map(|i| i * 10) {
            t.insert(doc_id);
        }

        for probe in 0..390 {
            let expected = (probe + 9) / 10 * 10;
            assert_eq!(t.search(probe).unwrap().doc_id(), expected, "probe {probe}");
        }
        assert!(t.search(391).is_none());
    }

    #[test]
    fn test_search_unsafe_with_outer_guard() {
        let t = tree(2);
        t.insert(3);
        t.insert(9);

        let guard = t.node_manager().critical_scope();
        assert_eq!(t.search_unsafe(4, &guard).unwrap().doc_id(), 9);
        assert_eq!(t.search_unsafe(3, &guard).unwrap().doc_id(), 3);
        assert!(t.search_unsafe(10, &guard).is_none());
        // Nested scopes from the inner `search` are fine.
        assert_eq!(t.search(0).unwrap().doc_id(), 3);
    }

    #[test]
    fn test_find_leaf_routes_to_containing_leaf() {
        let t = tree(1);
        for doc_id in 1..=16 {
            t.insert(doc_id);
        }

        let guard = t.node_manager().critical_scope();
        for doc_id in 1..=16 {
            let leaf = t.find_leaf(doc_id, &guard).unwrap();
            assert!(leaf.keys().iter().any(|k| k.doc_id() == doc_id), "doc {doc_id}");
        }

        let first = t.first_leaf(&guard).unwrap();
        assert!(first.prev().is_none());
        assert_eq!(first.first_key().unwrap().doc_id(), 1);
    }

    #[test]
    fn test_search_on_empty_tree() {
        let t = tree(4);
        let guard = t.node_manager().critical_scope();

        assert!(t.find_leaf(0, &guard).is_none());
        assert!(t.first_leaf(&guard).is_none());
        assert!(t.search_unsafe(0, &guard).is_none());
    }
}
