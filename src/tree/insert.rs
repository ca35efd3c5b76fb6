//! Filepath: src/tree/insert.rs
//!
//! Writer-side insert path shared by `insert` and `remove`.
//!
//! The descent is recursive and reports what happened to the visited node:
//!
//! ```text
//!   Done                         nothing to publish above
//!   Replaced(new)                parent stores `new` into the child slot
//!   Split { left, right, sep }   parent must add `sep` and a child
//! ```
//!
//! Replaced nodes are collected while unwinding and retired only after the
//! new structure is published, followed by one `increase_epoch()`.

use std::ptr::NonNull;

use super::DynamicSearchTree;
use crate::internode::InternalNode;
use crate::key::{DocId, KeyType};
use crate::leaf::LeafNode;
use crate::node::{NodeBase, NodeRef};
use crate::ordering::PUBLISH_ORD;
use crate::tracing_helpers::{debug_log, trace_log};

/// Effect of an insert on one node, reported to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum InsertOutcome {
    /// Absorbed in place.
    Done,

    /// Node was copied; the parent must point at the copy.
    Replaced(NonNull<NodeBase>),

    /// Node was split; `separator` is the largest doc-id under `left`.
    Split {
        left: NonNull<NodeBase>,
        right: NonNull<NodeBase>,
        separator: DocId,
    },
}

impl DynamicSearchTree {
    /// Insert or overwrite `key`. Caller holds the writer lock.
    pub(super) fn insert_key(&self, key: KeyType) {
        let _guard = self.node_manager.critical_scope();

        let Some(root) = self.root_ptr() else {
            debug_assert!(!key.is_delete(), "tombstone on an empty tree");
            let leaf: NonNull<LeafNode> = self.node_manager.allocate_leaf_node(self.max_slot_shift);
            // SAFETY: freshly allocated, not yet published.
            unsafe { leaf.as_ref() }.fill(&[key]);
            self.root.store(leaf.cast().as_ptr(), PUBLISH_ORD);
            debug_log!(doc_id = key.doc_id(), "created root leaf");
            return;
        };

        let mut retired: Vec<NonNull<NodeBase>> = Vec::new();

        match self.insert_descend(root, key, &mut retired) {
            InsertOutcome::Done => {}

            InsertOutcome::Replaced(node) => {
                self.root.store(node.as_ptr(), PUBLISH_ORD);
            }

            InsertOutcome::Split {
                left,
                right,
                separator,
            } => {
                let new_root = self.build_internal(&[separator], &[left, right]);
                self.root.store(new_root.as_ptr(), PUBLISH_ORD);
                debug_log!(separator, "grew new root");
            }
        }

        if retired.is_empty() {
            return;
        }

        trace_log!(count = retired.len(), "retiring replaced nodes");
        for node in retired {
            // SAFETY: every retired node was unlinked by the stores above and
            // is retired exactly once.
            unsafe { self.node_manager.retire_node(node) };
        }
        self.node_manager.increase_epoch();
    }

    fn insert_descend(
        &self,
        node: NonNull<NodeBase>,
        key: KeyType,
        retired: &mut Vec<NonNull<NodeBase>>,
    ) -> InsertOutcome {
        // SAFETY: reachable from the root; only this writer frees nodes.
        match unsafe { NodeBase::classify(node) } {
            NodeRef::Leaf(leaf) => self.insert_into_leaf(node, leaf, key, retired),
            NodeRef::Internal(inode) => self.insert_into_internal(node, inode, key, retired),
        }
    }

    fn insert_into_leaf(
        &self,
        node: NonNull<NodeBase>,
        leaf: &LeafNode,
        key: KeyType,
        retired: &mut Vec<NonNull<NodeBase>>,
    ) -> InsertOutcome {
        match leaf.search_slot(key.doc_id()) {
            Ok(slot) => {
                leaf.update_flag(slot, key.is_delete());
                InsertOutcome::Done
            }

            Err(pos) if !leaf.base().is_full() => {
                leaf.insert_at(pos, key);
                InsertOutcome::Done
            }

            Err(pos) => {
                let outcome = self.split_leaf(leaf, pos, key);
                retired.push(node);
                outcome
            }
        }
    }

    fn insert_into_internal(
        &self,
        node: NonNull<NodeBase>,
        inode: &InternalNode,
        key: KeyType,
        retired: &mut Vec<NonNull<NodeBase>>,
    ) -> InsertOutcome {
        let slot: usize = inode.find_child_slot(key.doc_id());
        let Some(child) = inode.child(slot) else {
            unreachable!("internal node has no child at slot {slot}");
        };

        match self.insert_descend(child, key, retired) {
            InsertOutcome::Done => InsertOutcome::Done,

            InsertOutcome::Replaced(new_child) => {
                inode.set_child(slot, new_child);
                InsertOutcome::Done
            }

            InsertOutcome::Split {
                left,
                right,
                separator,
            } => {
                let mut keys: Vec<DocId> = inode.keys();
                let mut children: Vec<NonNull<NodeBase>> = inode.children();
                keys.insert(slot, separator);
                children[slot] = left;
                children.insert(slot + 1, right);

                retired.push(node);

                if keys.len() <= inode.base().max_slot() {
                    InsertOutcome::Replaced(self.build_internal(&keys, &children))
                } else {
                    self.split_internal(&keys, &children)
                }
            }
        }
    }

    /// Split a full leaf around the new key into two fresh leaves and splice
    /// them into the sibling chain in place of `leaf`.
    fn split_leaf(&self, leaf: &LeafNode, pos: usize, key: KeyType) -> InsertOutcome {
        let mut keys: Vec<KeyType> = leaf.keys();
        keys.insert(pos, key);

        let mid: usize = keys.len().div_ceil(2);
        let separator: DocId = keys[mid - 1].doc_id();

        let left_ptr: NonNull<LeafNode> = self.node_manager.allocate_leaf_node(self.max_slot_shift);
        let right_ptr: NonNull<LeafNode> = self.node_manager.allocate_leaf_node(self.max_slot_shift);
        // SAFETY: fresh allocations, unpublished.
        let (left, right) = unsafe { (left_ptr.as_ref(), right_ptr.as_ref()) };

        left.fill(&keys[..mid]);
        right.fill(&keys[mid..]);

        let prev: Option<NonNull<LeafNode>> = leaf.prev();
        let next: Option<NonNull<LeafNode>> = leaf.next();

        // New leaves first, so a reader reaching them finds a full chain.
        left.set_prev(prev);
        left.set_next(Some(right_ptr));
        right.set_prev(Some(left_ptr));
        right.set_next(next);

        // SAFETY: live neighbours of a live leaf.
        if let Some(prev) = prev {
            unsafe { prev.as_ref() }.set_next(Some(left_ptr));
        }
        // SAFETY: as above.
        if let Some(next) = next {
            unsafe { next.as_ref() }.set_prev(Some(right_ptr));
        }

        trace_log!(separator, left = mid, right = keys.len() - mid, "split leaf");

        InsertOutcome::Split {
            left: left_ptr.cast(),
            right: right_ptr.cast(),
            separator,
        }
    }

    /// Split an overfull key/child set into two fresh internal nodes.
    ///
    /// `keys` holds `max_slot + 1` separators, `children` one more.
    fn split_internal(&self, keys: &[DocId], children: &[NonNull<NodeBase>]) -> InsertOutcome {
        debug_assert_eq!(children.len(), keys.len() + 1);

        let mid: usize = keys.len() / 2;
        let separator: DocId = keys[mid];

        let left = self.build_internal(&keys[..mid], &children[..=mid]);
        let right = self.build_internal(&keys[mid + 1..], &children[mid + 1..]);

        trace_log!(separator, "split internal node");

        InsertOutcome::Split {
            left,
            right,
            separator,
        }
    }

    fn build_internal(&self, keys: &[DocId], children: &[NonNull<NodeBase>]) -> NonNull<NodeBase> {
        let node: NonNull<InternalNode> = self.node_manager.allocate_internal_node(self.max_slot_shift);
        // SAFETY: fresh allocation, unpublished.
        unsafe { node.as_ref() }.fill(keys, children);
        node.cast()
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
    fn test_in_place_insert_retires_nothing() {
        let t = tree(3);

        for doc_id in [4, 2, 6, 1] {
            t.insert(doc_id);
        }

        let reclaimer = t.node_manager().reclaimer();
        assert_eq!(reclaimer.total_retired(), 0);
        assert_eq!(t.stats().leaf_count, 1);
    }

    #[test]
    fn test_leaf_split_retires_old_leaf_and_grows_root() {
        let t = tree(1);
        let epoch_before = t.node_manager().reclaimer().global_epoch();

        t.insert(10);
        t.insert(20);
        t.insert(30);

        let stats = t.stats();
        assert_eq!(stats.height, 2);
        assert_eq!(stats.leaf_count, 2);
        assert_eq!(stats.internal_count, 1);
        assert_eq!(t.node_manager().reclaimer().total_retired(), 1);
        assert_eq!(t.node_manager().reclaimer().global_epoch(), epoch_before + 1);
        t.validate().unwrap();
    }

    #[test]
    fn test_split_keeps_sibling_chain() {
        let t = tree(1);

        for doc_id in [50, 10, 30, 20, 40, 60, 5] {
            t.insert(doc_id);
        }

        let guard = t.node_manager().critical_scope();
        let first = t.first_leaf(&guard).unwrap();

        let mut chain: Vec<DocId> = Vec::new();
        let mut prev: Option<NonNull<LeafNode>> = None;
        let mut cursor = Some(NonNull::from(first));
        while let Some(ptr) = cursor {
            let leaf = unsafe { ptr.as_ref() };
            assert_eq!(leaf.prev(), prev);
            chain.extend(leaf.keys().iter().map(|k| k.doc_id()));
            prev = Some(ptr);
            cursor = leaf.next();
        }

        assert_eq!(chain, vec![5, 10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn test_update_in_full_leaf_does_not_split() {
        let t = tree(1);
        t.insert(1);
        t.insert(2);

        t.remove(2);

        assert_eq!(t.stats().leaf_count, 1);
        assert_eq!(t.node_manager().reclaimer().total_retired(), 0);
        assert!(t.search(2).unwrap().is_delete());
    }

    #[test]
    fn test_internal_copy_on_write() {
        let t = tree(2);

        // Enough ascending keys for a two-level tree with spare root slots.
        for doc_id in 0..7 {
            t.insert(doc_id);
        }
        assert_eq!(t.stats().height, 2);
        let root_before = t.root_ptr().unwrap();

        // Splitting another leaf copies the root instead of editing it.
        for doc_id in 7..10 {
            t.insert(doc_id);
        }
        assert_ne!(t.root_ptr().unwrap(), root_before);
        assert_eq!(t.stats().height, 2);
        t.validate().unwrap();
    }
}
