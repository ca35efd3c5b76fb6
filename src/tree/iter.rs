//! Filepath: src/tree/iter.rs
//!
//! Forward cursor over the leaf chain.
//!
//! A [`TreeIterator`] pins the reclamation epoch for its whole lifetime:
//! nothing retired after it was created is freed until it is dropped. Keep
//! iterators short-lived.

use std::fmt as StdFmt;
use std::ptr::NonNull;

use super::DynamicSearchTree;
use super::search::successor_from;
use crate::epoch::CriticalGuard;
use crate::key::{DocId, INVALID_DOCID, KeyType};
use crate::leaf::LeafNode;

/// Monotonic cursor created by [`DynamicSearchTree::create_iterator`].
///
/// Successive [`seek`](Self::seek) results have strictly increasing
/// doc-ids, even if the writer shifts keys under the current leaf.
pub struct TreeIterator<'t> {
    tree: &'t DynamicSearchTree,
    guard: CriticalGuard<'t>,

    /// Leaf that produced the last result.
    leaf: Option<NonNull<LeafNode>>,

    /// Doc-id of the last result.
    last: Option<DocId>,
}

impl StdFmt::Debug for TreeIterator<'_> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("TreeIterator")
            .field("epoch", &self.guard.epoch())
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}

impl DynamicSearchTree {
    /// Open a cursor. Holds a critical section until dropped.
    pub fn create_iterator(&self) -> TreeIterator<'_> {
        TreeIterator {
            tree: self,
            guard: self.node_manager.critical_scope(),
            leaf: None,
            last: None,
        }
    }
}

impl TreeIterator<'_> {
    /// Smallest key with `doc_id' >= max(doc_id, last + 1)`.
    ///
    /// Returns `None` once the tree holds nothing beyond that bound.
    pub fn seek(&mut self, doc_id: DocId) -> Option<KeyType> {
        let target: DocId = match self.last {
            Some(last) => doc_id.max(last.checked_add(1)?),
            None => doc_id,
        };

        let found: Option<KeyType> = self
            .seek_from_cursor(target)
            .or_else(|| self.seek_from_root(target));

        if let Some(key) = found {
            self.last = Some(key.doc_id());
        }
        found
    }

    /// Doc-id of the last key returned.
    #[inline]
    #[must_use]
    pub const fn last_doc_id(&self) -> Option<DocId> {
        self.last
    }

    /// Try the current leaf, then its right neighbour.
    fn seek_from_cursor(&mut self, target: DocId) -> Option<KeyType> {
        // SAFETY: reached inside `self.guard`'s critical section.
        let leaf: &LeafNode = unsafe { self.leaf?.as_ref() };

        if let Some(key) = leaf.lower_bound(target) {
            return Some(key);
        }

        let next: NonNull<LeafNode> = leaf.next()?;
        // SAFETY: as above.
        let key: KeyType = unsafe { next.as_ref() }.lower_bound(target)?;
        self.leaf = Some(next);
        Some(key)
    }

    fn seek_from_root(&mut self, target: DocId) -> Option<KeyType> {
        let leaf: &LeafNode = self.tree.find_leaf(target, &self.guard)?;
        let (holder, key) = successor_from(leaf, target)?;

        self.leaf = Some(holder);
        Some(key)
    }
}

impl Iterator for TreeIterator<'_> {
    type Item = KeyType;

    fn next(&mut self) -> Option<KeyType> {
        self.seek(INVALID_DOCID)
    }
}

// ============================================================================
//  Tests
// ============================================================================
