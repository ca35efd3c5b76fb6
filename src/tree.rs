//! Filepath: src/tree.rs
//! `DynamicSearchTree` - single-writer, lock-free-reader posting tree.
//!
//! Keys are document ids with a tombstone flag. The writer inserts and
//! tombstones through a recursive descent; readers search and iterate
//! inside epoch critical sections without taking any lock.
//!
//! # Structure
//!
//! ```text
//!                 root (AtomicPtr)
//!                   │
//!             ┌─────┴─────┐
//!          [ 40 | 90 ]           internal: copy-on-write, child slots
//!          /    |    \           replaced in place
//!   [10 20 40]→[55 90]→[95 99]   leaves: in-place below capacity,
//!                                split into two new leaves when full
//! ```
//!
//! Replaced nodes are retired through the [`NodeManager`] and freed once
//! every reader that could have seen them has left its critical section.

use std::fmt as StdFmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicPtr, AtomicUsize};

use parking_lot::Mutex;

use crate::alloc::NodeManager;
use crate::key::{DocId, INVALID_DOCID, KeyType};
use crate::node::{MAX_SLOT_SHIFT, NodeBase, NodeRef};
use crate::ordering::{READ_ORD, RELAXED};

mod debug;
mod insert;
mod iter;
mod search;

pub use debug::{TreeError, TreeStats};
pub use iter::TreeIterator;

// ============================================================================
//  DynamicSearchTree
// ============================================================================

/// Ordered set of document ids with tombstones.
///
/// `insert` and `remove` belong to one writer thread at a time (a second
/// writer blocks on an internal mutex). `search` and iterators may run on
/// any number of threads concurrently with the writer.
///
/// Doc-ids are expected to be non-negative; [`INVALID_DOCID`] is `-1`.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use dynamic_search_tree::{DynamicSearchTree, NodeManager, ReclaimConfig};
///
/// let manager = Arc::new(NodeManager::new(ReclaimConfig::default()));
/// let tree = DynamicSearchTree::new(4, manager);
///
/// tree.insert(100);
/// tree.insert(10);
/// tree.remove(10);
///
/// assert_eq!(tree.search(0).map(|k| k.doc_id()), Some(10));
/// assert!(tree.search(10).is_some_and(|k| k.is_delete()));
/// assert_eq!(tree.search(11).map(|k| k.doc_id()), Some(100));
/// assert!(tree.search(101).is_none());
/// ```
pub struct DynamicSearchTree {
    /// Null iff the tree is empty.
    root: AtomicPtr<NodeBase>,

    max_slot_shift: u8,
    node_manager: Arc<NodeManager>,

    /// Serialises writers. Never taken by readers.
    writer: Mutex<()>,

    min_doc_id: AtomicI64,
    max_doc_id: AtomicI64,
    doc_count: AtomicUsize,
}

impl StdFmt::Debug for DynamicSearchTree {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("DynamicSearchTree")
            .field("max_slot_shift", &self.max_slot_shift)
            .field("min_doc_id", &self.min_doc_id())
            .field("max_doc_id", &self.max_doc_id())
            .field("estimate_doc_count", &self.estimate_doc_count())
            .finish_non_exhaustive()
    }
}

impl DynamicSearchTree {
    /// Create an empty tree with `2^max_slot_shift` slots per node.
    ///
    /// # Panics
    ///
    /// Panics if `max_slot_shift` is outside `1..=MAX_SLOT_SHIFT`.
    #[must_use]
    pub fn new(max_slot_shift: u8, node_manager: Arc<NodeManager>) -> Self {
        assert!(
            (1..=MAX_SLOT_SHIFT).contains(&max_slot_shift),
            "max_slot_shift must be in 1..={MAX_SLOT_SHIFT}, got {max_slot_shift}"
        );

        Self {
            root: AtomicPtr::new(std::ptr::null_mut()),
            max_slot_shift,
            node_manager,
            writer: Mutex::new(()),
            min_doc_id: AtomicI64::new(INVALID_DOCID),
            max_doc_id: AtomicI64::new(INVALID_DOCID),
            doc_count: AtomicUsize::new(0),
        }
    }

    // ========================================================================
    //  Accessors
    // ========================================================================

    /// Fan-out exponent.
    #[inline]
    #[must_use]
    pub const fn max_slot_shift(&self) -> u8 {
        self.max_slot_shift
    }

    /// Whether nothing was ever inserted or removed.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.load(READ_ORD).is_null()
    }

    /// Smallest doc-id ever passed to [`insert`](Self::insert), or
    /// [`INVALID_DOCID`].
    #[inline]
    #[must_use]
    pub fn min_doc_id(&self) -> DocId {
        self.min_doc_id.load(RELAXED)
    }

    /// Largest doc-id ever passed to [`insert`](Self::insert), or
    /// [`INVALID_DOCID`].
    #[inline]
    #[must_use]
    pub fn max_doc_id(&self) -> DocId {
        self.max_doc_id.load(RELAXED)
    }

    /// Number of `insert` calls. Removes do not decrement it.
    #[inline]
    #[must_use]
    pub fn estimate_doc_count(&self) -> usize {
        self.doc_count.load(RELAXED)
    }

    /// Node manager backing this tree.
    #[inline]
    #[must_use]
    pub const fn node_manager(&self) -> &Arc<NodeManager> {
        &self.node_manager
    }

    #[inline]
    pub(crate) fn root_ptr(&self) -> Option<NonNull<NodeBase>> {
        NonNull::new(self.root.load(READ_ORD))
    }

    // ========================================================================
    //  Writer API
    // ========================================================================

    /// Insert `doc_id` as a live key. Overwrites a tombstone for the same id.
    ///
    /// Always returns `true`. `doc_id` must be non-negative.
    pub fn insert(&self, doc_id: DocId) -> bool {
        debug_assert!(doc_id >= 0, "doc-ids are non-negative, got {doc_id}");
        let _writer = self.writer.lock();

        if self.min_doc_id() == INVALID_DOCID || doc_id < self.min_doc_id() {
            self.min_doc_id.store(doc_id, RELAXED);
        }
        if self.max_doc_id() == INVALID_DOCID || doc_id > self.max_doc_id() {
            self.max_doc_id.store(doc_id, RELAXED);
        }
        self.doc_count.fetch_add(1, RELAXED);

        self.insert_key(KeyType::new(doc_id, false));
        true
    }

    /// Write a tombstone for `doc_id`, inserting one if the id is absent.
    ///
    /// Returns `false` and leaves the tree untouched when it is empty.
    pub fn remove(&self, doc_id: DocId) -> bool {
        debug_assert!(doc_id >= 0, "doc-ids are non-negative, got {doc_id}");
        let _writer = self.writer.lock();

        // Only the writer publishes a root, so this cannot race.
        if self.root_ptr().is_none() {
            return false;
        }

        self.insert_key(KeyType::new(doc_id, true));
        true
    }
}

impl StdFmt::Display for DynamicSearchTree {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.write_str(&self.debug_string())
    }
}

impl Drop for DynamicSearchTree {
    fn drop(&mut self) {
        let Some(root) = NonNull::new(*self.root.get_mut()) else {
            return;
        };

        let mut stack: Vec<NonNull<NodeBase>> = vec![root];
        while let Some(node) = stack.pop() {
            // SAFETY: `&mut self` excludes readers; every reachable node is live.
            if let NodeRef::Internal(inode) = unsafe { NodeBase::classify(node) } {
                stack.extend(inode.children());
            }
            // SAFETY: reachable nodes are never in the retirement queue.
            unsafe { self.node_manager.free_unpublished(node) };
        }
    }
}

// ============================================================================
//  Tests
// ============================================================================
