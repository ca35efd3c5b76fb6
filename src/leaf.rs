//! Filepath: src/leaf.rs
//!
//! Leaf node: sorted doc-ids with per-slot delete flags, linked into an
//! ascending sibling chain.
//!
//! # Concurrency Model
//!
//! A published leaf is only written by the single writer, in two ways:
//! - flag overwrite of an existing slot (one atomic store, no version bump);
//! - shift-insert while below capacity, inside a [`NodeVersion`] write
//!   section.
//!
//! Readers never lock. They snapshot a stable version, scan, and retry if
//! the version moved. A full leaf is never touched again: it is replaced by
//! two new leaves and retired.
//!
//! Sibling pointers are non-owning. New leaves get their own `prev`/`next`
//! before they are spliced into their neighbours with Release stores.

use std::fmt as StdFmt;
use std::mem;
use std::ptr::{self as StdPtr, NonNull};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicPtr};

use crate::key::{DocId, KeyType};
use crate::node::{NodeBase, max_slot};
use crate::nodeversion::NodeVersion;
use crate::ordering::{PUBLISH_ORD, READ_ORD, RELAXED};

/// Leaf header. The doc-id and delete-flag arrays trail it in the same slab.
#[repr(C)]
pub struct LeafNode {
    base: NodeBase,

    /// Seqlock for in-place shift-inserts.
    version: NodeVersion,

    prev: AtomicPtr<LeafNode>,
    next: AtomicPtr<LeafNode>,

    /// Start of `[AtomicI64; max_slot]` inside this slab.
    doc_ids: NonNull<AtomicI64>,

    /// Start of `[AtomicBool; max_slot]` inside this slab.
    deletes: NonNull<AtomicBool>,
}

// SAFETY: the trailing-array pointers are private to the node and only used
// to reach atomics; all shared mutation goes through those atomics.
unsafe impl Send for LeafNode {}
// SAFETY: see above.
unsafe impl Sync for LeafNode {}

const _: () = assert!(mem::size_of::<LeafNode>() % mem::align_of::<AtomicI64>() == 0);
const _: () = assert!(mem::align_of::<LeafNode>() <= crate::alloc::pool::SLAB_ALIGN);

impl LeafNode {
    const DOC_IDS_OFFSET: usize = mem::size_of::<Self>();

    const fn deletes_offset(max_slot_shift: u8) -> usize {
        Self::DOC_IDS_OFFSET + max_slot(max_slot_shift) * mem::size_of::<AtomicI64>()
    }

    /// Slab size for a leaf with `2^max_slot_shift` slots.
    #[inline]
    #[must_use]
    pub const fn memory(max_slot_shift: u8) -> usize {
        Self::deletes_offset(max_slot_shift) + max_slot(max_slot_shift) * mem::size_of::<AtomicBool>()
    }

    /// Zero `slab` and construct an empty leaf in it.
    ///
    /// # Safety
    ///
    /// `slab` is valid for writes of [`LeafNode::memory`]`(max_slot_shift)`
    /// bytes, aligned for `LeafNode`, and not in use.
    pub(crate) unsafe fn init(slab: NonNull<u8>, max_slot_shift: u8) -> NonNull<Self> {
        // SAFETY: caller guarantees the slab size; all-zero atomics are valid.
        unsafe { slab.as_ptr().write_bytes(0, Self::memory(max_slot_shift)) };

        // SAFETY: both offsets lie inside the slab.
        let doc_ids = unsafe { slab.add(Self::DOC_IDS_OFFSET) }.cast::<AtomicI64>();
        // SAFETY: as above.
        let deletes = unsafe { slab.add(Self::deletes_offset(max_slot_shift)) }.cast::<AtomicBool>();

        let node = slab.cast::<Self>();
        // SAFETY: aligned, sized and exclusively owned by the caller.
        unsafe {
            node.as_ptr().write(Self {
                base: NodeBase::new(true, max_slot_shift),
                version: NodeVersion::new(),
                prev: AtomicPtr::new(StdPtr::null_mut()),
                next: AtomicPtr::new(StdPtr::null_mut()),
                doc_ids,
                deletes,
            });
        }
        node
    }

    /// Common header.
    #[inline]
    #[must_use]
    pub const fn base(&self) -> &NodeBase {
        &self.base
    }

    /// Leaf seqlock.
    #[inline]
    #[must_use]
    pub const fn version(&self) -> &NodeVersion {
        &self.version
    }

    #[inline]
    fn doc_id_slot(&self, slot: usize) -> &AtomicI64 {
        debug_assert!(slot < self.base.max_slot(), "doc-id slot out of range");
        // SAFETY: `slot < max_slot`, inside the trailing array.
        unsafe { &*self.doc_ids.as_ptr().add(slot) }
    }

    #[inline]
    fn delete_slot(&self, slot: usize) -> &AtomicBool {
        debug_assert!(slot < self.base.max_slot(), "delete slot out of range");
        // SAFETY: `slot < max_slot`, inside the trailing array.
        unsafe { &*self.deletes.as_ptr().add(slot) }
    }

    #[inline]
    fn load_key(&self, slot: usize) -> KeyType {
        KeyType::new(
            self.doc_id_slot(slot).load(RELAXED),
            self.delete_slot(slot).load(RELAXED),
        )
    }

    /// Doc-id-only load for scans. Flags are only read for the hit slot.
    #[inline]
    fn load_doc_id(&self, slot: usize) -> DocId {
        self.doc_id_slot(slot).load(RELAXED)
    }

    // ========================================================================
    //  Sibling chain
    // ========================================================================

    /// Next leaf in ascending order, or `None` at the end of the chain.
    #[inline]
    #[must_use]
    pub fn next(&self) -> Option<NonNull<Self>> {
        NonNull::new(self.next.load(READ_ORD))
    }

    /// Previous leaf in ascending order, or `None` at the start.
    #[inline]
    #[must_use]
    pub fn prev(&self) -> Option<NonNull<Self>> {
        NonNull::new(self.prev.load(READ_ORD))
    }

    #[inline]
    pub(crate) fn set_next(&self, next: Option<NonNull<Self>>) {
        self.next
            .store(next.map_or(StdPtr::null_mut(), NonNull::as_ptr), PUBLISH_ORD);
    }

    #[inline]
    pub(crate) fn set_prev(&self, prev: Option<NonNull<Self>>) {
        self.prev
            .store(prev.map_or(StdPtr::null_mut(), NonNull::as_ptr), PUBLISH_ORD);
    }

    // ========================================================================
    //  Reader side (optimistic, validated)
    // ========================================================================

    /// Smallest key with `doc_id >= target` in this leaf.
    #[must_use]
    pub fn lower_bound(&self, target: DocId) -> Option<KeyType> {
        loop {
            let version: u32 = self.version.stable();
            let count: usize = self.base.count_relaxed().min(self.base.max_slot());

            let slot: usize = self.partition_point(count, target);
            let found: Option<KeyType> = (slot < count).then(|| self.load_key(slot));

            if !self.version.has_changed(version) {
                return found;
            }
        }
    }

    /// Smallest key in this leaf.
    #[inline]
    #[must_use]
    pub fn first_key(&self) -> Option<KeyType> {
        self.lower_bound(DocId::MIN)
    }

    /// Largest doc-id in this leaf.
    #[must_use]
    pub fn last_doc_id(&self) -> Option<DocId> {
        loop {
            let version: u32 = self.version.stable();
            let count: usize = self.base.count_relaxed().min(self.base.max_slot());
            let last: Option<DocId> = count.checked_sub(1).map(|slot| self.load_doc_id(slot));

            if !self.version.has_changed(version) {
                return last;
            }
        }
    }

    /// Consistent copy of every key.
    #[must_use]
    pub fn keys(&self) -> Vec<KeyType> {
        loop {
            let version: u32 = self.version.stable();
            let count: usize = self.base.count_relaxed().min(self.base.max_slot());
            let keys: Vec<KeyType> = (0..count).map(|slot| self.load_key(slot)).collect();

            if !self.version.has_changed(version) {
                return keys;
            }
        }
    }

    /// First slot in `0..count` whose doc-id is `>= target`.
    ///
    /// Under a concurrent shift the loads may be torn; the caller discards
    /// the result through version validation.
    fn partition_point(&self, count: usize, target: DocId) -> usize {
        let mut lo: usize = 0;
        let mut hi: usize = count;

        while lo < hi {
            let mid: usize = lo + (hi - lo) / 2;
            if self.load_doc_id(mid) < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    // ========================================================================
    //  Writer side
    // ========================================================================

    /// Locate `doc_id`: `Ok(slot)` if present, `Err(insert_position)` if not.
    ///
    /// Writer only; no validation needed since the writer is the sole mutator.
    #[must_use]
    pub(crate) fn search_slot(&self, doc_id: DocId) -> Result<usize, usize> {
        let count: usize = self.base.count_relaxed();
        let slot: usize = self.partition_point(count, doc_id);

        if slot < count && self.load_doc_id(slot) == doc_id {
            Ok(slot)
        } else {
            Err(slot)
        }
    }

    /// Overwrite the delete flag of an existing slot.
    #[inline]
    pub(crate) fn update_flag(&self, slot: usize, is_delete: bool) {
        debug_assert!(slot < self.base.count_relaxed());
        self.delete_slot(slot).store(is_delete, PUBLISH_ORD);
    }

    /// Shift-insert `key` at `pos` in place.
    ///
    /// # Panics
    ///
    /// Debug builds panic if the leaf is full or `pos` is past the end.
    pub(crate) fn insert_at(&self, pos: usize, key: KeyType) {
        let count: usize = self.base.count_relaxed();
        debug_assert!(count < self.base.max_slot(), "insert_at() on a full leaf");
        debug_assert!(pos <= count, "insert position past the end");

        let _write = self.version.begin_write();

        for slot in (pos..count).rev() {
            let moved: KeyType = self.load_key(slot);
            self.doc_id_slot(slot + 1).store(moved.doc_id(), RELAXED);
            self.delete_slot(slot + 1).store(moved.is_delete(), RELAXED);
        }
        self.doc_id_slot(pos).store(key.doc_id(), RELAXED);
        self.delete_slot(pos).store(key.is_delete(), RELAXED);
        self.base.set_count(count + 1);
    }

    /// Fill a fresh, unpublished leaf from sorted `keys`.
    pub(crate) fn fill(&self, keys: &[KeyType]) {
        debug_assert_eq!(self.base.count_relaxed(), 0, "fill() on a used leaf");
        debug_assert!(keys.len() <= self.base.max_slot());
        debug_assert!(keys.windows(2).all(|w| w[0].doc_id() < w[1].doc_id()));

        for (slot, key) in keys.iter().enumerate() {
            self.doc_id_slot(slot).store(key.doc_id(), RELAXED);
            self.delete_slot(slot).store(key.is_delete(), RELAXED);
        }
        self.base.set_count(keys.len());
    }
}

impl StdFmt::Debug for LeafNode {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("LeafNode")
            .field("max_slot_shift", &self.base.max_slot_shift())
            .field("count", &self.base.count())
            .field("version", &self.version.value())
            .field("keys", &self.keys())
            .finish_non_exhaustive()
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Fail fast in tests")]
mod tests {
    use super::*;
    use crate::alloc::pool::Pool;

    /// Leaf carved from a test-local pool.
    struct TestLeaf {
        pool: Pool,
        node: NonNull<LeafNode>,
        shift: u8,
    }

    impl TestLeaf {
        fn new(shift: u8) -> Self {
            let mut pool = Pool::new();
            let slab = pool.allocate(LeafNode::memory(shift));
            let node = unsafe { LeafNode::init(slab, shift) };
            Self { pool, node, shift }
        }

        fn leaf(&self) -> &LeafNode {
            unsafe { self.node.as_ref() }
        }
    }

    impl Drop for TestLeaf {
        fn drop(&mut self) {
            unsafe {
                self.pool
                    .deallocate(self.node.cast(), LeafNode::memory(self.shift));
            }
        }
    }

    fn key(doc_id: DocId) -> KeyType {
        KeyType::new(doc_id, false)
    }

    #[test]
    fn test_memory_layout() {
        assert_eq!(
            LeafNode::memory(2),
            mem::size_of::<LeafNode>() + 4 * mem::size_of::<AtomicI64>() + 4
        );
        assert!(LeafNode::memory(3) > LeafNode::memory(2));
    }

    #[test]
    fn test_new_leaf_is_empty() {
        let t = TestLeaf::new(2);
        let leaf = t.leaf();

        assert!(leaf.base().is_leaf());
        assert_eq!(leaf.base().count(), 0);
        assert!(leaf.next().is_none());
        assert!(leaf.prev().is_none());
        assert!(leaf.first_key().is_none());
        assert!(leaf.last_doc_id().is_none());
        assert_eq!(leaf.lower_bound(0), None);
    }

    #[test]
    fn test_insert_at_keeps_order() {
        let t = TestLeaf::new(3);
        let leaf = t.leaf();

        for doc_id in [50, 10, 30, 20, 40] {
            let pos = leaf.search_slot(doc_id).unwrap_err();
            leaf.insert_at(pos, key(doc_id));
        }

        let ids: Vec<DocId> = leaf.keys().iter().map(|k| k.doc_id()).collect();
        assert_eq!(ids, vec![10, 20, 30, 40, 50]);
        assert_eq!(leaf.last_doc_id(), Some(50));
        assert_eq!(leaf.version().value(), 10);
    }

    #[test]
    fn test_search_slot_and_update_flag() {
        let t = TestLeaf::new(2);
        let leaf = t.leaf();
        leaf.fill(&[key(5), key(7), key(9)]);

        assert_eq!(leaf.search_slot(7), Ok(1));
        assert_eq!(leaf.search_slot(8), Err(2));
        assert_eq!(leaf.search_slot(1), Err(0));
        assert_eq!(leaf.search_slot(99), Err(3));

        leaf.update_flag(1, true);
        assert!(leaf.lower_bound(7).unwrap().is_delete());
        // Flag overwrite does not open a write section.
        assert_eq!(leaf.version().value(), 0);
    }

    #[test]
    fn test_lower_bound() {
        let t = TestLeaf::new(2);
        let leaf = t.leaf();
        leaf.fill(&[key(10), key(20), key(30)]);

        assert_eq!(leaf.lower_bound(0).unwrap().doc_id(), 10);
        assert_eq!(leaf.lower_bound(10).unwrap().doc_id(), 10);
        assert_eq!(leaf.lower_bound(11).unwrap().doc_id(), 20);
        assert_eq!(leaf.lower_bound(30).unwrap().doc_id(), 30);
        assert!(leaf.lower_bound(31).is_none());
        assert_eq!(leaf.first_key().unwrap().doc_id(), 10);
    }

    #[test]
    fn test_full_leaf() {
        let t = TestLeaf::new(1);
        let leaf = t.leaf();

        leaf.insert_at(0, key(2));
        assert!(!leaf.base().is_full());
        leaf.insert_at(0, key(1));
        assert!(leaf.base().is_full());
    }

    #[test]
    fn test_sibling_links() {
        let a = TestLeaf::new(2);
        let b = TestLeaf::new(2);

        a.leaf().set_next(Some(b.node));
        b.leaf().set_prev(Some(a.node));

        assert_eq!(a.leaf().next(), Some(b.node));
        assert_eq!(b.leaf().prev(), Some(a.node));

        a.leaf().set_next(None);
        assert!(a.leaf().next().is_none());
    }
}
