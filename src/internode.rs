//! Filepath: src/internode.rs
//!
//! Internal routing node: `count` separator keys and `count + 1` children.
//!
//! Separator `Key(i)` is an inclusive upper bound for child `i`:
//!
//! ```text
//!   child 0      : doc_id <= Key(0)
//!   child i      : Key(i-1) < doc_id <= Key(i)
//!   child count  : doc_id > Key(count-1)
//! ```
//!
//! Keys of a published internal node never change. The writer may replace
//! a child pointer in place (Release store); adding a separator always goes
//! through a new node.

use std::fmt as StdFmt;
use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI64, AtomicPtr};

use crate::key::DocId;
use crate::node::{NodeBase, max_slot};
use crate::ordering::{PUBLISH_ORD, READ_ORD, RELAXED};

/// Internal node header. Key and child arrays trail it in the same slab.
#[repr(C)]
pub struct InternalNode {
    base: NodeBase,

    /// Start of `[AtomicI64; max_slot]` inside this slab.
    keys: NonNull<AtomicI64>,

    /// Start of `[AtomicPtr<NodeBase>; max_slot + 1]` inside this slab.
    children: NonNull<AtomicPtr<NodeBase>>,
}

// SAFETY: the trailing-array pointers only reach atomics owned by the slab.
unsafe impl Send for InternalNode {}
// SAFETY: see above.
unsafe impl Sync for InternalNode {}

const _: () = assert!(mem::size_of::<InternalNode>() % mem::align_of::<AtomicI64>() == 0);
const _: () = assert!(mem::align_of::<AtomicI64>() == mem::align_of::<AtomicPtr<NodeBase>>());

impl InternalNode {
    const KEYS_OFFSET: usize = mem::size_of::<Self>();

    const fn children_offset(max_slot_shift: u8) -> usize {
        Self::KEYS_OFFSET + max_slot(max_slot_shift) * mem::size_of::<AtomicI64>()
    }

    /// Slab size for a node with `2^max_slot_shift` keys.
    #[inline]
    #[must_use]
    pub const fn memory(max_slot_shift: u8) -> usize {
        Self::children_offset(max_slot_shift)
            + (max_slot(max_slot_shift) + 1) * mem::size_of::<AtomicPtr<NodeBase>>()
    }

    /// Zero `slab` and construct an empty internal node in it.
    ///
    /// # Safety
    ///
    /// `slab` is valid for writes of [`InternalNode::memory`]`(max_slot_shift)`
    /// bytes, aligned for `InternalNode`, and not in use.
    pub(crate) unsafe fn init(slab: NonNull<u8>, max_slot_shift: u8) -> NonNull<Self> {
        // SAFETY: caller guarantees the slab size; null pointers and zero
        // keys are valid atomics.
        unsafe { slab.as_ptr().write_bytes(0, Self::memory(max_slot_shift)) };

        // SAFETY: both offsets lie inside the slab.
        let keys = unsafe { slab.add(Self::KEYS_OFFSET) }.cast::<AtomicI64>();
        // SAFETY: as above.
        let children =
            unsafe { slab.add(Self::children_offset(max_slot_shift)) }.cast::<AtomicPtr<NodeBase>>();

        let node = slab.cast::<Self>();
        // SAFETY: aligned, sized and exclusively owned by the caller.
        unsafe {
            node.as_ptr().write(Self {
                base: NodeBase::new(false, max_slot_shift),
                keys,
                children,
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

    #[inline]
    fn key_slot(&self, slot: usize) -> &AtomicI64 {
        debug_assert!(slot < self.base.max_slot(), "key slot out of range");
        // SAFETY: inside the trailing key array.
        unsafe { &*self.keys.as_ptr().add(slot) }
    }

    #[inline]
    fn child_slot(&self, slot: usize) -> &AtomicPtr<NodeBase> {
        debug_assert!(slot <= self.base.max_slot(), "child slot out of range");
        // SAFETY: inside the trailing child array (`max_slot + 1` entries).
        unsafe { &*self.children.as_ptr().add(slot) }
    }

    /// Separator `slot`.
    #[inline]
    #[must_use]
    pub fn key(&self, slot: usize) -> DocId {
        self.key_slot(slot).load(RELAXED)
    }

    /// Child `slot` (`0..=count`).
    #[inline]
    #[must_use]
    pub fn child(&self, slot: usize) -> Option<NonNull<NodeBase>> {
        NonNull::new(self.child_slot(slot).load(READ_ORD))
    }

    /// Replace child `slot` in place.
    #[inline]
    pub(crate) fn set_child(&self, slot: usize, child: NonNull<NodeBase>) {
        debug_assert!(slot <= self.base.count_relaxed());
        self.child_slot(slot).store(child.as_ptr(), PUBLISH_ORD);
    }

    /// First slot whose separator is `>= doc_id`, or `count`.
    #[must_use]
    pub fn find_child_slot(&self, doc_id: DocId) -> usize {
        let count: usize = self.base.count();

        // TODO: binary search once fan-outs above 2^6 are common.
        (0..count)
            .find(|&slot| self.key(slot) >= doc_id)
            .unwrap_or(count)
    }

    /// Separators in slot order.
    #[must_use]
    pub fn keys(&self) -> Vec<DocId> {
        (0..self.base.count()).map(|slot| self.key(slot)).collect()
    }

    /// Children in slot order (`count + 1` entries for a filled node).
    #[must_use]
    pub fn children(&self) -> Vec<NonNull<NodeBase>> {
        let count: usize = self.base.count();
        (0..=count).filter_map(|slot| self.child(slot)).collect()
    }

    /// Fill a fresh, unpublished node.
    pub(crate) fn fill(&self, keys: &[DocId], children: &[NonNull<NodeBase>]) {
        debug_assert_eq!(self.base.count_relaxed(), 0, "fill() on a used node");
        debug_assert!(!keys.is_empty() && keys.len() <= self.base.max_slot());
        debug_assert_eq!(children.len(), keys.len() + 1);
        debug_assert!(keys.windows(2).all(|w| w[0] < w[1]));

        for (slot, &key) in keys.iter().enumerate() {
            self.key_slot(slot).store(key, RELAXED);
        }
        for (slot, child) in children.iter().enumerate() {
            self.child_slot(slot).store(child.as_ptr(), RELAXED);
        }
        // Release: publishes the stores above to anyone who reads the count.
        self.base.set_count(keys.len());
    }
}

impl StdFmt::Debug for InternalNode {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("InternalNode")
            .field("max_slot_shift", &self.base.max_slot_shift())
            .field("keys", &self.keys())
            .finish_non_exhaustive()
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::pool::Pool;

    #[test]
    fn test_memory_layout() {
        let header = mem::size_of::<InternalNode>();
        assert_eq!(InternalNode::memory(2), header + 4 * 8 + 5 * 8);
    }

    #[test]
    fn test_fill_and_route() {
        let mut pool = Pool::new();
        let shift: u8 = 2;

        let node_slab = pool.allocate(InternalNode::memory(shift));
        let node = unsafe { InternalNode::init(node_slab, shift) };
        let node = unsafe { node.as_ref() };

        // Dummy, never dereferenced child addresses.
        let children: Vec<NonNull<NodeBase>> = (0..4)
            .map(|_| pool.allocate(64).cast::<NodeBase>())
            .collect();

        node.fill(&[10, 20, 30], &children);

        assert!(!node.base().is_leaf());
        assert_eq!(node.keys(), vec![10, 20, 30]);
        assert_eq!(node.children(), children);

        assert_eq!(node.find_child_slot(i64::MIN), 0);
        assert_eq!(node.find_child_slot(10), 0);
        assert_eq!(node.find_child_slot(11), 1);
        assert_eq!(node.find_child_slot(20), 1);
        assert_eq!(node.find_child_slot(30), 2);
        assert_eq!(node.find_child_slot(31), 3);

        node.set_child(3, children[0]);
        assert_eq!(node.child(3), Some(children[0]));
        assert_eq!(node.child(4), None);

        unsafe { pool.deallocate(node_slab, InternalNode::memory(shift)) };
        for child in children {
            unsafe { pool.deallocate(child.cast(), 64) };
        }
    }
}
