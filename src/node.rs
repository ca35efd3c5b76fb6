//! Filepath: src/node.rs
//!
//! Common node header and type dispatch.
//!
//! Both node kinds are runtime-sized slabs: a `#[repr(C)]` header whose
//! first field is [`NodeBase`], followed by trailing arrays whose length is
//! fixed by `max_slot_shift`. A `NonNull<NodeBase>` therefore identifies any
//! node, and [`NodeBase::classify`] recovers the concrete type from the
//! `is_leaf` tag.
//!
//! # Memory Layout
//!
//! ```text
//! LeafNode slab                       InternalNode slab
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │ NodeBase (tag/shift/cnt) │        │ NodeBase (tag/shift/cnt) │
//! │ NodeVersion              │        │ keys ptr, children ptr   │
//! │ prev / next              │        ├──────────────────────────┤
//! │ doc_ids ptr, deletes ptr │        │ keys:     [AtomicI64; M] │
//! ├──────────────────────────┤        │ children: [ptr; M + 1]   │
//! │ doc_ids: [AtomicI64; M]  │        └──────────────────────────┘
//! │ deletes: [AtomicBool; M] │
//! └──────────────────────────┘        M = 2^max_slot_shift
//! ```

use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;

use crate::internode::InternalNode;
use crate::leaf::LeafNode;
use crate::ordering::{PUBLISH_ORD, READ_ORD, RELAXED};

/// Largest supported `max_slot_shift` (65536 slots per node).
pub const MAX_SLOT_SHIFT: u8 = 16;

/// Slots per node for a given shift.
#[inline]
#[must_use]
pub const fn max_slot(max_slot_shift: u8) -> usize {
    1usize << max_slot_shift
}

/// Header shared by every node. Always the first field of the node struct.
#[derive(Debug)]
#[repr(C)]
pub struct NodeBase {
    /// Type tag. Immutable after construction.
    is_leaf: bool,

    /// Fan-out exponent. Immutable after construction.
    max_slot_shift: u8,

    /// Number of keys in use.
    count: AtomicU32,
}

/// Typed view of a node.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    /// A leaf node.
    Leaf(&'a LeafNode),
    /// An internal routing node.
    Internal(&'a InternalNode),
}

impl NodeBase {
    pub(crate) const fn new(is_leaf: bool, max_slot_shift: u8) -> Self {
        Self {
            is_leaf,
            max_slot_shift,
            count: AtomicU32::new(0),
        }
    }

    /// Whether this node is a leaf.
    #[inline]
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    /// Fan-out exponent.
    #[inline]
    #[must_use]
    pub const fn max_slot_shift(&self) -> u8 {
        self.max_slot_shift
    }

    /// Slot capacity.
    #[inline]
    #[must_use]
    pub const fn max_slot(&self) -> usize {
        max_slot(self.max_slot_shift)
    }

    /// Number of keys in use (Acquire).
    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(READ_ORD) as usize
    }

    /// Number of keys in use, for loads already ordered by a version check
    /// or made by the writer.
    #[inline]
    #[must_use]
    pub(crate) fn count_relaxed(&self) -> usize {
        self.count.load(RELAXED) as usize
    }

    #[inline]
    pub(crate) fn set_count(&self, count: usize) {
        debug_assert!(count <= self.max_slot());
        #[expect(clippy::cast_possible_truncation, reason = "count <= 2^16")]
        self.count.store(count as u32, PUBLISH_ORD);
    }

    /// Whether every slot is used.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.count_relaxed() >= self.max_slot()
    }

    /// Byte footprint of this node's slab.
    #[inline]
    #[must_use]
    pub const fn memory(&self) -> usize {
        if self.is_leaf {
            LeafNode::memory(self.max_slot_shift)
        } else {
            InternalNode::memory(self.max_slot_shift)
        }
    }

    /// Typed view of the node behind `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` points to a live, fully constructed node that stays valid for
    /// `'a` (for readers: the caller holds a critical guard).
    #[inline]
    #[must_use]
    pub unsafe fn classify<'a>(ptr: NonNull<Self>) -> NodeRef<'a> {
        // SAFETY: caller guarantees a live node; the tag is immutable.
        let base: &Self = unsafe { ptr.as_ref() };

        if base.is_leaf {
            // SAFETY: tag says leaf; `NodeBase` is the first field of the
            // `#[repr(C)]` leaf header.
            NodeRef::Leaf(unsafe { ptr.cast::<LeafNode>().as_ref() })
        } else {
            // SAFETY: tag says internal, same layout argument.
            NodeRef::Internal(unsafe { ptr.cast::<InternalNode>().as_ref() })
        }
    }
}

impl NodeRef<'_> {
    /// Header of the viewed node.
    #[inline]
    #[must_use]
    pub const fn base(&self) -> &NodeBase {
        match self {
            Self::Leaf(leaf) => leaf.base(),
            Self::Internal(inode) => inode.base(),
        }
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_slot() {
        assert_eq!(max_slot(1), 2);
        assert_eq!(max_slot(2), 4);
        assert_eq!(max_slot(MAX_SLOT_SHIFT), 65536);
    }

    #[test]
    fn test_base_accessors() {
        let base = NodeBase::new(true, 3);

        assert!(base.is_leaf());
        assert_eq!(base.max_slot_shift(), 3);
        assert_eq!(base.max_slot(), 8);
        assert_eq!(base.count(), 0);
        assert!(!base.is_full());

        base.set_count(8);
        assert!(base.is_full());
        assert_eq!(base.memory(), LeafNode::memory(3));
    }

    #[test]
    fn test_internal_memory_dispatch() {
        let base = NodeBase::new(false, 4);
        assert_eq!(base.memory(), InternalNode::memory(4));
    }
}
