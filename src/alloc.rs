//! Filepath: src/alloc.rs
//!
//! Node allocation for the search tree.
//!
//! [`NodeManager`] is the only allocator and deallocator of tree nodes. It
//! carves exact-size slabs out of a [`Pool`], placement-constructs nodes in
//! zeroed memory, and routes retired nodes through an
//! [`EpochBasedReclaimManager`] so they are freed only once no reader can
//! still hold them.
//!
//! # Accounting
//!
//! ```text
//! total_memory           = bytes live (published, unpublished or retired)
//! total_allocated_memory = lifetime bytes allocated
//! total_freed_memory     = lifetime bytes freed
//! retired_memory         = bytes retired but not yet freed
//!
//! total_memory == total_allocated_memory - total_freed_memory
//! ```

pub mod pool;

use std::fmt as StdFmt;
use std::ptr::NonNull;
use std::sync::atomic::AtomicUsize;

use parking_lot::Mutex;

use crate::config::ReclaimConfig;
use crate::epoch::{CriticalGuard, EpochBasedReclaimManager, Reclaim};
use crate::internode::InternalNode;
use crate::leaf::LeafNode;
use crate::node::{MAX_SLOT_SHIFT, NodeBase};
use crate::ordering::RELAXED;
use crate::tracing_helpers::trace_log;

pub use pool::Pool;

/// Snapshot of the node manager's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Bytes currently held by nodes (including retired ones).
    pub total_memory: usize,
    /// Lifetime bytes allocated.
    pub total_allocated_memory: usize,
    /// Lifetime bytes freed.
    pub total_freed_memory: usize,
    /// Bytes retired and waiting for reclamation.
    pub retired_memory: usize,
    /// Nodes retired and waiting for reclamation.
    pub retired_items: usize,
    /// Bytes the pool has requested from the global allocator.
    pub pool_chunk_bytes: usize,
    /// Current global epoch.
    pub global_epoch: u64,
}

/// Typed node allocation with deferred reclamation.
///
/// One `NodeManager` backs one tree. Allocation, retirement and the reclaim
/// calls belong to the single writer; [`critical_scope`](Self::critical_scope)
/// may be called from any thread.
pub struct NodeManager {
    reclaimer: EpochBasedReclaimManager,
    pool: Mutex<Pool>,

    total_memory: AtomicUsize,
    total_allocated_memory: AtomicUsize,
    total_freed_memory: AtomicUsize,
    retired_memory: AtomicUsize,
}

impl StdFmt::Debug for NodeManager {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("NodeManager")
            .field("stats", &self.memory_stats())
            .field("reclaimer", &self.reclaimer)
            .finish_non_exhaustive()
    }
}

impl Default for NodeManager {
    fn default() -> Self {
        Self::new(ReclaimConfig::global())
    }
}

impl NodeManager {
    /// Manager over an unbounded pool.
    #[must_use]
    pub fn new(config: ReclaimConfig) -> Self {
        Self::with_pool(config, Pool::new())
    }

    /// Manager whose pool may request at most `bytes` from the global
    /// allocator. Exceeding it aborts the process.
    #[must_use]
    pub fn with_pool_capacity(config: ReclaimConfig, bytes: usize) -> Self {
        Self::with_pool(config, Pool::new().with_capacity_limit(bytes))
    }

    /// Manager over a caller-built pool.
    #[must_use]
    pub fn with_pool(config: ReclaimConfig, pool: Pool) -> Self {
        Self {
            reclaimer: EpochBasedReclaimManager::new(config),
            pool: Mutex::new(pool),
            total_memory: AtomicUsize::new(0),
            total_allocated_memory: AtomicUsize::new(0),
            total_freed_memory: AtomicUsize::new(0),
            retired_memory: AtomicUsize::new(0),
        }
    }

    /// Underlying reclaim manager.
    #[inline]
    #[must_use]
    pub const fn reclaimer(&self) -> &EpochBasedReclaimManager {
        &self.reclaimer
    }

    // ========================================================================
    //  Allocation
    // ========================================================================

    fn allocate_slab(&self, bytes: usize) -> NonNull<u8> {
        let slab: NonNull<u8> = self.pool.lock().allocate(bytes);
        self.total_memory.fetch_add(bytes, RELAXED);
        self.total_allocated_memory.fetch_add(bytes, RELAXED);
        slab
    }

    /// Allocate an empty leaf with `2^max_slot_shift` slots.
    ///
    /// # Panics
    ///
    /// Panics if `max_slot_shift` is outside `1..=MAX_SLOT_SHIFT`.
    pub fn allocate_leaf_node(&self, max_slot_shift: u8) -> NonNull<LeafNode> {
        assert!(
            (1..=MAX_SLOT_SHIFT).contains(&max_slot_shift),
            "max_slot_shift {max_slot_shift} out of range"
        );

        let bytes: usize = LeafNode::memory(max_slot_shift);
        let slab: NonNull<u8> = self.allocate_slab(bytes);
        trace_log!(bytes, "allocated leaf");

        // SAFETY: fresh slab of `bytes`, aligned to the pool's slab alignment.
        unsafe { LeafNode::init(slab, max_slot_shift) }
    }

    /// Allocate an empty internal node with `2^max_slot_shift` keys.
    ///
    /// # Panics
    ///
    /// Panics if `max_slot_shift` is outside `1..=MAX_SLOT_SHIFT`.
    pub fn allocate_internal_node(&self, max_slot_shift: u8) -> NonNull<InternalNode> {
        assert!(
            (1..=MAX_SLOT_SHIFT).contains(&max_slot_shift),
            "max_slot_shift {max_slot_shift} out of range"
        );

        let bytes: usize = InternalNode::memory(max_slot_shift);
        let slab: NonNull<u8> = self.allocate_slab(bytes);
        trace_log!(bytes, "allocated internal node");

        // SAFETY: fresh slab of `bytes`, aligned to the pool's slab alignment.
        unsafe { InternalNode::init(slab, max_slot_shift) }
    }

    // ========================================================================
    //  Release
    // ========================================================================

    /// Hand a replaced node to the reclaim manager.
    ///
    /// # Safety
    ///
    /// - `node` came from this manager and is unlinked from every structure
    ///   a reader entering a new critical section could reach.
    /// - `node` is retired at most once and not freed by other means.
    pub unsafe fn retire_node(&self, node: NonNull<NodeBase>) {
        // SAFETY: still live until reclaimed.
        let bytes: usize = unsafe { node.as_ref() }.memory();
        self.retired_memory.fetch_add(bytes, RELAXED);

        // SAFETY: forwarded from the caller.
        unsafe { self.reclaimer.retire(node.cast(), self) };
    }

    /// Free a node that no reader can reach, bypassing the epoch queue.
    ///
    /// # Safety
    ///
    /// `node` came from this manager, was never retired, and no thread can
    /// dereference it (never published, or the owning tree is being dropped).
    pub unsafe fn free_unpublished(&self, node: NonNull<NodeBase>) {
        // SAFETY: caller guarantees a live node.
        let bytes: usize = unsafe { node.as_ref() }.memory();
        self.release(node.cast(), bytes);
    }

    fn release(&self, addr: NonNull<u8>, bytes: usize) {
        self.total_memory.fetch_sub(bytes, RELAXED);
        self.total_freed_memory.fetch_add(bytes, RELAXED);

        // SAFETY: `addr` was carved from this pool with a slab of `bytes`.
        unsafe { self.pool.lock().deallocate(addr, bytes) };
    }

    // ========================================================================
    //  Epoch pass-throughs
    // ========================================================================

    /// Enter a reader critical section on the calling thread.
    #[inline]
    pub fn critical_scope(&self) -> CriticalGuard<'_> {
        self.reclaimer.critical_scope()
    }

    /// Advance the global epoch.
    #[inline]
    pub fn increase_epoch(&self) -> u64 {
        self.reclaimer.increase_epoch()
    }

    /// Rate-limited reclaim attempt. Returns the number of freed nodes.
    #[inline]
    pub fn try_reclaim(&self) -> usize {
        self.reclaimer.try_reclaim(self)
    }

    /// Reclaim attempt ignoring the rate limit.
    #[inline]
    pub fn force_reclaim(&self) -> usize {
        self.reclaimer.force_reclaim(self)
    }

    // ========================================================================
    //  Accounting
    // ========================================================================

    /// Bytes currently held by nodes.
    #[inline]
    #[must_use]
    pub fn total_memory(&self) -> usize {
        self.total_memory.load(RELAXED)
    }

    /// Lifetime bytes allocated.
    #[inline]
    #[must_use]
    pub fn total_allocated_memory(&self) -> usize {
        self.total_allocated_memory.load(RELAXED)
    }

    /// Lifetime bytes freed.
    #[inline]
    #[must_use]
    pub fn total_freed_memory(&self) -> usize {
        self.total_freed_memory.load(RELAXED)
    }

    /// Bytes retired and not yet freed.
    #[inline]
    #[must_use]
    pub fn retired_memory(&self) -> usize {
        self.retired_memory.load(RELAXED)
    }

    /// Snapshot of every counter.
    #[must_use]
    pub fn memory_stats(&self) -> MemoryStats {
        MemoryStats {
            total_memory: self.total_memory(),
            total_allocated_memory: self.total_allocated_memory(),
            total_freed_memory: self.total_freed_memory(),
            retired_memory: self.retired_memory(),
            retired_items: self.reclaimer.retired_items(),
            pool_chunk_bytes: self.pool.lock().chunk_bytes(),
            global_epoch: self.reclaimer.global_epoch(),
        }
    }
}

impl Reclaim for NodeManager {
    unsafe fn free(&self, addr: NonNull<u8>) {
        // SAFETY: only node slabs are retired through this manager, and the
        // header is intact until the slab goes back to the pool.
        let bytes: usize = unsafe { addr.cast::<NodeBase>().as_ref() }.memory();

        self.retired_memory.fetch_sub(bytes, RELAXED);
        self.release(addr, bytes);
    }
}

impl Drop for NodeManager {
    fn drop(&mut self) {
        // SAFETY: `&mut self` proves no tree or reader still borrows us.
        let _drained: usize = unsafe { self.reclaimer.drain_all(&*self) };
        debug_assert_eq!(self.retired_memory(), 0);
    }
}

// ============================================================================
//  Tests
// ============================================================================
