//! Filepath: src/epoch.rs
//!
//! Epoch-based deferred reclamation for one writer and many readers.
//!
//! # Protocol
//!
//! ```text
//!  reader                                  writer
//!  ------                                  ------
//!  critical_scope():                       unlink node N (Release store)
//!    epoch  <- global_epoch                retire(N)  -> queue (N, global_epoch)
//!    active <- 1            (Release)      increase_epoch()
//!    fence(SeqCst)                         try_reclaim():
//!  walk pointers                             fence(SeqCst)
//!  drop guard:                               min = min epoch over active records
//!    active <- 0            (Release)        free queue head while epoch < min
//! ```
//!
//! A reader that announced epoch `e` may hold pointers to any node retired
//! at an epoch `>= e`, so only items retired strictly before the oldest
//! active epoch are released. With no active reader, everything retired
//! before the current global epoch is released.
//!
//! Per-thread records live in a [`ThreadLocal`] owned by the manager. A
//! record is created on the thread's first `critical_scope()` and is reused
//! by later threads that recycle the same slot after the first one exits.

use std::collections::VecDeque;
use std::fmt as StdFmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, fence};
use std::time::Instant;

use parking_lot::Mutex;
use thread_local::ThreadLocal;

use crate::config::ReclaimConfig;
use crate::ordering::{EPOCH_FENCE, PUBLISH_ORD, READ_ORD, RELAXED};
use crate::tracing_helpers::{debug_log, trace_log};


/// First value of the global epoch. Starting above zero keeps
/// `global_epoch - 1` meaningful before the first advance.
const INITIAL_EPOCH: u64 = 1;

// ============================================================================
//  Reclaim trait
// ============================================================================

/// Final release of a retired block.
///
/// Implemented by the owner of the memory (the node manager); the epoch
/// manager only decides *when* a block may be handed back.
pub trait Reclaim {
    /// Release `addr` to its backing store.
    ///
    /// # Safety
    ///
    /// - `addr` was passed to [`EpochBasedReclaimManager::retire`] exactly once.
    /// - No thread can still dereference `addr`.
    unsafe fn free(&self, addr: NonNull<u8>);
}

// ============================================================================
//  Thread records
// ============================================================================

/// Per-thread participation record.
///
/// Only the owning thread writes it; the reclaim scan reads it.
#[derive(Debug)]
struct ThreadRecord {
    /// Global epoch observed on the outermost `critical_scope()`.
    epoch: AtomicU64,

    /// Nesting depth of live guards. Zero means inactive.
    active: AtomicU32,
}

impl ThreadRecord {
    const fn new() -> Self {
        Self {
            epoch: AtomicU64::new(0),
            active: AtomicU32::new(0),
        }
    }
}

/// A retired block waiting for reclamation.
#[derive(Debug, Clone, Copy)]
struct RetiredItem {
    addr: NonNull<u8>,
    epoch: u64,
}

// SAFETY: the address is an opaque handle moved between the writer and
// whichever thread runs the reclaim scan; it is only dereferenced by the
// `Reclaim` implementation once proven unreachable.
unsafe impl Send for RetiredItem {}

#[derive(Debug, Default)]
struct RetireQueue {
    items: VecDeque<RetiredItem>,
    last_reclaim: Option<Instant>,
}

// ============================================================================
//  CriticalGuard
// ============================================================================

/// Scoped proof that the current thread is inside a critical section.
///
/// While any guard is alive on a thread, nothing retired at or after the
/// thread's announced epoch is freed. Guards nest. Dropping the last one
/// marks the thread inactive.
///
/// The guard is `!Send` and `!Sync`: it refers to the creating thread's
/// record.
#[must_use = "a critical section ends as soon as its guard is dropped"]
pub struct CriticalGuard<'a> {
    record: &'a ThreadRecord,
    _marker: PhantomData<*mut ()>,
}

impl CriticalGuard<'_> {
    /// Epoch this thread announced when its outermost guard was taken.
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.record.epoch.load(RELAXED)
    }

    /// Current nesting depth on this thread (at least 1).
    #[inline]
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.record.active.load(RELAXED)
    }
}

impl Drop for CriticalGuard<'_> {
    fn drop(&mut self) {
        let depth: u32 = self.record.active.load(RELAXED);
        debug_assert!(depth > 0, "critical guard dropped on an inactive record");

        if depth == 1 {
            // Release: every node load inside the section happens-before a
            // scan that observes the thread as inactive.
            self.record.active.store(0, PUBLISH_ORD);
        } else {
            self.record.active.store(depth - 1, RELAXED);
        }
    }
}

impl StdFmt::Debug for CriticalGuard<'_> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("CriticalGuard")
            .field("epoch", &self.epoch())
            .field("depth", &self.depth())
            .finish()
    }
}

// ============================================================================
//  EpochBasedReclaimManager
// ============================================================================

/// Global epoch, per-thread records and the FIFO retirement queue.
///
/// `retire`, `increase_epoch` and the reclaim calls belong to the single
/// writer. `critical_scope` may be called from any thread.
pub struct EpochBasedReclaimManager {
    global_epoch: AtomicU64,
    records: ThreadLocal<ThreadRecord>,
    retired: Mutex<RetireQueue>,

    /// Mirror of `retired.items.len()` readable without the lock.
    retired_len: AtomicUsize,
    total_retired: AtomicU64,
    total_reclaimed: AtomicU64,

    config: ReclaimConfig,
}

impl StdFmt::Debug for EpochBasedReclaimManager {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("EpochBasedReclaimManager")
            .field("global_epoch", &self.global_epoch())
            .field("retired_items", &self.retired_items())
            .field("total_retired", &self.total_retired())
            .field("total_reclaimed", &self.total_reclaimed())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for EpochBasedReclaimManager {
    fn default() -> Self {
        Self::new(ReclaimConfig::global())
    }
}

impl EpochBasedReclaimManager {
    /// Create a manager with the given tuning.
    #[must_use]
    pub fn new(config: ReclaimConfig) -> Self {
        Self {
            global_epoch: AtomicU64::new(INITIAL_EPOCH),
            records: ThreadLocal::new(),
            retired: Mutex::new(RetireQueue::default()),
            retired_len: AtomicUsize::new(0),
            total_retired: AtomicU64::new(0),
            total_reclaimed: AtomicU64::new(0),
            config,
        }
    }

    /// Tuning this manager was built with.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &ReclaimConfig {
        &self.config
    }

    /// Current global epoch.
    #[inline]
    #[must_use]
    pub fn global_epoch(&self) -> u64 {
        self.global_epoch.load(READ_ORD)
    }

    /// Number of retired items still waiting in the queue.
    #[inline]
    #[must_use]
    pub fn retired_items(&self) -> usize {
        self.retired_len.load(RELAXED)
    }

    /// Number of items ever retired.
    #[inline]
    #[must_use]
    pub fn total_retired(&self) -> u64 {
        self.total_retired.load(RELAXED)
    }

    /// Number of items ever handed to [`Reclaim::free`].
    #[inline]
    #[must_use]
    pub fn total_reclaimed(&self) -> u64 {
        self.total_reclaimed.load(RELAXED)
    }

    /// Number of threads currently inside a critical section.
    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.active.load(READ_ORD) > 0)
            .count()
    }

    // ========================================================================
    //  Reader side
    // ========================================================================

    /// Enter a critical section on the calling thread.
    pub fn critical_scope(&self) -> CriticalGuard<'_> {
        let record: &ThreadRecord = self.records.get_or(ThreadRecord::new);
        let depth: u32 = record.active.load(RELAXED);

        if depth == 0 {
            let epoch: u64 = self.global_epoch.load(READ_ORD);
            record.epoch.store(epoch, RELAXED);
            record.active.store(1, PUBLISH_ORD);
            // Store-load barrier: the announcement is ordered before every
            // pointer load made inside the section.
            fence(EPOCH_FENCE);
        } else {
            record.active.store(depth + 1, RELAXED);
        }

        CriticalGuard {
            record,
            _marker: PhantomData,
        }
    }

    // ========================================================================
    //  Writer side
    // ========================================================================

    /// Advance the global epoch and return the new value.
    ///
    /// Called by the writer after a mutation that retired nodes.
    pub fn increase_epoch(&self) -> u64 {
        self.global_epoch.fetch_add(1, EPOCH_FENCE) + 1
    }

    /// Queue `addr` for reclamation, tagged with the current epoch.
    ///
    /// Triggers [`try_reclaim`](Self::try_reclaim) once the queue holds at
    /// least `reclaim_threshold` items.
    ///
    /// # Safety
    ///
    /// - `addr` is already unreachable for readers entering a new critical
    ///   section (unlinked with a Release store).
    /// - `addr` is retired only once and stays valid until `reclaimer.free`.
    pub unsafe fn retire<R: Reclaim + ?Sized>(&self, addr: NonNull<u8>, reclaimer: &R) {
        let epoch: u64 = self.global_epoch.load(READ_ORD);

        let queued: usize = {
            let mut queue = self.retired.lock();
            debug_assert!(
                queue.items.back().is_none_or(|last| last.epoch <= epoch),
                "retirement epochs must be non-decreasing"
            );
            queue.items.push_back(RetiredItem { addr, epoch });
            queue.items.len()
        };

        self.retired_len.store(queued, RELAXED);
        self.total_retired.fetch_add(1, RELAXED);
        trace_log!(epoch, queued, "retired block");

        if queued >= self.config.reclaim_threshold {
            let _ = self.try_reclaim(reclaimer);
        }
    }

    /// Rate-limited reclaim attempt. Returns the number of freed items.
    pub fn try_reclaim<R: Reclaim + ?Sized>(&self, reclaimer: &R) -> usize {
        let mut queue = self.retired.lock();

        let interval = self.config.min_reclaim_interval;
        if !interval.is_zero()
            && let Some(last) = queue.last_reclaim
            && last.elapsed() < interval
        {
            return 0;
        }

        queue.last_reclaim = Some(Instant::now());
        self.reclaim_locked(&mut queue, reclaimer)
    }

    /// Reclaim attempt that ignores the rate limit.
    pub fn force_reclaim<R: Reclaim + ?Sized>(&self, reclaimer: &R) -> usize {
        let mut queue = self.retired.lock();
        queue.last_reclaim = Some(Instant::now());
        self.reclaim_locked(&mut queue, reclaimer)
    }

    /// Free every queued item regardless of epochs.
    ///
    /// # Safety
    ///
    /// No thread may hold a pointer obtained inside a critical section of
    /// this manager (typically: called from the owner's `Drop`).
    pub unsafe fn drain_all<R: Reclaim + ?Sized>(&self, reclaimer: &R) -> usize {
        let mut queue = self.retired.lock();
        let mut freed: usize = 0;

        while let Some(item) = queue.items.pop_front() {
            // SAFETY: caller guarantees no remaining readers.
            unsafe { reclaimer.free(item.addr) };
            freed += 1;
        }

        self.retired_len.store(0, RELAXED);
        self.total_reclaimed.fetch_add(freed as u64, RELAXED);
        freed
    }

    /// Highest retirement epoch that is safe to free right now.
    fn max_reclaim_epoch(&self) -> u64 {
        // Pairs with the fence in `critical_scope`.
        fence(EPOCH_FENCE);

        let global: u64 = self.global_epoch.load(READ_ORD);
        let min_active: Option<u64> = self
            .records
            .iter()
            .filter(|record| record.active.load(READ_ORD) > 0)
            .map(|record| record.epoch.load(RELAXED))
            .min();

        match min_active {
            None => global.saturating_sub(1),
            Some(epoch) => epoch.saturating_sub(1),
        }
    }

    fn reclaim_locked<R: Reclaim + ?Sized>(&self, queue: &mut RetireQueue, reclaimer: &R) -> usize {
        if queue.items.is_empty() {
            return 0;
        }

        let max_epoch: u64 = self.max_reclaim_epoch();
        let mut freed: usize = 0;

        // Single-writer retirement keeps the queue epoch-ordered, so the
        // first blocked item blocks everything behind it.
        while let Some(item) = queue.items.front().copied() {
            if item.epoch > max_epoch {
                break;
            }
            queue.items.pop_front();

            // SAFETY: retired before every active reader's epoch, hence
            // unreachable for all of them.
            unsafe { reclaimer.free(item.addr) };
            freed += 1;
        }

        self.retired_len.store(queue.items.len(), RELAXED);
        self.total_reclaimed.fetch_add(freed as u64, RELAXED);
        debug_log!(
            max_epoch,
            freed,
            remaining = queue.items.len(),
            "reclaim pass"
        );

        freed
    }
}

impl Drop for EpochBasedReclaimManager {
    fn drop(&mut self) {
        debug_assert!(
            self.retired.get_mut().items.is_empty(),
            "reclaim manager dropped with retired items; the owner must drain it first"
        );
    }
}

// ============================================================================
//  Tests
// ============================================================================
