//! Arena backing node allocation.
//!
//! The pool grabs large chunks from the global allocator and carves them
//! into fixed-size slabs. Freed slabs go onto a per-size free list and are
//! handed out again before any new carving. Chunks are only returned to the
//! global allocator when the pool is dropped.
//!
//! Exhaustion of an optional byte capacity is fatal: the pool calls
//! [`std::alloc::handle_alloc_error`] instead of propagating a failure.

use std::alloc::{self as StdAlloc, Layout};
use std::collections::HashMap;
use std::fmt as StdFmt;
use std::ptr::NonNull;

/// Default chunk size requested from the global allocator.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Alignment of every slab (one cache line).
pub const SLAB_ALIGN: usize = 64;

/// Chunked slab arena. Single-owner; callers serialise access.
pub struct Pool {
    chunk_size: usize,
    capacity: Option<usize>,

    /// Every chunk ever allocated, released on drop.
    chunks: Vec<(NonNull<u8>, Layout)>,

    /// Bump cursor into the newest chunk.
    cursor: Option<NonNull<u8>>,
    remaining: usize,

    /// Reusable slabs keyed by rounded size.
    free_lists: HashMap<usize, Vec<NonNull<u8>>>,

    chunk_bytes: usize,
    in_use_bytes: usize,
}

// SAFETY: the pool exclusively owns its chunks; the raw pointers are never
// shared except as slabs handed to the caller.
unsafe impl Send for Pool {}

impl StdFmt::Debug for Pool {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("Pool")
            .field("chunk_size", &self.chunk_size)
            .field("capacity", &self.capacity)
            .field("chunks", &self.chunks.len())
            .field("chunk_bytes", &self.chunk_bytes)
            .field("in_use_bytes", &self.in_use_bytes)
            .finish_non_exhaustive()
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl Pool {
    /// Unbounded pool with the default chunk size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Unbounded pool with a custom chunk size (rounded up to [`SLAB_ALIGN`]).
    #[must_use]
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: round_up(chunk_size.max(SLAB_ALIGN)),
            capacity: None,
            chunks: Vec::new(),
            cursor: None,
            remaining: 0,
            free_lists: HashMap::new(),
            chunk_bytes: 0,
            in_use_bytes: 0,
        }
    }

    /// Cap the total bytes of chunks this pool may request.
    #[must_use]
    pub const fn with_capacity_limit(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Bytes requested from the global allocator so far.
    #[inline]
    #[must_use]
    pub const fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    /// Bytes currently handed out as slabs.
    #[inline]
    #[must_use]
    pub const fn in_use_bytes(&self) -> usize {
        self.in_use_bytes
    }

    /// Number of chunks allocated.
    #[inline]
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Slab size actually used for a request of `size` bytes.
    #[inline]
    #[must_use]
    pub const fn slab_size(size: usize) -> usize {
        round_up(size)
    }

    /// Hand out an uninitialised slab of at least `size` bytes, aligned to
    /// [`SLAB_ALIGN`].
    ///
    /// Aborts through `handle_alloc_error` when the capacity is exhausted or
    /// the global allocator fails.
    pub fn allocate(&mut self, size: usize) -> NonNull<u8> {
        let slab: usize = round_up(size.max(1));
        self.in_use_bytes += slab;

        if let Some(ptr) = self.free_lists.get_mut(&slab).and_then(Vec::pop) {
            return ptr;
        }

        if self.remaining < slab {
            self.grow(slab);
        }

        let Some(cursor) = self.cursor else {
            unreachable!("grow() always installs a cursor");
        };
        // SAFETY: `remaining >= slab`, so the bump stays inside the chunk.
        let next = unsafe { cursor.add(slab) };
        self.cursor = Some(next);
        self.remaining -= slab;

        cursor
    }

    /// Return a slab to the pool.
    ///
    /// # Safety
    ///
    /// `ptr` came from [`Pool::allocate`] on this pool with the same `size`
    /// and is not used afterwards.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) {
        let slab: usize = round_up(size.max(1));
        debug_assert!(self.in_use_bytes >= slab, "pool accounting underflow");

        self.in_use_bytes -= slab;
        self.free_lists.entry(slab).or_default().push(ptr);
    }

    fn grow(&mut self, slab: usize) {
        let bytes: usize = self.chunk_size.max(slab);
        let layout = Layout::from_size_align(bytes, SLAB_ALIGN)
            .unwrap_or_else(|_| StdAlloc::handle_alloc_error(Layout::new::<u8>()));

        if let Some(capacity) = self.capacity
            && self.chunk_bytes + bytes > capacity
        {
            StdAlloc::handle_alloc_error(layout);
        }

        // SAFETY: `layout` has a non-zero size.
        let raw: *mut u8 = unsafe { StdAlloc::alloc(layout) };
        let Some(chunk) = NonNull::new(raw) else {
            StdAlloc::handle_alloc_error(layout);
        };

        // The tail of the previous chunk is abandoned; slabs never span chunks.
        self.chunks.push((chunk, layout));
        self.chunk_bytes += bytes;
        self.cursor = Some(chunk);
        self.remaining = bytes;
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        for (chunk, layout) in self.chunks.drain(..) {
            // SAFETY: allocated in `grow` with exactly this layout.
            unsafe { StdAlloc::dealloc(chunk.as_ptr(), layout) };
        }
    }
}

const fn round_up(size: usize) -> usize {
    (size + SLAB_ALIGN - 1) & !(SLAB_ALIGN - 1)
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slabs_are_aligned_and_distinct() {
        let mut pool = Pool::new();

        let a = pool.allocate(100);
        let b = pool.allocate(100);

        assert_ne!(a, b);
        assert_eq!(a.as_ptr() as usize % SLAB_ALIGN, 0);
        assert_eq!(b.as_ptr() as usize % SLAB_ALIGN, 0);
        assert_eq!(pool.in_use_bytes(), 2 * Pool::slab_size(100));
        assert_eq!(pool.chunk_count(), 1);
    }

    #[test]
    fn test_freed_slab_is_reused() {
        let mut pool = Pool::new();

        let a = pool.allocate(200);
        unsafe { pool.deallocate(a, 200) };
        assert_eq!(pool.in_use_bytes(), 0);

        let b = pool.allocate(200);
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_sizes_do_not_share_free_lists() {
        let mut pool = Pool::new();

        let small = pool.allocate(64);
        unsafe { pool.deallocate(small, 64) };

        let large = pool.allocate(512);
        assert_ne!(small, large);
    }

    #[test]
    fn test_grows_new_chunks() {
        let mut pool = Pool::with_chunk_size(256);

        for _ in 0..5 {
            let ptr = pool.allocate(128);
            // Touch the whole slab.
            unsafe { ptr.as_ptr().write_bytes(0xAB, 128) };
        }

        assert_eq!(pool.chunk_count(), 3);
        assert_eq!(pool.chunk_bytes(), 3 * 256);
    }

    #[test]
    fn test_oversized_request_gets_own_chunk() {
        let mut pool = Pool::with_chunk_size(256);

        let _ = pool.allocate(1000);

        assert_eq!(pool.chunk_bytes(), Pool::slab_size(1000));
    }

    #[test]
    fn test_slab_size_rounding() {
        assert_eq!(Pool::slab_size(1), 64);
        assert_eq!(Pool::slab_size(64), 64);
        assert_eq!(Pool::slab_size(65), 128);
    }

    #[test]
    fn test_capacity_limit_within_bounds() {
        let mut pool = Pool::with_chunk_size(256).with_capacity_limit(512);

        for _ in 0..4 {
            let _ = pool.allocate(128);
        }

        assert_eq!(pool.chunk_bytes(), 512);
    }
}
