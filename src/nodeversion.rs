//! Filepath: src/nodeversion.rs
//!
//! Node version for optimistic reads of in-place leaf mutations.
//!
//! Leaves below capacity are updated in place by the single writer. The
//! [`NodeVersion`] turns that update into a seqlock: the counter is odd
//! while a write section is open and is bumped to the next even value when
//! it closes. Readers snapshot a stable (even) version, read the slots, and
//! retry if the version moved.
//!
//! # Concurrency Model
//! 1. Readers: call `stable()`, read slots, call `has_changed()`; retry on change.
//! 2. Writer: call `begin_write()` to get a [`WriteGuard`], mutate, let the guard drop.
//!
//! ```rust
//! use dynamic_search_tree::nodeversion::NodeVersion;
//!
//! let v = NodeVersion::new();
//! let before = v.stable();
//! {
//!     let _w = v.begin_write();
//!     // slot stores go here
//! }
//! assert!(v.has_changed(before));
//! ```

use std::hint;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, fence};

use crate::ordering::{RELAXED, UNLOCK_ORD, VERSION_ORD};

/// Dirty bit: a write section is open.
const DIRTY_BIT: u32 = 1;

/// Seqlock-style version counter.
///
/// All-zero bytes are a valid, clean version, so nodes carved from zeroed
/// arena memory need no extra initialisation.
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct NodeVersion {
    value: AtomicU32,
}

/// Proof that a write section is open on a [`NodeVersion`].
///
/// Closing happens on drop (panic-safe). The guard is `!Send` and `!Sync`
/// through `PhantomData<*mut ()>`: the section belongs to the writer thread.
#[derive(Debug)]
#[must_use = "dropping the guard immediately closes the write section"]
pub struct WriteGuard<'a> {
    version: &'a NodeVersion,
    dirty_value: u32,
    _marker: PhantomData<*mut ()>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        // Release: every slot store in the section happens-before a reader
        // that observes the new even value.
        self.version
            .value
            .store(self.dirty_value.wrapping_add(1), UNLOCK_ORD);
    }
}

impl WriteGuard<'_> {
    /// Version value while the section is open (always odd).
    #[inline]
    #[must_use]
    pub const fn dirty_value(&self) -> u32 {
        self.dirty_value
    }
}

impl NodeVersion {
    /// Create a clean version.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU32::new(0),
        }
    }

    /// Raw counter value.
    #[inline]
    #[must_use]
    pub fn value(&self) -> u32 {
        self.value.load(RELAXED)
    }

    /// Whether a write section is currently open.
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.value.load(RELAXED) & DIRTY_BIT != 0
    }

    /// Spin until no write section is open and return that version.
    #[inline]
    #[must_use]
    pub fn stable(&self) -> u32 {
        loop {
            let value: u32 = self.value.load(VERSION_ORD);
            if value & DIRTY_BIT == 0 {
                return value;
            }
            hint::spin_loop();
        }
    }

    /// Check whether a writer touched the node since `old` was taken.
    ///
    /// Must be called after the slot loads it validates.
    #[inline]
    #[must_use]
    pub fn has_changed(&self, old: u32) -> bool {
        // Orders the preceding relaxed slot loads before the re-check.
        fence(VERSION_ORD);
        self.value.load(RELAXED) != old
    }

    /// Open a write section.
    ///
    /// Only the single writer may call this; nested sections are a logic error.
    pub fn begin_write(&self) -> WriteGuard<'_> {
        let value: u32 = self.value.load(RELAXED);
        debug_assert!(value & DIRTY_BIT == 0, "begin_write() on a dirty version");

        let dirty: u32 = value.wrapping_add(1);
        self.value.store(dirty, RELAXED);
        // Keeps the dirty mark ahead of the slot stores that follow.
        fence(UNLOCK_ORD);

        WriteGuard {
            version: self,
            dirty_value: dirty,
            _marker: PhantomData,
        }
    }
}


// ============================================================================
//  Tests
// ============================================================================
