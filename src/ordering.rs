//! Standard memory orderings for concurrent node access.
//!
//! These constants keep ordering usage consistent across the crate and make
//! the intent clear at each publication or observation point.

use std::sync::atomic::Ordering;

/// Ordering for reading node pointers and counts during a reader walk.
/// Pairs with the writer's [`PUBLISH_ORD`] stores.
pub const READ_ORD: Ordering = Ordering::Acquire;

/// Ordering for the store that makes a fully built node reachable
/// (root swap, child slot replacement, sibling splice).
pub const PUBLISH_ORD: Ordering = Ordering::Release;

/// Ordering for slot contents read or written inside a version-validated
/// section, or by the single writer on its own unpublished nodes.
pub const RELAXED: Ordering = Ordering::Relaxed;

/// Ordering for loading a node version before an optimistic read.
/// Must observe the writer's dirty bit.
pub const VERSION_ORD: Ordering = Ordering::Acquire;

/// Ordering for the version bump that closes a write section.
/// Must make the slot writes visible to readers that see the new version.
pub const UNLOCK_ORD: Ordering = Ordering::Release;

/// Ordering used on both sides of the epoch handshake (reader announce vs.
/// writer scan). The store-load pattern needs sequential consistency.
pub const EPOCH_FENCE: Ordering = Ordering::SeqCst;
