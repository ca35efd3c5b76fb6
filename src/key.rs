//! Filepath: src/key.rs
//!
//! Key representation for [`DynamicSearchTree`](crate::DynamicSearchTree).
//!
//! A key is a document id plus a tombstone flag. Ordering and equality only
//! look at the document id, so a later write for the same id replaces the
//! earlier one instead of sitting next to it.

use std::cmp::Ordering;
use std::fmt as StdFmt;
use std::hash::{Hash, Hasher};

/// Document identifier type.
pub type DocId = i64;

/// Sentinel for "no document". Also the natural starting point for a scan:
/// `seek(INVALID_DOCID)` returns the first stored key.
pub const INVALID_DOCID: DocId = -1;

/// A stored key: `(doc_id, is_delete)`.
///
/// # Example
///
/// ```rust
/// use dynamic_search_tree::KeyType;
///
/// let live = KeyType::new(7, false);
/// let tomb = KeyType::new(7, true);
///
/// // Same document id compares equal regardless of the delete flag.
/// assert_eq!(live, tomb);
/// assert!(KeyType::new(3, true) < live);
/// ```
#[derive(Clone, Copy)]
pub struct KeyType {
    doc_id: DocId,
    is_delete: bool,
}

impl KeyType {
    /// Create a key.
    #[inline]
    #[must_use]
    pub const fn new(doc_id: DocId, is_delete: bool) -> Self {
        Self { doc_id, is_delete }
    }

    /// Document id of this key.
    #[inline]
    #[must_use]
    pub const fn doc_id(&self) -> DocId {
        self.doc_id
    }

    /// Whether this key is a tombstone.
    #[inline]
    #[must_use]
    pub const fn is_delete(&self) -> bool {
        self.is_delete
    }
}

impl PartialEq for KeyType {
    fn eq(&self, other: &Self) -> bool {
        self.doc_id == other.doc_id
    }
}

impl Eq for KeyType {}

impl PartialOrd for KeyType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.doc_id.cmp(&other.doc_id)
    }
}

impl Hash for KeyType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.doc_id.hash(state);
    }
}

impl StdFmt::Debug for KeyType {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("KeyType")
            .field("doc_id", &self.doc_id)
            .field("is_delete", &self.is_delete)
            .finish()
    }
}

impl StdFmt::Display for KeyType {
    /// Compact form used by the tree dump: `42` or `42(D)` for tombstones.
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        if self.is_delete {
            write!(f, "{}(D)", self.doc_id)
        } else {
            write!(f, "{}", self.doc_id)
        }
    }
}

// ============================================================================
//  Tests
// ============================================================================
