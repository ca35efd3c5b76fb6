//! Filepath: src/tree/debug.rs
//!
//! Diagnostics: level-by-level dump, shape statistics and a structural
//! validator. All of them run inside a critical section and may run
//! concurrently with the writer; a concurrent split can make `validate()`
//! report a transient chain mismatch, so call it on a quiescent tree.

use std::collections::VecDeque;
use std::fmt::{self as StdFmt, Write as _};
use std::ptr::NonNull;

use super::DynamicSearchTree;
use crate::epoch::CriticalGuard;
use crate::key::{DocId, KeyType};
use crate::leaf::LeafNode;
use crate::node::{NodeBase, NodeRef};

// ============================================================================
//  TreeError
// ============================================================================

/// Structural problems found by [`DynamicSearchTree::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// Keys inside one node are not strictly ascending.
    UnsortedKeys {
        /// Depth of the node (root is 0).
        depth: usize,
        /// First doc-id out of order.
        doc_id: DocId,
    },

    /// A key lies outside the range its parent routes to this subtree.
    RoutingViolation {
        /// Offending doc-id.
        doc_id: DocId,
        /// Exclusive lower bound, if any.
        lower: Option<DocId>,
        /// Inclusive upper bound, if any.
        upper: Option<DocId>,
    },

    /// The sibling chain does not visit the leaves in tree order.
    BrokenSiblingChain {
        /// Position in left-to-right leaf order where the chain diverges.
        position: usize,
    },

    /// A reachable leaf holds no keys.
    EmptyLeaf {
        /// Depth of the leaf.
        depth: usize,
    },

    /// Leaves sit at different depths.
    HeightMismatch {
        /// Depth of the first leaf found.
        expected: usize,
        /// Depth of the offending leaf.
        found: usize,
    },
}

impl StdFmt::Display for TreeError {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        match self {
            Self::UnsortedKeys { depth, doc_id } => {
                write!(f, "keys out of order at depth {depth} (doc {doc_id})")
            }

            Self::RoutingViolation {
                doc_id,
                lower,
                upper,
            } => write!(
                f,
                "doc {doc_id} outside routed range ({lower:?}, {upper:?}]"
            ),

            Self::BrokenSiblingChain { position } => {
                write!(f, "sibling chain diverges from tree order at leaf {position}")
            }

            Self::EmptyLeaf { depth } => write!(f, "empty leaf at depth {depth}"),

            Self::HeightMismatch { expected, found } => {
                write!(f, "leaf at depth {found}, expected {expected}")
            }
        }
    }
}

impl std::error::Error for TreeError {}

// ============================================================================
//  TreeStats
// ============================================================================

/// Shape of the tree at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of levels (0 for an empty tree).
    pub height: usize,
    /// Reachable leaves.
    pub leaf_count: usize,
    /// Reachable internal nodes.
    pub internal_count: usize,
    /// Keys across all leaves, tombstones included.
    pub key_count: usize,
    /// Keys flagged as deleted.
    pub tombstone_count: usize,
}

// ============================================================================
//  Diagnostics
// ============================================================================

impl DynamicSearchTree {
    /// Nodes grouped by depth, root first.
    fn levels<'g>(&self, _guard: &'g CriticalGuard<'_>) -> Vec<Vec<NodeRef<'g>>> {
        let mut levels: Vec<Vec<NodeRef<'g>>> = Vec::new();
        let Some(root) = self.root_ptr() else {
            return levels;
        };

        let mut queue: VecDeque<(usize, NonNull<NodeBase>)> = VecDeque::from([(0, root)]);
        while let Some((depth, ptr)) = queue.pop_front() {
            // SAFETY: reached inside the guard's critical section.
            let node: NodeRef<'g> = unsafe { NodeBase::classify(ptr) };
            if let NodeRef::Internal(inode) = node {
                queue.extend(inode.children().into_iter().map(|child| (depth + 1, child)));
            }
            if levels.len() <= depth {
                levels.push(Vec::new());
            }
            levels[depth].push(node);
        }
        levels
    }

    /// Level-by-level dump for diagnostics. Not a stable format.
    #[must_use]
    pub fn debug_string(&self) -> String {
        let guard = self.node_manager.critical_scope();
        let levels = self.levels(&guard);

        let mut out = String::new();
        let _ = writeln!(
            out,
            "DynamicSearchTree(max_slot_shift={}, height={})",
            self.max_slot_shift,
            levels.len()
        );

        for (depth, nodes) in levels.iter().enumerate() {
            let _ = writeln!(out, "level {depth}: {} node(s)", nodes.len());
            for node in nodes {
                let body: String = match node {
                    NodeRef::Leaf(leaf) => join(leaf.keys().iter().map(KeyType::to_string)),
                    NodeRef::Internal(inode) => join(inode.keys().iter().map(DocId::to_string)),
                };
                let kind: &str = if node.base().is_leaf() { "leaf" } else { "inode" };
                let _ = writeln!(out, "  {kind} [{body}]");
            }
        }
        out
    }

    /// Count nodes and keys.
    #[must_use]
    pub fn stats(&self) -> TreeStats {
        let guard = self.node_manager.critical_scope();
        let levels = self.levels(&guard);

        let mut stats = TreeStats {
            height: levels.len(),
            ..TreeStats::default()
        };

        for node in levels.iter().flatten() {
            match node {
                NodeRef::Leaf(leaf) => {
                    let keys = leaf.keys();
                    stats.leaf_count += 1;
                    stats.key_count += keys.len();
                    stats.tombstone_count += keys.iter().filter(|k| k.is_delete()).count();
                }
                NodeRef::Internal(_) => stats.internal_count += 1,
            }
        }
        stats
    }

    /// Check ordering, routing bounds, leaf depth and the sibling chain.
    ///
    /// # Errors
    ///
    /// Returns the first [`TreeError`] found.
    pub fn validate(&self) -> Result<(), TreeError> {
        let guard = self.node_manager.critical_scope();
        let Some(root) = self.root_ptr() else {
            return Ok(());
        };

        let mut leaves: Vec<NonNull<LeafNode>> = Vec::new();
        let mut leaf_depth: Option<usize> = None;
        let mut stack: Vec<(NonNull<NodeBase>, usize, Option<DocId>, Option<DocId>)> =
            vec![(root, 0, None, None)];

        while let Some((ptr, depth, lower, upper)) = stack.pop() {
            // SAFETY: reached inside `guard`'s critical section.
            let (ids, children): (Vec<DocId>, Vec<NonNull<NodeBase>>) =
                match unsafe { NodeBase::classify(ptr) } {
                    NodeRef::Leaf(leaf) => {
                        let ids: Vec<DocId> = leaf.keys().iter().map(KeyType::doc_id).collect();
                        if ids.is_empty() {
                            return Err(TreeError::EmptyLeaf { depth });
                        }
                        match leaf_depth {
                            None => leaf_depth = Some(depth),
                            Some(expected) if expected != depth => {
                                return Err(TreeError::HeightMismatch {
                                    expected,
                                    found: depth,
                                });
                            }
                            Some(_) => {}
                        }
                        leaves.push(ptr.cast());
                        (ids, Vec::new())
                    }
                    NodeRef::Internal(inode) => (inode.keys(), inode.children()),
                };

            check_node_keys(&ids, depth, lower, upper)?;

            // Push right to left so leaves pop in ascending order.
            for (slot, &child) in children.iter().enumerate().rev() {
                let child_lower = if slot == 0 { lower } else { Some(ids[slot - 1]) };
                let child_upper = if slot == ids.len() { upper } else { Some(ids[slot]) };
                stack.push((child, depth + 1, child_lower, child_upper));
            }
        }

        check_chain(&leaves)?;
        drop(guard);
        Ok(())
    }
}

fn check_node_keys(
    ids: &[DocId],
    depth: usize,
    lower: Option<DocId>,
    upper: Option<DocId>,
) -> Result<(), TreeError> {
    if let Some(pair) = ids.windows(2).find(|w| w[0] >= w[1]) {
        return Err(TreeError::UnsortedKeys {
            depth,
            doc_id: pair[1],
        });
    }

    let in_range = |id: DocId| lower.is_none_or(|lo| id > lo) && upper.is_none_or(|hi| id <= hi);
    if let Some(&doc_id) = ids.iter().find(|&&id| !in_range(id)) {
        return Err(TreeError::RoutingViolation {
            doc_id,
            lower,
            upper,
        });
    }
    Ok(())
}

/// `leaves` is in tree order; the chain must visit exactly that sequence
/// in both directions.
fn check_chain(leaves: &[NonNull<LeafNode>]) -> Result<(), TreeError> {
    for (position, &ptr) in leaves.iter().enumerate() {
        // SAFETY: collected from the live tree inside the caller's guard.
        let leaf: &LeafNode = unsafe { ptr.as_ref() };

        let expected_prev = position.checked_sub(1).map(|i| leaves[i]);
        let expected_next = leaves.get(position + 1).copied();

        if leaf.prev() != expected_prev || leaf.next() != expected_next {
            return Err(TreeError::BrokenSiblingChain { position });
        }
    }
    Ok(())
}

fn join(parts: impl Iterator<Item = String>) -> String {
    parts.collect::<Vec<_>>().join(" ")
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Fail fast in tests")]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::alloc::NodeManager;
    use crate::config::ReclaimConfig;

    fn tree(shift: u8) -> DynamicSearchTree {
        DynamicSearchTree::new(shift, Arc::new(NodeManager::new(ReclaimConfig::default())))
    }

    #[test]
    fn test_empty_tree_diagnostics() {
        let t = tree(2);

        assert_eq!(t.stats(), TreeStats::default());
        assert!(t.validate().is_ok());
        assert!(t.debug_string().contains("height=0"));
    }

    #[test]
    fn test_stats_count_keys_and_tombstones() {
        let t = tree(1);
        for doc_id in 0..10 {
            t.insert(doc_id);
        }
        t.remove(3);
        t.remove(100);

        let stats = t.stats();
        assert_eq!(stats.key_count, 11);
        assert_eq!(stats.tombstone_count, 2);
        assert!(stats.leaf_count >= 6);
        assert!(stats.internal_count >= 1);
        assert!(stats.height >= 3);
    }

    #[test]
    fn test_debug_string_lists_levels() {
        let t = tree(1);
        t.insert(1);
        t.insert(2);
        t.insert(3);
        t.remove(2);

        let dump = t.debug_string();
        assert!(dump.contains("level 0: 1 node(s)"), "{dump}");
        assert!(dump.contains("inode [2]"), "{dump}");
        assert!(dump.contains("leaf [1 2(D)]"), "{dump}");
        assert!(dump.contains("leaf [3]"), "{dump}");
    }

    #[test]
    fn test_validate_after_mixed_workload() {
        let t = tree(2);
        for i in 0..2000_i64 {
            let doc_id = (i * 7919) % 3001;
            if i % 5 == 0 {
                t.remove(doc_id);
            } else {
                t.insert(doc_id);
            }
        }
        t.validate().unwrap();
    }

    #[test]
    fn test_check_node_keys_reports_problems() {
        assert_eq!(
            check_node_keys(&[1, 3, 2], 0, None, None),
            Err(TreeError::UnsortedKeys { depth: 0, doc_id: 2 })
        );
        assert_eq!(
            check_node_keys(&[5, 11], 1, Some(4), Some(10)),
            Err(TreeError::RoutingViolation {
                doc_id: 11,
                lower: Some(4),
                upper: Some(10)
            })
        );
        assert!(check_node_keys(&[5, 10], 1, Some(4), Some(10)).is_ok());
    }

    #[test]
    fn test_error_display() {
        let err = TreeError::HeightMismatch {
            expected: 2,
            found: 3,
        };
        assert_eq!(err.to_string(), "leaf at depth 3, expected 2");
        assert!(TreeError::EmptyLeaf { depth: 1 }.to_string().contains("empty leaf"));
    }
}
