//! # `DynamicSearchTree`
//!
//! A concurrent posting tree over document ids with epoch-based node
//! reclamation.
//!
//! - One writer inserts doc-ids and writes tombstones.
//! - Any number of readers search and iterate without locks.
//! - Replaced nodes are retired and freed once no reader can reach them.
//!
//! ## Thread Safety
//!
//! `DynamicSearchTree` is `Send + Sync`. Share it behind an `Arc`; call
//! `insert`/`remove` from one thread (a second writer blocks on an internal
//! mutex) and `search`/`create_iterator` from anywhere:
//!
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//! use dynamic_search_tree::{DynamicSearchTree, NodeManager, ReclaimConfig};
//!
//! let manager = Arc::new(NodeManager::new(ReclaimConfig::default()));
//! let tree = Arc::new(DynamicSearchTree::new(3, manager));
//!
//! let reader = {
//!     let tree = Arc::clone(&tree);
//!     thread::spawn(move || {
//!         // May or may not observe the writer's keys yet.
//!         let _ = tree.search(0);
//!     })
//! };
//!
//! for doc_id in 0..100 {
//!     tree.insert(doc_id);
//! }
//! reader.join().unwrap();
//!
//! let ids: Vec<i64> = tree.create_iterator().map(|k| k.doc_id()).collect();
//! assert_eq!(ids, (0..100).collect::<Vec<_>>());
//! ```
//!
//! ## Reclamation
//!
//! Readers enter a critical section (`critical_scope()`) that announces the
//! global epoch they started in. The writer tags every retired node with the
//! epoch at retirement and advances the epoch after each mutation. A node is
//! freed once every active reader announced a later epoch. Iterators hold a
//! critical section for their whole lifetime, so keep them short.
//!
//! ## Design
//!
//! - Leaves below capacity are updated in place under a seqlock
//!   ([`nodeversion::NodeVersion`]); readers validate and retry.
//! - Full leaves split into new leaves, and separators are only ever added
//!   through a new internal node (copy-on-write). New nodes are published
//!   with Release stores of a child slot or the root.
//! - Nodes are runtime-sized slabs carved from an arena ([`alloc::Pool`]).

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod alloc;
pub mod config;
pub mod epoch;
pub mod internode;
pub mod key;
pub mod leaf;
pub mod node;
pub mod nodeversion;
pub mod ordering;
mod tracing_helpers;
pub mod tree;

// Re-export main types for convenience
pub use alloc::{MemoryStats, NodeManager};
pub use config::{ConfigError, ReclaimConfig};
pub use epoch::{CriticalGuard, EpochBasedReclaimManager, Reclaim};
pub use key::{DocId, INVALID_DOCID, KeyType};
pub use node::MAX_SLOT_SHIFT;
pub use tree::{DynamicSearchTree, TreeError, TreeIterator, TreeStats};

#[cfg(feature = "tracing")]
pub use tracing_helpers::init_tracing;
