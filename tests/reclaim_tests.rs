//! Reclamation and memory-accounting tests through the public API.

#![expect(clippy::unwrap_used, reason = "fail fast in tests")]

mod common;

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use dynamic_search_tree::{DocId, DynamicSearchTree, NodeManager, ReclaimConfig};

fn manager(threshold: usize) -> Arc<NodeManager> {
    Arc::new(NodeManager::new(
        ReclaimConfig::default().with_threshold(threshold),
    ))
}

fn assert_balanced(manager: &NodeManager) {
    let stats = manager.memory_stats();
    assert_eq!(
        stats.total_memory,
        stats.total_allocated_memory - stats.total_freed_memory,
        "{stats:?}"
    );
}

#[test]
fn test_retired_nodes_freed_without_readers() {
    common::init_tracing();
    let manager = manager(8);
    let tree = DynamicSearchTree::new(1, Arc::clone(&manager));

    for d in 0..2_000 {
        tree.insert(d);
        assert_balanced(&manager);
    }

    let reclaimer = manager.reclaimer();
    assert!(reclaimer.total_retired() > 100);
    // Threshold-triggered passes keep the queue short: at most one
    // below-threshold backlog plus one insert's worth of replaced nodes.
    assert!(reclaimer.retired_items() <= 32, "{}", reclaimer.retired_items());
    assert!(reclaimer.total_reclaimed() > 0);

    manager.increase_epoch();
    manager.force_reclaim();
    assert_eq!(manager.retired_memory(), 0);
    assert_balanced(&manager);
}

#[test]
fn test_long_lived_iterator_blocks_reclamation() {
    let manager = manager(4);
    let tree = Arc::new(DynamicSearchTree::new(1, Arc::clone(&manager)));
    for d in 0..16 {
        tree.insert(d * 100);
    }

    let (ready_tx, ready_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let reader = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            let mut it = tree.create_iterator();
            let first = it.next().unwrap();
            ready_tx.send(()).unwrap();

            done_rx.recv().unwrap();
            // Everything the iterator may still reach is intact.
            let rest: Vec<DocId> = it.map(|k| k.doc_id()).collect();
            (first.doc_id(), rest)
        })
    };

    ready_rx.recv().unwrap();
    let retired_before = manager.reclaimer().total_retired();
    let reclaimed_before = manager.reclaimer().total_reclaimed();

    for d in 0..1_000 {
        tree.insert(d * 100 + 1);
    }
    manager.increase_epoch();
    manager.force_reclaim();

    let retired_during = manager.reclaimer().total_retired() - retired_before;
    assert!(retired_during > 0);
    // Nothing retired after the iterator started has been freed.
    let freed_during = manager.reclaimer().total_reclaimed() - reclaimed_before;
    assert!(
        manager.reclaimer().retired_items() as u64 >= retired_during,
        "freed {freed_during} while the iterator was live"
    );
    assert!(manager.retired_memory() > 0);

    done_tx.send(()).unwrap();
    let (first, rest) = reader.join().unwrap();
    assert_eq!(first, 0);
    assert!(rest.windows(2).all(|w| w[0] < w[1]));

    // Iterator gone: the backlog drains.
    manager.force_reclaim();
    assert_eq!(manager.reclaimer().retired_items(), 0);
    assert_eq!(manager.retired_memory(), 0);
    assert_balanced(&manager);
}

#[test]
fn test_tree_drop_returns_everything() {
    let manager = manager(32);

    {
        let tree = DynamicSearchTree::new(3, Arc::clone(&manager));
        for d in (0..5_000).rev() {
            tree.insert(d);
            if d % 3 == 0 {
                tree.remove(d);
            }
        }
        assert!(manager.total_memory() > 0);
    }

    manager.increase_epoch();
    manager.force_reclaim();

    let stats = manager.memory_stats();
    assert_eq!(stats.total_memory, 0, "{stats:?}");
    assert_eq!(stats.total_allocated_memory, stats.total_freed_memory);
    assert!(stats.pool_chunk_bytes > 0);
}

#[test]
fn test_rate_limited_reclaim_still_drains_on_force() {
    let manager = Arc::new(NodeManager::new(
        ReclaimConfig::default()
            .with_threshold(1)
            .with_interval(std::time::Duration::from_secs(3_600)),
    ));
    let tree = DynamicSearchTree::new(1, Arc::clone(&manager));

    for d in 0..500 {
        tree.insert(d);
    }
    // At most one pass ran inside the interval.
    assert!(manager.reclaimer().retired_items() > 1);
    assert_eq!(manager.try_reclaim(), 0);

    manager.increase_epoch();
    assert!(manager.force_reclaim() > 0);
    assert_eq!(manager.reclaimer().retired_items(), 0);
}

#[test]
fn test_default_manager_uses_process_config() {
    let manager = Arc::new(NodeManager::default());
    assert_eq!(*manager.reclaimer().config(), ReclaimConfig::global());

    let tree = DynamicSearchTree::new(4, manager);
    tree.insert(1);
    assert_eq!(tree.search(0).unwrap().doc_id(), 1);
}
