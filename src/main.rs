//! Soak binary: one writer and N readers hammer a shared tree for a fixed
//! duration, then the final state is checked against the writer's log.
//!
//! Run with:
//! ```bash
//! DYNAMIC_TREE_SOAK_SECS=30 DYNAMIC_TREE_SOAK_READERS=8 cargo run --release
//! RUST_LOG=dynamic_search_tree=debug cargo run --features tracing
//! ```

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use dynamic_search_tree::{DocId, DynamicSearchTree, INVALID_DOCID, NodeManager, ReclaimConfig};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const SOAK_SECS_ENV: &str = "DYNAMIC_TREE_SOAK_SECS";
const SOAK_READERS_ENV: &str = "DYNAMIC_TREE_SOAK_READERS";

const DEFAULT_SECS: u64 = 5;
const DEFAULT_READERS: usize = 5;
const MAX_SLOT_SHIFT: u8 = 4;
const DOC_ID_SPACE: u64 = 1 << 20;

// =============================================================================
// Key generation
// =============================================================================

/// Cheap bijective scramble so writers and readers touch the whole key space.
const fn scramble(i: u64, salt: u64) -> DocId {
    let mixed = (i ^ salt).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    ((mixed >> 17) % DOC_ID_SPACE) as DocId
}

fn env_or<T: std::str::FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

// =============================================================================
// Workers
// =============================================================================

struct Counters {
    searches: AtomicU64,
    seeks: AtomicU64,
}

fn run_reader(tree: &DynamicSearchTree, stop: &AtomicBool, counters: &Counters, salt: u64) {
    let mut i: u64 = 0;

    while !stop.load(Ordering::Relaxed) {
        let probe = scramble(i, salt);
        if let Some(key) = tree.search(probe) {
            assert!(key.doc_id() >= probe, "search({probe}) went backwards: {key}");
        }
        counters.searches.fetch_add(1, Ordering::Relaxed);

        // Short iterator burst; long-lived iterators would pin the epoch.
        let mut it = tree.create_iterator();
        let mut last: DocId = INVALID_DOCID;
        for step in 0..32 {
            let Some(key) = it.seek(probe + step) else {
                break;
            };
            assert!(key.doc_id() > last, "seek not monotonic: {} after {last}", key.doc_id());
            last = key.doc_id();
        }
        drop(it);
        counters.seeks.fetch_add(1, Ordering::Relaxed);

        i += 1;
    }
}

fn run_writer(tree: &DynamicSearchTree, stop: &AtomicBool) -> HashMap<DocId, bool> {
    let mut expected: HashMap<DocId, bool> = HashMap::new();
    let mut i: u64 = 0;

    while !stop.load(Ordering::Relaxed) {
        let doc_id = scramble(i, 0x5eed);
        let is_delete = i % 4 == 3;

        let applied = if is_delete {
            tree.remove(doc_id)
        } else {
            tree.insert(doc_id)
        };
        if applied {
            expected.insert(doc_id, is_delete);
        }
        i += 1;
    }
    expected
}

// =============================================================================
// Main
// =============================================================================

fn main() -> ExitCode {
    #[cfg(feature = "tracing")]
    dynamic_search_tree::init_tracing();

    let secs: u64 = env_or(SOAK_SECS_ENV, DEFAULT_SECS);
    let readers: usize = env_or(SOAK_READERS_ENV, DEFAULT_READERS);
    let config = ReclaimConfig::global();

    println!("\n{}", "=".repeat(80));
    println!("SOAK: 1 writer, {readers} readers, {secs}s, {config:?}");
    println!("{}", "=".repeat(80));

    let manager = Arc::new(NodeManager::new(config));
    let tree = Arc::new(DynamicSearchTree::new(MAX_SLOT_SHIFT, Arc::clone(&manager)));
    let stop = Arc::new(AtomicBool::new(false));
    let counters = Arc::new(Counters {
        searches: AtomicU64::new(0),
        seeks: AtomicU64::new(0),
    });

    let start = Instant::now();

    let reader_handles: Vec<_> = (0..readers)
        .map(|r| {
            let tree = Arc::clone(&tree);
            let stop = Arc::clone(&stop);
            let counters = Arc::clone(&counters);
            thread::spawn(move || run_reader(&tree, &stop, &counters, r as u64 + 1))
        })
        .collect();

    let writer = {
        let tree = Arc::clone(&tree);
        let stop = Arc::clone(&stop);
        thread::spawn(move || run_writer(&tree, &stop))
    };

    while start.elapsed() < Duration::from_secs(secs) {
        thread::sleep(Duration::from_millis(500));
        let stats = manager.memory_stats();
        eprintln!(
            "[{:>5.1}s] epoch={} live={}B retired={}B ({} nodes)",
            start.elapsed().as_secs_f64(),
            stats.global_epoch,
            stats.total_memory,
            stats.retired_memory,
            stats.retired_items
        );
    }
    stop.store(true, Ordering::Relaxed);

    let mut failed = false;
    for handle in reader_handles {
        failed |= handle.join().is_err();
    }
    let expected = match writer.join() {
        Ok(expected) => expected,
        Err(_) => {
            eprintln!("writer panicked");
            return ExitCode::FAILURE;
        }
    };

    let mut mismatches: usize = 0;
    for (&doc_id, &is_delete) in &expected {
        match tree.search(doc_id) {
            Some(key) if key.doc_id() == doc_id && key.is_delete() == is_delete => {}
            other => {
                mismatches += 1;
                if mismatches <= 10 {
                    eprintln!("doc {doc_id}: expected delete={is_delete}, found {other:?}");
                }
            }
        }
    }

    if let Err(err) = tree.validate() {
        eprintln!("validate: {err}");
        failed = true;
    }

    manager.increase_epoch();
    manager.force_reclaim();

    println!("writer touched {} doc-ids", expected.len());
    println!(
        "readers: {} searches, {} iterator bursts",
        counters.searches.load(Ordering::Relaxed),
        counters.seeks.load(Ordering::Relaxed)
    );
    println!("tree: {:?}", tree.stats());
    println!("memory: {:?}", manager.memory_stats());

    if failed || mismatches > 0 {
        println!("FAILED ({mismatches} mismatches)");
        ExitCode::FAILURE
    } else {
        println!("OK");
        ExitCode::SUCCESS
    }
}
