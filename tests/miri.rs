//! Tests specifically for miri

#![cfg(miri)]

use core::num::NonZeroUsize;
use core::sync::atomic::{AtomicU64, Ordering};

use std::sync::Arc;

use weft::{Config, Runtime, Worker};

/// A node in a binary tree.
struct Node {
    val: u64,
    left: Option<Box<Node>>,
    right: Option<Box<Node>>,
}

impl Node {
    // Constructs a new binary tree with the given number of layers.
    pub fn tree(layers: usize) -> Self {
        Self {
            val: 1,
            left: (layers != 1).then(|| Box::new(Self::tree(layers - 1))),
            right: (layers != 1).then(|| Box::new(Self::tree(layers - 1))),
        }
    }
}

fn runtime(workers: usize) -> Runtime {
    let mut config = Config::default();
    config.workers = NonZeroUsize::new(workers);
    Runtime::new(config)
}

/// Sums a borrowed tree, which routes non-`'static` closures through the
/// task payload machinery where miri can watch every write and take.
#[test]
fn fork_join() {
    let layers = 8;
    let target = (1 << layers) - 1;

    fn sum(node: &Node, worker: &Worker) -> u64 {
        let (left, right) = worker.join(
            |w| node.left.as_deref().map(|n| sum(n, w)).unwrap_or_default(),
            |w| node.right.as_deref().map(|n| sum(n, w)).unwrap_or_default(),
        );

        node.val + left + right
    }

    let tree = Node::tree(layers);

    let mut runtime = runtime(2);
    let total = runtime.run(|worker| sum(&tree, worker));
    assert_eq!(total, target);
    runtime.shutdown();
}

/// Spawns a batch of heap-capturing tasks so payload writes, takes, and
/// drops all happen under miri's allocation tracking.
#[test]
fn spawn_and_sync() {
    let mut runtime = runtime(2);
    let total = runtime.run(|worker| {
        let hits = Arc::new(AtomicU64::new(0));
        let tasks: Vec<_> = (0..32u64)
            .map(|i| {
                let hits = Arc::clone(&hits);
                worker.spawn(move |_: &Worker| {
                    hits.fetch_add(i, Ordering::Relaxed);
                })
            })
            .collect();
        for task in tasks.into_iter().rev() {
            worker.sync(task);
        }
        hits.load(Ordering::Relaxed)
    });
    assert_eq!(total, (0..32u64).sum());
    runtime.shutdown();
}
