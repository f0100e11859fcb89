//! AtlasTree Stress Binary
//!
//! Runs a mixed concurrent workload against one tree, then verifies it.

use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use atlastree::{BTree, Result, TreeConfig};
use clap::Parser;
use crossbeam::utils::Backoff;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::{fmt, EnvFilter};

/// AtlasTree stress tool
#[derive(Parser, Debug)]
#[command(name = "atlastree-stress")]
#[command(about = "Concurrent insert/remove workload with structural verification")]
#[command(version)]
struct Args {
    /// Worker threads
    #[arg(short, long, default_value = "8")]
    threads: usize,

    /// Operations per thread
    #[arg(short, long, default_value = "100000")]
    ops: usize,

    /// Keys are drawn from 0..key_space
    #[arg(short, long, default_value = "50000")]
    key_space: u64,

    /// Fraction of operations that remove instead of insert
    #[arg(short, long, default_value = "0.3")]
    remove_ratio: f64,

    /// Data node byte budget
    #[arg(long, default_value = "512")]
    max_bytes: usize,

    /// Partition fan-out
    #[arg(long, default_value = "16")]
    fanout: usize,

    /// Lock timeout in milliseconds
    #[arg(long, default_value = "1000")]
    lock_timeout_ms: u64,

    /// Times an operation is retried after a lock timeout
    #[arg(long, default_value = "16")]
    retries: usize,

    /// Workload seed
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Print stats as JSON
    #[arg(long)]
    json: bool,
}

/// Counters shared by all workers
#[derive(Default)]
struct Counters {
    inserted: AtomicU64,
    removed: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,atlastree=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("AtlasTree stress v{}", atlastree::VERSION);
    tracing::info!(
        "{} threads x {} ops, key space {}, remove ratio {}",
        args.threads,
        args.ops,
        args.key_space,
        args.remove_ratio
    );

    // Build config from args
    let config = TreeConfig::builder()
        .data_node_max_bytes(args.max_bytes)
        .partition_max_entries(args.fanout)
        .lock_timeout_ms(args.lock_timeout_ms)
        .build();

    let tree: BTree<u64, u64> = match BTree::with_config(config) {
        Ok(tree) => tree,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    let counters = Counters::default();
    let started = Instant::now();

    let outcome = crossbeam::scope(|scope| {
        for worker in 0..args.threads {
            let tree = &tree;
            let counters = &counters;
            let args = &args;
            scope.spawn(move |_| run_worker(worker as u64, tree, counters, args));
        }
    });

    if outcome.is_err() {
        tracing::error!("A worker thread panicked");
        process::exit(1);
    }

    let elapsed = started.elapsed();
    let total_ops = (args.threads * args.ops) as f64;
    tracing::info!(
        "Finished in {:.2?} ({:.0} ops/s): {} inserted, {} removed, {} retried, {} failed",
        elapsed,
        total_ops / elapsed.as_secs_f64().max(f64::EPSILON),
        counters.inserted.load(Ordering::Relaxed),
        counters.removed.load(Ordering::Relaxed),
        counters.retried.load(Ordering::Relaxed),
        counters.failed.load(Ordering::Relaxed)
    );

    if let Err(e) = tree.verify() {
        tracing::error!("Verification failed: {}", e);
        process::exit(1);
    }
    tracing::info!("Verification passed");

    let stats = tree.stats();
    if args.json {
        match serde_json::to_string_pretty(&stats) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                tracing::error!("Failed to encode stats: {}", e);
                process::exit(1);
            }
        }
    } else {
        println!(
            "height={} leaves={} keys={} values={} bytes={}",
            stats.height, stats.leaves, stats.keys, stats.values, stats.bytes
        );
    }
}

/// One worker's share of the workload
fn run_worker(worker: u64, tree: &BTree<u64, u64>, counters: &Counters, args: &Args) {
    let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(worker));

    for _ in 0..args.ops {
        let key = rng.gen_range(0..args.key_space.max(1));
        let remove = rng.gen_bool(args.remove_ratio.clamp(0.0, 1.0));

        let result = with_retry(args.retries, counters, || {
            if remove {
                tree.remove(&key)
            } else {
                tree.insert(key, worker)
            }
        });

        match result {
            Ok(true) if remove => {
                counters.removed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(true) => {
                counters.inserted.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("Worker {} gave up on key {}: {}", worker, key, e);
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Retry an operation from the top of the tree after lock timeouts
fn with_retry<F>(retries: usize, counters: &Counters, mut operation: F) -> Result<bool>
where
    F: FnMut() -> Result<bool>,
{
    let backoff = Backoff::new();
    let mut attempt = 0;

    loop {
        match operation() {
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                counters.retried.fetch_add(1, Ordering::Relaxed);
                backoff.snooze();
            }
            result => return result,
        }
    }
}
