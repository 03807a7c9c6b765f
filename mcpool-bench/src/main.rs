//! # Pool Benchmark Driver
//!
//! Purpose: Push concurrent set/get traffic through a `PoolManager` so pool
//! contention and protocol throughput can be compared over time.
//!
//! ## Usage
//!
//! ```text
//! mcpool-bench [config.json|-] [threads] [ops_per_thread] [value_size]
//! ```
//!
//! With `-` (the default) an in-process server is started and a single
//! shard named `local` points at it.

use std::env;
use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::filter::EnvFilter;

use mcpool_client::{PoolConfig, PoolManager, ShardConfig};
use mcpool_server::ServerHandle;

const DEFAULT_THREADS: usize = 8;
const DEFAULT_OPS_PER_THREAD: usize = 10_000;
const DEFAULT_VALUE_SIZE: usize = 128;
const LOCAL_PARALLELISM: usize = 4;

struct BenchConfig {
    config_path: Option<String>,
    threads: usize,
    ops_per_thread: usize,
    value_size: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        let config_path = args.next().filter(|path| path != "-");
        let threads = parse_usize(args.next(), DEFAULT_THREADS).max(1);
        let ops_per_thread = parse_usize(args.next(), DEFAULT_OPS_PER_THREAD);
        let value_size = parse_usize(args.next(), DEFAULT_VALUE_SIZE);

        BenchConfig {
            config_path,
            threads,
            ops_per_thread,
            value_size,
        }
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

fn report(label: &str, ops: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let ops_per_sec = (ops as f64) / secs;
    let micros_per_op = (secs * 1e6) / (ops as f64);
    println!("{label}: {ops} ops in {secs:.3}s ({ops_per_sec:.0} ops/s, {micros_per_op:.1} us/op)");
}

fn main() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    if let Err(err) = run() {
        eprintln!("mcpool-bench failed: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let bench = BenchConfig::from_args();

    // Keeps the in-process server alive for the whole run.
    let mut local_server = None;
    let config = match &bench.config_path {
        Some(path) => {
            let raw = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            PoolConfig::from_json_str(&raw)?
        }
        None => {
            let server = ServerHandle::spawn("127.0.0.1:0").context("starting local server")?;
            let config = PoolConfig::new(
                LOCAL_PARALLELISM,
                vec![ShardConfig::tcp("local", "127.0.0.1", server.port())],
            );
            local_server = Some(server);
            config
        }
    };

    let shard_names: Vec<String> = config.shards.iter().map(|shard| shard.name.clone()).collect();
    let manager = PoolManager::initialize(config)?;
    info!(
        shards = shard_names.len(),
        threads = bench.threads,
        ops = bench.ops_per_thread,
        value_size = bench.value_size,
        "starting benchmark"
    );

    let value = vec![b'x'; bench.value_size];
    let total_ops = bench.threads * bench.ops_per_thread;

    let start = Instant::now();
    run_workers(&bench, |worker, i| {
        let shard = &shard_names[(worker + i) % shard_names.len()];
        manager.set(shard, &bench_key(worker, i), &value)
    })?;
    report("SET", total_ops, start.elapsed());

    let start = Instant::now();
    run_workers(&bench, |worker, i| manager.get(&bench_key(worker, i)).map(drop))?;
    report("GET", total_ops, start.elapsed());

    manager.shutdown();
    if let Some(server) = local_server {
        server.shutdown();
    }
    Ok(())
}

fn bench_key(worker: usize, i: usize) -> String {
    format!("bench:{worker}:{i}")
}

fn run_workers<F>(bench: &BenchConfig, op: F) -> Result<()>
where
    F: Fn(usize, usize) -> mcpool_client::McResult<()> + Sync,
{
    thread::scope(|scope| {
        let handles: Vec<_> = (0..bench.threads)
            .map(|worker| {
                let op = &op;
                scope.spawn(move || -> mcpool_client::McResult<()> {
                    for i in 0..bench.ops_per_thread {
                        op(worker, i)?;
                    }
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => bail!("worker thread panicked"),
            }
        }
        Ok(())
    })
}
