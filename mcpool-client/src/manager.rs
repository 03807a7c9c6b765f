//! # Pool Manager
//!
//! Purpose: Own one bounded pool per shard and run each `get`/`set` on a
//! connection borrowed for exactly that call.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: Callers never see sockets, pools, or reply framing.
//! 2. **Explicit Instance**: No process-wide state; share the manager by
//!    reference or `Arc`.
//! 3. **Shard-Addressed Writes**: `set` targets the named shard only.
//! 4. **Shard-Agnostic Reads**: `get` takes whichever shard has a free
//!    connection first.
//!
//! ## Read Path
//!
//! ```text
//! phase 1: sweep all shards, take any idle connection, then try to
//!          reconnect vacant slots; no waiting for releases
//! phase 2: wait on the shared availability signal, re-sweep on every
//!          release, give up after one acquire timeout
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use tracing::{debug, warn};

use mcpool_common::{McError, McResult, PoolConfig};

use crate::pool::{deadline_after, Availability, PooledConnection, ShardPool};
use crate::protocol::Lookup;
use crate::transport::ConnectOptions;

/// Sharded connection pools with blocking, bounded acquisition.
pub struct PoolManager {
    shards: Vec<Arc<ShardPool>>,
    by_name: HashMap<String, usize>,
    signal: Arc<Availability>,
    // Rotating start point for the read sweep.
    cursor: AtomicUsize,
    acquire_timeout: Duration,
}

impl PoolManager {
    /// Validates the config and eagerly opens `parallelism` connections per shard.
    ///
    /// Any connect error aborts initialization and is returned as is.
    pub fn initialize(config: PoolConfig) -> McResult<Self> {
        config.validate()?;

        let options = ConnectOptions::from(&config);
        let signal = Arc::new(Availability::new());
        let mut shards = Vec::with_capacity(config.shards.len());
        let mut by_name = HashMap::with_capacity(config.shards.len());

        for shard in config.shards {
            by_name.insert(shard.name.clone(), shards.len());
            let pool = ShardPool::open(shard, options, config.parallelism, signal.clone())?;
            shards.push(Arc::new(pool));
        }
        debug!(
            shards = shards.len(),
            parallelism = config.parallelism,
            "pool manager initialized"
        );

        Ok(PoolManager {
            shards,
            by_name,
            signal,
            cursor: AtomicUsize::new(0),
            acquire_timeout: config.acquire_timeout,
        })
    }

    /// Reads a key from whichever shard answers first.
    ///
    /// A missing key, a stored empty value and a server error line all come
    /// back as an empty value. Use [`PoolManager::lookup`] to tell them apart.
    pub fn get(&self, key: &str) -> McResult<Vec<u8>> {
        self.lookup(key).map(Lookup::into_value)
    }

    /// Reads a key from whichever shard answers first, keeping the reply shape.
    pub fn lookup(&self, key: &str) -> McResult<Lookup> {
        let mut conn = self.acquire_any()?;
        conn.lookup(key)
    }

    /// Stores a value on the named shard.
    ///
    /// A reply other than `STORED` is reported as `SetFailed`, as is a
    /// transport failure during the exchange.
    pub fn set(&self, shard: &str, key: &str, value: &[u8]) -> McResult<()> {
        let pool = self.shard(shard)?;
        let mut conn = pool.checkout(self.acquire_timeout, "set")?;
        match conn.set(key, value) {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(shard, key, "server did not store value");
                Err(McError::set_failed("value was not stored"))
            }
            Err(McError::Io(err)) => Err(McError::set_failed(err.to_string())),
            Err(err) => Err(err),
        }
    }

    /// Sends `flush_all` to the named shard.
    pub fn flush_all(&self, shard: &str) -> McResult<()> {
        let pool = self.shard(shard)?;
        let mut conn = pool.checkout(self.acquire_timeout, "flush_all")?;
        conn.flush_all()
    }

    /// Checks out a connection to the named shard for several commands.
    ///
    /// The connection goes back to the pool when the guard is dropped.
    pub fn checkout(&self, shard: &str) -> McResult<PooledConnection> {
        self.shard(shard)?.checkout(self.acquire_timeout, "checkout")
    }

    /// Shard names in configuration order.
    pub fn shard_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.shards.iter().map(|pool| pool.name())
    }

    /// Connections currently sitting idle in the named shard's pool.
    pub fn idle_connections(&self, shard: &str) -> McResult<usize> {
        Ok(self.shard(shard)?.idle_count())
    }

    /// Configured pool capacity of the named shard.
    pub fn capacity(&self, shard: &str) -> McResult<usize> {
        Ok(self.shard(shard)?.capacity())
    }

    /// Closes every idle connection and consumes the manager.
    ///
    /// Connections still checked out close when their guards drop.
    pub fn shutdown(self) {
        let closed: usize = self.shards.iter().map(|pool| pool.close_idle()).sum();
        debug!(closed, "pool manager shut down");
    }

    fn shard(&self, name: &str) -> McResult<&Arc<ShardPool>> {
        match self.by_name.get(name) {
            Some(&idx) => Ok(&self.shards[idx]),
            None => {
                warn!(shard = name, "shard not configured");
                Err(McError::shard_not_found(name))
            }
        }
    }

    fn acquire_any(&self) -> McResult<PooledConnection> {
        let deadline = deadline_after(self.acquire_timeout);
        // Shards whose reconnect already failed in this call are not retried.
        let mut failed = vec![false; self.shards.len()];
        loop {
            let seen = self.signal.snapshot();
            if let Some(conn) = self.sweep(deadline, &mut failed) {
                return Ok(conn);
            }
            if !self.signal.wait_since(seen, deadline) {
                if let Some(conn) = self.sweep(deadline, &mut failed) {
                    return Ok(conn);
                }
                warn!("timed out waiting for a connection on any shard");
                return Err(McError::timeout("get"));
            }
        }
    }

    /// One pass over every shard without waiting for a release.
    ///
    /// Idle connections on all shards are tried before any vacant slot is
    /// reconnected, since a reconnect blocks for up to the connect timeout.
    fn sweep(&self, deadline: Option<Instant>, failed: &mut [bool]) -> Option<PooledConnection> {
        let count = self.shards.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % count;
        let order = move |offset: usize| (start + offset) % count;

        for idx in (0..count).map(order) {
            if let Some(conn) = self.shards[idx].try_take_idle() {
                return Some(conn);
            }
        }
        for idx in (0..count).map(order) {
            if failed[idx] {
                continue;
            }
            let pool = &self.shards[idx];
            match pool.try_reconnect(deadline) {
                Ok(Some(conn)) => return Some(conn),
                Ok(None) => {}
                Err(err) => {
                    failed[idx] = true;
                    warn!(shard = pool.name(), error = %err, "could not reconnect vacant slot");
                }
            }
        }
        None
    }
}
