//! # Shard Connection Pool
//!
//! Purpose: Keep a fixed number of live connections per shard and hand them
//! out one caller at a time.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Connections are opened up front and reused.
//! 2. **Fixed Capacity**: `idle + checked out + vacant == capacity` at all times.
//! 3. **RAII Release**: `PooledConnection` returns itself to the pool on drop.
//! 4. **Health Check On Release**: A connection that hit an I/O error is
//!    closed instead of returned; its slot turns vacant and the next caller
//!    reconnects it.
//! 5. **Minimal Locking**: The mutex is held only while moving connections.
//!
//! ## Slot Lifecycle
//!
//! ```text
//! idle ──checkout──▶ checked out ──drop (healthy)──▶ idle
//!                          │
//!                          └──drop (io error)──▶ vacant ──checkout + reconnect──▶ checked out
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use mcpool_common::{McError, McResult, ShardConfig};

use crate::connection::Connection;
use crate::protocol::Lookup;
use crate::transport::ConnectOptions;

/// Wake-up signal shared by every shard of one manager.
///
/// The generation counter closes the gap between "nothing idle" and "start
/// waiting": a waiter records the generation before it sweeps, and any
/// release after that point bumps it.
pub(crate) struct Availability {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl Availability {
    pub(crate) fn new() -> Self {
        Availability {
            generation: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// Current generation; pass it to `wait_since`.
    pub(crate) fn snapshot(&self) -> u64 {
        *self.generation.lock()
    }

    /// Announces that some shard has a connection or a vacant slot.
    fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Blocks until the generation moves past `seen` or `deadline` passes.
    ///
    /// Returns false on timeout. `None` waits without a deadline.
    pub(crate) fn wait_since(&self, seen: u64, deadline: Option<Instant>) -> bool {
        let mut generation = self.generation.lock();
        while *generation == seen {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut generation, deadline).timed_out() {
                        return *generation != seen;
                    }
                }
                None => self.cond.wait(&mut generation),
            }
        }
        true
    }
}

/// Deadline `timeout` from now, or `None` when it does not fit in an `Instant`.
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

struct ShardState {
    idle: VecDeque<Connection>,
    vacant: usize,
}

/// Bounded pool of connections to one shard.
pub(crate) struct ShardPool {
    config: ShardConfig,
    options: ConnectOptions,
    capacity: usize,
    state: Mutex<ShardState>,
    signal: Arc<Availability>,
}

impl ShardPool {
    /// Opens `capacity` connections to the shard.
    ///
    /// Fails on the first connect error; connections opened so far are closed
    /// when the partial pool is dropped.
    pub(crate) fn open(
        config: ShardConfig,
        options: ConnectOptions,
        capacity: usize,
        signal: Arc<Availability>,
    ) -> McResult<Self> {
        let address = config.address();
        let mut idle = VecDeque::with_capacity(capacity);
        for _ in 0..capacity {
            let conn = Connection::connect_with(config.network, &address, &options).map_err(|err| {
                warn!(shard = %config.name, error = %err, "could not open pooled connection");
                err
            })?;
            idle.push_back(conn);
        }
        debug!(shard = %config.name, capacity, "shard pool ready");

        Ok(ShardPool {
            config,
            options,
            capacity,
            state: Mutex::new(ShardState { idle, vacant: 0 }),
            signal,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Takes an idle connection, if any.
    pub(crate) fn try_take_idle(self: &Arc<Self>) -> Option<PooledConnection> {
        let conn = self.state.lock().idle.pop_front()?;
        Some(PooledConnection::new(self.clone(), conn))
    }

    /// Reconnects a vacant slot.
    ///
    /// Returns `Ok(None)` when no slot is vacant or `deadline` has passed.
    /// The connect is bounded by whatever is left until `deadline`. On failure
    /// the slot stays vacant, waiters are woken, and the connect error is
    /// returned.
    pub(crate) fn try_reconnect(self: &Arc<Self>, deadline: Option<Instant>) -> McResult<Option<PooledConnection>> {
        let options = match self.reconnect_options(deadline) {
            Some(options) => options,
            None => return Ok(None),
        };
        {
            let mut state = self.state.lock();
            if state.vacant == 0 {
                return Ok(None);
            }
            state.vacant -= 1;
        }

        debug!(shard = %self.config.name, "reconnecting vacant slot");
        match Connection::connect_with(self.config.network, &self.config.address(), &options) {
            Ok(conn) => Ok(Some(PooledConnection::new(self.clone(), conn))),
            Err(err) => {
                self.state.lock().vacant += 1;
                // Someone may have seen no vacancy while the connect was in flight.
                self.signal.notify();
                Err(err)
            }
        }
    }

    /// Takes a connection without waiting for a release.
    ///
    /// Returns `Ok(None)` when every slot is checked out.
    fn try_checkout(self: &Arc<Self>, deadline: Option<Instant>) -> McResult<Option<PooledConnection>> {
        if let Some(conn) = self.try_take_idle() {
            return Ok(Some(conn));
        }
        self.try_reconnect(deadline)
    }

    /// Takes a connection, waiting up to `timeout` for one to be released.
    pub(crate) fn checkout(self: &Arc<Self>, timeout: Duration, operation: &str) -> McResult<PooledConnection> {
        let deadline = deadline_after(timeout);
        loop {
            let seen = self.signal.snapshot();
            if let Some(conn) = self.try_checkout(deadline)? {
                return Ok(conn);
            }
            if !self.signal.wait_since(seen, deadline) {
                // One last look: a release can land right at the deadline.
                if let Some(conn) = self.try_checkout(deadline)? {
                    return Ok(conn);
                }
                warn!(shard = %self.config.name, operation, "timed out waiting for a connection");
                return Err(McError::timeout(operation));
            }
        }
    }

    fn reconnect_options(&self, deadline: Option<Instant>) -> Option<ConnectOptions> {
        let mut options = self.options;
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            options.connect_timeout = Some(match options.connect_timeout {
                Some(timeout) => timeout.min(remaining),
                None => remaining,
            });
        }
        Some(options)
    }

    fn checkin(&self, conn: Connection) {
        self.state.lock().idle.push_back(conn);
        self.signal.notify();
    }

    fn discard(&self, conn: Connection) {
        warn!(shard = %self.config.name, address = conn.address(), "dropping broken connection");
        conn.disconnect();
        self.state.lock().vacant += 1;
        self.signal.notify();
    }

    /// Closes every idle connection.
    pub(crate) fn close_idle(&self) -> usize {
        let drained: Vec<Connection> = self.state.lock().idle.drain(..).collect();
        let closed = drained.len();
        for conn in drained {
            conn.disconnect();
        }
        closed
    }
}

/// RAII wrapper returning a connection to its shard pool on drop.
pub struct PooledConnection {
    pool: Arc<ShardPool>,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<ShardPool>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// Name of the shard this connection belongs to.
    pub fn shard(&self) -> &str {
        self.pool.name()
    }

    /// See [`Connection::get`].
    pub fn get(&mut self, key: &str) -> McResult<Vec<u8>> {
        self.run(|conn| conn.get(key))
    }

    /// See [`Connection::lookup`].
    pub fn lookup(&mut self, key: &str) -> McResult<Lookup> {
        self.run(|conn| conn.lookup(key))
    }

    /// See [`Connection::set`].
    pub fn set(&mut self, key: &str, value: &[u8]) -> McResult<bool> {
        self.run(|conn| conn.set(key, value))
    }

    /// See [`Connection::flush_all`].
    pub fn flush_all(&mut self) -> McResult<()> {
        self.run(Connection::flush_all)
    }

    fn run<T>(&mut self, op: impl FnOnce(&mut Connection) -> McResult<T>) -> McResult<T> {
        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => return Err(McError::Io(std::io::ErrorKind::NotConnected.into())),
        };
        let result = op(conn);
        if let Err(err) = &result {
            // Reply state is unknown after a transport failure.
            if err.is_io() {
                self.valid = false;
            }
        }
        result
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        if self.valid {
            self.pool.checkin(conn);
        } else {
            self.pool.discard(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    /// Pool with one vacant slot pointing at a port nothing listens on.
    fn vacant_pool() -> Arc<ShardPool> {
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        Arc::new(ShardPool {
            config: ShardConfig::tcp("dead", "127.0.0.1", port),
            options: ConnectOptions {
                connect_timeout: Some(Duration::from_secs(2)),
                ..ConnectOptions::default()
            },
            capacity: 1,
            state: Mutex::new(ShardState {
                idle: VecDeque::new(),
                vacant: 1,
            }),
            signal: Arc::new(Availability::new()),
        })
    }

    #[test]
    fn wait_times_out_without_release() {
        let signal = Availability::new();
        let seen = signal.snapshot();
        let start = Instant::now();
        assert!(!signal.wait_since(seen, Some(start + Duration::from_millis(20))));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn release_before_wait_is_not_lost() {
        let signal = Availability::new();
        let seen = signal.snapshot();
        signal.notify();
        // Returns at once: the generation already moved.
        assert!(signal.wait_since(seen, Some(Instant::now() + Duration::from_secs(5))));
    }

    #[test]
    fn notify_wakes_waiter() {
        let signal = Arc::new(Availability::new());
        let seen = signal.snapshot();
        let notifier = {
            let signal = signal.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                signal.notify();
            })
        };
        assert!(signal.wait_since(seen, Some(Instant::now() + Duration::from_secs(5))));
        notifier.join().unwrap();
    }

    #[test]
    fn oversized_timeout_has_no_deadline() {
        assert!(deadline_after(Duration::MAX).is_none());
        assert!(deadline_after(Duration::from_secs(1)).is_some());
    }

    #[test]
    fn unbounded_wait_returns_on_notify() {
        let signal = Arc::new(Availability::new());
        let seen = signal.snapshot();
        let notifier = {
            let signal = signal.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                signal.notify();
            })
        };
        assert!(signal.wait_since(seen, None));
        notifier.join().unwrap();
    }

    #[test]
    fn failed_reconnect_restores_vacancy_and_wakes_waiters() {
        let pool = vacant_pool();
        let seen = pool.signal.snapshot();

        assert!(pool.try_reconnect(None).is_err());
        assert_eq!(pool.state.lock().vacant, 1);
        // A waiter that saw the slot taken must get another look.
        assert!(pool.signal.wait_since(seen, Some(Instant::now())));
    }

    #[test]
    fn reconnect_is_skipped_past_the_deadline() {
        let pool = vacant_pool();
        let seen = pool.signal.snapshot();

        let outcome = pool.try_reconnect(Some(Instant::now())).unwrap();
        assert!(outcome.is_none());
        assert_eq!(pool.state.lock().vacant, 1);
        assert_eq!(pool.signal.snapshot(), seen);
    }
}
