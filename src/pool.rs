/// Connection Pool Module
///
/// `ConnectionPool` owns a bounded set of connections and hands them out
/// under a timeout contract. One pool-wide mutex guards the idle queue,
/// the active set and the counters; a condition variable wakes blocked
/// acquirers on release or close. Wake order is not FIFO-fair; that
/// looseness is part of the contract.
///
/// Invariant: `idle + active <= max_pool_size` at all times, and every
/// pooled connection belongs to exactly one of the two collections.
///
/// The eviction thread runs on its own timer (only when `idle_timeout_ms`
/// is non-zero), takes the lock just long enough to scan the idle queue,
/// and performs health probes and disposal I/O after dropping it.
use crate::config::PoolConfig;
use crate::connection::Connection;
use crate::core::{QuarryError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One pooled connection plus the bookkeeping the pool needs to decide
/// reuse versus disposal.
pub struct PooledConnection {
    id: u64,
    conn: Connection,
    created_at: Instant,
    last_used_at: Instant,
    broken: bool,
}

impl PooledConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Flags the connection so the pool disposes it on release instead of
    /// recycling it. Callers set this after a driver fault.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("broken", &self.broken)
            .finish()
    }
}

/// Snapshot of pool counters, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub active: usize,
    pub total_created: u64,
    pub total_closed: u64,
    pub waiters: usize,
    pub closed: bool,
}

struct PoolState {
    idle: VecDeque<PooledConnection>,
    /// Ids of connections currently handed out.
    active: HashMap<u64, ()>,
    closed: bool,
    next_id: u64,
    total_created: u64,
    total_closed: u64,
    waiters: usize,
    rng: StdRng,
}

impl PoolState {
    fn live(&self) -> usize {
        self.idle.len() + self.active.len()
    }
}

struct PoolShared {
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
    evictor_stop: Mutex<bool>,
    evictor_signal: Condvar,
}

/// A bounded, concurrency-safe pool of database connections.
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
    evictor: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.shared.config)
            .field("status", &self.status())
            .finish()
    }
}

// Recover the inner state from a poisoned lock: the pool's invariants are
// maintained before any operation that could panic.
fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ConnectionPool {
    /// Validates the config, pre-creates `initial_pool_size` connections
    /// and starts the eviction thread when idle eviction is enabled.
    pub fn open(config: PoolConfig) -> Result<Self> {
        if !config.validate() {
            return Err(QuarryError::Config(
                "pool configuration failed validation".to_string(),
            ));
        }

        let rng = match config.eviction_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                active: HashMap::new(),
                closed: false,
                next_id: 1,
                total_created: 0,
                total_closed: 0,
                waiters: 0,
                rng,
            }),
            available: Condvar::new(),
            evictor_stop: Mutex::new(false),
            evictor_signal: Condvar::new(),
            config,
        });

        let pool = ConnectionPool {
            shared: Arc::clone(&shared),
            evictor: Mutex::new(None),
        };

        pool.warm_up()?;

        if shared.config.idle_timeout_ms > 0 {
            let handle = spawn_evictor(Arc::clone(&shared));
            *lock(&pool.evictor) = Some(handle);
        }

        debug!(
            "pool opened (min {}, max {})",
            shared.config.min_pool_size, shared.config.max_pool_size
        );
        Ok(pool)
    }

    fn warm_up(&self) -> Result<()> {
        let target = self.shared.config.clamped_initial_size();
        let mut state = lock(&self.shared.state);
        while state.live() < target {
            let pooled = create_connection(&self.shared.config, &mut state)?;
            state.idle.push_back(pooled);
        }
        Ok(())
    }

    /// Acquires a connection, waiting up to `timeout_ms`. A timeout of
    /// zero or less blocks indefinitely. The deadline is computed once at
    /// entry; time spent discarding invalid idle connections counts
    /// against it.
    pub fn acquire(&self, timeout_ms: i64) -> Result<PooledConnection> {
        let deadline = if timeout_ms > 0 {
            Some(Instant::now() + Duration::from_millis(timeout_ms as u64))
        } else {
            None
        };
        let mut creation_failures: u32 = 0;

        let mut state = lock(&self.shared.state);
        loop {
            if state.closed {
                return Err(QuarryError::PoolClosed);
            }

            // Reuse an idle connection, validating on borrow if asked to.
            // The connection counts as active while the probe runs so the
            // sizing invariant holds with the lock released.
            if let Some(mut pooled) = state.idle.pop_front() {
                pooled.last_used_at = Instant::now();
                let id = pooled.id;
                state.active.insert(id, ());
                if !self.shared.config.test_on_borrow {
                    return Ok(pooled);
                }
                drop(state);
                if validate(&self.shared.config, &pooled) {
                    return Ok(pooled);
                }
                warn!("discarding invalid idle connection {}", id);
                dispose(&self.shared.config, pooled);
                state = lock(&self.shared.state);
                state.active.remove(&id);
                state.total_closed += 1;
                continue;
            }

            // Grow, bounded by max_pool_size and by max_retries on
            // consecutive creation failures.
            if state.live() < self.shared.config.max_pool_size {
                match create_connection(&self.shared.config, &mut state) {
                    Ok(pooled) => {
                        state.active.insert(pooled.id, ());
                        return Ok(pooled);
                    }
                    Err(e) => {
                        creation_failures += 1;
                        if creation_failures >= self.shared.config.max_retries.max(1) {
                            return Err(e);
                        }
                        continue;
                    }
                }
            }

            // Saturated: wait for a release or close.
            state.waiters += 1;
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.waiters -= 1;
                        return Err(QuarryError::PoolTimeout {
                            waited_ms: timeout_ms as u64,
                        });
                    }
                    let (guard, _) = self
                        .shared
                        .available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    state = guard;
                }
                None => {
                    state = self
                        .shared
                        .available
                        .wait(state)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            }
            state.waiters -= 1;
        }
    }

    /// Acquires with the config's default deadline.
    pub fn acquire_default(&self) -> Result<PooledConnection> {
        self.acquire(self.shared.config.connection_timeout_ms)
    }

    /// Returns a connection to the pool. A connection the pool does not
    /// currently track as active (foreign pool, or released after close)
    /// is logged and disposed without touching the counters.
    pub fn release(&self, mut pooled: PooledConnection) {
        let mut state = lock(&self.shared.state);

        if state.active.remove(&pooled.id).is_none() {
            warn!(
                "releasing connection {} the pool does not own (double release or foreign connection)",
                pooled.id
            );
            drop(state);
            dispose(&self.shared.config, pooled);
            return;
        }

        if state.closed {
            drop(state);
            dispose(&self.shared.config, pooled);
            self.shared.available.notify_one();
            return;
        }

        let config = &self.shared.config;
        let over_lifetime = config.max_lifetime_ms > 0
            && pooled.age() >= Duration::from_millis(config.max_lifetime_ms);
        let failed_return_test = config.test_on_return && !validate(config, &pooled);
        // Random disposal above the floor desynchronizes the expiry of
        // same-age connections.
        let jitter = state.idle.len() > config.min_pool_size && state.rng.gen_range(0..10) == 0;

        if pooled.broken || over_lifetime || failed_return_test || jitter {
            debug!(
                "disposing connection {} on release (broken: {}, over lifetime: {}, failed test: {}, jitter: {})",
                pooled.id, pooled.broken, over_lifetime, failed_return_test, jitter
            );
            state.total_closed += 1;
            drop(state);
            dispose(&self.shared.config, pooled);
        } else {
            pooled.last_used_at = Instant::now();
            state.idle.push_back(pooled);
            drop(state);
        }
        self.shared.available.notify_one();
    }

    /// Marks the pool closed, stops the evictor, disposes idle
    /// connections and wakes every waiter. Connections still handed out
    /// are not interrupted; they are disposed when released.
    pub fn close(&self) {
        // Stop the eviction thread first so it cannot race the teardown.
        {
            let mut stop = lock(&self.shared.evictor_stop);
            *stop = true;
        }
        self.shared.evictor_signal.notify_all();
        let evictor = lock(&self.evictor).take();

        let idles: Vec<PooledConnection> = {
            let mut state = lock(&self.shared.state);
            if state.closed {
                Vec::new()
            } else {
                state.closed = true;
                state.total_created = 0;
                state.total_closed = 0;
                state.idle.drain(..).collect()
            }
        };
        self.shared.available.notify_all();

        for pooled in idles {
            dispose(&self.shared.config, pooled);
        }
        if let Some(handle) = evictor {
            let _ = handle.join();
        }
        debug!("pool closed");
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.state).closed
    }

    pub fn status(&self) -> PoolStatus {
        let state = lock(&self.shared.state);
        PoolStatus {
            idle: state.idle.len(),
            active: state.active.len(),
            total_created: state.total_created,
            total_closed: state.total_closed,
            waiters: state.waiters,
            closed: state.closed,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.close();
        }
    }
}

fn create_connection(config: &PoolConfig, state: &mut PoolState) -> Result<PooledConnection> {
    let conn = Connection::connect(config)?;
    let id = state.next_id;
    state.next_id += 1;
    state.total_created += 1;
    let now = Instant::now();
    debug!("created connection {}", id);
    Ok(PooledConnection {
        id,
        conn,
        created_at: now,
        last_used_at: now,
        broken: false,
    })
}

/// Health check: the configured validator callback when present,
/// otherwise the test query.
fn validate(config: &PoolConfig, pooled: &PooledConnection) -> bool {
    if pooled.broken {
        return false;
    }
    match &config.connection_validator {
        Some(validator) => validator(&pooled.conn),
        None => pooled.conn.ping(),
    }
}

/// Teardown: finalizer callback (when present) then handle drop.
fn dispose(config: &PoolConfig, mut pooled: PooledConnection) {
    if let Some(finalizer) = &config.connection_finalizer {
        finalizer(&pooled.conn);
    }
    pooled.conn.disconnect();
}

fn eviction_interval(config: &PoolConfig) -> Duration {
    let half_idle = Duration::from_millis(config.idle_timeout_ms / 2);
    half_idle
        .min(Duration::from_secs(30))
        .max(Duration::from_secs(1))
}

fn spawn_evictor(shared: Arc<PoolShared>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("quarry-evictor".to_string())
        .spawn(move || {
            let interval = eviction_interval(&shared.config);
            let mut stop = lock(&shared.evictor_stop);
            loop {
                let (guard, _) = shared
                    .evictor_signal
                    .wait_timeout(stop, interval)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                stop = guard;
                if *stop {
                    break;
                }
                drop(stop);
                evict_expired(&shared);
                stop = lock(&shared.evictor_stop);
            }
        })
        .expect("failed to spawn eviction thread")
}

/// One eviction pass: scan the idle queue front to back under the lock,
/// pull out expired entries without dropping the live count below
/// `min_pool_size`, then dispose them after releasing the lock. Health
/// probes run in a second phase with the lock released.
fn evict_expired(shared: &PoolShared) {
    let config = &shared.config;
    let idle_timeout = Duration::from_millis(config.idle_timeout_ms);
    let max_lifetime = Duration::from_millis(config.max_lifetime_ms);

    let expired: Vec<PooledConnection> = {
        let mut state = lock(&shared.state);
        if state.closed {
            return;
        }
        let mut expired = Vec::new();
        let mut index = 0;
        while index < state.idle.len() {
            // Broken connections go regardless; timeout-based eviction
            // respects the floor.
            let entry = &state.idle[index];
            let timed_out = entry.idle_for() >= idle_timeout
                || (config.max_lifetime_ms > 0 && entry.age() >= max_lifetime);
            let evict = entry.broken || (timed_out && state.live() > config.min_pool_size);

            if evict {
                if let Some(pooled) = state.idle.remove(index) {
                    state.total_closed += 1;
                    expired.push(pooled);
                }
            } else {
                index += 1;
            }
        }
        expired
    };

    if !expired.is_empty() {
        debug!("evicting {} idle connection(s)", expired.len());
    }
    for pooled in expired {
        dispose(config, pooled);
    }

    if config.test_while_idle {
        probe_idle(shared);
    }
}

/// Health-checks the idle queue one connection at a time. Each candidate
/// is parked in the active set while its probe runs outside the lock, so
/// a stalled probe query cannot block acquire or release.
fn probe_idle(shared: &PoolShared) {
    let config = &shared.config;
    let mut probed: Vec<u64> = Vec::new();
    loop {
        let mut state = lock(&shared.state);
        if state.closed {
            return;
        }
        let position = state
            .idle
            .iter()
            .position(|entry| !probed.contains(&entry.id));
        let Some(position) = position else { break };
        let Some(pooled) = state.idle.remove(position) else { break };
        let id = pooled.id;
        probed.push(id);
        state.active.insert(id, ());
        drop(state);

        let healthy = validate(config, &pooled);

        let mut state = lock(&shared.state);
        state.active.remove(&id);
        if !healthy {
            state.total_closed += 1;
            drop(state);
            warn!("evicting unhealthy idle connection {}", id);
            dispose(config, pooled);
        } else if state.closed {
            drop(state);
            dispose(config, pooled);
        } else {
            state.idle.push_back(pooled);
        }
    }
}
