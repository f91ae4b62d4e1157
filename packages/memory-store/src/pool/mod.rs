//! Connection pool (§4.B): a bounded multiplex of driver connections with
//! health checks, idle/lifetime expiry, minimum-size maintenance, and fair
//! waiting under contention.
//!
//! Atomic counters track the sizes. A single lock guards the idle queue.
//! A notify wakes waiters instead of polling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MemoryError, Result};

/// Default pool sizing (§6: `POOL_MAX_SIZE`, `POOL_MIN_SIZE`).
pub const DEFAULT_MAX_SIZE: usize = 10;
pub const DEFAULT_MIN_SIZE: usize = 2;

/// A value the pool knows how to health-check and reset before reuse.
#[async_trait]
pub trait PoolableConnection: Send + Sync + 'static {
    /// Liveness probe, used by `get` and the health loop.
    async fn is_healthy(&self) -> bool;

    /// Clear per-checkout state before the connection is reused.
    fn reset(&self);

    /// Release any underlying resource. Default no-op for handles (like the
    /// mock driver) that don't own a real socket.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait ConnectionFactory<C: PoolableConnection>: Send + Sync {
    async fn create(&self) -> Result<C>;
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: usize,
    pub min_size: usize,
    pub max_idle_time: Option<Duration>,
    pub max_lifetime: Option<Duration>,
    pub health_check_interval: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            min_size: DEFAULT_MIN_SIZE,
            max_idle_time: Some(Duration::from_secs(10 * 60)),
            max_lifetime: Some(Duration::from_secs(60 * 60)),
            health_check_interval: Some(Duration::from_secs(30)),
        }
    }
}

struct Entry<C> {
    conn: C,
    created_at: Instant,
    last_used_at: StdMutex<Instant>,
    usage_count: StdMutex<u64>,
}

impl<C: PoolableConnection> Entry<C> {
    fn fresh(conn: C) -> Self {
        let now = Instant::now();
        Self { conn, created_at: now, last_used_at: StdMutex::new(now), usage_count: StdMutex::new(0) }
    }

    fn touch(&self) {
        *self.last_used_at.lock().unwrap() = Instant::now();
        *self.usage_count.lock().unwrap() += 1;
    }

    fn is_expired(&self, config: &PoolConfig) -> bool {
        if let Some(max_lifetime) = config.max_lifetime {
            if self.created_at.elapsed() > max_lifetime {
                return true;
            }
        }
        if let Some(max_idle) = config.max_idle_time {
            if self.last_used_at.lock().unwrap().elapsed() > max_idle {
                return true;
            }
        }
        false
    }
}

/// Point-in-time pool occupancy, exposed for metrics (§4.I) and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub idle_count: usize,
    pub active_count: usize,
    pub current_size: usize,
    pub total_created: u64,
    pub total_destroyed: u64,
}

struct Inner<C: PoolableConnection> {
    factory: Arc<dyn ConnectionFactory<C>>,
    config: PoolConfig,
    idle: AsyncMutex<VecDeque<Entry<C>>>,
    notify: Notify,
    size: AtomicUsize,
    active_count: AtomicUsize,
    total_created: AtomicU64,
    total_destroyed: AtomicU64,
    closed: AtomicBool,
    health_task: AsyncMutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

/// A bounded, reusable set of driver connections (§4.B).
pub struct ConnectionPool<C: PoolableConnection> {
    inner: Arc<Inner<C>>,
}

impl<C: PoolableConnection> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<C: PoolableConnection + Clone> ConnectionPool<C> {
    pub fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory<C>>) -> Self {
        let inner = Arc::new(Inner {
            factory,
            config,
            idle: AsyncMutex::new(VecDeque::new()),
            notify: Notify::new(),
            size: AtomicUsize::new(0),
            active_count: AtomicUsize::new(0),
            total_created: AtomicU64::new(0),
            total_destroyed: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            health_task: AsyncMutex::new(None),
        });
        let pool = Self { inner };
        if let Some(interval) = pool.inner.config.health_check_interval {
            pool.spawn_health_loop(interval);
        }
        pool
    }

    pub fn stats(&self) -> PoolStats {
        let current_size = self.inner.size.load(Ordering::SeqCst);
        let active_count = self.inner.active_count.load(Ordering::SeqCst);
        PoolStats {
            idle_count: current_size.saturating_sub(active_count),
            active_count,
            current_size,
            total_created: self.inner.total_created.load(Ordering::SeqCst),
            total_destroyed: self.inner.total_destroyed.load(Ordering::SeqCst),
        }
    }

    fn destroy_slot(&self) {
        self.inner.size.fetch_sub(1, Ordering::SeqCst);
        self.inner.total_destroyed.fetch_add(1, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    /// Reserve a slot (atomic CAS against `max_size`) before creating a new
    /// connection, so two racing callers can't both create past the cap.
    fn try_reserve_slot(&self) -> bool {
        let max = self.inner.config.max_size;
        loop {
            let current = self.inner.size.load(Ordering::SeqCst);
            if current >= max {
                return false;
            }
            if self
                .inner
                .size
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Obtain a handle to a live connection, honoring `cancel` while waiting.
    pub async fn get(&self, cancel: &CancellationToken) -> Result<PooledConnection<C>> {
        loop {
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(MemoryError::PoolClosed);
            }

            {
                let mut idle = self.inner.idle.lock().await;
                while let Some(entry) = idle.pop_front() {
                    if entry.is_expired(&self.inner.config) || !entry.conn.is_healthy().await {
                        drop(idle);
                        self.destroy_slot();
                        idle = self.inner.idle.lock().await;
                        continue;
                    }
                    entry.touch();
                    self.inner.active_count.fetch_add(1, Ordering::SeqCst);
                    return Ok(PooledConnection::new(self, entry));
                }
            }

            if self.try_reserve_slot() {
                match self.inner.factory.create().await {
                    Ok(conn) => {
                        self.inner.total_created.fetch_add(1, Ordering::SeqCst);
                        self.inner.active_count.fetch_add(1, Ordering::SeqCst);
                        return Ok(PooledConnection::new(self, Entry::fresh(conn)));
                    }
                    Err(err) => {
                        self.inner.size.fetch_sub(1, Ordering::SeqCst);
                        return Err(err);
                    }
                }
            }

            tokio::select! {
                _ = self.inner.notify.notified() => continue,
                _ = cancel.cancelled() => return Err(MemoryError::Cancelled),
            }
        }
    }

    async fn put(&self, entry: Entry<C>) -> Result<()> {
        entry.conn.reset();
        self.inner.active_count.fetch_sub(1, Ordering::SeqCst);

        if self.inner.closed.load(Ordering::SeqCst) {
            let _ = entry.conn.close().await;
            self.destroy_slot();
            return Err(MemoryError::PoolClosed);
        }

        let mut idle = self.inner.idle.lock().await;
        if idle.len() >= self.inner.config.max_size {
            drop(idle);
            let _ = entry.conn.close().await;
            self.destroy_slot();
            return Ok(());
        }
        idle.push_back(entry);
        drop(idle);
        self.inner.notify.notify_one();
        Ok(())
    }

    fn spawn_health_loop(&self, interval: Duration) {
        let token = CancellationToken::new();
        let child_token = token.clone();
        let pool = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = child_token.cancelled() => break,
                }
                pool.run_health_pass().await;
            }
        });
        if let Ok(mut guard) = self.inner.health_task.try_lock() {
            *guard = Some((token, handle));
        }
    }

    async fn run_health_pass(&self) {
        let mut survivors = VecDeque::new();
        let drained: VecDeque<Entry<C>> = {
            let mut idle = self.inner.idle.lock().await;
            std::mem::take(&mut *idle)
        };
        for entry in drained {
            if entry.is_expired(&self.inner.config) || !entry.conn.is_healthy().await {
                self.destroy_slot();
            } else {
                survivors.push_back(entry);
            }
        }
        {
            let mut idle = self.inner.idle.lock().await;
            idle.extend(survivors);
        }
        debug!(target: "memory_store::pool", "health pass complete, size={}", self.inner.size.load(Ordering::SeqCst));

        while self.inner.size.load(Ordering::SeqCst) < self.inner.config.min_size {
            if !self.try_reserve_slot() {
                break;
            }
            match tokio::time::timeout(Duration::from_secs(5), self.inner.factory.create()).await {
                Ok(Ok(conn)) => {
                    self.inner.total_created.fetch_add(1, Ordering::SeqCst);
                    let mut idle = self.inner.idle.lock().await;
                    idle.push_back(Entry::fresh(conn));
                    drop(idle);
                    self.inner.notify.notify_one();
                }
                Ok(Err(err)) => {
                    warn!(target: "memory_store::pool", "min-size top-up failed: {err}");
                    self.inner.size.fetch_sub(1, Ordering::SeqCst);
                    break;
                }
                Err(_) => {
                    warn!(target: "memory_store::pool", "min-size top-up timed out after 5s");
                    self.inner.size.fetch_sub(1, Ordering::SeqCst);
                    break;
                }
            }
        }
    }

    /// Idempotent shutdown: stops the health loop, drains and closes every
    /// idle connection, and rejects subsequent `get`/`put` calls.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some((token, handle)) = self.inner.health_task.lock().await.take() {
            token.cancel();
            let _ = handle.await;
        }
        let mut last_err = None;
        let mut idle = self.inner.idle.lock().await;
        while let Some(entry) = idle.pop_front() {
            if let Err(e) = entry.conn.close().await {
                last_err = Some(e);
            }
            self.inner.size.fetch_sub(1, Ordering::SeqCst);
            self.inner.total_destroyed.fetch_add(1, Ordering::SeqCst);
        }
        drop(idle);
        self.inner.notify.notify_waiters();
        info!(target: "memory_store::pool", "pool closed");
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn downgrade(&self) -> Weak<Inner<C>> {
        Arc::downgrade(&self.inner)
    }
}

/// A checked-out connection. `close` (or, best-effort, `Drop`) returns it to
/// the pool exactly once.
pub struct PooledConnection<C: PoolableConnection + Clone> {
    entry: StdMutex<Option<Entry<C>>>,
    pool: Weak<Inner<C>>,
    returned: AtomicBool,
}

impl<C: PoolableConnection + Clone> PooledConnection<C> {
    fn new(pool: &ConnectionPool<C>, entry: Entry<C>) -> Self {
        Self { entry: StdMutex::new(Some(entry)), pool: pool.downgrade(), returned: AtomicBool::new(false) }
    }

    /// Clone of the underlying connection handle (cheap for handle-style
    /// drivers like [`crate::driver::MockDriver`], which just wrap an `Arc`).
    pub fn conn(&self) -> C {
        self.entry.lock().unwrap().as_ref().expect("connection already returned to pool").conn.clone()
    }

    pub fn usage_count(&self) -> u64 {
        *self.entry.lock().unwrap().as_ref().expect("connection already returned to pool").usage_count.lock().unwrap()
    }

    /// Idempotent: returns the connection to the pool exactly once.
    pub async fn close(&self) -> Result<()> {
        if self.returned.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let entry = self.entry.lock().unwrap().take();
        let Some(entry) = entry else { return Ok(()) };
        match self.pool.upgrade() {
            Some(inner) => ConnectionPool { inner }.put(entry).await,
            None => Ok(()),
        }
    }
}

impl<C: PoolableConnection + Clone> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if self.returned.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(entry) = self.entry.lock().unwrap().take() else { return };
        let Some(inner) = self.pool.upgrade() else { return };
        tokio::spawn(async move {
            let _ = ConnectionPool { inner }.put(entry).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Clone)]
    struct CountingConn {
        id: u32,
        healthy: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PoolableConnection for CountingConn {
        async fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
        fn reset(&self) {}
    }

    struct CountingFactory {
        next_id: AtomicU32,
        healthy: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ConnectionFactory<CountingConn> for CountingFactory {
        async fn create(&self) -> Result<CountingConn> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(CountingConn { id, healthy: self.healthy.clone() })
        }
    }

    fn test_pool(max_size: usize, min_size: usize) -> ConnectionPool<CountingConn> {
        let factory = Arc::new(CountingFactory { next_id: AtomicU32::new(0), healthy: Arc::new(AtomicBool::new(true)) });
        ConnectionPool::new(
            PoolConfig { max_size, min_size, max_idle_time: None, max_lifetime: None, health_check_interval: None },
            factory,
        )
    }

    #[tokio::test]
    async fn never_exceeds_max_size_under_concurrency() {
        let pool = test_pool(3, 0);
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();
        for _ in 0..3 {
            handles.push(pool.get(&cancel).await.unwrap());
        }
        assert_eq!(pool.stats().current_size, 3);
        assert_eq!(pool.stats().active_count, 3);

        let cancel2 = CancellationToken::new();
        cancel2.cancel();
        let err = pool.get(&cancel2).await.unwrap_err();
        assert!(matches!(err, MemoryError::Cancelled));

        for h in handles {
            h.close().await.unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.active_count, 0);
        assert_eq!(stats.current_size, 3);
    }

    #[tokio::test]
    async fn created_minus_destroyed_equals_current_size() {
        let pool = test_pool(2, 0);
        let cancel = CancellationToken::new();
        let a = pool.get(&cancel).await.unwrap();
        let b = pool.get(&cancel).await.unwrap();
        a.close().await.unwrap();
        b.close().await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.total_created - stats.total_destroyed, stats.current_size as u64);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_get() {
        let pool = test_pool(2, 0);
        pool.close().await.unwrap();
        pool.close().await.unwrap();
        let cancel = CancellationToken::new();
        let err = pool.get(&cancel).await.unwrap_err();
        assert!(matches!(err, MemoryError::PoolClosed));
    }

    #[tokio::test]
    async fn blocked_get_unblocks_when_a_connection_is_released() {
        let pool = test_pool(1, 0);
        let cancel = CancellationToken::new();
        let first = pool.get(&cancel).await.unwrap();

        let pool2 = pool.clone();
        let waiter = tokio::spawn(async move {
            let cancel = CancellationToken::new();
            pool2.get(&cancel).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        first.close().await.unwrap();
        let second = waiter.await.unwrap().unwrap();
        assert_eq!(pool.stats().active_count, 1);
        second.close().await.unwrap();
    }

    // Invariants `PoolStats` upholds under arbitrary checkout/return sequences.
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn run_sequence(max_size: usize, ops: Vec<bool>) -> PoolStats {
            tokio::runtime::Runtime::new().unwrap().block_on(async move {
                let pool = test_pool(max_size, 0);
                let mut held = Vec::new();
                for get in ops {
                    if get {
                        // Bounded wait: an unsatisfiable "get" is a no-op for this sequence.
                        let cancel = CancellationToken::new();
                        match tokio::time::timeout(Duration::from_millis(10), pool.get(&cancel)).await {
                            Ok(Ok(conn)) => held.push(conn),
                            _ => {}
                        }
                    } else if let Some(conn) = held.pop() {
                        conn.close().await.unwrap();
                    }
                    let stats = pool.stats();
                    prop_assert_pool_invariants(max_size, stats);
                }
                for conn in held {
                    conn.close().await.unwrap();
                }
                pool.stats()
            })
        }

        fn prop_assert_pool_invariants(max_size: usize, stats: PoolStats) {
            assert!(stats.current_size <= max_size, "current_size {} exceeded max_size {}", stats.current_size, max_size);
            assert!(stats.active_count <= stats.current_size, "active_count {} exceeded current_size {}", stats.active_count, stats.current_size);
            assert_eq!(
                stats.total_created - stats.total_destroyed,
                stats.current_size as u64,
                "created - destroyed should equal current_size"
            );
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn current_size_never_exceeds_max_size_under_any_get_put_sequence(
                max_size in 1usize..=6,
                ops in proptest::collection::vec(any::<bool>(), 0..16),
            ) {
                let stats = run_sequence(max_size, ops);
                prop_assert!(stats.current_size <= max_size);
                prop_assert_eq!(stats.total_created - stats.total_destroyed, stats.current_size as u64);
            }
        }
    }
}
