use super::{PoolConfig, Session};
use crate::core::{DatabaseId, DbError, Result};
use crate::rpc::RpcChannel;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Session pool
///
/// Owns a bounded set of server-side sessions for one database, services
/// checkout/check-in from concurrent callers, and keeps a single shared
/// multiplexed session outside the bound. A background maintenance task
/// pings stale idle sessions and tops the idle set up toward the
/// configured minimum.
pub struct SessionPool {
    config: PoolConfig,
    database: DatabaseId,
    channel: Arc<dyn RpcChannel>,
    /// In-memory bookkeeping only; never held across an RPC.
    inner: Mutex<PoolInner>,
    /// Signalled whenever capacity frees up (check-in or discard).
    released: Notify,
    /// Wakes the maintenance task ahead of schedule, e.g. after a
    /// discarded session leaves the pool below its minimum.
    nudge: Arc<Notify>,
    multiplexed: RwLock<Option<MultiplexedEntry>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    maintenance: std::sync::Mutex<Option<JoinHandle<()>>>,
}

struct PoolInner {
    idle: VecDeque<Arc<Session>>,
    /// Names of sessions currently checked out. Membership is what makes
    /// a check-in count; a second check-in of the same session is a no-op.
    checked_out: HashSet<String>,
    /// idle + checked out + creations in flight. Governs the max bound.
    total: usize,
}

struct MultiplexedEntry {
    session: Arc<Session>,
    created: Instant,
}

impl SessionPool {
    /// Create a pool and start its maintenance task. Pre-creates the
    /// configured minimum number of sessions.
    pub async fn new(
        channel: Arc<dyn RpcChannel>,
        database: DatabaseId,
        config: PoolConfig,
    ) -> Result<Arc<Self>> {
        config.validate().map_err(DbError::InvalidArgument)?;

        let pool = Arc::new(Self {
            config: config.clone(),
            database,
            channel,
            inner: Mutex::new(PoolInner {
                idle: VecDeque::new(),
                checked_out: HashSet::new(),
                total: 0,
            }),
            released: Notify::new(),
            nudge: Arc::new(Notify::new()),
            multiplexed: RwLock::new(None),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            maintenance: std::sync::Mutex::new(None),
        });

        // Startup failures here are terminal: a pool that cannot create a
        // single session is misconfigured or unreachable.
        for _ in 0..config.min_sessions {
            let session = pool.create_session(false).await?;
            let mut inner = pool.inner.lock().await;
            inner.total += 1;
            inner.idle.push_back(session);
        }

        let handle = tokio::spawn(maintenance_loop(
            Arc::downgrade(&pool),
            pool.shutdown.clone(),
            Arc::clone(&pool.nudge),
            config.maintenance_interval,
        ));
        *pool.maintenance.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn database(&self) -> &DatabaseId {
        &self.database
    }

    /// Get an exclusive session.
    ///
    /// Hands out an idle session if one exists, creates a new one if the
    /// pool is below its maximum, and otherwise suspends until another
    /// caller releases a session or the checkout timeout elapses.
    pub async fn checkout(&self) -> Result<Arc<Session>> {
        let deadline = Instant::now() + self.config.checkout_timeout;

        loop {
            if self.is_closed() {
                return Err(DbError::FailedPrecondition("session pool is closed".into()));
            }

            enum Plan {
                Ready(Arc<Session>),
                Create,
                Wait,
            }

            // Register for release notifications before inspecting pool
            // state. A check-in landing between the lock release and the
            // await would otherwise go to a Notify with no registered
            // waiter, and `notify_one` stores at most one such permit:
            // two concurrent check-ins could wake only one of two
            // waiters, leaving the other to time out beside an idle
            // session.
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            let plan = {
                let mut inner = self.inner.lock().await;
                let mut plan = Plan::Wait;
                while let Some(session) = inner.idle.pop_front() {
                    if session.is_invalid() {
                        inner.total -= 1;
                        self.discard_session(&session);
                        self.nudge.notify_one();
                        continue;
                    }
                    inner.checked_out.insert(session.name().to_string());
                    plan = Plan::Ready(session);
                    break;
                }
                if matches!(plan, Plan::Wait) && inner.total < self.config.max_sessions {
                    // Reserve the slot before releasing the lock so
                    // concurrent checkouts cannot overshoot the max.
                    inner.total += 1;
                    plan = Plan::Create;
                }
                plan
            };

            match plan {
                Plan::Ready(session) => {
                    session.mark_used();
                    return Ok(session);
                }
                Plan::Create => match self.create_session(false).await {
                    Ok(session) => {
                        let mut inner = self.inner.lock().await;
                        inner.checked_out.insert(session.name().to_string());
                        drop(inner);
                        session.mark_used();
                        return Ok(session);
                    }
                    Err(err) => {
                        let mut inner = self.inner.lock().await;
                        inner.total -= 1;
                        drop(inner);
                        self.released.notify_one();
                        return Err(err);
                    }
                },
                Plan::Wait => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(DbError::PoolExhausted(self.config.checkout_timeout));
                    }
                    if tokio::time::timeout(remaining, released).await.is_err() {
                        return Err(DbError::PoolExhausted(self.config.checkout_timeout));
                    }
                }
            }
        }
    }

    /// Return a session to the pool.
    ///
    /// Invalid sessions are discarded and the maintenance task is nudged
    /// to top the idle set back up toward the minimum. Checking the same
    /// session in twice is a no-op. Multiplexed sessions are never pooled
    /// and are ignored here.
    pub async fn checkin(&self, session: Arc<Session>) {
        if session.is_multiplexed() {
            return;
        }

        let mut inner = self.inner.lock().await;
        if !inner.checked_out.remove(session.name()) {
            debug!(session = session.name(), "duplicate check-in ignored");
            return;
        }

        if session.is_invalid() || self.is_closed() {
            inner.total -= 1;
            drop(inner);
            debug!(session = session.name(), "discarded session on check-in");
            self.discard_session(&session);
            self.released.notify_one();
            self.nudge.notify_one();
            return;
        }

        session.mark_used();
        inner.idle.push_back(session);
        drop(inner);
        self.released.notify_one();
    }

    /// Get the shared multiplexed session, creating it on first demand.
    ///
    /// Concurrent first callers receive the same session; only one create
    /// RPC is issued. An invalidated multiplexed session is replaced here
    /// on the next request (and periodically by maintenance); readers
    /// already holding the old handle are not interrupted.
    pub async fn multiplexed_session(&self) -> Result<Arc<Session>> {
        if self.is_closed() {
            return Err(DbError::FailedPrecondition("session pool is closed".into()));
        }

        {
            let guard = self.multiplexed.read().await;
            if let Some(entry) = guard.as_ref() {
                if !entry.session.is_invalid() {
                    entry.session.mark_used();
                    return Ok(Arc::clone(&entry.session));
                }
            }
        }

        // The write lock is held across the create RPC on purpose: there
        // is nothing usable to read until the first create finishes, and
        // serializing here is what guarantees create-exactly-once.
        let mut guard = self.multiplexed.write().await;
        if let Some(entry) = guard.as_ref() {
            if !entry.session.is_invalid() {
                entry.session.mark_used();
                return Ok(Arc::clone(&entry.session));
            }
        }

        let session = self.create_session(true).await?;
        *guard = Some(MultiplexedEntry {
            session: Arc::clone(&session),
            created: Instant::now(),
        });
        Ok(session)
    }

    /// Snapshot of pool counters.
    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        PoolStats {
            total_sessions: inner.total,
            idle_sessions: inner.idle.len(),
            checked_out_sessions: inner.checked_out.len(),
            max_sessions: self.config.max_sessions,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tear the pool down: stop maintenance and delete all idle,
    /// non-multiplexed sessions (best effort). Checked-out sessions are
    /// dropped when their holders check them back in.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        // Wake anyone blocked in checkout so they observe the closed flag.
        self.released.notify_waiters();

        let handle = self
            .maintenance
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let drained: Vec<Arc<Session>> = {
            let mut inner = self.inner.lock().await;
            let drained: Vec<_> = inner.idle.drain(..).collect();
            inner.total -= drained.len();
            drained
        };

        let channel = Arc::clone(&self.channel);
        futures::future::join_all(drained.iter().map(|session| {
            let channel = Arc::clone(&channel);
            async move {
                if let Err(err) = channel.delete_session(session.name()).await {
                    debug!(session = session.name(), %err, "delete on close failed");
                }
            }
        }))
        .await;
    }

    async fn create_session(&self, multiplexed: bool) -> Result<Arc<Session>> {
        let info = self.channel.create_session(&self.database, multiplexed).await?;
        Ok(Arc::new(Session::from_info(info)?))
    }

    /// Best-effort server-side delete for a session leaving the pool.
    /// Spawned so discard paths never block on the RPC; the server may
    /// still hold the context (e.g. after a failed keep-alive ping).
    fn discard_session(&self, session: &Session) {
        let channel = Arc::clone(&self.channel);
        let name = session.name().to_string();
        tokio::spawn(async move {
            if let Err(err) = channel.delete_session(&name).await {
                debug!(session = name, %err, "delete of discarded session failed");
            }
        });
    }

    /// One maintenance pass: keep-alive for stale idle sessions, then
    /// top-up toward the minimum, then multiplexed refresh.
    async fn run_maintenance(&self) {
        if self.is_closed() {
            return;
        }

        self.keep_alive_stale().await;
        self.top_up().await;
        self.refresh_multiplexed_if_due().await;
    }

    async fn keep_alive_stale(&self) {
        // Snapshot stale candidates under the lock, ping outside it, then
        // re-acquire to apply results. The candidates stay counted in
        // `total` while they are in flight.
        let stale: Vec<Arc<Session>> = {
            let mut inner = self.inner.lock().await;
            let threshold = self.config.idle_staleness_threshold;
            let (stale, fresh): (VecDeque<_>, VecDeque<_>) = inner
                .idle
                .drain(..)
                .partition(|s| s.last_use().elapsed() > threshold);
            inner.idle = fresh;
            stale.into()
        };

        for session in stale {
            match self.channel.ping(session.name()).await {
                Ok(()) => {
                    session.mark_used();
                    let mut inner = self.inner.lock().await;
                    if self.is_closed() {
                        inner.total -= 1;
                    } else {
                        inner.idle.push_back(session);
                        drop(inner);
                        self.released.notify_one();
                    }
                }
                Err(err) => {
                    warn!(
                        session = session.name(),
                        %err,
                        "keep-alive failed; evicting session"
                    );
                    let mut inner = self.inner.lock().await;
                    inner.total -= 1;
                    drop(inner);
                    self.discard_session(&session);
                }
            }
        }
    }

    async fn top_up(&self) {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if self.is_closed() || inner.total >= self.config.min_sessions {
                    return;
                }
                inner.total += 1;
            }

            match self.create_session(false).await {
                Ok(session) => {
                    let mut inner = self.inner.lock().await;
                    if self.is_closed() {
                        inner.total -= 1;
                        return;
                    }
                    inner.idle.push_back(session);
                    drop(inner);
                    self.released.notify_one();
                }
                Err(err) => {
                    // Not propagated: the next maintenance tick retries.
                    let mut inner = self.inner.lock().await;
                    inner.total -= 1;
                    drop(inner);
                    warn!(%err, "session top-up failed; will retry next tick");
                    return;
                }
            }
        }
    }

    async fn refresh_multiplexed_if_due(&self) {
        let due = {
            let guard = self.multiplexed.read().await;
            match guard.as_ref() {
                Some(entry) => {
                    entry.session.is_invalid()
                        || entry.created.elapsed() > self.config.multiplexed_refresh_interval
                }
                // Created on first demand, never eagerly.
                None => false,
            }
        };
        if !due {
            return;
        }

        // Create the replacement before taking the write lock so in-flight
        // readers of the old session are never blocked behind the RPC.
        match self.create_session(true).await {
            Ok(session) => {
                let mut guard = self.multiplexed.write().await;
                *guard = Some(MultiplexedEntry {
                    session,
                    created: Instant::now(),
                });
                debug!("multiplexed session refreshed");
            }
            Err(err) => {
                warn!(%err, "multiplexed refresh failed; keeping current session");
            }
        }
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn maintenance_loop(
    pool: Weak<SessionPool>,
    shutdown: CancellationToken,
    nudge: Arc<Notify>,
    period: Duration,
) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; harmless, the pool was just built.
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {}
            _ = nudge.notified() => {}
        }
        let Some(pool) = pool.upgrade() else { break };
        pool.run_maintenance().await;
    }
}

/// Session pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub total_sessions: usize,
    pub idle_sessions: usize,
    pub checked_out_sessions: usize,
    pub max_sessions: usize,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool Stats: {}/{} checked out, {} idle, max {}",
            self.checked_out_sessions, self.total_sessions, self.idle_sessions, self.max_sessions
        )
    }
}
