pub mod config;
pub mod pool;

use crate::core::{DatabaseId, Result};
use crate::rpc::SessionInfo;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Instant, SystemTime};

/// A server-side execution context bound to one database.
///
/// Idle sessions are owned by the pool; a non-multiplexed session is
/// checked out to at most one in-flight transaction at a time, while the
/// multiplexed session is shared by any number of concurrent operations.
pub struct Session {
    /// Service-assigned name, unique within the pool.
    name: String,
    /// Parsed from the name; never changes after construction.
    database: DatabaseId,
    /// Unknown for sessions created by older servers.
    create_time: Option<SystemTime>,
    multiplexed: bool,
    /// Channel-affinity hints carried from creation.
    channel_options: Vec<(String, String)>,
    last_use: Mutex<Instant>,
    invalid: AtomicBool,
}

impl Session {
    pub(crate) fn from_info(info: SessionInfo) -> Result<Self> {
        let database = DatabaseId::from_session_name(&info.name)?;
        Ok(Self {
            name: info.name,
            database,
            create_time: info.create_time,
            multiplexed: info.multiplexed,
            channel_options: info.channel_options,
            last_use: Mutex::new(Instant::now()),
            invalid: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &DatabaseId {
        &self.database
    }

    pub fn create_time(&self) -> Option<SystemTime> {
        self.create_time
    }

    pub fn is_multiplexed(&self) -> bool {
        self.multiplexed
    }

    pub fn channel_options(&self) -> &[(String, String)] {
        &self.channel_options
    }

    pub fn last_use(&self) -> Instant {
        *self.last_use.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bump the last-use timestamp. Monotonically non-decreasing even if
    /// callers race.
    pub fn mark_used(&self) {
        let now = Instant::now();
        let mut last = self.last_use.lock().unwrap_or_else(|e| e.into_inner());
        if now > *last {
            *last = now;
        }
    }

    /// Flag the session as gone on the server. One-way: once invalid, the
    /// pool discards it at the next check-in.
    pub fn mark_invalid(&self) {
        self.invalid.store(true, Ordering::Release);
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("multiplexed", &self.multiplexed)
            .field("invalid", &self.is_invalid())
            .finish()
    }
}

pub use config::PoolConfig;
pub use pool::{PoolStats, SessionPool};
