//! In-memory [`RpcChannel`] for tests.
//!
//! Deterministic session names (`<database>/sessions/s1`, `s2`, ...),
//! scriptable failures, and call counters. Not a database: every execute
//! succeeds with an empty row set unless a failure has been queued.

use crate::core::{DatabaseId, DbError, ExecuteResult, Operation, Result, TransactionHandle};
use crate::options::WireRequestOptions;
use crate::rpc::{RpcChannel, SessionInfo};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

#[derive(Default)]
pub struct MockChannel {
    session_counter: AtomicU64,
    txn_counter: AtomicU64,
    multiplexed_creates: AtomicU64,
    execute_calls: AtomicU64,
    begin_calls: AtomicU64,
    commit_calls: AtomicU64,
    rollback_calls: AtomicU64,
    create_errors: Mutex<VecDeque<DbError>>,
    execute_errors: Mutex<VecDeque<DbError>>,
    commit_errors: Mutex<VecDeque<DbError>>,
    failed_pings: Mutex<HashSet<String>>,
    lost_sessions: Mutex<HashSet<String>>,
    deleted: Mutex<Vec<String>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next `create_session` call.
    pub fn push_create_error(&self, err: DbError) {
        self.create_errors.lock().unwrap().push_back(err);
    }

    /// Queue an error for the next `execute` call. Queued errors are
    /// consumed in order; once drained, executes succeed again.
    pub fn push_execute_error(&self, err: DbError) {
        self.execute_errors.lock().unwrap().push_back(err);
    }

    /// Queue an error for the next `commit` call.
    pub fn push_commit_error(&self, err: DbError) {
        self.commit_errors.lock().unwrap().push_back(err);
    }

    /// Make keep-alive pings fail for the named session.
    pub fn fail_pings_for(&self, name: &str) {
        self.failed_pings.lock().unwrap().insert(name.to_string());
    }

    /// Pretend the server dropped the named session: every subsequent
    /// operation on it reports `SessionInvalid`.
    pub fn mark_session_lost(&self, name: &str) {
        self.lost_sessions.lock().unwrap().insert(name.to_string());
    }

    pub fn execute_calls(&self) -> u64 {
        self.execute_calls.load(Ordering::SeqCst)
    }

    pub fn begin_calls(&self) -> u64 {
        self.begin_calls.load(Ordering::SeqCst)
    }

    pub fn commit_calls(&self) -> u64 {
        self.commit_calls.load(Ordering::SeqCst)
    }

    pub fn rollback_calls(&self) -> u64 {
        self.rollback_calls.load(Ordering::SeqCst)
    }

    pub fn multiplexed_creates(&self) -> u64 {
        self.multiplexed_creates.load(Ordering::SeqCst)
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted.lock().unwrap().len()
    }

    pub fn deleted_sessions(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn check_session(&self, name: &str) -> Result<()> {
        if self.lost_sessions.lock().unwrap().contains(name) {
            return Err(DbError::SessionInvalid(name.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RpcChannel for MockChannel {
    async fn create_session(
        &self,
        database: &DatabaseId,
        multiplexed: bool,
    ) -> Result<SessionInfo> {
        if let Some(err) = self.create_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        let n = self.session_counter.fetch_add(1, Ordering::SeqCst) + 1;
        if multiplexed {
            self.multiplexed_creates.fetch_add(1, Ordering::SeqCst);
        }
        Ok(SessionInfo {
            name: format!("{database}/sessions/s{n}"),
            create_time: Some(SystemTime::now()),
            multiplexed,
            channel_options: Vec::new(),
        })
    }

    async fn delete_session(&self, name: &str) -> Result<()> {
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn ping(&self, name: &str) -> Result<()> {
        self.check_session(name)?;
        if self.failed_pings.lock().unwrap().contains(name) {
            return Err(DbError::TransientNetwork(format!(
                "keep-alive for '{name}' failed"
            )));
        }
        Ok(())
    }

    async fn begin_transaction(&self, session: &str) -> Result<TransactionHandle> {
        self.begin_calls.fetch_add(1, Ordering::SeqCst);
        self.check_session(session)?;
        let n = self.txn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TransactionHandle::new(format!("txn-{n}")))
    }

    async fn execute(
        &self,
        session: &str,
        _handle: Option<&TransactionHandle>,
        _operation: &Operation,
        _options: &WireRequestOptions,
    ) -> Result<ExecuteResult> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        self.check_session(session)?;
        if let Some(err) = self.execute_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(ExecuteResult {
            rows: Vec::new(),
            affected_rows: 1,
        })
    }

    async fn commit(&self, session: &str, _handle: &TransactionHandle) -> Result<()> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        self.check_session(session)?;
        if let Some(err) = self.commit_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(())
    }

    async fn rollback(&self, _session: &str, _handle: &TransactionHandle) -> Result<()> {
        self.rollback_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
