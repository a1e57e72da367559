use crate::core::{DatabaseId, ExecuteResult, Operation, Result, TransactionHandle};
use crate::options::WireRequestOptions;
use async_trait::async_trait;
use std::time::SystemTime;

/// Raw session data returned by the service when a session is created.
///
/// The pool wraps this into a [`crate::session::Session`] entity; the
/// transport never sees pool bookkeeping.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Service-assigned resource name, `<database path>/sessions/<id>`.
    pub name: String,
    /// Unknown for sessions created by older servers.
    pub create_time: Option<SystemTime>,
    pub multiplexed: bool,
    /// Channel-affinity hints the transport attached at creation.
    pub channel_options: Vec<(String, String)>,
}

/// Transport to the database service.
///
/// Implementations own stub generation, wire encoding and connection
/// management; this crate only requires that failures come back as
/// [`crate::core::DbError`] values with an accurate kind, since the
/// transaction runner's retry decisions are a pure function of the kind.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    async fn create_session(&self, database: &DatabaseId, multiplexed: bool)
    -> Result<SessionInfo>;

    async fn delete_session(&self, name: &str) -> Result<()>;

    /// Lightweight liveness probe for an idle session.
    async fn ping(&self, name: &str) -> Result<()>;

    async fn begin_transaction(&self, session: &str) -> Result<TransactionHandle>;

    async fn execute(
        &self,
        session: &str,
        handle: Option<&TransactionHandle>,
        operation: &Operation,
        options: &WireRequestOptions,
    ) -> Result<ExecuteResult>;

    async fn commit(&self, session: &str, handle: &TransactionHandle) -> Result<()>;

    async fn rollback(&self, session: &str, handle: &TransactionHandle) -> Result<()>;
}
