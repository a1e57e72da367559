// ============================================================================
// ShardDB Client Library
// ============================================================================

pub mod core;
pub mod options;
pub mod rpc;
pub mod session;
pub mod testing;
pub mod txn;

// Re-export main types for convenience
pub use core::{
    DatabaseId, DbError, ErrorKind, ExecuteResult, Operation, Result, Row, TransactionHandle,
    TransactionKind,
};
pub use options::{Priority, RequestOptions, WirePriority, WireRequestOptions, build_wire_options};
pub use rpc::{RpcChannel, SessionInfo};
pub use session::{PoolConfig, PoolStats, Session, SessionPool};
pub use txn::{
    RetryPolicy, TransactionContext, TransactionRunner, TransactionWork, TxnOptions,
};

use std::sync::Arc;

// ============================================================================
// High-level Client API
// ============================================================================

/// Database client with session pooling and transparent transaction retry
///
/// This is the recommended way to run transactions. Read-write work runs
/// on an exclusively checked-out session and is retried automatically
/// when the server reports a concurrency conflict; read-only work shares
/// the multiplexed session.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use sharddb_client::{
///     Client, DatabaseId, Operation, PoolConfig, TransactionContext, TxnOptions,
///     testing::MockChannel,
/// };
///
/// # async fn demo() -> sharddb_client::Result<()> {
/// let channel = Arc::new(MockChannel::new());
/// let database = DatabaseId::new("p1", "i1", "orders");
/// let client = Client::connect(channel, database, PoolConfig::new()).await?;
///
/// let affected = client
///     .run_transaction(
///         |ctx: TransactionContext| async move {
///             ctx.execute_update(Operation::sql(
///                 "UPDATE accounts SET balance = balance - 10 WHERE id = 1",
///             ))
///             .await
///         },
///         TxnOptions::new(),
///     )
///     .await?;
///
/// assert_eq!(affected, 1);
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    pool: Arc<SessionPool>,
    runner: TransactionRunner,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Connect to a database over the given transport.
    ///
    /// Builds the session pool (pre-creating the configured minimum) and
    /// starts its maintenance task.
    pub async fn connect(
        channel: Arc<dyn RpcChannel>,
        database: DatabaseId,
        config: PoolConfig,
    ) -> Result<Self> {
        let pool = SessionPool::new(Arc::clone(&channel), database, config).await?;
        let runner = TransactionRunner::new(Arc::clone(&pool), channel);
        Ok(Self { pool, runner })
    }

    /// Run a read-write unit of work to a terminal result.
    ///
    /// The work must be re-runnable: on a server-reported conflict the
    /// whole unit of work is re-invoked from the beginning with a fresh
    /// transaction, and all effects of the prior attempt are discarded.
    pub async fn run_transaction<W: TransactionWork>(
        &self,
        work: W,
        options: TxnOptions,
    ) -> Result<W::Output> {
        self.runner
            .run(TransactionKind::ReadWrite, &work, &options)
            .await
    }

    /// Run a read-only unit of work on the shared multiplexed session.
    pub async fn run_read_only<W: TransactionWork>(
        &self,
        work: W,
        options: TxnOptions,
    ) -> Result<W::Output> {
        self.runner
            .run(TransactionKind::ReadOnly, &work, &options)
            .await
    }

    /// Get pool statistics
    pub async fn stats(&self) -> PoolStats {
        self.pool.stats().await
    }

    /// Tear down the client: stops pool maintenance and deletes idle
    /// sessions on the server (best effort).
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChannel;
    use std::time::Duration;

    async fn test_client() -> (Arc<MockChannel>, Client) {
        let channel = Arc::new(MockChannel::new());
        let config = PoolConfig::new()
            .min_sessions(1)
            .max_sessions(4)
            .checkout_timeout(Duration::from_millis(200))
            .maintenance_interval(Duration::from_secs(60));
        let client = Client::connect(
            Arc::clone(&channel) as Arc<dyn RpcChannel>,
            DatabaseId::new("p1", "i1", "orders"),
            config,
        )
        .await
        .unwrap();
        (channel, client)
    }

    #[tokio::test]
    async fn test_client_runs_transaction() {
        let (channel, client) = test_client().await;

        let affected = client
            .run_transaction(
                |ctx: TransactionContext| async move {
                    ctx.execute_update(Operation::sql("UPDATE t SET x = 1")).await
                },
                TxnOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(affected, 1);
        assert_eq!(channel.commit_calls(), 1);
        client.close().await;
    }

    #[tokio::test]
    async fn test_client_read_only() {
        let (channel, client) = test_client().await;

        let result = client
            .run_read_only(
                |ctx: TransactionContext| async move {
                    ctx.query(Operation::sql("SELECT * FROM t")).await
                },
                TxnOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.row_count(), 0);
        assert_eq!(channel.multiplexed_creates(), 1);
        client.close().await;
    }

    #[tokio::test]
    async fn test_client_stats_and_close() {
        let (channel, client) = test_client().await;

        let stats = client.stats().await;
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.idle_sessions, 1);

        client.close().await;
        assert_eq!(channel.deleted_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let channel = Arc::new(MockChannel::new());
        let err = Client::connect(
            channel as Arc<dyn RpcChannel>,
            DatabaseId::new("p1", "i1", "orders"),
            PoolConfig::new().min_sessions(10).max_sessions(5),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
