pub mod backoff;
pub mod runner;

use crate::core::{ExecuteResult, Operation, Result, TransactionHandle};
use crate::options::{RequestOptions, WireRequestOptions};
use crate::rpc::RpcChannel;
use crate::session::Session;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use backoff::RetryPolicy;
pub use runner::TransactionRunner;

/// Per-invocation transaction configuration: request metadata, retry
/// bounds, and an optional cancellation token.
#[derive(Debug, Clone, Default)]
pub struct TxnOptions {
    pub request: RequestOptions,
    pub retry: RetryPolicy,
    pub cancel: CancellationToken,
}

impl TxnOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(mut self, request: RequestOptions) -> Self {
        self.request = request;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Cancelling this token aborts in-flight RPCs and pending backoff
    /// sleeps; the run fails with `Cancelled`.
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Handle to the active attempt, passed to the unit of work.
///
/// Cheap to clone; a fresh context is issued for every attempt, so a
/// context captured from an aborted attempt never leaks into the next one.
#[derive(Clone)]
pub struct TransactionContext {
    channel: Arc<dyn RpcChannel>,
    session: Arc<Session>,
    handle: Option<TransactionHandle>,
    wire: WireRequestOptions,
    cancel: CancellationToken,
}

impl TransactionContext {
    pub(crate) fn new(
        channel: Arc<dyn RpcChannel>,
        session: Arc<Session>,
        handle: Option<TransactionHandle>,
        wire: WireRequestOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            channel,
            session,
            handle,
            wire,
            cancel,
        }
    }

    pub fn session_name(&self) -> &str {
        self.session.name()
    }

    /// Run a query and return its rows.
    pub async fn query(&self, operation: Operation) -> Result<ExecuteResult> {
        self.call(operation).await
    }

    /// Run a DML statement and return the affected row count.
    pub async fn execute_update(&self, operation: Operation) -> Result<u64> {
        Ok(self.call(operation).await?.affected_rows)
    }

    async fn call(&self, operation: Operation) -> Result<ExecuteResult> {
        self.session.mark_used();
        tokio::select! {
            _ = self.cancel.cancelled() => Err(crate::core::DbError::Cancelled),
            result = self.channel.execute(
                self.session.name(),
                self.handle.as_ref(),
                &operation,
                &self.wire,
            ) => result,
        }
    }
}

/// A re-invokable unit of work.
///
/// The runner may call `execute` any number of times; each call gets a
/// fresh context and all effects of a prior aborted attempt are discarded
/// server-side, so implementations must not carry state across attempts.
/// Implemented for any `Fn(TransactionContext) -> impl Future` closure.
#[async_trait]
pub trait TransactionWork: Send + Sync {
    type Output: Send;

    async fn execute(&self, ctx: TransactionContext) -> Result<Self::Output>;
}

#[async_trait]
impl<F, Fut, T> TransactionWork for F
where
    F: Fn(TransactionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    async fn execute(&self, ctx: TransactionContext) -> Result<T> {
        self(ctx).await
    }
}
