use super::{TransactionContext, TransactionWork, TxnOptions};
use crate::core::{DbError, Result, TransactionKind};
use crate::options::{WireRequestOptions, build_wire_options};
use crate::rpc::RpcChannel;
use crate::session::{Session, SessionPool};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Transaction runner
///
/// Drives a unit of work through the attempt state machine: obtain a
/// session, begin a transaction for read-write work, invoke the work,
/// classify the outcome, and either commit, retry with backoff, or fail.
/// Aborts and transient network failures retry within the configured
/// budget; a lost session is replaced and counts as one attempt;
/// everything else surfaces immediately. The session goes back to the
/// pool on every exit path.
pub struct TransactionRunner {
    pool: Arc<SessionPool>,
    channel: Arc<dyn RpcChannel>,
}

impl TransactionRunner {
    pub fn new(pool: Arc<SessionPool>, channel: Arc<dyn RpcChannel>) -> Self {
        Self { pool, channel }
    }

    /// Run the unit of work to a terminal result.
    pub async fn run<W: TransactionWork>(
        &self,
        kind: TransactionKind,
        work: &W,
        options: &TxnOptions,
    ) -> Result<W::Output> {
        let started = Instant::now();
        let wire = build_wire_options(&options.request);
        let cancel = options.cancel.clone();
        let max_attempts = options.retry.max_attempts.max(1);

        let mut session = self.obtain_session(kind, &cancel).await?;
        let mut attempts: u32 = 0;

        let result = loop {
            attempts += 1;
            let err = match self
                .run_attempt(kind, &session, work, &wire, &cancel, attempts)
                .await
            {
                Ok(value) => break Ok(value),
                Err(err) => err,
            };

            if let DbError::SessionInvalid(_) = &err {
                // The pool discards the session at check-in; the retry
                // runs on a fresh one and counts against the budget.
                session.mark_invalid();
                self.pool.checkin(session).await;
                if attempts >= max_attempts || started.elapsed() >= options.retry.max_elapsed {
                    return Err(DbError::RetriesExhausted {
                        attempts,
                        elapsed: started.elapsed(),
                        source: Box::new(err),
                    });
                }
                session = self.obtain_session(kind, &cancel).await?;
                continue;
            }

            if err.is_retryable() {
                if attempts >= max_attempts || started.elapsed() >= options.retry.max_elapsed {
                    break Err(DbError::RetriesExhausted {
                        attempts,
                        elapsed: started.elapsed(),
                        source: Box::new(err),
                    });
                }
                let delay = options.retry.jittered_delay(attempts);
                debug!(attempt = attempts, ?delay, %err, "retrying transaction");
                tokio::select! {
                    _ = cancel.cancelled() => break Err(DbError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }

            debug!(attempt = attempts, %err, "transaction failed with terminal error");
            break Err(err);
        };

        // Cancellation and terminal failures alike return the session;
        // only an explicit SessionInvalid marks it for discard above.
        self.pool.checkin(session).await;
        result
    }

    async fn obtain_session(
        &self,
        kind: TransactionKind,
        cancel: &CancellationToken,
    ) -> Result<Arc<Session>> {
        let obtain = async {
            match kind {
                TransactionKind::ReadWrite => self.pool.checkout().await,
                TransactionKind::ReadOnly => self.pool.multiplexed_session().await,
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(DbError::Cancelled),
            session = obtain => session,
        }
    }

    async fn run_attempt<W: TransactionWork>(
        &self,
        kind: TransactionKind,
        session: &Arc<Session>,
        work: &W,
        wire: &WireRequestOptions,
        cancel: &CancellationToken,
        attempt: u32,
    ) -> Result<W::Output> {
        match kind {
            TransactionKind::ReadOnly => {
                let ctx = TransactionContext::new(
                    Arc::clone(&self.channel),
                    Arc::clone(session),
                    None,
                    wire.clone(),
                    cancel.clone(),
                );
                work.execute(ctx).await
            }
            TransactionKind::ReadWrite => {
                let handle = with_cancel(cancel, self.channel.begin_transaction(session.name()))
                    .await?;
                let ctx = TransactionContext::new(
                    Arc::clone(&self.channel),
                    Arc::clone(session),
                    Some(handle.clone()),
                    wire.clone(),
                    cancel.clone(),
                );
                match work.execute(ctx).await {
                    Ok(value) => {
                        match with_cancel(cancel, self.channel.commit(session.name(), &handle))
                            .await
                        {
                            Ok(()) => Ok(value),
                            // The commit may have landed server-side before
                            // the connection died; retrying could apply it
                            // twice. Surfaced distinctly, never retried.
                            Err(err @ DbError::TransientNetwork(_)) => {
                                Err(DbError::AmbiguousCommit {
                                    attempts: attempt,
                                    source: Box::new(err),
                                })
                            }
                            Err(err) => Err(err),
                        }
                    }
                    Err(err) => {
                        if !cancel.is_cancelled() {
                            let _ = self.channel.rollback(session.name(), &handle).await;
                        }
                        Err(err)
                    }
                }
            }
        }
    }
}

async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(DbError::Cancelled),
        result = fut => result,
    }
}
