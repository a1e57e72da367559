use sharddb_client::testing::MockChannel;
use sharddb_client::{
    Client, DatabaseId, DbError, ErrorKind, Operation, PoolConfig, RetryPolicy, RpcChannel,
    TransactionContext, TxnOptions,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn database() -> DatabaseId {
    DatabaseId::new("p", "i", "orders")
}

async fn client_with(channel: Arc<MockChannel>, min_sessions: usize) -> Client {
    let config = PoolConfig::new()
        .min_sessions(min_sessions)
        .max_sessions(4)
        .checkout_timeout(Duration::from_millis(500))
        .maintenance_interval(Duration::from_secs(60));
    Client::connect(channel as Arc<dyn RpcChannel>, database(), config)
        .await
        .unwrap()
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new()
        .max_attempts(max_attempts)
        .initial_backoff(Duration::from_millis(1))
        .max_backoff(Duration::from_millis(2))
}

// A unit of work that always sees a conflict is retried exactly
// max-attempts times, then fails with RetriesExhausted carrying the
// underlying cause.
#[tokio::test]
async fn always_conflicting_work_exhausts_retry_budget() {
    let channel = Arc::new(MockChannel::new());
    for _ in 0..16 {
        channel.push_execute_error(DbError::Aborted("write conflict".into()));
    }
    let client = client_with(Arc::clone(&channel), 1).await;

    let err = client
        .run_transaction(
            |ctx: TransactionContext| async move {
                ctx.query(Operation::sql("UPDATE t SET x = 1")).await
            },
            TxnOptions::new().retry(fast_retry(4)),
        )
        .await
        .unwrap_err();

    match err {
        DbError::RetriesExhausted { attempts, source, .. } => {
            assert_eq!(attempts, 4);
            assert_eq!(source.kind(), ErrorKind::Aborted);
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(channel.execute_calls(), 4);
    client.close().await;
}

// Scenario B: one simulated conflict, success on attempt 2.
#[tokio::test]
async fn work_succeeds_on_second_attempt_after_conflict() {
    let channel = Arc::new(MockChannel::new());
    channel.push_execute_error(DbError::Aborted("write conflict".into()));
    let client = client_with(Arc::clone(&channel), 1).await;

    let invocations = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invocations);

    let value = client
        .run_transaction(
            move |ctx: TransactionContext| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    ctx.execute_update(Operation::sql("UPDATE t SET x = 1")).await?;
                    Ok("applied")
                }
            },
            TxnOptions::new().retry(fast_retry(5)),
        )
        .await
        .unwrap();

    assert_eq!(value, "applied");
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    assert_eq!(channel.execute_calls(), 2);
    assert_eq!(channel.commit_calls(), 1);
    client.close().await;
}

// Scenario C: the server lost the pre-created session. The pool discards
// it and the retry runs on a freshly created replacement.
#[tokio::test]
async fn lost_session_is_discarded_and_replaced() {
    let channel = Arc::new(MockChannel::new());
    let client = client_with(Arc::clone(&channel), 1).await;

    let lost = format!("{}/sessions/s1", database());
    channel.mark_session_lost(&lost);

    let session_names = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen = Arc::clone(&session_names);

    let value = client
        .run_transaction(
            move |ctx: TransactionContext| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(ctx.session_name().to_string());
                    ctx.execute_update(Operation::sql("UPDATE t SET x = 1")).await
                }
            },
            TxnOptions::new().retry(fast_retry(5)),
        )
        .await
        .unwrap();
    assert_eq!(value, 1);

    let stats = client.stats().await;
    assert_eq!(stats.total_sessions, 1, "lost session must not be re-pooled");

    // The successful attempt ran on the replacement.
    let names = session_names.lock().unwrap();
    assert!(!names.contains(&lost));
    client.close().await;
}

// Scenario D: cancellation fired during a backoff sleep returns promptly
// and the session still goes back to the idle set.
#[tokio::test]
async fn cancellation_during_backoff_is_prompt() {
    let channel = Arc::new(MockChannel::new());
    // Conflict on every attempt so the run is guaranteed to be inside a
    // backoff sleep when the cancellation fires.
    for _ in 0..8 {
        channel.push_execute_error(DbError::Aborted("write conflict".into()));
    }
    let client = client_with(Arc::clone(&channel), 1).await;

    let cancel = CancellationToken::new();
    let long_backoff = RetryPolicy::new()
        .max_attempts(5)
        .initial_backoff(Duration::from_secs(10))
        .max_backoff(Duration::from_secs(10));

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
    }

    let started = Instant::now();
    let err = client
        .run_transaction(
            |ctx: TransactionContext| async move {
                ctx.query(Operation::sql("UPDATE t SET x = 1")).await
            },
            TxnOptions::new().retry(long_backoff).cancel_token(cancel),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "cancellation must not wait out the backoff"
    );

    let stats = client.stats().await;
    assert_eq!(stats.idle_sessions, 1, "session must be returned on cancellation");
    client.close().await;
}

// Only one execute happened on the sole session at a time even with many
// concurrent transactions contending for the pool.
#[tokio::test]
async fn concurrent_transactions_share_the_pool() {
    let channel = Arc::new(MockChannel::new());
    let client = Arc::new(client_with(Arc::clone(&channel), 0).await);

    let mut tasks = Vec::new();
    for _ in 0..12 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            client
                .run_transaction(
                    |ctx: TransactionContext| async move {
                        ctx.execute_update(Operation::sql("UPDATE t SET x = x + 1")).await
                    },
                    TxnOptions::new(),
                )
                .await
                .unwrap()
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), 1);
    }

    assert_eq!(channel.commit_calls(), 12);
    let stats = client.stats().await;
    assert!(stats.total_sessions <= stats.max_sessions);
    assert_eq!(stats.checked_out_sessions, 0);
    client.close().await;
}

#[tokio::test]
async fn elapsed_budget_bounds_retries() {
    let channel = Arc::new(MockChannel::new());
    for _ in 0..64 {
        channel.push_execute_error(DbError::Aborted("write conflict".into()));
    }
    let client = client_with(Arc::clone(&channel), 1).await;

    let tight_budget = RetryPolicy::new()
        .max_attempts(64)
        .max_elapsed(Duration::from_millis(80))
        .initial_backoff(Duration::from_millis(30))
        .max_backoff(Duration::from_millis(30));

    let err = client
        .run_transaction(
            |ctx: TransactionContext| async move {
                ctx.query(Operation::sql("UPDATE t SET x = 1")).await
            },
            TxnOptions::new().retry(tight_budget),
        )
        .await
        .unwrap_err();

    match err {
        DbError::RetriesExhausted { attempts, elapsed, .. } => {
            assert!(attempts < 64);
            assert!(elapsed >= Duration::from_millis(80));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    client.close().await;
}

#[tokio::test]
async fn request_options_reach_the_wire() {
    use sharddb_client::{Priority, RequestOptions, WirePriority, build_wire_options};

    let wire = build_wire_options(
        &RequestOptions::new()
            .priority(Priority::High)
            .tag("checkout-flow")
            .max_batching_delay_ms(25),
    );

    assert_eq!(wire.priority, WirePriority::High);
    assert_eq!(wire.request_tag, "checkout-flow");
    assert_eq!(wire.max_batching_delay_ms, 25);
}
