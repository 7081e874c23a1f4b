//! End-to-end scenarios driving a full [`Engine`] against an
//! [`InMemoryStore`], covering the sequential, retry, timeout, conditional,
//! and cancellation paths a single workflow run can take.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stepflow::prelude::*;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Sum {
    a: i64,
    b: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct SumOutput {
    sum: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ProductOutput {
    product: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct FinalOutput {
    message: String,
    result: i64,
}

async fn wait_until_terminal(engine: &Engine, run_id: uuid::Uuid) -> WorkflowRun {
    for _ in 0..500 {
        let run = engine.get_run(run_id).await.unwrap();
        if run.status.is_terminal() {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("run never reached a terminal state");
}

#[tokio::test]
async fn s1_sequential_success() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let engine = Engine::new(store);

    let workflow = Arc::new(
        Builder::new("sums", "sums", "1.0.0")
            .then_step(
                Step::<Sum, SumOutput>::new("a", "a", |_ctx, i: Sum| async move {
                    Ok(SumOutput { sum: i.a + i.b })
                })
                .build(),
            )
            .then_step(
                Step::<SumOutput, ProductOutput>::new("b", "b", |_ctx, i: SumOutput| async move {
                    Ok(ProductOutput { product: i.sum * 2 })
                })
                .build(),
            )
            .then_step(
                Step::<ProductOutput, FinalOutput>::new("c", "c", |_ctx, i: ProductOutput| async move {
                    Ok(FinalOutput { message: format!("Final result: {}", i.product), result: i.product })
                })
                .build(),
            )
            .build()
            .unwrap(),
    );

    let input = serde_json::to_vec(&Sum { a: 10, b: 5 }).unwrap();
    let run_id = engine.start_workflow(workflow, input, StartOptions::default()).await.unwrap();
    let run = wait_until_terminal(&engine, run_id).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.progress, 1.0);
    let output: FinalOutput = serde_json::from_slice(&run.output.unwrap()).unwrap();
    assert_eq!(output.result, 30);
    assert_eq!(output.message, "Final result: 30");

    let executions = engine.get_step_executions(run_id).await.unwrap();
    assert_eq!(executions.len(), 3);
    let mut indices: Vec<u64> = executions.iter().map(|e| e.execution_index).collect();
    indices.sort();
    assert_eq!(indices, vec![0, 1, 2]);
    assert!(executions.iter().all(|e| e.status == StepStatus::Completed));
}

#[tokio::test(start_paused = true)]
async fn s2_retry_then_success() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let engine = Engine::new(store);

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let workflow = Arc::new(
        Builder::new("flaky", "flaky", "1.0.0")
            .then_step(
                Step::<i64, i64>::new("flaky", "flaky", move |_ctx, i: i64| {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        if n < 2 {
                            Err(HandlerError::retryable("not yet"))
                        } else {
                            Ok(i)
                        }
                    }
                })
                .with_config(ExecutionConfig::default().with_max_retries(3).with_retry_delay_ms(100))
                .build(),
            )
            .build()
            .unwrap(),
    );

    let input = serde_json::to_vec(&7i64).unwrap();
    let run_id = engine.start_workflow(workflow, input, StartOptions::default()).await.unwrap();
    let run = wait_until_terminal(&engine, run_id).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let executions = engine.get_step_executions(run_id).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, StepStatus::Completed);
    assert_eq!(executions[0].attempt, 2);
}

#[tokio::test(start_paused = true)]
async fn s3_retry_exhaustion() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let engine = Engine::new(store);

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let workflow = Arc::new(
        Builder::new("doomed", "doomed", "1.0.0")
            .then_step(
                Step::<i64, i64>::new("doomed", "doomed", move |_ctx, _i: i64| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(HandlerError::retryable("always fails"))
                    }
                })
                .with_config(ExecutionConfig::default().with_max_retries(3).with_retry_delay_ms(50))
                .build(),
            )
            .build()
            .unwrap(),
    );

    let input = serde_json::to_vec(&1i64).unwrap();
    let run_id = engine.start_workflow(workflow, input, StartOptions::default()).await.unwrap();
    let run = wait_until_terminal(&engine, run_id).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(run.error.unwrap().kind, "HandlerError");

    let executions = engine.get_step_executions(run_id).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, StepStatus::Failed);
    assert_eq!(executions[0].attempt, 3);
}

#[tokio::test(start_paused = true)]
async fn s4_timeout_with_retries() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let engine = Engine::new(store);

    let workflow = Arc::new(
        Builder::new("slow", "slow", "1.0.0")
            .then_step(
                Step::<i64, i64>::new("slow", "slow", |_ctx, i: i64| async move {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Ok(i)
                })
                .with_config(ExecutionConfig::default().with_max_retries(1).with_timeout_seconds(1))
                .build(),
            )
            .build()
            .unwrap(),
    );

    let input = serde_json::to_vec(&1i64).unwrap();
    let run_id = engine.start_workflow(workflow, input, StartOptions::default()).await.unwrap();
    let run = wait_until_terminal(&engine, run_id).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.unwrap().kind, "TimeoutError");

    let executions = engine.get_step_executions(run_id).await.unwrap();
    assert_eq!(executions[0].attempt, 1);
    assert_eq!(executions[0].status, StepStatus::Failed);
}

#[tokio::test]
async fn s5_conditional_skip_passes_through() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let engine = Engine::new(store);

    let workflow = Arc::new(
        Builder::new("conditional", "conditional", "1.0.0")
            .then_step(
                Step::<String, String>::new("a", "a", |_ctx, _i: String| async move {
                    Ok("from-A".to_string())
                })
                .build(),
            )
            .then_step(
                Step::<String, String>::new("b", "b", |_ctx, i: String| async move { Ok(i) })
                    .with_condition(|_ctx| async move { Ok(false) }, None)
                    .build(),
            )
            .build()
            .unwrap(),
    );

    let input = serde_json::to_vec(&"ignored".to_string()).unwrap();
    let run_id = engine.start_workflow(workflow, input, StartOptions::default()).await.unwrap();
    let run = wait_until_terminal(&engine, run_id).await;

    assert_eq!(run.status, RunStatus::Completed);
    let output: String = serde_json::from_slice(&run.output.unwrap()).unwrap();
    assert_eq!(output, "from-A");

    let executions = engine.get_step_executions(run_id).await.unwrap();
    let b = executions.iter().find(|e| e.step_id == "b").unwrap();
    assert_eq!(b.status, StepStatus::Completed);
    let b_output: String = serde_json::from_slice(b.output.as_ref().unwrap()).unwrap();
    assert_eq!(b_output, "from-A");
}

#[tokio::test]
async fn s6_cancellation_mid_run() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let engine = Engine::new(store);

    let workflow = Arc::new(
        Builder::new("cancel-me", "cancel-me", "1.0.0")
            .then_step(Step::<i64, i64>::new("short", "short", |_ctx, i: i64| async move { Ok(i) }).build())
            .then_step(
                Step::<i64, i64>::new("long", "long", |_ctx, i: i64| async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(i)
                })
                .build(),
            )
            .build()
            .unwrap(),
    );

    let input = serde_json::to_vec(&1i64).unwrap();
    let run_id = engine.start_workflow(workflow, input, StartOptions::default()).await.unwrap();

    // Give the short step time to complete and the long step time to start.
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.cancel(run_id).await.unwrap();

    let run = wait_until_terminal(&engine, run_id).await;
    assert_eq!(run.status, RunStatus::Cancelled);

    let executions = engine.get_step_executions(run_id).await.unwrap();
    let short = executions.iter().find(|e| e.step_id == "short").unwrap();
    assert_eq!(short.status, StepStatus::Completed);

    let long = executions.iter().find(|e| e.step_id == "long").unwrap();
    assert_ne!(long.status, StepStatus::Completed);
}
