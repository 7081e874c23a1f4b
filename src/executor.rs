//! Per-step attempt state machine: condition gate, validation, timeout,
//! retry/backoff, and persistence of each attempt.
//!
//! One [`StepExecution`] row is created per step when it is scheduled and
//! updated in place across attempts (PENDING → RUNNING ⇄ RETRYING →
//! COMPLETED/FAILED) — attempts are not separate rows.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::accessor::{DataAccessor, StateAccessor};
use crate::backoff::compute_delay;
use crate::context::StepContext;
use crate::error::{CancelledError, ErrorInfo, StepFailure, TimeoutError};
use crate::observability::{Event, Observer};
use crate::step::AnyStep;
use crate::store::{Store, StoreError, StepExecution, StepStatus};

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Step(#[from] StepFailure),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The result of running a single step to completion. Both variants persist
/// as `StepStatus::Completed`; the distinction only drives
/// which [`Event`] fires.
#[derive(Debug)]
pub enum StepOutcome {
    Completed(Vec<u8>),
    Skipped(Vec<u8>),
}

impl StepOutcome {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Completed(bytes) | Self::Skipped(bytes) => bytes,
        }
    }
}

/// Where a step sits in its workflow's topological order, for the
/// `executionIndex`/`stepNum`/`totalSteps` fields the engine already knows
/// and the executor otherwise has no way to compute.
#[derive(Debug, Clone, Copy)]
pub struct StepPosition {
    pub execution_index: u64,
    pub step_num: usize,
    pub total_steps: usize,
}

/// Drives a single step's attempts against a [`Store`], emitting [`Event`]s
/// through an [`Observer`] along the way.
pub struct Executor {
    store: Arc<dyn Store>,
    observer: Arc<dyn Observer>,
}

impl Executor {
    pub fn new(store: Arc<dyn Store>, observer: Arc<dyn Observer>) -> Self {
        Self { store, observer }
    }

    #[tracing::instrument(skip_all, fields(run_id = %run_id, step_id = step.id()))]
    pub async fn run_step(
        &self,
        run_id: Uuid,
        step: &dyn AnyStep,
        position: StepPosition,
        input: Vec<u8>,
        data: Arc<DataAccessor>,
        state: Arc<StateAccessor>,
        user_context: Option<Arc<Vec<u8>>>,
        cancellation: CancellationToken,
    ) -> Result<StepOutcome, ExecutorError> {
        if let Some(outcome) = self
            .evaluate_condition(run_id, step, position, &input, &data, &state, &user_context, &cancellation)
            .await?
        {
            return Ok(outcome);
        }

        let mut execution = StepExecution::new(run_id, step.id(), position.execution_index, input.clone());
        self.store.create_step_execution(execution.clone()).await?;

        let max_retries = step.config().max_retries;
        let mut attempt = 0u32;

        loop {
            let delay = compute_delay(
                Duration::from_millis(step.config().retry_delay_ms),
                attempt,
                step.config().retry_backoff,
            );

            if attempt > 0 {
                self.observer.on_event(Event::StepRetrying {
                    run_id,
                    step_id: step.id().to_string(),
                    attempt,
                    delay: delay.as_millis() as u64,
                });
                execution.status = StepStatus::Retrying;
                execution.attempt = attempt;
                self.store.update_step_execution(execution.clone()).await?;
            }

            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancellation.cancelled() => {
                        return self.finish_failed(&mut execution, attempt, StepFailure::from(CancelledError)).await;
                    }
                }
            } else if cancellation.is_cancelled() {
                return self.finish_failed(&mut execution, attempt, StepFailure::from(CancelledError)).await;
            }

            execution.status = StepStatus::Running;
            execution.attempt = attempt;
            if execution.started_at.is_none() {
                execution.started_at = Some(Utc::now());
            }
            self.store.update_step_execution(execution.clone()).await?;

            if attempt == 0 {
                self.observer.on_event(Event::StepStarted {
                    run_id,
                    step_id: step.id().to_string(),
                    step_name: step.name().to_string(),
                    step_num: position.step_num,
                    total_steps: position.total_steps,
                });
            }

            let ctx = StepContext::new(
                run_id,
                step.id(),
                attempt,
                cancellation.clone(),
                data.clone(),
                state.clone(),
                user_context.clone(),
            );

            match self.run_attempt(step, ctx, &input, &cancellation).await {
                Ok(output) => {
                    self.store.upsert_step_output(run_id, step.id(), output.clone()).await?;
                    let completed_at = Utc::now();
                    execution.status = StepStatus::Completed;
                    execution.completed_at = Some(completed_at);
                    execution.duration_ms = Some(duration_ms(execution.started_at, completed_at));
                    execution.output = Some(output.clone());
                    self.store.update_step_execution(execution.clone()).await?;
                    self.observer.on_event(Event::StepCompleted {
                        run_id,
                        step_id: step.id().to_string(),
                        duration_ms: execution.duration_ms.unwrap_or(0),
                        attempts: attempt + 1,
                    });
                    return Ok(StepOutcome::Completed(output));
                }
                Err(failure) => {
                    if failure.is_retryable() && attempt < max_retries {
                        attempt += 1;
                        continue;
                    }
                    return self.finish_failed(&mut execution, attempt, failure).await;
                }
            }
        }
    }

    async fn finish_failed(
        &self,
        execution: &mut StepExecution,
        attempt: u32,
        failure: StepFailure,
    ) -> Result<StepOutcome, ExecutorError> {
        let completed_at = Utc::now();
        execution.status = StepStatus::Failed;
        execution.attempt = attempt;
        execution.completed_at = Some(completed_at);
        execution.duration_ms = Some(duration_ms(execution.started_at, completed_at));
        execution.error = Some(ErrorInfo::from(&failure));
        self.store.update_step_execution(execution.clone()).await?;
        self.observer.on_event(Event::StepFailed {
            run_id: execution.run_id,
            step_id: execution.step_id.clone(),
            error: ErrorInfo::from(&failure),
            attempt,
            duration_ms: execution.duration_ms.unwrap_or(0),
        });
        Err(ExecutorError::Step(failure))
    }

    #[allow(clippy::too_many_arguments)]
    async fn evaluate_condition(
        &self,
        run_id: Uuid,
        step: &dyn AnyStep,
        position: StepPosition,
        input: &[u8],
        data: &Arc<DataAccessor>,
        state: &Arc<StateAccessor>,
        user_context: &Option<Arc<Vec<u8>>>,
        cancellation: &CancellationToken,
    ) -> Result<Option<StepOutcome>, ExecutorError> {
        let ctx = StepContext::new(
            run_id,
            step.id(),
            0,
            cancellation.clone(),
            data.clone(),
            state.clone(),
            user_context.clone(),
        );
        let Some(result) = step.evaluate_condition(&ctx).await else {
            return Ok(None);
        };

        match result {
            Ok(true) => Ok(None),
            Ok(false) => {
                let output = step.skip_output(input);
                self.store.upsert_step_output(run_id, step.id(), output.clone()).await?;
                let now = Utc::now();
                let mut execution = StepExecution::new(run_id, step.id(), position.execution_index, input.to_vec());
                execution.status = StepStatus::Completed;
                execution.started_at = Some(now);
                execution.completed_at = Some(now);
                execution.duration_ms = Some(0);
                execution.output = Some(output.clone());
                self.store.create_step_execution(execution).await?;
                self.observer.on_event(Event::StepSkipped {
                    run_id,
                    step_id: step.id().to_string(),
                    reason: "condition evaluated to false".to_string(),
                });
                Ok(Some(StepOutcome::Skipped(output)))
            }
            Err(condition_error) => {
                let failure = StepFailure::from(condition_error);
                let now = Utc::now();
                let mut execution = StepExecution::new(run_id, step.id(), position.execution_index, input.to_vec());
                execution.status = StepStatus::Failed;
                execution.started_at = Some(now);
                execution.completed_at = Some(now);
                execution.duration_ms = Some(0);
                execution.error = Some(ErrorInfo::from(&failure));
                self.store.create_step_execution(execution).await?;
                self.observer.on_event(Event::StepFailed {
                    run_id,
                    step_id: step.id().to_string(),
                    error: ErrorInfo::from(&failure),
                    attempt: 0,
                    duration_ms: 0,
                });
                Err(ExecutorError::Step(failure))
            }
        }
    }

    async fn run_attempt(
        &self,
        step: &dyn AnyStep,
        ctx: StepContext,
        input: &[u8],
        cancellation: &CancellationToken,
    ) -> Result<Vec<u8>, StepFailure> {
        if step.validation_enabled() {
            step.validate_input(input)?;
        }

        let timeout_seconds = step.config().timeout_seconds;
        let has_timeout = step.config().has_timeout();
        let invoke_fut = step.invoke(ctx, input.to_vec());

        let output = tokio::select! {
            result = async move {
                if has_timeout {
                    tokio::time::timeout(Duration::from_secs(timeout_seconds), invoke_fut)
                        .await
                        .map_err(|_| StepFailure::from(TimeoutError { timeout_seconds }))?
                        .map_err(StepFailure::from)
                } else {
                    invoke_fut.await.map_err(StepFailure::from)
                }
            } => result?,
            _ = cancellation.cancelled() => return Err(StepFailure::from(CancelledError)),
        };

        if step.validation_enabled() {
            step.validate_output(&output)?;
        }

        Ok(output)
    }
}

fn duration_ms(started_at: Option<DateTime<Utc>>, completed_at: DateTime<Utc>) -> i64 {
    started_at.map(|s| (completed_at - s).num_milliseconds()).unwrap_or(0)
}
