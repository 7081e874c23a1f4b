//! The driver that walks a [`Workflow`]'s topological order, resolving each
//! step's input from its predecessors' outputs and recording progress.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::accessor::{DataAccessor, StateAccessor};
use crate::error::ErrorInfo;
use crate::executor::{Executor, StepPosition};
use crate::graph::GraphError;
use crate::observability::{Event, NoopObserver, Observer, TracingObserver};
use crate::store::{RunFilter, RunStatus, Store, StoreError, StepExecution, WorkflowRun};
use crate::workflow::Workflow;

/// Engine-wide limits.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_concurrent_workflows: usize,
    /// Overall wall-clock budget for a run, independent of any individual
    /// step's timeout. `None` means no deadline.
    pub run_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_concurrent_workflows: 64, run_timeout: None }
    }
}

/// Per-run overrides accepted at start time.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub resource_id: Option<String>,
    pub tags: BTreeMap<String, String>,
    /// When true, `start_workflow` drives the run to a terminal state and
    /// returns only once it gets there, instead of spawning a detached
    /// driver task. Defaults to `false` (async).
    pub synchronous: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("run '{0}' not found")]
    RunNotFound(Uuid),
}

/// Owns the store, observer, and concurrency limits, and spawns one driver
/// task per started run.
pub struct Engine {
    store: Arc<dyn Store>,
    observer: Arc<dyn Observer>,
    executor: Arc<Executor>,
    config: EngineConfig,
    cancellations: Arc<DashMap<Uuid, CancellationToken>>,
    semaphore: Arc<Semaphore>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        let observer: Arc<dyn Observer> = Arc::new(TracingObserver::new(Arc::new(NoopObserver)));
        let executor = Arc::new(Executor::new(store.clone(), observer.clone()));
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_workflows));
        Self { store, observer, executor, config, cancellations: Arc::new(DashMap::new()), semaphore }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.executor = Arc::new(Executor::new(self.store.clone(), observer.clone()));
        self.observer = observer;
        self
    }

    #[tracing::instrument(skip_all, fields(workflow_id = workflow.id()))]
    pub async fn start_workflow(
        &self,
        workflow: Arc<Workflow>,
        input: Vec<u8>,
        opts: StartOptions,
    ) -> Result<Uuid, EngineError> {
        let run_id = Uuid::now_v7();
        let mut run = WorkflowRun::new(
            run_id,
            workflow.id().to_string(),
            workflow.version().to_string(),
            input.clone(),
            workflow.context().map(|c| c.to_vec()),
        );
        run.resource_id = opts.resource_id.clone();
        run.tags = workflow.merge_tags(&opts.tags);
        self.store.create_run(run).await?;

        self.observer.on_event(Event::WorkflowCreated {
            run_id,
            workflow_id: workflow.id().to_string(),
            resource_id: opts.resource_id,
        });

        let token = CancellationToken::new();
        self.cancellations.insert(run_id, token.clone());

        let store = self.store.clone();
        let observer = self.observer.clone();
        let executor = self.executor.clone();
        let cancellations = self.cancellations.clone();
        let permit = self.semaphore.clone().acquire_owned().await.expect("semaphore never closed");
        let run_timeout = self.config.run_timeout;

        let drive_to_terminal = async move {
            let _permit = permit;
            let drive = drive_run(store, observer, executor, workflow, run_id, input, token);
            match run_timeout {
                Some(deadline) => {
                    if tokio::time::timeout(deadline, drive).await.is_err() {
                        tracing::warn!(%run_id, "run exceeded overall timeout");
                    }
                }
                None => drive.await,
            }
            cancellations.remove(&run_id);
        };

        if opts.synchronous {
            drive_to_terminal.await;
        } else {
            tokio::spawn(drive_to_terminal);
        }

        Ok(run_id)
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<WorkflowRun, EngineError> {
        self.store.get_run(run_id).await.map_err(|e| match e {
            StoreError::NotFound { .. } => EngineError::RunNotFound(run_id),
            other => EngineError::Store(other),
        })
    }

    pub async fn list_runs(&self, filter: RunFilter) -> Result<Vec<WorkflowRun>, EngineError> {
        Ok(self.store.list_runs(filter).await?)
    }

    pub async fn get_step_executions(&self, run_id: Uuid) -> Result<Vec<StepExecution>, EngineError> {
        Ok(self.store.list_step_executions(run_id).await?)
    }

    /// Request cooperative cancellation. Returns once the token is signalled;
    /// does not wait for the driver task to observe it. A no-op if the run
    /// has already reached a terminal state.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, run_id: Uuid) -> Result<(), EngineError> {
        let run = self.get_run(run_id).await?;
        if run.status.is_terminal() {
            return Ok(());
        }
        match self.cancellations.get(&run_id) {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(EngineError::RunNotFound(run_id)),
        }
    }
}

/// Resolve a step's input: the run input for the entry node;
/// otherwise the output of the predecessor with the highest `executionIndex`
/// that actually recorded one (the most recently completed predecessor,
/// preserving last-output-wins); or the run input if no predecessor has an
/// output (e.g. all skipped by `continueOnError`).
fn resolve_input(
    workflow: &Workflow,
    step_id: &str,
    run_input: &[u8],
    outputs: &HashMap<String, (u64, Vec<u8>)>,
) -> Vec<u8> {
    let predecessors = workflow.graph().predecessors(step_id);
    if predecessors.is_empty() {
        return run_input.to_vec();
    }

    predecessors
        .iter()
        .filter_map(|pred| outputs.get(*pred))
        .max_by_key(|(index, _)| *index)
        .map(|(_, bytes)| bytes.clone())
        .unwrap_or_else(|| run_input.to_vec())
}

async fn drive_run(
    store: Arc<dyn Store>,
    observer: Arc<dyn Observer>,
    executor: Arc<Executor>,
    workflow: Arc<Workflow>,
    run_id: Uuid,
    run_input: Vec<u8>,
    cancellation: CancellationToken,
) {
    let started_at = Utc::now();
    observer.on_event(Event::WorkflowStarted {
        run_id,
        workflow_id: workflow.id().to_string(),
        resource_id: None,
    });

    if let Err(err) = store.update_run_status(run_id, RunStatus::Running, None).await {
        observer.on_event(Event::PersistenceError {
            run_id,
            operation: "update_run_status".to_string(),
            error: err.to_string(),
        });
        return;
    }

    let order = match workflow.graph().topological_order() {
        Ok(order) => order,
        Err(err) => {
            fail_run(&store, &observer, run_id, ErrorInfo::new("GraphError", err.to_string())).await;
            return;
        }
    };

    let data = Arc::new(DataAccessor::new(store.clone(), run_id));
    let state = Arc::new(StateAccessor::new(store.clone(), run_id));
    let user_context = workflow.context().map(|c| Arc::new(c.to_vec()));

    let mut outputs: HashMap<String, (u64, Vec<u8>)> = HashMap::new();
    let mut last_output: Option<Vec<u8>> = None;
    let total = order.len();

    for (index, step_id) in order.iter().enumerate() {
        if cancellation.is_cancelled() {
            cancel_run(&store, &observer, run_id).await;
            return;
        }

        let step = workflow.step(step_id).expect("builder guarantees step/graph consistency");
        let input = resolve_input(&workflow, step_id, &run_input, &outputs);
        let position = StepPosition {
            execution_index: index as u64,
            step_num: index + 1,
            total_steps: total,
        };

        match executor
            .run_step(run_id, step, position, input, data.clone(), state.clone(), user_context.clone(), cancellation.clone())
            .await
        {
            Ok(outcome) => {
                let bytes = outcome.into_bytes();
                outputs.insert(step_id.clone(), (position.execution_index, bytes.clone()));
                last_output = Some(bytes);
            }
            Err(err) => {
                if cancellation.is_cancelled() {
                    cancel_run(&store, &observer, run_id).await;
                    return;
                }
                if step.config().continue_on_error {
                    // No output is recorded for a continued-past failure;
                    // downstream steps fall through to an earlier predecessor
                    // or the run input.
                } else {
                    fail_run(&store, &observer, run_id, ErrorInfo::new("StepFailure", err.to_string())).await;
                    return;
                }
            }
        }

        let progress = (index + 1) as f64 / total as f64;
        observer.on_event(Event::WorkflowProgress { run_id, progress });
        if let Err(err) = update_progress(&store, run_id, progress).await {
            observer.on_event(Event::PersistenceError {
                run_id,
                operation: "update_progress".to_string(),
                error: err.to_string(),
            });
        }
    }

    let final_output = last_output.unwrap_or_default();

    if let Err(err) = complete_run(&store, run_id, final_output).await {
        observer.on_event(Event::PersistenceError {
            run_id,
            operation: "complete_run".to_string(),
            error: err.to_string(),
        });
        return;
    }

    let duration_ms = (Utc::now() - started_at).num_milliseconds();
    observer.on_event(Event::WorkflowCompleted { run_id, duration_ms });
}

async fn update_progress(store: &Arc<dyn Store>, run_id: Uuid, progress: f64) -> Result<(), StoreError> {
    let mut run = store.get_run(run_id).await?;
    run.progress = progress;
    run.updated_at = Utc::now();
    store.update_run(run).await
}

async fn complete_run(store: &Arc<dyn Store>, run_id: Uuid, output: Vec<u8>) -> Result<(), StoreError> {
    let mut run = store.get_run(run_id).await?;
    run.status = RunStatus::Completed;
    run.output = Some(output);
    run.progress = 1.0;
    run.completed_at = Some(Utc::now());
    run.updated_at = run.completed_at.unwrap();
    store.update_run(run).await
}

async fn fail_run(store: &Arc<dyn Store>, observer: &Arc<dyn Observer>, run_id: Uuid, error: ErrorInfo) {
    if let Err(err) = store.update_run_status(run_id, RunStatus::Failed, Some(error.clone())).await {
        observer.on_event(Event::PersistenceError {
            run_id,
            operation: "update_run_status".to_string(),
            error: err.to_string(),
        });
        return;
    }
    observer.on_event(Event::WorkflowFailed { run_id, error });
}

async fn cancel_run(store: &Arc<dyn Store>, observer: &Arc<dyn Observer>, run_id: Uuid) {
    if let Err(err) = store.update_run_status(run_id, RunStatus::Cancelled, None).await {
        observer.on_event(Event::PersistenceError {
            run_id,
            operation: "update_run_status".to_string(),
            error: err.to_string(),
        });
        return;
    }
    observer.on_event(Event::WorkflowCancelled { run_id });
}
