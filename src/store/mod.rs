//! Persistence contract for runs, step executions, step outputs, and state KV.
//!
//! Concrete persistent stores (SQL, cloud KV, ...) are external
//! collaborators; this module defines the trait plus one reference
//! in-memory implementation used for tests and small deployments.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorInfo;

/// Terminal + non-terminal run states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Lifecycle states of a single step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Retrying,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// A single execution instance of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub workflow_version: String,
    pub status: RunStatus,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub input: Vec<u8>,
    pub output: Option<Vec<u8>>,
    pub error: Option<ErrorInfo>,
    pub resource_id: Option<String>,
    pub tags: std::collections::BTreeMap<String, String>,
    pub context: Option<Vec<u8>>,
}

impl WorkflowRun {
    pub fn new(
        run_id: Uuid,
        workflow_id: impl Into<String>,
        workflow_version: impl Into<String>,
        input: Vec<u8>,
        context: Option<Vec<u8>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            workflow_id: workflow_id.into(),
            workflow_version: workflow_version.into(),
            status: RunStatus::Pending,
            progress: 0.0,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            input,
            output: None,
            error: None,
            resource_id: None,
            tags: std::collections::BTreeMap::new(),
            context,
        }
    }
}

/// The per-run record of a single step's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub run_id: Uuid,
    pub step_id: String,
    pub execution_index: u64,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub input: Vec<u8>,
    pub output: Option<Vec<u8>>,
    pub attempt: u32,
    pub error: Option<ErrorInfo>,
}

impl StepExecution {
    pub fn new(run_id: Uuid, step_id: impl Into<String>, execution_index: u64, input: Vec<u8>) -> Self {
        Self {
            run_id,
            step_id: step_id.into(),
            execution_index,
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            input,
            output: None,
            attempt: 0,
            error: None,
        }
    }
}

/// Which kind of record was missing, for [`StoreError::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Run,
    StepExecution,
    StepOutput,
    StateKey,
}

impl std::fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Run => "run",
            Self::StepExecution => "step execution",
            Self::StepOutput => "step output",
            Self::StateKey => "state key",
        };
        write!(f, "{s}")
    }
}

/// Errors a [`Store`] implementation can surface.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: NotFoundKind, id: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(kind: NotFoundKind, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }
}

/// Filter for [`Store::list_runs`].
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub workflow_id: Option<String>,
    pub status: Option<RunStatus>,
    pub resource_id: Option<String>,
    pub limit: Option<usize>,
}

/// Persistence contract for runs, step executions, step outputs, and state
/// KV. Implementations must be thread-safe; the engine
/// assumes each call is atomic but not that multiple calls are transactional
/// together.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn create_run(&self, run: WorkflowRun) -> Result<(), StoreError>;
    async fn get_run(&self, run_id: Uuid) -> Result<WorkflowRun, StoreError>;
    async fn update_run(&self, run: WorkflowRun) -> Result<(), StoreError>;
    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<ErrorInfo>,
    ) -> Result<(), StoreError>;
    async fn list_runs(&self, filter: RunFilter) -> Result<Vec<WorkflowRun>, StoreError>;

    async fn create_step_execution(&self, execution: StepExecution) -> Result<(), StoreError>;
    async fn get_step_execution(&self, run_id: Uuid, step_id: &str) -> Result<StepExecution, StoreError>;
    async fn update_step_execution(&self, execution: StepExecution) -> Result<(), StoreError>;
    async fn list_step_executions(&self, run_id: Uuid) -> Result<Vec<StepExecution>, StoreError>;

    async fn upsert_step_output(&self, run_id: Uuid, step_id: &str, output: Vec<u8>) -> Result<(), StoreError>;
    async fn load_step_output(&self, run_id: Uuid, step_id: &str) -> Result<Vec<u8>, StoreError>;

    async fn set_state(&self, run_id: Uuid, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
    async fn get_state(&self, run_id: Uuid, key: &str) -> Result<Vec<u8>, StoreError>;
    async fn delete_state(&self, run_id: Uuid, key: &str) -> Result<(), StoreError>;
    async fn get_all_state(&self, run_id: Uuid) -> Result<std::collections::BTreeMap<String, Vec<u8>>, StoreError>;

    async fn count_runs_by_status(&self, resource_id: &str, status: RunStatus) -> Result<usize, StoreError>;
}
