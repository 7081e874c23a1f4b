//! In-memory [`Store`] implementation for tests and small deployments.

use std::collections::BTreeMap;
use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{
    NotFoundKind, RunFilter, RunStatus, Store, StoreError, StepExecution, WorkflowRun,
};
use crate::error::ErrorInfo;

struct RunState {
    run: WorkflowRun,
    executions: Vec<StepExecution>,
    outputs: HashMap<String, Vec<u8>>,
    state: BTreeMap<String, Vec<u8>>,
}

/// Thread-safe, process-local [`Store`]. Data does not survive the process;
/// this is the same role the sibling crate's `InMemoryWorkflowEventStore`
/// plays for its own test suite.
pub struct InMemoryStore {
    runs: RwLock<HashMap<Uuid, RunState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self { runs: RwLock::new(HashMap::new()) }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_run(&self, run: WorkflowRun) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        runs.insert(
            run.run_id,
            RunState { run, executions: Vec::new(), outputs: HashMap::new(), state: BTreeMap::new() },
        );
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<WorkflowRun, StoreError> {
        let runs = self.runs.read();
        runs.get(&run_id)
            .map(|s| s.run.clone())
            .ok_or_else(|| StoreError::not_found(NotFoundKind::Run, run_id.to_string()))
    }

    async fn update_run(&self, run: WorkflowRun) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        let state = runs
            .get_mut(&run.run_id)
            .ok_or_else(|| StoreError::not_found(NotFoundKind::Run, run.run_id.to_string()))?;
        state.run = run;
        Ok(())
    }

    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<ErrorInfo>,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        let state = runs
            .get_mut(&run_id)
            .ok_or_else(|| StoreError::not_found(NotFoundKind::Run, run_id.to_string()))?;
        state.run.status = status;
        state.run.error = error;
        state.run.updated_at = chrono::Utc::now();
        if status.is_terminal() {
            state.run.completed_at = Some(chrono::Utc::now());
        }
        Ok(())
    }

    async fn list_runs(&self, filter: RunFilter) -> Result<Vec<WorkflowRun>, StoreError> {
        let runs = self.runs.read();
        let mut results: Vec<WorkflowRun> = runs
            .values()
            .map(|s| s.run.clone())
            .filter(|r| filter.workflow_id.as_deref().map_or(true, |w| w == r.workflow_id))
            .filter(|r| filter.status.map_or(true, |s| s == r.status))
            .filter(|r| filter.resource_id.as_deref().map_or(true, |rid| Some(rid) == r.resource_id.as_deref()))
            .collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn create_step_execution(&self, execution: StepExecution) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        let state = runs
            .get_mut(&execution.run_id)
            .ok_or_else(|| StoreError::not_found(NotFoundKind::Run, execution.run_id.to_string()))?;
        state.executions.push(execution);
        Ok(())
    }

    async fn get_step_execution(&self, run_id: Uuid, step_id: &str) -> Result<StepExecution, StoreError> {
        let runs = self.runs.read();
        let state = runs
            .get(&run_id)
            .ok_or_else(|| StoreError::not_found(NotFoundKind::Run, run_id.to_string()))?;
        state
            .executions
            .iter()
            .rev()
            .find(|e| e.step_id == step_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(NotFoundKind::StepExecution, step_id.to_string()))
    }

    async fn update_step_execution(&self, execution: StepExecution) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        let state = runs
            .get_mut(&execution.run_id)
            .ok_or_else(|| StoreError::not_found(NotFoundKind::Run, execution.run_id.to_string()))?;
        if let Some(existing) = state
            .executions
            .iter_mut()
            .rev()
            .find(|e| e.step_id == execution.step_id)
        {
            *existing = execution;
            Ok(())
        } else {
            Err(StoreError::not_found(NotFoundKind::StepExecution, execution.step_id))
        }
    }

    async fn list_step_executions(&self, run_id: Uuid) -> Result<Vec<StepExecution>, StoreError> {
        let runs = self.runs.read();
        let state = runs
            .get(&run_id)
            .ok_or_else(|| StoreError::not_found(NotFoundKind::Run, run_id.to_string()))?;
        let mut executions = state.executions.clone();
        executions.sort_by_key(|e| e.execution_index);
        Ok(executions)
    }

    async fn upsert_step_output(&self, run_id: Uuid, step_id: &str, output: Vec<u8>) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        let state = runs
            .get_mut(&run_id)
            .ok_or_else(|| StoreError::not_found(NotFoundKind::Run, run_id.to_string()))?;
        state.outputs.insert(step_id.to_string(), output);
        Ok(())
    }

    async fn load_step_output(&self, run_id: Uuid, step_id: &str) -> Result<Vec<u8>, StoreError> {
        let runs = self.runs.read();
        let state = runs
            .get(&run_id)
            .ok_or_else(|| StoreError::not_found(NotFoundKind::Run, run_id.to_string()))?;
        state
            .outputs
            .get(step_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(NotFoundKind::StepOutput, step_id.to_string()))
    }

    async fn set_state(&self, run_id: Uuid, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        let state = runs
            .get_mut(&run_id)
            .ok_or_else(|| StoreError::not_found(NotFoundKind::Run, run_id.to_string()))?;
        state.state.insert(key.to_string(), value);
        Ok(())
    }

    async fn get_state(&self, run_id: Uuid, key: &str) -> Result<Vec<u8>, StoreError> {
        let runs = self.runs.read();
        let state = runs
            .get(&run_id)
            .ok_or_else(|| StoreError::not_found(NotFoundKind::Run, run_id.to_string()))?;
        state
            .state
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(NotFoundKind::StateKey, key.to_string()))
    }

    async fn delete_state(&self, run_id: Uuid, key: &str) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        let state = runs
            .get_mut(&run_id)
            .ok_or_else(|| StoreError::not_found(NotFoundKind::Run, run_id.to_string()))?;
        state.state.remove(key);
        Ok(())
    }

    async fn get_all_state(&self, run_id: Uuid) -> Result<BTreeMap<String, Vec<u8>>, StoreError> {
        let runs = self.runs.read();
        let state = runs
            .get(&run_id)
            .ok_or_else(|| StoreError::not_found(NotFoundKind::Run, run_id.to_string()))?;
        Ok(state.state.clone())
    }

    async fn count_runs_by_status(&self, resource_id: &str, status: RunStatus) -> Result<usize, StoreError> {
        let runs = self.runs.read();
        Ok(runs
            .values()
            .filter(|s| s.run.resource_id.as_deref() == Some(resource_id) && s.run.status == status)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_run() -> WorkflowRun {
        WorkflowRun::new(Uuid::now_v7(), "wf", "1.0.0", b"{}".to_vec(), None)
    }

    #[tokio::test]
    async fn run_round_trips_through_create_and_get() {
        let store = InMemoryStore::new();
        let run = sample_run();
        let run_id = run.run_id;
        store.create_run(run.clone()).await.unwrap();
        let loaded = store.get_run(run_id).await.unwrap();
        assert_eq!(loaded.run_id, run.run_id);
        assert_eq!(loaded.workflow_id, run.workflow_id);
        assert_eq!(loaded.input, run.input);
    }

    #[tokio::test]
    async fn missing_run_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.get_run(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: NotFoundKind::Run, .. }));
    }

    #[tokio::test]
    async fn step_output_upsert_then_load_is_identical() {
        let store = InMemoryStore::new();
        let run = sample_run();
        let run_id = run.run_id;
        store.create_run(run).await.unwrap();
        store.upsert_step_output(run_id, "a", b"hello".to_vec()).await.unwrap();
        let loaded = store.load_step_output(run_id, "a").await.unwrap();
        assert_eq!(loaded, b"hello");
    }

    #[tokio::test]
    async fn state_set_then_get_round_trips() {
        let store = InMemoryStore::new();
        let run = sample_run();
        let run_id = run.run_id;
        store.create_run(run).await.unwrap();
        store.set_state(run_id, "k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.get_state(run_id, "k").await.unwrap(), b"v");
    }

    #[tokio::test]
    async fn state_delete_removes_key() {
        let store = InMemoryStore::new();
        let run = sample_run();
        let run_id = run.run_id;
        store.create_run(run).await.unwrap();
        store.set_state(run_id, "k", b"v".to_vec()).await.unwrap();
        store.delete_state(run_id, "k").await.unwrap();
        assert!(store.get_state(run_id, "k").await.is_err());
    }

    #[tokio::test]
    async fn step_executions_list_ordered_by_execution_index() {
        let store = InMemoryStore::new();
        let run = sample_run();
        let run_id = run.run_id;
        store.create_run(run).await.unwrap();
        store
            .create_step_execution(StepExecution::new(run_id, "b", 1, vec![]))
            .await
            .unwrap();
        store
            .create_step_execution(StepExecution::new(run_id, "a", 0, vec![]))
            .await
            .unwrap();
        let listed = store.list_step_executions(run_id).await.unwrap();
        assert_eq!(listed.iter().map(|e| e.step_id.clone()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn list_runs_orders_by_created_at_descending() {
        let store = InMemoryStore::new();
        let mut older = sample_run();
        older.created_at = chrono::Utc::now() - chrono::Duration::seconds(60);
        let newer = sample_run();
        store.create_run(older.clone()).await.unwrap();
        store.create_run(newer.clone()).await.unwrap();
        let listed = store.list_runs(RunFilter::default()).await.unwrap();
        assert_eq!(listed[0].run_id, newer.run_id);
        assert_eq!(listed[1].run_id, older.run_id);
    }
}
