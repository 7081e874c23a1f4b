//! Fluent workflow construction: frontier-tracked DAG assembly plus
//! config inheritance.

use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::Serialize;

use crate::graph::{Graph, GraphError, NodeType};
use crate::step::{AnyStep, ExecutionConfig};
use crate::workflow::Workflow;

/// Errors that can occur while assembling a [`Workflow`]. Distinct from
/// [`GraphError`] so callers can tell "the DAG is malformed" apart from
/// "the builder was used incorrectly".
#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("workflow must have at least one step")]
    Empty,

    #[error("context failed to serialize: {0}")]
    ContextSerialize(#[from] serde_json::Error),
}

/// Builds a [`Workflow`] by adding steps one call at a time. Each call that
/// adds nodes advances a "frontier" — the set of node ids the next call's
/// nodes will be wired to depend on — so callers never name edges directly.
pub struct Builder {
    id: String,
    name: String,
    version: String,
    description: Option<String>,
    tags: BTreeMap<String, String>,
    default_config: ExecutionConfig,
    context: Option<Vec<u8>>,
    steps: HashMap<String, Box<dyn AnyStep>>,
    graph: Graph,
    frontier: Vec<String>,
    explicit_entry_point: Option<String>,
}

impl Builder {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            description: None,
            tags: BTreeMap::new(),
            default_config: ExecutionConfig::default(),
            context: None,
            steps: HashMap::new(),
            graph: Graph::new(),
            frontier: Vec::new(),
            explicit_entry_point: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn default_config(mut self, config: ExecutionConfig) -> Self {
        self.default_config = config;
        self
    }

    pub fn context<T: Serialize>(mut self, context: &T) -> Result<Self, BuilderError> {
        self.context = Some(serde_json::to_vec(context)?);
        Ok(self)
    }

    pub fn set_entry_point(mut self, step_id: impl Into<String>) -> Self {
        let id = step_id.into();
        self.graph.set_entry_point(id.clone());
        self.explicit_entry_point = Some(id);
        self
    }

    /// Append a single step after the current frontier, then make it the new
    /// frontier.
    pub fn then_step(mut self, step: Box<dyn AnyStep>) -> Self {
        let id = step.id().to_string();
        self.add_node(id.clone(), step, NodeType::Sequential);
        self.wire_from_frontier(&id);
        self.frontier = vec![id];
        self
    }

    /// Like [`Builder::then_step`], but gated on `condition` — a no-op
    /// convenience for steps already built with `.with_condition(...)`, kept
    /// so call sites read as declaring intent.
    pub fn then_step_if(self, step: Box<dyn AnyStep>) -> Self {
        self.then_step(step)
    }

    /// Append several steps in parallel after the current frontier. All of
    /// them depend on every frontier node; the new frontier is the full set,
    /// so a later `then_step` depends on all of them completing.
    pub fn parallel(mut self, steps: Vec<Box<dyn AnyStep>>) -> Self {
        let mut ids = Vec::with_capacity(steps.len());
        for step in steps {
            let id = step.id().to_string();
            self.add_node(id.clone(), step, NodeType::Parallel);
            self.wire_from_frontier(&id);
            ids.push(id);
        }
        self.frontier = ids;
        self
    }

    /// Append a linear chain of steps, each depending on the previous; the
    /// first depends on the current frontier.
    pub fn sequence(mut self, steps: Vec<Box<dyn AnyStep>>) -> Self {
        for step in steps {
            self = self.then_step(step);
        }
        self
    }

    fn add_node(&mut self, id: String, step: Box<dyn AnyStep>, node_type: NodeType) {
        // A step re-added by id is allowed to refine its node type (e.g. a
        // step that is both a dependency target and declared parallel), but
        // the underlying step body is fixed on first insertion.
        if !self.steps.contains_key(&id) {
            self.graph.add_node(id.clone(), node_type).ok();
            self.steps.insert(id, step);
        } else {
            self.graph.update_node_type(&id, node_type).ok();
        }
    }

    fn wire_from_frontier(&mut self, to: &str) {
        for from in &self.frontier {
            self.graph.add_edge(from.clone(), to.to_string());
        }
    }

    /// Validate the assembled graph, inherit the workflow default config into
    /// every step that didn't set its own, and produce the immutable
    /// [`Workflow`].
    pub fn build(mut self) -> Result<Workflow, BuilderError> {
        if self.steps.is_empty() {
            return Err(BuilderError::Empty);
        }
        self.graph.validate()?;

        for step in self.steps.values_mut() {
            step.inherit_default_config(&self.default_config);
        }

        Ok(Workflow::new(
            self.id,
            self.name,
            self.version,
            self.description,
            self.tags,
            self.steps,
            self.graph,
            self.default_config,
            self.context,
        ))
    }
}
