//! The built, immutable artifact a [`crate::builder::Builder`] produces.

use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::graph::Graph;
use crate::step::{AnyStep, ExecutionConfig};

/// A validated DAG of steps plus the metadata needed to run it.
///
/// Construction is only possible through [`crate::builder::Builder::build`],
/// which guarantees the invariant this type relies on elsewhere: every id in
/// `graph` has a matching entry in `steps`, and vice versa.
pub struct Workflow {
    id: String,
    name: String,
    version: String,
    description: Option<String>,
    tags: BTreeMap<String, String>,
    steps: HashMap<String, Box<dyn AnyStep>>,
    graph: Graph,
    default_config: ExecutionConfig,
    /// Opaque, JSON-encoded context handed unmodified to every step via
    /// `StepContext::user_context`.
    context: Option<Vec<u8>>,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("description", &self.description)
            .field("tags", &self.tags)
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .field("graph", &self.graph)
            .field("default_config", &self.default_config)
            .field("context", &self.context)
            .finish()
    }
}

impl Workflow {
    pub(crate) fn new(
        id: String,
        name: String,
        version: String,
        description: Option<String>,
        tags: BTreeMap<String, String>,
        steps: HashMap<String, Box<dyn AnyStep>>,
        graph: Graph,
        default_config: ExecutionConfig,
        context: Option<Vec<u8>>,
    ) -> Self {
        Self { id, name, version, description, tags, steps, graph, default_config, context }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn default_config(&self) -> &ExecutionConfig {
        &self.default_config
    }

    pub fn context(&self) -> Option<&[u8]> {
        self.context.as_deref()
    }

    pub fn step(&self, id: &str) -> Option<&dyn AnyStep> {
        self.steps.get(id).map(|s| s.as_ref())
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }

    /// Merge the workflow's own tags with run-start tags, the latter
    /// overriding on key collision.
    pub fn merge_tags(&self, run_tags: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut merged = self.tags.clone();
        for (k, v) in run_tags {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}
