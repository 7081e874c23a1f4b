//! # Stepflow
//!
//! A type-disciplined DAG workflow orchestration engine: build a workflow out
//! of typed steps, let the engine walk it in topological order, and get
//! automatic retries, backoff, timeouts, and per-run persistence for free.
//!
//! ## Features
//!
//! - **Typed steps, erased at the boundary**: handlers are plain `async fn(StepContext, I) -> Result<O, HandlerError>`; the engine drives them through a JSON-encoded [`step::AnyStep`] object so a workflow can mix any number of input/output types
//! - **Deterministic scheduling**: topological order with insertion-order tie-breaking, so the same workflow always schedules the same way
//! - **Retries with backoff**: per-step `NONE`/`LINEAR`/`EXPONENTIAL` backoff, no jitter, fully deterministic
//! - **Cooperative cancellation**: a [`tokio_util::sync::CancellationToken`] per run, raced against every in-flight step attempt
//! - **Pluggable persistence**: the [`store::Store`] trait plus a reference [`store::InMemoryStore`]; production stores are external collaborators
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                               │
//! │   (drives runs, tracks cancellation, enforces concurrency)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Executor                              │
//! │  (per-step: condition, validation, timeout, retry/backoff)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                                │
//! │        (runs, step executions, step outputs, state KV)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use stepflow::prelude::*;
//!
//! let workflow = Builder::new("order-fulfillment", "Order Fulfillment", "1.0.0")
//!     .then_step(Step::<OrderInput, ChargeResult>::new("charge", "charge", charge_handler).build())
//!     .then_step(Step::<ChargeResult, ShipResult>::new("ship", "ship", ship_handler).build())
//!     .build()?;
//!
//! let engine = Engine::new(Arc::new(InMemoryStore::new()));
//! let run_id = engine.start_workflow(Arc::new(workflow), input_bytes, StartOptions::default()).await?;
//! ```

pub mod accessor;
pub mod backoff;
pub mod builder;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod observability;
pub mod step;
pub mod store;
pub mod workflow;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::accessor::{AccessorError, DataAccessor, StateAccessor};
    pub use crate::backoff::BackoffStrategy;
    pub use crate::builder::{Builder, BuilderError};
    pub use crate::context::StepContext;
    pub use crate::engine::{Engine, EngineConfig, EngineError, StartOptions};
    pub use crate::error::{
        CancelledError, ConditionError, ErrorInfo, HandlerError, StepFailure, TimeoutError,
        ValidationError,
    };
    pub use crate::executor::{Executor, ExecutorError, StepOutcome, StepPosition};
    pub use crate::graph::{Graph, GraphError, NodeType};
    pub use crate::observability::{Event, NoopObserver, Observer, TracingObserver};
    pub use crate::step::{AnyStep, ExecutionConfig, Step};
    pub use crate::store::{
        InMemoryStore, RunFilter, RunStatus, Store, StoreError, StepExecution, StepStatus,
        WorkflowRun,
    };
    pub use crate::workflow::Workflow;
}
