//! Typed unit of work: id, name, handler, per-step config, validation, and
//! optional conditional gating.
//!
//! Steps are heterogeneous in their input/output types but homogeneous in
//! lifecycle. [`AnyStep`] is the type-erased interface the scheduler drives;
//! [`Step<I, O>`] is the typed factory that adapts a user-supplied typed
//! handler into it by JSON-encoding at the boundary, the same
//! seam the sibling crate's `AnyWorkflow`/`WorkflowWrapper` pair provides
//! for workflow state machines.

mod config;

pub use config::ExecutionConfig;

use std::any::TypeId;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::StepContext;
use crate::error::{ConditionError, HandlerError, ValidationError};

type HandlerFn<I, O> =
    Arc<dyn Fn(StepContext, I) -> BoxFuture<'static, Result<O, HandlerError>> + Send + Sync>;
type ConditionFn =
    Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<bool, ConditionError>> + Send + Sync>;
type ValidatorFn<T> = Arc<dyn Fn(&T) -> Result<(), ValidationError> + Send + Sync>;

/// Type-erased step interface the scheduler drives.
#[async_trait]
pub trait AnyStep: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn config(&self) -> &ExecutionConfig;

    /// True once the step's config was explicitly set at builder time
    /// (vs. still carrying the sentinel default, eligible for workflow
    /// default inheritance).
    fn has_explicit_config(&self) -> bool;

    /// Called by `Builder::build` to inherit the workflow default config,
    /// a no-op if this step's config was already explicitly set.
    fn inherit_default_config(&mut self, default: &ExecutionConfig);

    fn validation_enabled(&self) -> bool;

    fn validate_input(&self, bytes: &[u8]) -> Result<(), ValidationError>;
    fn validate_output(&self, bytes: &[u8]) -> Result<(), ValidationError>;

    async fn invoke(&self, ctx: StepContext, input: Vec<u8>) -> Result<Vec<u8>, HandlerError>;

    /// `None` if this step has no condition; `Some(Ok(bool))`/`Some(Err(_))`
    /// otherwise.
    async fn evaluate_condition(&self, ctx: &StepContext) -> Option<Result<bool, ConditionError>>;

    /// Output to use when the condition evaluates false: the declared
    /// default if present, else the input passed through (only when input
    /// and output types are the same Rust type), else the zero value of the
    /// output type.
    fn skip_output(&self, input: &[u8]) -> Vec<u8>;
}

/// A typed, JSON-boundary adapter implementing [`AnyStep`] for a concrete
/// `(I, O)` pair.
pub struct Step<I, O> {
    id: String,
    name: String,
    config: ExecutionConfig,
    config_explicit: bool,
    handler: HandlerFn<I, O>,
    validation_enabled: bool,
    validate_input: Option<ValidatorFn<I>>,
    validate_output: Option<ValidatorFn<O>>,
    condition: Option<ConditionFn>,
    default_value: Option<Vec<u8>>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> Step<I, O>
where
    I: Serialize + DeserializeOwned + Send + Sync + 'static,
    O: Default + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new<F, Fut>(id: impl Into<String>, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StepContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, HandlerError>> + Send + 'static,
    {
        let handler: HandlerFn<I, O> = Arc::new(move |ctx, input| Box::pin(handler(ctx, input)));
        Self {
            id: id.into(),
            name: name.into(),
            config: ExecutionConfig::default(),
            config_explicit: false,
            handler,
            validation_enabled: true,
            validate_input: None,
            validate_output: None,
            condition: None,
            default_value: None,
            _marker: PhantomData,
        }
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self.config_explicit = true;
        self
    }

    pub fn without_validation(mut self) -> Self {
        self.validation_enabled = false;
        self
    }

    pub fn with_input_validator(
        mut self,
        validator: impl Fn(&I) -> Result<(), ValidationError> + Send + Sync + 'static,
    ) -> Self {
        self.validate_input = Some(Arc::new(validator));
        self
    }

    pub fn with_output_validator(
        mut self,
        validator: impl Fn(&O) -> Result<(), ValidationError> + Send + Sync + 'static,
    ) -> Self {
        self.validate_output = Some(Arc::new(validator));
        self
    }

    /// Attach a condition gate. `default` is the output to use when the
    /// condition is false; if `None`, pass-through (when `I == O`) or the
    /// zero value of `O` is used instead.
    pub fn with_condition<F, Fut>(mut self, condition: F, default: Option<O>) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, ConditionError>> + Send + 'static,
    {
        self.condition = Some(Arc::new(move |ctx| Box::pin(condition(ctx))));
        self.default_value = default.map(|v| {
            serde_json::to_vec(&v).expect("condition default value must serialize to JSON")
        });
        self
    }

    pub fn build(self) -> Box<dyn AnyStep> {
        Box::new(self)
    }
}

#[async_trait]
impl<I, O> AnyStep for Step<I, O>
where
    I: Serialize + DeserializeOwned + Send + Sync + 'static,
    O: Default + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    fn has_explicit_config(&self) -> bool {
        self.config_explicit
    }

    fn inherit_default_config(&mut self, default: &ExecutionConfig) {
        if !self.config_explicit {
            self.config = default.clone();
        }
    }

    fn validation_enabled(&self) -> bool {
        self.validation_enabled
    }

    fn validate_input(&self, bytes: &[u8]) -> Result<(), ValidationError> {
        let Some(validator) = &self.validate_input else { return Ok(()) };
        let value: I = serde_json::from_slice(bytes)
            .map_err(|e| ValidationError::new(format!("input did not parse: {e}")))?;
        validator(&value)
    }

    fn validate_output(&self, bytes: &[u8]) -> Result<(), ValidationError> {
        let Some(validator) = &self.validate_output else { return Ok(()) };
        let value: O = serde_json::from_slice(bytes)
            .map_err(|e| ValidationError::new(format!("output did not parse: {e}")))?;
        validator(&value)
    }

    async fn invoke(&self, ctx: StepContext, input: Vec<u8>) -> Result<Vec<u8>, HandlerError> {
        let typed_input: I = serde_json::from_slice(&input)
            .map_err(|e| HandlerError::fatal(format!("input did not parse: {e}")))?;
        let output = (self.handler)(ctx, typed_input).await?;
        serde_json::to_vec(&output)
            .map_err(|e| HandlerError::fatal(format!("output failed to serialize: {e}")))
    }

    async fn evaluate_condition(&self, ctx: &StepContext) -> Option<Result<bool, ConditionError>> {
        let condition = self.condition.as_ref()?;
        Some(condition(ctx.clone()).await)
    }

    fn skip_output(&self, input: &[u8]) -> Vec<u8> {
        if let Some(default) = &self.default_value {
            return default.clone();
        }
        if TypeId::of::<I>() == TypeId::of::<O>() {
            return input.to_vec();
        }
        serde_json::to_vec(&O::default()).expect("zero value must serialize to JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::{DataAccessor, StateAccessor};
    use crate::store::InMemoryStore;
    use std::sync::Arc as StdArc;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn dummy_ctx() -> StepContext {
        let store: StdArc<dyn crate::store::Store> = StdArc::new(InMemoryStore::new());
        let run_id = Uuid::now_v7();
        StepContext::new(
            run_id,
            "step",
            0,
            CancellationToken::new(),
            StdArc::new(DataAccessor::new(store.clone(), run_id)),
            StdArc::new(StateAccessor::new(store, run_id)),
            None,
        )
    }

    #[tokio::test]
    async fn handler_round_trips_json_at_boundary() {
        let step: Box<dyn AnyStep> = Step::<i64, i64>::new("double", "double", |_ctx, input: i64| async move {
            Ok(input * 2)
        })
        .build();

        let input = serde_json::to_vec(&21i64).unwrap();
        let output = step.invoke(dummy_ctx(), input).await.unwrap();
        let value: i64 = serde_json::from_slice(&output).unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn validators_reject_bad_values() {
        let step: Box<dyn AnyStep> = Step::<i64, i64>::new("must_be_positive", "must_be_positive", |_ctx, input: i64| async move {
            Ok(input)
        })
        .with_input_validator(|v: &i64| {
            if *v < 0 {
                Err(ValidationError::new("must be non-negative"))
            } else {
                Ok(())
            }
        })
        .build();

        let bad = serde_json::to_vec(&-1i64).unwrap();
        assert!(step.validate_input(&bad).is_err());
        let good = serde_json::to_vec(&1i64).unwrap();
        assert!(step.validate_input(&good).is_ok());
    }

    #[test]
    fn config_inheritance_only_applies_when_not_explicit() {
        let mut step: Box<dyn AnyStep> = Step::<i64, i64>::new("a", "a", |_ctx, i: i64| async move { Ok(i) }).build();
        let wf_default = ExecutionConfig::default().with_max_retries(9);
        step.inherit_default_config(&wf_default);
        assert_eq!(step.config().max_retries, 9);

        let mut explicit: Box<dyn AnyStep> =
            Step::<i64, i64>::new("b", "b", |_ctx, i: i64| async move { Ok(i) })
                .with_config(ExecutionConfig::default().with_max_retries(1))
                .build();
        explicit.inherit_default_config(&wf_default);
        assert_eq!(explicit.config().max_retries, 1);
    }

    #[test]
    fn skip_output_prefers_default_then_passthrough_then_zero_value() {
        let with_default: Box<dyn AnyStep> =
            Step::<i64, i64>::new("a", "a", |_ctx, i: i64| async move { Ok(i) })
                .with_condition(|_ctx| async move { Ok(false) }, Some(99i64))
                .build();
        let out: i64 = serde_json::from_slice(&with_default.skip_output(&serde_json::to_vec(&1i64).unwrap())).unwrap();
        assert_eq!(out, 99);

        let passthrough: Box<dyn AnyStep> =
            Step::<String, String>::new("b", "b", |_ctx, s: String| async move { Ok(s) })
                .with_condition(|_ctx| async move { Ok(false) }, None)
                .build();
        let input = serde_json::to_vec(&"from-A".to_string()).unwrap();
        let out: String = serde_json::from_slice(&passthrough.skip_output(&input)).unwrap();
        assert_eq!(out, "from-A");

        let zero_value: Box<dyn AnyStep> =
            Step::<String, i64>::new("c", "c", |_ctx, _s: String| async move { Ok(0) })
                .with_condition(|_ctx| async move { Ok(false) }, None)
                .build();
        let out: i64 = serde_json::from_slice(&zero_value.skip_output(&input)).unwrap();
        assert_eq!(out, 0);
    }
}
