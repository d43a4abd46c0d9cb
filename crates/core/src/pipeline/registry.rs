//! Runner factory registry
//!
//! Resolving a [`PipelineStep`] is capability-based: every registered
//! factory is asked whether it `can_run` the step, and the match with the
//! highest `priority()` wins. Ties go to the factory registered first, so
//! resolution is deterministic for a given registration order.
//!
//! Factories can be registered explicitly or submitted at link time through
//! `inventory`:
//!
//! ```ignore
//! inventory::submit! {
//!     RegisteredRunnerFactory::new(|| Arc::new(MyFactory))
//! }
//! ```
//!
//! and then collected with [`RunnerFactoryRegistry::with_registered`].

use std::marker::PhantomData;
use std::sync::Arc;

use super::{PipelineStep, PipelineStepRunner, StepConfig};
use crate::{Error, Result};

/// Creates runners for the steps it recognises
pub trait PipelineStepRunnerFactory: Send + Sync {
    /// Factory name, used in logs
    fn name(&self) -> &str;

    /// Whether this factory can execute `step`
    fn can_run(&self, step: &PipelineStep) -> bool;

    /// Instantiate a runner; may acquire resources (models, devices)
    fn create(&self, step: &PipelineStep) -> Result<Arc<dyn PipelineStepRunner>>;

    /// Preference among factories that can all run the same step
    fn priority(&self) -> i32 {
        0
    }
}

/// Factory for a single step type with a typed configuration
pub struct ConfigRunnerFactory<C> {
    name: String,
    create: Box<dyn Fn(&PipelineStep, C) -> Result<Arc<dyn PipelineStepRunner>> + Send + Sync>,
    priority: i32,
    _config: PhantomData<fn() -> C>,
}

impl<C: StepConfig + 'static> ConfigRunnerFactory<C> {
    pub fn new(
        name: impl Into<String>,
        create: impl Fn(&PipelineStep, C) -> Result<Arc<dyn PipelineStepRunner>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            create: Box::new(create),
            priority: 0,
            _config: PhantomData,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl<C: StepConfig + 'static> PipelineStepRunnerFactory for ConfigRunnerFactory<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_run(&self, step: &PipelineStep) -> bool {
        step.step_type() == C::STEP_TYPE
    }

    fn create(&self, step: &PipelineStep) -> Result<Arc<dyn PipelineStepRunner>> {
        (self.create)(step, step.config::<C>()?)
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// Link-time factory registration entry
pub struct RegisteredRunnerFactory {
    /// Builds the factory
    pub build: fn() -> Arc<dyn PipelineStepRunnerFactory>,
}

impl RegisteredRunnerFactory {
    pub const fn new(build: fn() -> Arc<dyn PipelineStepRunnerFactory>) -> Self {
        Self { build }
    }
}

inventory::collect!(RegisteredRunnerFactory);

/// Ordered set of runner factories
///
/// Populate before building executors; read-only while pipelines run.
#[derive(Default, Clone)]
pub struct RunnerFactoryRegistry {
    factories: Vec<Arc<dyn PipelineStepRunnerFactory>>,
}

impl RunnerFactoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in step factories
    ///
    /// [`BatchedModelStep`](crate::steps::BatchedModelStep) needs models and
    /// is not included; register a
    /// [`BatchedModelRunnerFactory`](crate::steps::BatchedModelRunnerFactory)
    /// for it.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::steps::register_builtins(&mut registry);
        registry
    }

    /// Registry holding every factory submitted through `inventory`
    pub fn with_registered() -> Self {
        let mut registry = Self::new();
        for registered in inventory::iter::<RegisteredRunnerFactory> {
            registry.register_arc((registered.build)());
        }
        registry
    }

    /// Register a factory
    pub fn register(&mut self, factory: impl PipelineStepRunnerFactory + 'static) -> &mut Self {
        self.register_arc(Arc::new(factory))
    }

    /// Register a shared factory
    pub fn register_arc(&mut self, factory: Arc<dyn PipelineStepRunnerFactory>) -> &mut Self {
        tracing::debug!(
            factory = factory.name(),
            priority = factory.priority(),
            "Registered runner factory"
        );
        self.factories.push(factory);
        self
    }

    /// Number of registered factories
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Names of registered factories in registration order
    pub fn factory_names(&self) -> Vec<String> {
        self.factories.iter().map(|f| f.name().to_string()).collect()
    }

    /// Pick the factory for `step`
    pub fn resolve(&self, step: &PipelineStep) -> Result<Arc<dyn PipelineStepRunnerFactory>> {
        let mut best: Option<&Arc<dyn PipelineStepRunnerFactory>> = None;
        for factory in self.factories.iter().filter(|f| f.can_run(step)) {
            if best.map_or(true, |current| factory.priority() > current.priority()) {
                best = Some(factory);
            }
        }
        match best {
            Some(factory) => {
                tracing::debug!(
                    step = step.display_name(),
                    step_type = step.step_type(),
                    factory = factory.name(),
                    "Resolved runner factory"
                );
                Ok(Arc::clone(factory))
            }
            None => Err(Error::NoRunnerFactory {
                step_type: step.step_type().to_string(),
            }),
        }
    }

    /// Resolve and instantiate a runner for `step`
    pub fn create_runner(&self, step: &PipelineStep) -> Result<Arc<dyn PipelineStepRunner>> {
        self.resolve(step)?.create(step)
    }
}
