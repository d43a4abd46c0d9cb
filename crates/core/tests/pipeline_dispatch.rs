//! Integration tests for step dispatch and pipeline execution

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pipeserve_core::config::ExecutorConfig;
use pipeserve_core::pipeline::{
    Context, GraphBuilder, MergePolicy, PipelineStep, PipelineStepRunner,
    PipelineStepRunnerFactory, RegisteredRunnerFactory, RunnerFactoryRegistry, RunnerState,
    SequencePipeline, SwitchFn,
};
use pipeserve_core::{Data, Error, Pipeline, PipelineExecutor, Result};

/// Writes `value` under `key`; fails when `fail` is set
struct TagRunner {
    step: PipelineStep,
    state: RunnerState,
    closes: Arc<AtomicUsize>,
}

impl PipelineStepRunner for TagRunner {
    fn step(&self) -> &PipelineStep {
        &self.step
    }

    fn exec(&self, _ctx: &Context, mut data: Data) -> Result<Data> {
        self.state.check_open()?;
        if self.step.param("fail").and_then(|v| v.as_bool()) == Some(true) {
            return Err(Error::Execution("tag step asked to fail".to_string()));
        }
        let key = self
            .step
            .param("key")
            .and_then(|v| v.as_str())
            .unwrap_or("tag")
            .to_string();
        let value = self
            .step
            .param("value")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        data.put(key, value)?;
        Ok(data)
    }

    fn close(&self) -> Result<()> {
        if self.state.mark_closed() {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[derive(Default)]
struct Counters {
    creates: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

struct TagFactory {
    counters: Arc<Counters>,
}

impl PipelineStepRunnerFactory for TagFactory {
    fn name(&self) -> &str {
        "tag"
    }

    fn can_run(&self, step: &PipelineStep) -> bool {
        step.step_type() == "TagStep"
    }

    fn create(&self, step: &PipelineStep) -> Result<Arc<dyn PipelineStepRunner>> {
        self.counters.creates.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(TagRunner {
            step: step.clone(),
            state: RunnerState::new(step),
            closes: Arc::clone(&self.counters.closes),
        }))
    }
}

fn link_time_tag_factory() -> Arc<dyn PipelineStepRunnerFactory> {
    Arc::new(TagFactory {
        counters: Arc::new(Counters::default()),
    })
}

inventory::submit! {
    RegisteredRunnerFactory::new(link_time_tag_factory)
}

fn registry() -> (Arc<RunnerFactoryRegistry>, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let mut registry = RunnerFactoryRegistry::with_builtins();
    registry.register(TagFactory {
        counters: Arc::clone(&counters),
    });
    (Arc::new(registry), counters)
}

fn tag(key: &str, value: i64) -> PipelineStep {
    PipelineStep::new("TagStep")
        .with_name(format!("tag-{}", key))
        .with_param("key", key)
        .unwrap()
        .with_param("value", value)
        .unwrap()
}

fn three_way_switch() -> Pipeline {
    let mut g = GraphBuilder::new();
    let input = g.input("in");
    let branches = g.switch("route", &input, SwitchFn::data_int(3, "branch"));
    let outs: Vec<_> = branches
        .iter()
        .enumerate()
        .map(|(i, b)| g.then(format!("mark{}", i), b, tag("taken", i as i64)))
        .collect();
    let out = g.any("out", &outs);
    g.build(&out).unwrap().into()
}

#[test]
fn test_sequence_runs_in_order() {
    let (registry, counters) = registry();
    let pipeline: Pipeline = SequencePipeline::new(vec![tag("a", 1), tag("a", 2), tag("b", 3)]).into();
    let executor = pipeline.executor(registry).unwrap();

    let out = executor.exec(Data::new()).unwrap();
    assert_eq!(out.get_int64("a").unwrap(), 2);
    assert_eq!(out.get_int64("b").unwrap(), 3);
    assert_eq!(counters.creates.load(Ordering::SeqCst), 3);
}

#[test]
fn test_link_time_registration() {
    let registry = RunnerFactoryRegistry::with_registered();
    assert!(registry.factory_names().contains(&"tag".to_string()));
    assert!(registry.resolve(&tag("a", 1)).is_ok());
}

#[test]
fn test_switch_is_deterministic() {
    let (registry, _) = registry();
    let executor = three_way_switch().executor(registry).unwrap();

    for _ in 0..10 {
        let input = Data::singleton("branch", 1i64).unwrap();
        let out = executor.exec(input).unwrap();
        assert_eq!(out.get_int64("taken").unwrap(), 1);
    }
}

#[test]
fn test_switch_out_of_range_fails() {
    let (registry, _) = registry();
    let executor = three_way_switch().executor(registry).unwrap();
    assert!(executor.exec(Data::singleton("branch", 3i64).unwrap()).is_err());
    assert!(executor.exec(Data::new()).is_err());
}

#[test]
fn test_each_step_created_exactly_once() {
    let (registry, counters) = registry();
    let executor = three_way_switch().executor(registry).unwrap();
    assert_eq!(counters.creates.load(Ordering::SeqCst), 3);

    for i in 0..3 {
        executor.exec(Data::singleton("branch", i).unwrap()).unwrap();
    }
    assert_eq!(counters.creates.load(Ordering::SeqCst), 3);
}

#[test]
fn test_unknown_step_type_names_it() {
    let (registry, _) = registry();
    let pipeline: Pipeline = SequencePipeline::new(vec![PipelineStep::new("TeleportStep")]).into();
    let err = pipeline.executor(registry).err().unwrap();
    assert!(err.to_string().contains("TeleportStep"), "{}", err);
    assert!(matches!(
        err.root_cause(),
        Error::NoRunnerFactory { step_type } if step_type == "TeleportStep"
    ));
}

#[test]
fn test_failing_step_is_wrapped_with_context() {
    let (registry, _) = registry();
    let failing = PipelineStep::new("TagStep")
        .with_name("broken")
        .with_param("fail", true)
        .unwrap();
    let pipeline: Pipeline = SequencePipeline::new(vec![tag("a", 1), failing]).into();
    let executor = pipeline.executor(registry).unwrap();

    match executor.exec(Data::new()) {
        Err(Error::StepFailed { step, step_type, .. }) => {
            assert_eq!(step, "broken");
            assert_eq!(step_type, "TagStep");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_close_is_idempotent_and_final() {
    let (registry, counters) = registry();
    let pipeline: Pipeline = SequencePipeline::new(vec![tag("a", 1), tag("b", 2)]).into();
    let executor = pipeline.executor(registry).unwrap();
    executor.exec(Data::new()).unwrap();

    executor.close().unwrap();
    executor.close().unwrap();
    assert_eq!(counters.closes.load(Ordering::SeqCst), 2);
    assert!(executor.is_closed());
    assert!(matches!(
        executor.exec(Data::new()),
        Err(Error::ExecutorClosed)
    ));
}

#[test]
fn test_lazy_resolution() {
    let (registry, counters) = registry();
    let pipeline: Pipeline = SequencePipeline::new(vec![tag("a", 1)]).into();
    let config = ExecutorConfig {
        eager_resolve: false,
        ..Default::default()
    };
    let executor = pipeline.executor_with_config(registry, config).unwrap();
    assert!(!executor.is_resolved());
    assert_eq!(counters.creates.load(Ordering::SeqCst), 0);

    executor.exec(Data::new()).unwrap();
    assert!(executor.is_resolved());
    assert_eq!(counters.creates.load(Ordering::SeqCst), 1);

    drop(executor);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_merge_requires_all_inputs() {
    let (registry, _) = registry();
    let mut g = GraphBuilder::new();
    let input = g.input("in");
    let a = g.then("a", &input, tag("a", 1));
    let b = g.then("b", &input, tag("b", 2));
    let out = g.merge("out", &[a, b], MergePolicy::RequireAll, false);
    let pipeline: Pipeline = g.build(&out).unwrap().into();
    let executor = pipeline.executor(registry).unwrap();

    let out = executor.exec(Data::singleton("seed", 0i64).unwrap()).unwrap();
    assert_eq!(out.get_int64("a").unwrap(), 1);
    assert_eq!(out.get_int64("b").unwrap(), 2);
    assert_eq!(out.get_int64("seed").unwrap(), 0);
}

#[test]
fn test_concurrent_exec() {
    let (registry, _) = registry();
    let pipeline: Pipeline = SequencePipeline::new(vec![tag("a", 7)]).into();
    let executor = Arc::new(pipeline.executor(registry).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let executor = Arc::clone(&executor);
            std::thread::spawn(move || executor.exec(Data::singleton("i", i as i64).unwrap()))
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        let out = handle.join().unwrap().unwrap();
        assert_eq!(out.get_int64("i").unwrap(), i as i64);
        assert_eq!(out.get_int64("a").unwrap(), 7);
    }
}

#[test]
fn test_load_pipeline_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.yaml");
    std::fs::write(
        &path,
        r#"
"@type": SequencePipeline
steps:
  - "@type": TagStep
    name: first
    key: x
    value: 5
  - "@type": LoggingStep
    level: debug
    log: keys_and_values
"#,
    )
    .unwrap();

    let (registry, _) = registry();
    let pipeline = Pipeline::from_file(&path).unwrap();
    let executor = pipeline.executor(registry).unwrap();
    assert_eq!(executor.exec(Data::new()).unwrap().get_int64("x").unwrap(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exec_async() {
    let (registry, _) = registry();
    let pipeline: Pipeline = SequencePipeline::new(vec![tag("a", 3)]).into();
    let executor: Arc<PipelineExecutor> = Arc::new(pipeline.executor(registry).unwrap());

    let out = Arc::clone(&executor).exec_async(Data::new()).await.unwrap();
    assert_eq!(out.get_int64("a").unwrap(), 3);
    executor.close().unwrap();
}
