//! Integration tests for request batching

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use pipeserve_core::batching::{BatchModel, Batcher};
use pipeserve_core::config::BatchingConfig;
use pipeserve_core::pipeline::{PipelineStep, RunnerFactoryRegistry, SequencePipeline};
use pipeserve_core::steps::{BatchedModelRunnerFactory, BatchedModelStep, ModelRegistry};
use pipeserve_core::{Data, Error, NDArray, Pipeline, Result};

type Tensors = HashMap<String, NDArray>;

/// Doubles `x` into `y`, counting calls and recording batch sizes
struct Doubler {
    calls: AtomicUsize,
    rows_seen: parking_lot::Mutex<Vec<i64>>,
    delay: Duration,
}

impl Doubler {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            rows_seen: parking_lot::Mutex::new(Vec::new()),
            delay,
        })
    }
}

impl BatchModel for Doubler {
    fn batch(&self, inputs: Tensors) -> Result<Tensors> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        let x = inputs
            .get("x")
            .ok_or_else(|| Error::KeyNotFound("x".to_string()))?
            .to_serialized()?;
        self.rows_seen.lock().push(x.shape()[0]);
        let doubled: Vec<f32> = x.to_elements::<f32>()?.iter().map(|v| v * 2.0).collect();
        let mut out = HashMap::new();
        out.insert(
            "y".to_string(),
            NDArray::from_elements(x.shape().to_vec(), &doubled)?,
        );
        Ok(out)
    }
}

struct Failing {
    calls: AtomicUsize,
}

impl BatchModel for Failing {
    fn batch(&self, _inputs: Tensors) -> Result<Tensors> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::Resource("device lost".to_string()))
    }
}

fn x(value: f32) -> Tensors {
    let mut m = HashMap::new();
    m.insert(
        "x".to_string(),
        NDArray::from_elements(vec![1], &[value]).unwrap(),
    );
    m
}

fn wide_window(max_batch_size: usize) -> BatchingConfig {
    BatchingConfig {
        max_batch_size,
        max_wait_ms: 5_000,
    }
}

#[test]
fn test_three_callers_share_one_call() {
    let model = Doubler::new(Duration::ZERO);
    let batcher = Arc::new(Batcher::new(model.clone(), wide_window(3)).unwrap());
    let barrier = Arc::new(Barrier::new(3));

    let handles: Vec<_> = [1.0f32, 2.0, 3.0]
        .into_iter()
        .map(|v| {
            let batcher = Arc::clone(&batcher);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let out = batcher.submit(x(v)).unwrap();
                out["y"].to_serialized().unwrap().to_elements::<f32>().unwrap()
            })
        })
        .collect();

    let results: Vec<Vec<f32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results, vec![vec![2.0], vec![4.0], vec![6.0]]);
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert_eq!(*model.rows_seen.lock(), vec![3]);
}

#[test]
fn test_failure_reaches_every_caller() {
    let model = Arc::new(Failing {
        calls: AtomicUsize::new(0),
    });
    let batcher = Arc::new(Batcher::new(model.clone(), wide_window(3)).unwrap());
    let barrier = Arc::new(Barrier::new(3));

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let batcher = Arc::clone(&batcher);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                batcher.submit(x(i as f32))
            })
        })
        .collect();

    let shared: Vec<Arc<Error>> = handles
        .into_iter()
        .map(|h| match h.join().unwrap() {
            Err(Error::BatchFailed(e)) => e,
            other => panic!("unexpected {:?}", other),
        })
        .collect();

    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&shared[0], &shared[1]));
    assert!(Arc::ptr_eq(&shared[1], &shared[2]));
    assert!(matches!(*shared[0], Error::Resource(_)));
}

#[test]
fn test_partial_window_flushes_after_max_wait() {
    let model = Doubler::new(Duration::ZERO);
    let config = BatchingConfig {
        max_batch_size: 64,
        max_wait_ms: 5,
    };
    let batcher = Batcher::new(model.clone(), config).unwrap();

    let out = batcher.submit(x(21.0)).unwrap();
    assert_eq!(
        out["y"].to_serialized().unwrap().to_elements::<f32>().unwrap(),
        vec![42.0]
    );
    let out = batcher.submit(x(1.0)).unwrap();
    assert_eq!(
        out["y"].to_serialized().unwrap().to_elements::<f32>().unwrap(),
        vec![2.0]
    );
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_follower_timeout_leaves_leader_intact() {
    let model = Doubler::new(Duration::from_millis(300));
    let batcher = Arc::new(Batcher::new(model.clone(), wide_window(2)).unwrap());

    let leader = {
        let batcher = Arc::clone(&batcher);
        thread::spawn(move || batcher.submit(x(5.0)))
    };
    thread::sleep(Duration::from_millis(100));
    let follower = batcher.submit_timeout(x(6.0), Duration::from_millis(50));
    assert!(matches!(follower, Err(Error::BatchTimeout)));

    let out = leader.join().unwrap().unwrap();
    assert_eq!(
        out["y"].to_serialized().unwrap().to_elements::<f32>().unwrap(),
        vec![10.0]
    );
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_batched_model_step_coalesces_requests() {
    let model = Doubler::new(Duration::ZERO);
    let models = ModelRegistry::new();
    models.register("doubler", model.clone());

    let mut registry = RunnerFactoryRegistry::with_builtins();
    registry.register(BatchedModelRunnerFactory::new(models));

    let step = PipelineStep::from_config(&BatchedModelStep {
        model: "doubler".to_string(),
        input_names: vec!["x".to_string()],
        output_names: vec!["y".to_string()],
        batching: Some(wide_window(4)),
        timeout_ms: None,
    })
    .unwrap();
    let pipeline: Pipeline = SequencePipeline::new(vec![step]).into();
    let executor = Arc::new(pipeline.executor(Arc::new(registry)).unwrap());
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (1..=4)
        .map(|i| {
            let executor = Arc::clone(&executor);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut data = Data::new();
                data.put("x", NDArray::from_elements(vec![1], &[i as f32]).unwrap())
                    .unwrap();
                barrier.wait();
                executor.exec(data)
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let out = handle.join().unwrap().unwrap();
        let y = out.get_ndarray("y").unwrap().to_serialized().unwrap();
        assert_eq!(y.to_elements::<f32>().unwrap(), vec![(i + 1) as f32 * 2.0]);
    }
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
}
