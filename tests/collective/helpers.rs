use nexar_graph::{Controller, GraphConfig, Tensor, TensorShape};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Install a test-writer subscriber once; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Helper: run a collective operation across N controllers concurrently.
/// Keeps all controllers alive until every task completes.
pub async fn run_collective<F, Fut>(world_size: u32, f: F)
where
    F: Fn(Arc<Controller>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    run_collective_with_config(world_size, GraphConfig::default(), f).await
}

pub async fn run_collective_with_config<F, Fut>(world_size: u32, config: GraphConfig, f: F)
where
    F: Fn(Arc<Controller>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    init_tracing();
    let controllers = Controller::bootstrap_local(world_size, config)
        .await
        .unwrap();
    let controllers: Vec<Arc<Controller>> = controllers.into_iter().map(Arc::new).collect();

    let f = Arc::new(f);
    let mut handles = Vec::new();
    for c in &controllers {
        let c = Arc::clone(c);
        let f = Arc::clone(&f);
        handles.push(tokio::spawn(async move { f(c).await }));
    }
    for h in handles {
        h.await.unwrap();
    }
}

/// Counts how often a completion callback fired.
#[derive(Clone, Default)]
pub struct CallbackCounter(Arc<AtomicUsize>);

impl CallbackCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that asserts success and bumps the counter.
    pub fn callback(&self) -> impl FnOnce(nexar_graph::Status) + Send + Sync + 'static {
        let hits = Arc::clone(&self.0);
        move |status| {
            assert!(status.is_ok(), "callback got {status}");
            hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// `rows × cols` f32 tensor filled with `value`.
pub fn filled(rows: usize, cols: usize, value: f32) -> Tensor {
    Tensor::from_slice(TensorShape::new(vec![rows, cols]), &vec![value; rows * cols]).unwrap()
}
