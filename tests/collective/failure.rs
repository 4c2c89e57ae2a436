//! Substrate failures abort the request without running its callback, and a
//! rank that skips a collective is observed as a stall, not as silent
//! corruption.

use super::helpers::{CallbackCounter, init_tracing};
use futures::future::BoxFuture;
use nexar_graph::{
    CommunicationRequest, Controller, DataType, ErrorKind, Exposure, GraphComm, GraphConfig,
    GraphError, LocalSubstrate, LockType, OpContext, ProcessGroup, Rank, ReduceOp, Result,
    Substrate, Tensor, TensorShape, TopologyStrategy, WinHandle,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Delegates to a [`LocalSubstrate`] but fails one named primitive once it
/// has succeeded `after` times. Every call is counted per primitive.
struct FailingSubstrate {
    inner: LocalSubstrate,
    fail: &'static str,
    after: usize,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl FailingSubstrate {
    fn check(&self, primitive: &'static str) -> Result<()> {
        let mut calls = self.calls.lock().unwrap();
        let n = calls.entry(primitive).or_insert(0);
        *n += 1;
        if primitive == self.fail && *n > self.after {
            return Err(GraphError::substrate(primitive, "injected failure"));
        }
        Ok(())
    }

    fn calls(&self, primitive: &'static str) -> usize {
        self.calls.lock().unwrap().get(primitive).copied().unwrap_or(0)
    }
}

impl Substrate for FailingSubstrate {
    fn process_group(&self) -> Result<ProcessGroup> {
        self.inner.process_group()
    }

    fn allgather<'a>(
        &'a self,
        send: &'a [u8],
        recv: &'a mut [u8],
        count: usize,
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check("allgather")?;
            self.inner.allgather(send, recv, count, dtype).await
        })
    }

    fn allgatherv<'a>(
        &'a self,
        send: &'a [u8],
        recv: &'a mut [u8],
        counts: &'a [usize],
        displs: &'a [usize],
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check("allgatherv")?;
            self.inner.allgatherv(send, recv, counts, displs, dtype).await
        })
    }

    fn allreduce<'a>(
        &'a self,
        send: &'a [u8],
        recv: &'a mut [u8],
        count: usize,
        dtype: DataType,
        op: ReduceOp,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check("allreduce")?;
            self.inner.allreduce(send, recv, count, dtype, op).await
        })
    }

    fn broadcast<'a>(
        &'a self,
        buf: &'a mut [u8],
        count: usize,
        dtype: DataType,
        root: Rank,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check("broadcast")?;
            self.inner.broadcast(buf, count, dtype, root).await
        })
    }

    fn barrier(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.check("barrier")?;
            self.inner.barrier().await
        })
    }

    fn create_graph<'a>(
        &'a self,
        sources: &'a [Rank],
        destinations: &'a [Rank],
    ) -> BoxFuture<'a, Result<GraphComm>> {
        Box::pin(async move {
            self.check("create_graph")?;
            self.inner.create_graph(sources, destinations).await
        })
    }

    fn neighbor_allgather<'a>(
        &'a self,
        graph: &'a GraphComm,
        send: &'a [u8],
        recv: &'a mut [u8],
        count: usize,
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check("neighbor_allgather")?;
            self.inner
                .neighbor_allgather(graph, send, recv, count, dtype)
                .await
        })
    }

    fn neighbor_allgatherv<'a>(
        &'a self,
        graph: &'a GraphComm,
        send: &'a [u8],
        recv: &'a mut [u8],
        counts: &'a [usize],
        displs: &'a [usize],
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check("neighbor_allgatherv")?;
            self.inner
                .neighbor_allgatherv(graph, send, recv, counts, displs, dtype)
                .await
        })
    }

    fn win_create(&self, exposure: Exposure) -> BoxFuture<'_, Result<WinHandle>> {
        Box::pin(async move {
            self.check("win_create")?;
            self.inner.win_create(exposure).await
        })
    }

    fn win_free(&self, win: WinHandle) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.check("win_free")?;
            self.inner.win_free(win).await
        })
    }

    fn win_lock(
        &self,
        win: WinHandle,
        lock: LockType,
        target: Rank,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.check("win_lock")?;
            self.inner.win_lock(win, lock, target).await
        })
    }

    fn win_unlock(&self, win: WinHandle, target: Rank) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.check("win_unlock")?;
            self.inner.win_unlock(win, target).await
        })
    }

    fn win_put<'a>(
        &'a self,
        win: WinHandle,
        origin: &'a [u8],
        target: Rank,
        target_disp: usize,
        count: usize,
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check("win_put")?;
            self.inner
                .win_put(win, origin, target, target_disp, count, dtype)
                .await
        })
    }

    fn win_get<'a>(
        &'a self,
        win: WinHandle,
        dest: &'a mut [u8],
        target: Rank,
        target_disp: usize,
        count: usize,
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check("win_get")?;
            self.inner
                .win_get(win, dest, target, target_disp, count, dtype)
                .await
        })
    }

    fn win_accumulate<'a>(
        &'a self,
        win: WinHandle,
        origin: &'a [u8],
        target: Rank,
        target_disp: usize,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check("win_accumulate")?;
            self.inner
                .win_accumulate(win, origin, target, target_disp, count, dtype, op)
                .await
        })
    }

    fn win_sync(&self, win: WinHandle) -> Result<()> {
        self.check("win_sync")?;
        self.inner.win_sync(win)
    }

    fn win_fence(&self, win: WinHandle) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.check("win_fence")?;
            self.inner.win_fence(win).await
        })
    }
}

/// Counts output allocations.
#[derive(Default)]
struct CountingContext(AtomicUsize);

impl OpContext for CountingContext {
    fn allocate_output(&self, shape: &TensorShape, dtype: DataType) -> Result<Tensor> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(Tensor::zeros(shape.clone(), dtype))
    }
}

/// Controllers whose substrates all fail `fail` from the first call.
async fn failing_group(world_size: u32, fail: &'static str) -> Vec<Arc<Controller>> {
    failing_group_after(world_size, fail, 0)
        .await
        .into_iter()
        .map(|(c, _)| c)
        .collect()
}

/// Controllers paired with their substrates; `fail` succeeds `after` times
/// on each rank before failing.
async fn failing_group_after(
    world_size: u32,
    fail: &'static str,
    after: usize,
) -> Vec<(Arc<Controller>, Arc<FailingSubstrate>)> {
    init_tracing();
    let mut out = Vec::new();
    for inner in LocalSubstrate::bootstrap(world_size, world_size).unwrap() {
        let substrate = Arc::new(FailingSubstrate {
            inner,
            fail,
            after,
            calls: Mutex::new(HashMap::new()),
        });
        let controller = Controller::new(substrate.clone(), GraphConfig::default())
            .await
            .unwrap();
        out.push((Arc::new(controller), substrate));
    }
    out
}

#[tokio::test]
async fn test_negotiation_failure_aborts_before_allocation() {
    let controllers = failing_group(3, "allgather").await;
    let mut handles = Vec::new();
    for c in controllers {
        handles.push(tokio::spawn(async move {
            let ctx = Arc::new(CountingContext::default());
            let counter = CallbackCounter::new();
            let req = CommunicationRequest::allgather("x", Tensor::from_vec(vec![1.0f32; 2]))
                .with_context(ctx.clone())
                .on_complete(counter.callback());

            let err = c.allgather(req).await.unwrap_err();
            assert!(matches!(
                err,
                GraphError::SubstrateFailure {
                    primitive: "allgather",
                    ..
                }
            ));
            assert_eq!(ctx.0.load(Ordering::SeqCst), 0);
            assert_eq!(counter.count(), 0);
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
}

#[tokio::test]
async fn test_exchange_failure_skips_callback() {
    let controllers = failing_group(2, "allreduce").await;
    let mut handles = Vec::new();
    for c in controllers {
        handles.push(tokio::spawn(async move {
            let counter = CallbackCounter::new();
            let req = CommunicationRequest::allreduce("x", Tensor::from_vec(vec![1i32; 4]))
                .on_complete(counter.callback());

            let err = c.execute(req).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Substrate);
            assert!(err.to_string().contains("allreduce"));
            assert_eq!(counter.count(), 0);
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
}

#[tokio::test]
async fn test_unlock_failure_surfaces() {
    let controllers = failing_group(2, "win_unlock").await;
    let mut handles = Vec::new();
    for c in controllers {
        handles.push(tokio::spawn(async move {
            c.set_topology_strategy(TopologyStrategy::Ring).await.unwrap();
            let tensor = Tensor::from_vec(vec![1u8; 2]);
            c.win_create("w", &tensor, &[Tensor::from_vec(vec![0u8; 2])])
                .await
                .unwrap();

            let counter = CallbackCounter::new();
            let next = (c.rank() + 1) % 2;
            let err = c
                .win_put(
                    CommunicationRequest::win_put("w", tensor.clone(), vec![next])
                        .on_complete(counter.callback()),
                )
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                GraphError::SubstrateFailure {
                    primitive: "win_unlock",
                    ..
                }
            ));
            assert_eq!(counter.count(), 0);
            c.win_free("w").await.unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
}

#[tokio::test]
async fn test_graph_negotiation_failure_aborts_before_allocation() {
    let controllers = failing_group(3, "neighbor_allgather").await;
    let mut handles = Vec::new();
    for c in controllers {
        handles.push(tokio::spawn(async move {
            c.set_topology_strategy(TopologyStrategy::Ring).await.unwrap();
            let ctx = Arc::new(CountingContext::default());
            let counter = CallbackCounter::new();
            let tensor = Tensor::from_vec(vec![1.0f32; 2]);
            let req = CommunicationRequest::neighbor_allgather("x", tensor)
                .with_context(ctx.clone())
                .on_complete(counter.callback());

            let err = c.neighbor_allgather(req).await.unwrap_err();
            assert!(matches!(
                err,
                GraphError::SubstrateFailure {
                    primitive: "neighbor_allgather",
                    ..
                }
            ));
            assert_eq!(ctx.0.load(Ordering::SeqCst), 0);
            assert_eq!(counter.count(), 0);
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
}

#[tokio::test]
async fn test_failed_win_free_keeps_window_registered() {
    let controllers = failing_group(2, "win_free").await;
    let mut handles = Vec::new();
    for c in controllers {
        handles.push(tokio::spawn(async move {
            let tensor = Tensor::from_vec(vec![1u8; 4]);
            c.win_create("w", &tensor, &[]).await.unwrap();

            let err = c.win_free("w").await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Substrate);
            assert_eq!(c.window_names().await, vec!["w".to_string()]);

            // A retry still reaches the substrate instead of an unknown name.
            let err = c.win_free("w").await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Substrate);

            let err = c.win_free_all().await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Substrate);
            assert_eq!(c.window_names().await, vec!["w".to_string()]);
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
}

#[tokio::test]
async fn test_partial_win_create_frees_created_windows() {
    // Window w_0 is created, w_1 fails, so w_0 must be freed again.
    let group = failing_group_after(3, "win_create", 1).await;
    let mut handles = Vec::new();
    for (c, substrate) in group {
        handles.push(tokio::spawn(async move {
            let tensor = Tensor::from_vec(vec![0i32; 3]);
            let err = c.win_create("w", &tensor, &[]).await.unwrap_err();
            assert!(matches!(
                err,
                GraphError::SubstrateFailure {
                    primitive: "win_create",
                    ..
                }
            ));
            assert_eq!(substrate.calls("win_create"), 2);
            assert_eq!(substrate.calls("win_free"), 1);
            assert!(c.window_names().await.is_empty());
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
}

#[tokio::test]
async fn test_missing_collective_is_a_stall() {
    init_tracing();
    let controllers = Controller::bootstrap_local(2, GraphConfig::default())
        .await
        .unwrap();

    // Rank 1 never enters the barrier.
    let stalled = tokio::time::timeout(Duration::from_millis(200), controllers[0].barrier()).await;
    assert!(stalled.is_err(), "barrier completed without rank 1");
}

#[tokio::test]
async fn test_mismatched_collectives_detected() {
    init_tracing();
    let controllers: Vec<Arc<Controller>> = Controller::bootstrap_local(2, GraphConfig::default())
        .await
        .unwrap()
        .into_iter()
        .map(Arc::new)
        .collect();

    let c0 = Arc::clone(&controllers[0]);
    let c1 = Arc::clone(&controllers[1]);
    let allreduce = tokio::spawn(async move {
        c0.allreduce(CommunicationRequest::allreduce(
            "x",
            Tensor::from_vec(vec![1.0f32]),
        ))
        .await
    });
    let barrier = tokio::spawn(async move { c1.barrier().await });

    let (a, b) = tokio::time::timeout(Duration::from_secs(5), async {
        (allreduce.await.unwrap(), barrier.await.unwrap())
    })
    .await
    .expect("desynchronized ranks should fail, not hang");
    assert!(a.unwrap_err().to_string().contains("desynchronized"));
    assert!(b.unwrap_err().to_string().contains("desynchronized"));
}
