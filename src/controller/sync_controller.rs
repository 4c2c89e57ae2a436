use crate::config::GraphConfig;
use crate::error::{GraphError, Result};
use crate::process_group::ProcessGroup;
use crate::request::CommunicationRequest;
use crate::substrate::Substrate;
use crate::tensor::Tensor;
use crate::topology::{TopologyGraph, TopologyStrategy};
use crate::types::{DataType, Rank};
use std::sync::Arc;

/// Blocking wrapper around [`Controller`](super::Controller).
///
/// Owns a `tokio::runtime::Runtime` and calls `block_on()` for each
/// operation, so every call stalls its thread until local completion. Drive
/// each rank from its own thread.
pub struct SyncController {
    inner: super::Controller,
    rt: tokio::runtime::Runtime,
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| GraphError::substrate("runtime", format!("tokio runtime: {e}")))
}

impl SyncController {
    /// Initialize a controller over `substrate` on a fresh runtime.
    pub fn new(substrate: Arc<dyn Substrate>, config: GraphConfig) -> Result<Self> {
        let rt = runtime()?;
        let inner = rt.block_on(super::Controller::new(substrate, config))?;
        Ok(Self { inner, rt })
    }

    /// Bootstrap a local group and return one blocking controller per rank.
    pub fn bootstrap_local(world_size: u32, config: GraphConfig) -> Result<Vec<Self>> {
        let rt = runtime()?;
        let controllers = rt.block_on(super::Controller::bootstrap_local(world_size, config))?;

        // `block_on` is exclusive, so every controller gets its own runtime.
        let mut out = Vec::with_capacity(controllers.len());
        let mut iter = controllers.into_iter();
        if let Some(first) = iter.next() {
            out.push(SyncController { inner: first, rt });
        }
        for inner in iter {
            out.push(SyncController {
                inner,
                rt: runtime()?,
            });
        }
        Ok(out)
    }

    /// Wrap an existing async controller with a new tokio runtime.
    pub fn from_async(inner: super::Controller) -> Result<Self> {
        Ok(Self {
            inner,
            rt: runtime()?,
        })
    }

    pub fn rank(&self) -> Rank {
        self.inner.rank()
    }

    pub fn size(&self) -> u32 {
        self.inner.size()
    }

    pub fn process_group(&self) -> &ProcessGroup {
        self.inner.process_group()
    }

    pub fn type_size(&self, dtype: DataType) -> usize {
        self.inner.type_size(dtype)
    }

    pub fn set_topology(&self, in_ranks: &[Rank], out_ranks: &[Rank]) -> Result<()> {
        self.rt.block_on(self.inner.set_topology(in_ranks, out_ranks))
    }

    pub fn set_topology_strategy(&self, strategy: TopologyStrategy) -> Result<()> {
        self.rt.block_on(self.inner.set_topology_strategy(strategy))
    }

    pub fn load_topology(&self) -> Result<TopologyGraph> {
        self.rt.block_on(self.inner.load_topology())
    }

    pub fn in_neighbor_ranks(&self) -> Vec<Rank> {
        self.rt.block_on(self.inner.in_neighbor_ranks())
    }

    pub fn out_neighbor_ranks(&self) -> Vec<Rank> {
        self.rt.block_on(self.inner.out_neighbor_ranks())
    }

    pub fn neighbor_size(&self) -> usize {
        self.rt.block_on(self.inner.neighbor_size())
    }

    pub fn execute(&self, req: CommunicationRequest) -> Result<Option<Tensor>> {
        self.rt.block_on(self.inner.execute(req))
    }

    pub fn broadcast(&self, req: CommunicationRequest) -> Result<Tensor> {
        self.rt.block_on(self.inner.broadcast(req))
    }

    pub fn allreduce(&self, req: CommunicationRequest) -> Result<Tensor> {
        self.rt.block_on(self.inner.allreduce(req))
    }

    pub fn allgather(&self, req: CommunicationRequest) -> Result<Tensor> {
        self.rt.block_on(self.inner.allgather(req))
    }

    pub fn neighbor_allgather(&self, req: CommunicationRequest) -> Result<Tensor> {
        self.rt.block_on(self.inner.neighbor_allgather(req))
    }

    pub fn neighbor_allreduce(&self, req: CommunicationRequest) -> Result<Tensor> {
        self.rt.block_on(self.inner.neighbor_allreduce(req))
    }

    pub fn win_put(&self, req: CommunicationRequest) -> Result<()> {
        self.rt.block_on(self.inner.win_put(req))
    }

    pub fn win_get(&self, req: CommunicationRequest) -> Result<()> {
        self.rt.block_on(self.inner.win_get(req))
    }

    pub fn win_accumulate(&self, req: CommunicationRequest) -> Result<()> {
        self.rt.block_on(self.inner.win_accumulate(req))
    }

    pub fn win_create(
        &self,
        name: &str,
        tensor: &Tensor,
        neighbor_tensors: &[Tensor],
    ) -> Result<()> {
        self.rt
            .block_on(self.inner.win_create(name, tensor, neighbor_tensors))
    }

    pub fn win_free(&self, name: &str) -> Result<()> {
        self.rt.block_on(self.inner.win_free(name))
    }

    pub fn win_free_all(&self) -> Result<()> {
        self.rt.block_on(self.inner.win_free_all())
    }

    pub fn win_sync(&self, name: &str) -> Result<()> {
        self.rt.block_on(self.inner.win_sync(name))
    }

    pub fn win_fence(&self, name: &str) -> Result<()> {
        self.rt.block_on(self.inner.win_fence(name))
    }

    pub fn window_names(&self) -> Vec<String> {
        self.rt.block_on(self.inner.window_names())
    }

    pub fn barrier(&self) -> Result<()> {
        self.rt.block_on(self.inner.barrier())
    }

    /// Access the underlying async controller.
    pub fn inner(&self) -> &super::Controller {
        &self.inner
    }
}
