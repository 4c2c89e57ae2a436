use crate::config::GraphConfig;
use crate::error::Result;
use crate::process_group::ProcessGroup;
use crate::substrate::Substrate;
use crate::topology::{TopologyGraph, TopologyStore, TopologyStrategy, normalize_ranks};
use crate::types::{DataType, Rank};
use crate::window::WindowRegistry;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// Sequences tensor-exchange requests against a [`Substrate`].
///
/// Every collective method must be called by all ranks of its scope in the
/// same relative order. The controller does not detect a missing call; the
/// other ranks simply wait for it.
///
/// # Example
///
/// ```no_run
/// use nexar_graph::{Controller, GraphConfig};
///
/// # async fn example() -> nexar_graph::Result<()> {
/// let controllers = Controller::bootstrap_local(4, GraphConfig::default()).await?;
///
/// assert_eq!(controllers[0].rank(), 0);
/// assert_eq!(controllers[0].size(), 4);
/// # Ok(())
/// # }
/// ```
pub struct Controller {
    substrate: Arc<dyn Substrate>,
    pub(super) group: ProcessGroup,
    pub(super) config: GraphConfig,
    pub(super) topology: RwLock<TopologyStore>,
    pub(super) windows: Mutex<WindowRegistry>,
    /// Present when the substrate cannot take calls from several tasks at
    /// once; every substrate call then runs under it.
    call_gate: Option<Mutex<()>>,
}

impl Controller {
    /// Query the process group from `substrate` and, if `config.topology` is
    /// set, install that topology. The latter is collective.
    pub async fn new(substrate: Arc<dyn Substrate>, config: GraphConfig) -> Result<Self> {
        let group = substrate.process_group()?;
        let concurrent = substrate.supports_concurrent_calls();
        let controller = Self {
            substrate,
            group,
            config,
            topology: RwLock::new(TopologyStore::new()),
            windows: Mutex::new(WindowRegistry::new()),
            call_gate: (!concurrent).then(|| Mutex::new(())),
        };
        tracing::debug!(
            rank = group.rank(),
            size = group.size(),
            local_rank = group.local_rank(),
            cross_rank = group.cross_rank(),
            concurrent,
            "controller initialized"
        );

        if let Some(strategy) = controller.config.topology {
            controller.set_topology_strategy(strategy).await?;
        }
        Ok(controller)
    }

    pub fn rank(&self) -> Rank {
        self.group.rank()
    }

    pub fn size(&self) -> u32 {
        self.group.size()
    }

    pub fn process_group(&self) -> &ProcessGroup {
        &self.group
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Size in bytes of one element of `dtype`.
    pub fn type_size(&self, dtype: DataType) -> usize {
        dtype.size_in_bytes()
    }

    /// Replace the neighbor graph. Collective.
    ///
    /// Both lists are sorted before the graph communicator is built, so
    /// neighbor collectives receive in ascending rank order. Every rank must
    /// pass lists consistent with everybody else's; the substrate rejects an
    /// inconsistent graph.
    pub async fn set_topology(&self, in_ranks: &[Rank], out_ranks: &[Rank]) -> Result<()> {
        let ins = normalize_ranks(&self.group, in_ranks, "in_ranks")?;
        let outs = normalize_ranks(&self.group, out_ranks, "out_ranks")?;

        let comm = {
            let _gate = self.gate().await;
            self.substrate.create_graph(&ins, &outs).await?
        };
        tracing::debug!(
            rank = self.rank(),
            indegree = ins.len(),
            outdegree = outs.len(),
            "topology set"
        );
        self.topology.write().await.install(ins, outs, comm);
        Ok(())
    }

    /// [`set_topology`](Self::set_topology) with this rank's edges of a
    /// generated graph.
    pub async fn set_topology_strategy(&self, strategy: TopologyStrategy) -> Result<()> {
        let (ins, outs) = strategy.neighbors(self.rank(), self.size());
        self.set_topology(&ins, &outs).await
    }

    /// The current topology, unchanged. Fails if none has been set.
    pub async fn load_topology(&self) -> Result<TopologyGraph> {
        self.current_topology("load_topology").await
    }

    /// In-neighbors, ascending. Empty before any topology is set.
    pub async fn in_neighbor_ranks(&self) -> Vec<Rank> {
        self.topology.read().await.in_ranks().to_vec()
    }

    /// Out-neighbors, ascending. Empty before any topology is set.
    pub async fn out_neighbor_ranks(&self) -> Vec<Rank> {
        self.topology
            .read()
            .await
            .get()
            .map(|t| t.out_ranks().to_vec())
            .unwrap_or_default()
    }

    /// Slots in a neighbor-allreduce output: in-neighbors plus self.
    pub async fn neighbor_size(&self) -> usize {
        self.topology.read().await.in_ranks().len() + 1
    }

    pub(super) async fn current_topology(&self, operation: &str) -> Result<TopologyGraph> {
        self.topology.read().await.require(operation).cloned()
    }

    pub(super) async fn gate(&self) -> Option<MutexGuard<'_, ()>> {
        match &self.call_gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        }
    }

    pub(super) fn substrate(&self) -> &dyn Substrate {
        self.substrate.as_ref()
    }
}
