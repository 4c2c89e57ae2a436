//! The message-passing substrate the controller drives.
//!
//! The controller never moves bytes itself: it sizes buffers, computes
//! displacements and sequences calls against a [`Substrate`]. Every method
//! marked *collective* must be issued by all ranks of its scope in the same
//! relative order, or the participants stall.
//!
//! Counts and displacements are in elements of the given [`DataType`].
//! Buffers are host byte slices; device-backed substrates stage as needed.

mod local;

pub use local::LocalSubstrate;

use crate::error::Result;
use crate::process_group::ProcessGroup;
use crate::tensor::Tensor;
use crate::types::{DataType, LockType, Rank, ReduceOp};
use futures::future::BoxFuture;

/// Handle to one substrate window. Plain value; the registry owns the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WinHandle(u64);

impl WinHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Graph-scoped communicator built from a directed neighbor list.
///
/// `sources` fixes the order in which neighbor collectives place incoming
/// contributions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphComm {
    id: u64,
    sources: Vec<Rank>,
    destinations: Vec<Rank>,
    weighted: bool,
}

impl GraphComm {
    pub fn new(id: u64, sources: Vec<Rank>, destinations: Vec<Rank>, weighted: bool) -> Self {
        Self {
            id,
            sources,
            destinations,
            weighted,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sources(&self) -> &[Rank] {
        &self.sources
    }

    pub fn destinations(&self) -> &[Rank] {
        &self.destinations
    }

    pub fn indegree(&self) -> usize {
        self.sources.len()
    }

    pub fn outdegree(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_weighted(&self) -> bool {
        self.weighted
    }
}

/// Memory a rank contributes to one window.
#[derive(Debug, Clone)]
pub enum Exposure {
    /// Expose this tensor's storage. The window aliases it; nothing is copied.
    Buffer(Tensor),
    /// Zero-length placeholder: the rank only joins the collective creation.
    Empty,
}

impl Exposure {
    pub fn byte_len(&self) -> usize {
        match self {
            Exposure::Buffer(t) => t.byte_len(),
            Exposure::Empty => 0,
        }
    }
}

pub trait Substrate: Send + Sync {
    /// Rank layout of this process. Called once by `Controller::initialize`.
    fn process_group(&self) -> Result<ProcessGroup>;

    /// Whether several local threads may call into the substrate at once.
    fn supports_concurrent_calls(&self) -> bool {
        false
    }

    /// Collective. Every rank contributes `count` elements; `recv` holds all
    /// contributions in rank order.
    fn allgather<'a>(
        &'a self,
        send: &'a [u8],
        recv: &'a mut [u8],
        count: usize,
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>>;

    /// Collective. Rank `i`'s contribution of `counts[i]` elements lands at
    /// element offset `displs[i]` of `recv`.
    fn allgatherv<'a>(
        &'a self,
        send: &'a [u8],
        recv: &'a mut [u8],
        counts: &'a [usize],
        displs: &'a [usize],
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>>;

    /// Collective. Element-wise `op` over every rank's `send` into `recv`.
    fn allreduce<'a>(
        &'a self,
        send: &'a [u8],
        recv: &'a mut [u8],
        count: usize,
        dtype: DataType,
        op: ReduceOp,
    ) -> BoxFuture<'a, Result<()>>;

    /// Collective. Root sends `buf`; every other rank receives into it.
    fn broadcast<'a>(
        &'a self,
        buf: &'a mut [u8],
        count: usize,
        dtype: DataType,
        root: Rank,
    ) -> BoxFuture<'a, Result<()>>;

    /// Collective. Pure synchronization.
    fn barrier(&self) -> BoxFuture<'_, Result<()>>;

    /// Collective. Build a graph communicator from this rank's in-neighbors
    /// (`sources`) and out-neighbors (`destinations`).
    fn create_graph<'a>(
        &'a self,
        sources: &'a [Rank],
        destinations: &'a [Rank],
    ) -> BoxFuture<'a, Result<GraphComm>>;

    /// Collective over `graph`. Sends `send` to every destination and
    /// receives `count` elements from each source, in `graph.sources()` order.
    /// The local rank's own data is not part of the output.
    fn neighbor_allgather<'a>(
        &'a self,
        graph: &'a GraphComm,
        send: &'a [u8],
        recv: &'a mut [u8],
        count: usize,
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>>;

    /// Collective over `graph`. Variable-size form of [`Self::neighbor_allgather`];
    /// `counts`/`displs` are indexed like `graph.sources()`.
    fn neighbor_allgatherv<'a>(
        &'a self,
        graph: &'a GraphComm,
        send: &'a [u8],
        recv: &'a mut [u8],
        counts: &'a [usize],
        displs: &'a [usize],
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>>;

    /// Collective. Create one window; this rank contributes `exposure`.
    fn win_create(&self, exposure: Exposure) -> BoxFuture<'_, Result<WinHandle>>;

    /// Collective. Destroy a window created by [`Self::win_create`].
    fn win_free(&self, win: WinHandle) -> BoxFuture<'_, Result<()>>;

    /// Open a passive-target access epoch on `target`'s part of `win`.
    fn win_lock(&self, win: WinHandle, lock: LockType, target: Rank)
    -> BoxFuture<'_, Result<()>>;

    /// Close the epoch opened by [`Self::win_lock`].
    fn win_unlock(&self, win: WinHandle, target: Rank) -> BoxFuture<'_, Result<()>>;

    /// One-sided write of `count` elements into `target`'s exposure at
    /// element offset `target_disp`. Requires an open epoch on `target`.
    fn win_put<'a>(
        &'a self,
        win: WinHandle,
        origin: &'a [u8],
        target: Rank,
        target_disp: usize,
        count: usize,
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>>;

    /// One-sided read of `count` elements from `target`'s exposure.
    fn win_get<'a>(
        &'a self,
        win: WinHandle,
        dest: &'a mut [u8],
        target: Rank,
        target_disp: usize,
        count: usize,
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>>;

    /// One-sided `target[i] = op(target[i], origin[i])`.
    #[allow(clippy::too_many_arguments)]
    fn win_accumulate<'a>(
        &'a self,
        win: WinHandle,
        origin: &'a [u8],
        target: Rank,
        target_disp: usize,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
    ) -> BoxFuture<'a, Result<()>>;

    /// Make local and remote updates to this rank's exposure of `win`
    /// visible. No data movement.
    fn win_sync(&self, win: WinHandle) -> Result<()>;

    /// Collective. Synchronization point over every rank's part of `win`.
    fn win_fence(&self, win: WinHandle) -> BoxFuture<'_, Result<()>>;
}
