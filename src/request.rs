use crate::error::{GraphError, Result, Status};
use crate::tensor::{CpuContext, OpContext, Tensor, TensorShape};
use crate::types::{DataType, OperationKind, Rank};
use std::sync::Arc;

/// Invoked once with `Status::Ok` after the local side of a transfer has
/// completed.
pub type CompletionCallback = Box<dyn FnOnce(Status) + Send + Sync>;

/// One user-issued operation, consumed by exactly one dispatch.
pub struct CommunicationRequest {
    kind: OperationKind,
    tensor_name: String,
    tensor: Option<Tensor>,
    output: Option<Tensor>,
    context: Arc<dyn OpContext>,
    root_rank: Rank,
    destination_ranks: Vec<Rank>,
    source_ranks: Vec<Rank>,
    callback: Option<CompletionCallback>,
}

impl CommunicationRequest {
    fn new(kind: OperationKind, name: impl Into<String>, tensor: Option<Tensor>) -> Self {
        Self {
            kind,
            tensor_name: name.into(),
            tensor,
            output: None,
            context: Arc::new(CpuContext::new()),
            root_rank: 0,
            destination_ranks: Vec::new(),
            source_ranks: Vec::new(),
            callback: None,
        }
    }

    pub fn allreduce(name: impl Into<String>, tensor: Tensor) -> Self {
        Self::new(OperationKind::AllReduce, name, Some(tensor))
    }

    pub fn allgather(name: impl Into<String>, tensor: Tensor) -> Self {
        Self::new(OperationKind::AllGather, name, Some(tensor))
    }

    /// Every rank passes a tensor of the root's shape; non-root contents are
    /// ignored.
    pub fn broadcast(name: impl Into<String>, tensor: Tensor, root_rank: Rank) -> Self {
        let mut req = Self::new(OperationKind::Broadcast, name, Some(tensor));
        req.root_rank = root_rank;
        req
    }

    pub fn neighbor_allgather(name: impl Into<String>, tensor: Tensor) -> Self {
        Self::new(OperationKind::NeighborAllGather, name, Some(tensor))
    }

    pub fn neighbor_allreduce(name: impl Into<String>, tensor: Tensor) -> Self {
        Self::new(OperationKind::NeighborAllReduce, name, Some(tensor))
    }

    /// Write `tensor` into the window `name` of each destination.
    pub fn win_put(name: impl Into<String>, tensor: Tensor, destinations: Vec<Rank>) -> Self {
        let mut req = Self::new(OperationKind::WinPut, name, Some(tensor));
        req.destination_ranks = destinations;
        req
    }

    /// Accumulate `tensor` into the window `name` of each destination.
    pub fn win_accumulate(
        name: impl Into<String>,
        tensor: Tensor,
        destinations: Vec<Rank>,
    ) -> Self {
        let mut req = Self::new(OperationKind::WinAccumulate, name, Some(tensor));
        req.destination_ranks = destinations;
        req
    }

    /// Read each source's exposure of window `name` into the local receive
    /// buffer kept for that source.
    pub fn win_get(name: impl Into<String>, sources: Vec<Rank>) -> Self {
        let mut req = Self::new(OperationKind::WinGet, name, None);
        req.source_ranks = sources;
        req
    }

    pub fn barrier() -> Self {
        Self::new(OperationKind::Barrier, "barrier", None)
    }

    /// Receive into `output` instead of allocating.
    pub fn with_output(mut self, output: Tensor) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_context(mut self, context: Arc<dyn OpContext>) -> Self {
        self.context = context;
        self
    }

    pub fn on_complete(mut self, callback: impl FnOnce(Status) + Send + Sync + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn tensor_name(&self) -> &str {
        &self.tensor_name
    }

    pub fn root_rank(&self) -> Rank {
        self.root_rank
    }

    pub fn destination_ranks(&self) -> &[Rank] {
        &self.destination_ranks
    }

    pub fn source_ranks(&self) -> &[Rank] {
        &self.source_ranks
    }

    pub fn tensor(&self) -> Result<&Tensor> {
        self.tensor.as_ref().ok_or_else(|| {
            GraphError::InvalidArgument(format!("{} request carries no tensor", self.kind))
        })
    }

    pub(crate) fn output(&self) -> Option<&Tensor> {
        self.output.as_ref()
    }

    pub(crate) fn context(&self) -> &dyn OpContext {
        self.context.as_ref()
    }

    /// Fire the callback with `Status::Ok`. Consumes the request so it can
    /// only happen once.
    pub(crate) fn complete(mut self) {
        if let Some(cb) = self.callback.take() {
            cb(Status::Ok);
        }
    }
}

impl std::fmt::Debug for CommunicationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommunicationRequest")
            .field("kind", &self.kind)
            .field("tensor_name", &self.tensor_name)
            .field("shape", &self.tensor.as_ref().map(|t| t.shape().clone()))
            .field("root_rank", &self.root_rank)
            .field("destination_ranks", &self.destination_ranks)
            .field("source_ranks", &self.source_ranks)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Allocate an output through the request's context, or validate the one the
/// caller supplied.
pub(crate) fn prepare_output(
    req: &CommunicationRequest,
    shape: &TensorShape,
    dtype: DataType,
) -> Result<Tensor> {
    match req.output() {
        Some(out) => {
            let expected = shape.num_elements() * dtype.size_in_bytes();
            if out.dtype() != dtype {
                return Err(GraphError::InvalidArgument(format!(
                    "output of {} holds {}, expected {dtype}",
                    req.tensor_name(),
                    out.dtype()
                )));
            }
            if out.byte_len() != expected {
                return Err(GraphError::BufferSizeMismatch {
                    expected,
                    actual: out.byte_len(),
                });
            }
            Ok(out.clone())
        }
        None => req.context().allocate_output(shape, dtype),
    }
}
