use crate::error::Result;
use crate::negotiate::{Scope, negotiate};
use crate::substrate::Substrate;
use crate::tensor::{Tensor, TensorShape};
use crate::topology::TopologyGraph;

/// Concatenate the in-neighbors' tensors along dim 0, ascending by rank.
/// The local tensor is not part of the output.
pub async fn neighbor_allgather<A>(
    substrate: &dyn Substrate,
    topology: &TopologyGraph,
    tensor: &Tensor,
    allocate: A,
) -> Result<Tensor>
where
    A: FnOnce(&TensorShape) -> Result<Tensor> + Send,
{
    let graph = topology.comm();
    let layout = negotiate(substrate, Scope::Graph(graph), tensor.shape(), false).await?;
    let output = allocate(&layout.output_shape)?;

    let esize = tensor.dtype().size_in_bytes();
    let send = tensor.to_bytes()?;
    let mut recv = vec![0u8; layout.total_elements() * esize];
    substrate
        .neighbor_allgatherv(
            graph,
            &send,
            &mut recv,
            &layout.recv_counts,
            &layout.displacements,
            tensor.dtype(),
        )
        .await?;
    output.copy_from_bytes(&recv)?;
    Ok(output)
}

/// `[local tensor] ++ [in-neighbor tensors, ascending]` along dim 0.
///
/// Every participant must hold a tensor of the same shape, so no size
/// negotiation takes place. The local slot is filled by a copy rather than
/// sent to ourselves; the caller reduces the stacked result.
pub async fn neighbor_allreduce<A>(
    substrate: &dyn Substrate,
    topology: &TopologyGraph,
    tensor: &Tensor,
    allocate: A,
) -> Result<Tensor>
where
    A: FnOnce(&TensorShape) -> Result<Tensor> + Send,
{
    let slots = topology.indegree() + 1;
    let shape = tensor
        .shape()
        .slice_shape()
        .prepend(tensor.shape().first_dim() * slots);
    let output = allocate(&shape)?;

    let send = tensor.to_bytes()?;
    let slot_bytes = send.len();
    let mut recv = vec![0u8; slot_bytes * slots];
    recv[..slot_bytes].copy_from_slice(&send);
    substrate
        .neighbor_allgather(
            topology.comm(),
            &send,
            &mut recv[slot_bytes..],
            tensor.num_elements(),
            tensor.dtype(),
        )
        .await?;
    output.copy_from_bytes(&recv)?;
    Ok(output)
}
