use crate::error::Result;
use crate::negotiate::{Scope, negotiate};
use crate::substrate::Substrate;
use crate::tensor::{Tensor, TensorShape};

/// Concatenate every rank's `tensor` along dim 0, in rank order.
///
/// First dimensions may differ per rank; they are negotiated first and
/// `allocate` is only called once the output shape is known. A failed
/// negotiation therefore never allocates.
pub async fn allgather<A>(
    substrate: &dyn Substrate,
    tensor: &Tensor,
    verify_slices: bool,
    allocate: A,
) -> Result<Tensor>
where
    A: FnOnce(&TensorShape) -> Result<Tensor> + Send,
{
    let layout = negotiate(substrate, Scope::Global, tensor.shape(), verify_slices).await?;
    let output = allocate(&layout.output_shape)?;

    let esize = tensor.dtype().size_in_bytes();
    let send = tensor.to_bytes()?;
    let mut recv = vec![0u8; layout.total_elements() * esize];
    substrate
        .allgatherv(
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
