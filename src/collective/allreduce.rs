use crate::error::{GraphError, Result};
use crate::substrate::Substrate;
use crate::tensor::Tensor;
use crate::types::ReduceOp;

/// Element-wise `op` over every rank's `tensor`, written to `output`.
pub async fn allreduce(
    substrate: &dyn Substrate,
    tensor: &Tensor,
    output: &Tensor,
    op: ReduceOp,
) -> Result<()> {
    if output.byte_len() != tensor.byte_len() {
        return Err(GraphError::BufferSizeMismatch {
            expected: tensor.byte_len(),
            actual: output.byte_len(),
        });
    }
    let send = tensor.to_bytes()?;
    let mut recv = vec![0u8; send.len()];
    substrate
        .allreduce(&send, &mut recv, tensor.num_elements(), tensor.dtype(), op)
        .await?;
    output.copy_from_bytes(&recv)
}
