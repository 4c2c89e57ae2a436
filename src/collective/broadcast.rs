use crate::error::{GraphError, Result};
use crate::process_group::ProcessGroup;
use crate::substrate::Substrate;
use crate::tensor::Tensor;
use crate::types::Rank;

/// Copy `root`'s `tensor` into `output` on every rank.
///
/// Non-root ranks only use `tensor` for its shape and dtype; `output` must
/// have the same byte length.
pub async fn broadcast(
    substrate: &dyn Substrate,
    group: &ProcessGroup,
    tensor: &Tensor,
    output: &Tensor,
    root: Rank,
) -> Result<()> {
    group.check(root)?;
    if output.byte_len() != tensor.byte_len() {
        return Err(GraphError::BufferSizeMismatch {
            expected: tensor.byte_len(),
            actual: output.byte_len(),
        });
    }

    let mut buf = if group.rank() == root {
        tensor.to_bytes()?
    } else {
        vec![0u8; tensor.byte_len()]
    };
    substrate
        .broadcast(&mut buf, tensor.num_elements(), tensor.dtype(), root)
        .await?;
    output.copy_from_bytes(&buf)
}
