use crate::error::Result;
use crate::substrate::Substrate;

/// Block until every rank of the group has entered the barrier.
pub async fn barrier(substrate: &dyn Substrate) -> Result<()> {
    substrate.barrier().await
}
