use crate::collective;
use crate::error::{GraphError, Result};
use crate::tensor::Tensor;
use crate::window::WindowSet;

use super::Controller;

impl Controller {
    /// Create the window set `name`. Collective.
    ///
    /// `tensor` is exposed in this rank's own window without copying; writes
    /// by remote ranks land in it directly. `neighbor_tensors` supplies one
    /// receive buffer per in-neighbor, in ascending rank order, each the same
    /// size and dtype as `tensor`. The registry keeps them alive until the
    /// window is freed.
    ///
    /// Name, count and size checks run before any collective call, so a bad
    /// argument on every rank fails everywhere without creating anything.
    pub async fn win_create(
        &self,
        name: &str,
        tensor: &Tensor,
        neighbor_tensors: &[Tensor],
    ) -> Result<()> {
        let in_ranks = self.in_neighbor_ranks().await;
        let mut windows = self.windows.lock().await;
        if windows.contains(name) {
            return Err(GraphError::InvalidArgument(format!(
                "Win_create failed with {name}: window already registered"
            )));
        }
        if neighbor_tensors.len() != in_ranks.len() {
            return Err(GraphError::InvalidArgument(format!(
                "Win_create failed with {name}: {} neighbor buffers for {} in-neighbors",
                neighbor_tensors.len(),
                in_ranks.len()
            )));
        }
        for (rank, buf) in in_ranks.iter().zip(neighbor_tensors) {
            if buf.dtype() != tensor.dtype() || buf.byte_len() != tensor.byte_len() {
                return Err(GraphError::InvalidArgument(format!(
                    "Win_create failed with {name}: rank {rank} buffer is {} {}, expected {} {}",
                    buf.dtype(),
                    buf.shape(),
                    tensor.dtype(),
                    tensor.shape()
                )));
            }
        }

        let set = {
            let _gate = self.gate().await;
            collective::create_window_set(
                self.substrate(),
                &self.group,
                &in_ranks,
                tensor,
                neighbor_tensors,
            )
            .await?
        };
        windows.register(name, set)?;
        tracing::debug!(rank = self.rank(), name, "window created");
        Ok(())
    }

    /// Destroy the window set `name`. Collective.
    ///
    /// The name stays registered until the substrate has freed every window,
    /// so a failed free can be retried.
    pub async fn win_free(&self, name: &str) -> Result<()> {
        let mut windows = self.windows.lock().await;
        let set = windows.get(name)?.clone();
        {
            let _gate = self.gate().await;
            collective::free_window_set(self.substrate(), &set).await?;
        }
        windows.remove(name)?;
        tracing::debug!(rank = self.rank(), name, "window freed");
        Ok(())
    }

    /// Destroy every window set, in lexical name order. Collective.
    ///
    /// Stops at the first failure; sets not yet freed stay registered.
    pub async fn win_free_all(&self) -> Result<()> {
        let mut windows = self.windows.lock().await;
        let _gate = self.gate().await;
        for name in windows.names() {
            let set = windows.get(&name)?.clone();
            collective::free_window_set(self.substrate(), &set).await?;
            windows.remove(&name)?;
        }
        tracing::debug!(rank = self.rank(), "all windows freed");
        Ok(())
    }

    /// Make updates to this rank's receive buffers of `name` visible
    /// locally. Safe outside an access epoch.
    pub async fn win_sync(&self, name: &str) -> Result<()> {
        let set = self.window_set(name).await?;
        let _gate = self.gate().await;
        collective::sync_window_set(self.substrate(), &self.group, &set)
    }

    /// Synchronization point over every window of `name`. Collective.
    pub async fn win_fence(&self, name: &str) -> Result<()> {
        let set = self.window_set(name).await?;
        let _gate = self.gate().await;
        collective::fence_window_set(self.substrate(), &set).await
    }

    /// Names of the registered window sets, ascending.
    pub async fn window_names(&self) -> Vec<String> {
        self.windows.lock().await.names()
    }

    pub(super) async fn window_set(&self, name: &str) -> Result<WindowSet> {
        self.windows.lock().await.get(name).cloned()
    }
}
