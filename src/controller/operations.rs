use crate::collective;
use crate::error::{GraphError, Result};
use crate::request::{CommunicationRequest, prepare_output};
use crate::tensor::Tensor;
use crate::types::OperationKind;

use super::Controller;

impl Controller {
    /// Dispatch `req` on its operation kind.
    ///
    /// Returns the output tensor for operations that produce one. On error
    /// the request is dropped without running its callback.
    pub async fn execute(&self, req: CommunicationRequest) -> Result<Option<Tensor>> {
        match req.kind() {
            OperationKind::Broadcast => self.broadcast(req).await.map(Some),
            OperationKind::AllReduce => self.allreduce(req).await.map(Some),
            OperationKind::AllGather => self.allgather(req).await.map(Some),
            OperationKind::NeighborAllGather => self.neighbor_allgather(req).await.map(Some),
            OperationKind::NeighborAllReduce => self.neighbor_allreduce(req).await.map(Some),
            OperationKind::WinPut => self.win_put(req).await.map(|()| None),
            OperationKind::WinGet => self.win_get(req).await.map(|()| None),
            OperationKind::WinAccumulate => self.win_accumulate(req).await.map(|()| None),
            OperationKind::Barrier => {
                self.barrier().await?;
                self.completed(req);
                Ok(None)
            }
        }
    }

    /// Broadcast the root's tensor. Every rank receives a copy in the output,
    /// the root included.
    pub async fn broadcast(&self, req: CommunicationRequest) -> Result<Tensor> {
        expect_kind(&req, OperationKind::Broadcast)?;
        let tensor = req.tensor()?;
        let output = prepare_output(&req, tensor.shape(), tensor.dtype())?;
        {
            let _gate = self.gate().await;
            collective::broadcast(self.substrate(), &self.group, tensor, &output, req.root_rank())
                .await?;
        }
        self.completed(req);
        Ok(output)
    }

    /// Reduce every rank's tensor with the configured operator.
    pub async fn allreduce(&self, req: CommunicationRequest) -> Result<Tensor> {
        expect_kind(&req, OperationKind::AllReduce)?;
        let tensor = req.tensor()?;
        let output = prepare_output(&req, tensor.shape(), tensor.dtype())?;
        {
            let _gate = self.gate().await;
            collective::allreduce(self.substrate(), tensor, &output, self.config.reduce_op)
                .await?;
        }
        self.completed(req);
        Ok(output)
    }

    /// Concatenate every rank's tensor along dim 0. First dimensions may
    /// differ.
    pub async fn allgather(&self, req: CommunicationRequest) -> Result<Tensor> {
        expect_kind(&req, OperationKind::AllGather)?;
        let tensor = req.tensor()?;
        let output = {
            let _gate = self.gate().await;
            collective::allgather(
                self.substrate(),
                tensor,
                self.config.verify_slice_shapes,
                |shape| prepare_output(&req, shape, tensor.dtype()),
            )
            .await?
        };
        self.completed(req);
        Ok(output)
    }

    /// Concatenate in-neighbor tensors along dim 0. Excludes the local tensor.
    pub async fn neighbor_allgather(&self, req: CommunicationRequest) -> Result<Tensor> {
        expect_kind(&req, OperationKind::NeighborAllGather)?;
        let topology = self.current_topology(req.kind().name()).await?;
        let tensor = req.tensor()?;
        let output = {
            let _gate = self.gate().await;
            collective::neighbor_allgather(self.substrate(), &topology, tensor, |shape| {
                prepare_output(&req, shape, tensor.dtype())
            })
            .await?
        };
        self.completed(req);
        Ok(output)
    }

    /// Stack the local tensor followed by in-neighbor tensors along dim 0.
    pub async fn neighbor_allreduce(&self, req: CommunicationRequest) -> Result<Tensor> {
        expect_kind(&req, OperationKind::NeighborAllReduce)?;
        let topology = self.current_topology(req.kind().name()).await?;
        let tensor = req.tensor()?;
        let output = {
            let _gate = self.gate().await;
            collective::neighbor_allreduce(self.substrate(), &topology, tensor, |shape| {
                prepare_output(&req, shape, tensor.dtype())
            })
            .await?
        };
        self.completed(req);
        Ok(output)
    }

    /// One-sided write of the request tensor into each destination's window.
    pub async fn win_put(&self, req: CommunicationRequest) -> Result<()> {
        expect_kind(&req, OperationKind::WinPut)?;
        let tensor = req.tensor()?;
        let set = self.window_set(req.tensor_name()).await?;
        {
            let _gate = self.gate().await;
            collective::win_put(
                self.substrate(),
                &self.group,
                &set,
                tensor,
                req.destination_ranks(),
                self.config.window_lock,
            )
            .await?;
        }
        self.completed(req);
        Ok(())
    }

    /// One-sided element-wise accumulate into each destination's window.
    pub async fn win_accumulate(&self, req: CommunicationRequest) -> Result<()> {
        expect_kind(&req, OperationKind::WinAccumulate)?;
        let tensor = req.tensor()?;
        let set = self.window_set(req.tensor_name()).await?;
        {
            let _gate = self.gate().await;
            collective::win_accumulate(
                self.substrate(),
                &self.group,
                &set,
                tensor,
                req.destination_ranks(),
                self.config.window_lock,
                self.config.reduce_op,
            )
            .await?;
        }
        self.completed(req);
        Ok(())
    }

    /// One-sided read from each source into the receive buffer kept for it.
    pub async fn win_get(&self, req: CommunicationRequest) -> Result<()> {
        expect_kind(&req, OperationKind::WinGet)?;
        let set = self.window_set(req.tensor_name()).await?;
        {
            let _gate = self.gate().await;
            collective::win_get(
                self.substrate(),
                &self.group,
                &set,
                req.source_ranks(),
                self.config.window_lock,
            )
            .await?;
        }
        self.completed(req);
        Ok(())
    }

    /// Pure synchronization across the group.
    pub async fn barrier(&self) -> Result<()> {
        let _gate = self.gate().await;
        collective::barrier(self.substrate()).await
    }

    fn completed(&self, req: CommunicationRequest) {
        tracing::trace!(
            rank = self.rank(),
            name = req.tensor_name(),
            op = %req.kind(),
            "request complete"
        );
        req.complete();
    }
}

fn expect_kind(req: &CommunicationRequest, kind: OperationKind) -> Result<()> {
    if req.kind() != kind {
        return Err(GraphError::InvalidArgument(format!(
            "{} request passed to {kind}",
            req.kind()
        )));
    }
    Ok(())
}
