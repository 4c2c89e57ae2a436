//! Size negotiation for variable-length gathers.
//!
//! Before an allgather can size its output, every participant has to learn
//! every other participant's first-dimension extent. That pre-exchange is a
//! collective in its own right; if it fails, the parent operation aborts
//! before anything is allocated.

use crate::error::{GraphError, Result};
use crate::substrate::{GraphComm, Substrate};
use crate::tensor::TensorShape;
use crate::types::DataType;

/// Which participants a negotiation covers.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    /// Every rank of the process group, in rank order.
    Global,
    /// In-neighbors of the graph, in `sources()` order. Self is excluded.
    Graph(&'a GraphComm),
}

/// Receive layout of one variable-length gather.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatherLayout {
    /// First-dimension extent of each participant.
    pub extents: Vec<usize>,
    /// Elements received from each participant.
    pub recv_counts: Vec<usize>,
    /// Element offset of each participant's block in the output.
    pub displacements: Vec<usize>,
    /// `(Σ extents) × slice_shape`.
    pub output_shape: TensorShape,
}

impl GatherLayout {
    pub fn total_elements(&self) -> usize {
        self.recv_counts.iter().sum()
    }
}

/// Exclusive prefix sum of `counts`.
pub fn displacements(counts: &[usize]) -> Vec<usize> {
    counts
        .iter()
        .scan(0usize, |acc, &c| {
            let d = *acc;
            *acc += c;
            Some(d)
        })
        .collect()
}

/// Build the layout from already exchanged extents.
pub fn layout_from_extents(extents: Vec<usize>, slice_shape: &TensorShape) -> GatherLayout {
    let slice = slice_shape.num_elements();
    let recv_counts: Vec<usize> = extents.iter().map(|&e| e * slice).collect();
    let displacements = displacements(&recv_counts);
    let output_shape = slice_shape.prepend(extents.iter().sum());
    GatherLayout {
        extents,
        recv_counts,
        displacements,
        output_shape,
    }
}

/// Exchange first-dimension extents over `scope` and compute the layout.
///
/// With `verify_slices` set (global scope only), each rank also sends its
/// slice element count; if any participant disagrees, every rank fails with
/// `InvalidArgument` since all of them see the same records.
pub async fn negotiate(
    substrate: &dyn Substrate,
    scope: Scope<'_>,
    shape: &TensorShape,
    verify_slices: bool,
) -> Result<GatherLayout> {
    let slice_shape = shape.slice_shape();
    let extent = shape.first_dim() as u64;

    let extents = match scope {
        Scope::Global if verify_slices => {
            let slice = slice_shape.num_elements() as u64;
            let mut send = Vec::with_capacity(16);
            send.extend_from_slice(&extent.to_le_bytes());
            send.extend_from_slice(&slice.to_le_bytes());
            let n = substrate.process_group()?.size() as usize;
            let mut recv = vec![0u8; n * 16];
            substrate
                .allgather(&send, &mut recv, 2, DataType::U64)
                .await?;
            let records = decode_u64s(&recv);
            let mut extents = Vec::with_capacity(n);
            for (rank, pair) in records.chunks_exact(2).enumerate() {
                if pair[1] != slice {
                    return Err(GraphError::InvalidArgument(format!(
                        "rank {rank} gathers slices of {} elements, expected {slice}",
                        pair[1]
                    )));
                }
                extents.push(pair[0] as usize);
            }
            extents
        }
        Scope::Global => {
            let n = substrate.process_group()?.size() as usize;
            let mut recv = vec![0u8; n * 8];
            substrate
                .allgather(&extent.to_le_bytes(), &mut recv, 1, DataType::U64)
                .await?;
            decode_u64s(&recv).into_iter().map(|e| e as usize).collect()
        }
        Scope::Graph(graph) => {
            let mut recv = vec![0u8; graph.indegree() * 8];
            substrate
                .neighbor_allgather(graph, &extent.to_le_bytes(), &mut recv, 1, DataType::U64)
                .await?;
            decode_u64s(&recv).into_iter().map(|e| e as usize).collect()
        }
    };

    Ok(layout_from_extents(extents, &slice_shape))
}

fn decode_u64s(buf: &[u8]) -> Vec<u64> {
    buf.chunks_exact(8)
        .map(|c| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(c);
            u64::from_le_bytes(raw)
        })
        .collect()
}
