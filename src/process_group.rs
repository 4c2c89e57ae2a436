use crate::error::{GraphError, Result};
use crate::types::Rank;

/// Rank layout of the process group, fixed once the substrate is up.
///
/// `local_*` partitions ranks by physical host; `cross_*` partitions hosts
/// for hierarchical reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessGroup {
    global_rank: Rank,
    global_size: u32,
    local_rank: Rank,
    local_size: u32,
    cross_rank: Rank,
    cross_size: u32,
}

impl ProcessGroup {
    pub fn new(
        global_rank: Rank,
        global_size: u32,
        local_rank: Rank,
        local_size: u32,
        cross_rank: Rank,
        cross_size: u32,
    ) -> Result<Self> {
        check_rank(global_rank, global_size)?;
        check_rank(local_rank, local_size)?;
        check_rank(cross_rank, cross_size)?;
        Ok(Self {
            global_rank,
            global_size,
            local_rank,
            local_size,
            cross_rank,
            cross_size,
        })
    }

    /// A group where every rank lives on its own host.
    pub fn flat(global_rank: Rank, global_size: u32) -> Result<Self> {
        Self::new(global_rank, global_size, 0, 1, global_rank, global_size)
    }

    pub fn rank(&self) -> Rank {
        self.global_rank
    }

    pub fn size(&self) -> u32 {
        self.global_size
    }

    pub fn local_rank(&self) -> Rank {
        self.local_rank
    }

    pub fn local_size(&self) -> u32 {
        self.local_size
    }

    pub fn cross_rank(&self) -> Rank {
        self.cross_rank
    }

    pub fn cross_size(&self) -> u32 {
        self.cross_size
    }

    /// Fail with `InvalidRank` unless `rank` is in `[0, size)`.
    pub fn check(&self, rank: Rank) -> Result<()> {
        check_rank(rank, self.global_size)
    }
}

fn check_rank(rank: Rank, size: u32) -> Result<()> {
    if rank >= size {
        return Err(GraphError::InvalidRank {
            rank,
            world_size: size,
        });
    }
    Ok(())
}
