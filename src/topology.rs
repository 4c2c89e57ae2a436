//! Directed neighbor graph for graph-localized collectives.
//!
//! [`TopologyGraph`] is the validated, sorted view of one `set_topology`
//! call; [`TopologyStrategy`] generates the common decentralized-training
//! graphs so every rank can derive its own edges without coordination.

use crate::error::{GraphError, Result};
use crate::process_group::ProcessGroup;
use crate::substrate::GraphComm;
use crate::types::Rank;

/// Sorted in/out neighbor lists plus the substrate graph communicator built
/// from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyGraph {
    in_ranks: Vec<Rank>,
    out_ranks: Vec<Rank>,
    comm: GraphComm,
}

impl TopologyGraph {
    pub fn in_ranks(&self) -> &[Rank] {
        &self.in_ranks
    }

    pub fn out_ranks(&self) -> &[Rank] {
        &self.out_ranks
    }

    pub fn indegree(&self) -> usize {
        self.in_ranks.len()
    }

    pub fn outdegree(&self) -> usize {
        self.out_ranks.len()
    }

    pub fn is_weighted(&self) -> bool {
        self.comm.is_weighted()
    }

    /// Whether `rank` sends to this rank.
    pub fn is_in_neighbor(&self, rank: Rank) -> bool {
        self.in_ranks.binary_search(&rank).is_ok()
    }

    pub(crate) fn comm(&self) -> &GraphComm {
        &self.comm
    }
}

/// Validate and sort one rank list for `set_topology`.
///
/// Ranks outside the group fail with `InvalidRank`; repeated ranks fail with
/// `InvalidArgument`.
pub(crate) fn normalize_ranks(
    group: &ProcessGroup,
    ranks: &[Rank],
    what: &'static str,
) -> Result<Vec<Rank>> {
    for &r in ranks {
        group.check(r)?;
    }
    let mut sorted = ranks.to_vec();
    sorted.sort_unstable();
    if let Some(w) = sorted.windows(2).find(|w| w[0] == w[1]) {
        return Err(GraphError::InvalidArgument(format!(
            "{what} lists rank {} more than once",
            w[0]
        )));
    }
    Ok(sorted)
}

/// Holds the current topology of one controller.
#[derive(Debug, Default)]
pub struct TopologyStore {
    current: Option<TopologyGraph>,
}

impl TopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the topology. `in_ranks`/`out_ranks` must already be sorted
    /// and `comm` built from exactly those lists.
    pub(crate) fn install(&mut self, in_ranks: Vec<Rank>, out_ranks: Vec<Rank>, comm: GraphComm) {
        debug_assert!(in_ranks.is_sorted() && out_ranks.is_sorted());
        self.current = Some(TopologyGraph {
            in_ranks,
            out_ranks,
            comm,
        });
    }

    pub fn is_set(&self) -> bool {
        self.current.is_some()
    }

    pub fn get(&self) -> Option<&TopologyGraph> {
        self.current.as_ref()
    }

    /// The topology, or `PreconditionViolation` if none has been set.
    pub fn require(&self, operation: &str) -> Result<&TopologyGraph> {
        self.current.as_ref().ok_or_else(|| {
            GraphError::PreconditionViolation(format!(
                "topology has not been set yet; {operation} needs a neighbor graph"
            ))
        })
    }

    /// In-neighbors, or empty when no topology is set.
    pub fn in_ranks(&self) -> &[Rank] {
        self.current.as_ref().map_or(&[], |t| t.in_ranks())
    }
}

/// Generators for common neighbor graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopologyStrategy {
    /// `r` sends to `r + 1`.
    Ring,
    /// `r` sends to `r ± 1`.
    BidirectionalRing,
    /// `r` sends to `r + 2^k` for every `2^k < size`.
    ExponentialTwo,
    /// Every rank sends to every other rank.
    FullyConnected,
    /// Rank 0 exchanges with everybody; leaves only with rank 0.
    Star,
}

impl TopologyStrategy {
    /// Out-neighbors of `rank` in a group of `size`, ascending.
    pub fn out_neighbors(&self, rank: Rank, size: u32) -> Vec<Rank> {
        let mut out: Vec<Rank> = match self {
            TopologyStrategy::Ring => vec![(rank + 1) % size],
            TopologyStrategy::BidirectionalRing => {
                vec![(rank + 1) % size, (rank + size - 1) % size]
            }
            TopologyStrategy::ExponentialTwo => {
                let mut v = Vec::new();
                let mut step = 1;
                while step < size {
                    v.push((rank + step) % size);
                    step *= 2;
                }
                v
            }
            TopologyStrategy::FullyConnected => (0..size).collect(),
            TopologyStrategy::Star => {
                if rank == 0 {
                    (1..size).collect()
                } else {
                    vec![0]
                }
            }
        };
        out.retain(|&r| r != rank);
        out.sort_unstable();
        out.dedup();
        out
    }

    /// `(in_ranks, out_ranks)` for `rank`, both ascending.
    pub fn neighbors(&self, rank: Rank, size: u32) -> (Vec<Rank>, Vec<Rank>) {
        let out = self.out_neighbors(rank, size);
        let ins: Vec<Rank> = (0..size)
            .filter(|&src| src != rank && self.out_neighbors(src, size).contains(&rank))
            .collect();
        (ins, out)
    }
}

/// Parse a topology strategy.
///
/// Formats: "ring", "bi_ring", "exp2", "full", "star"
pub fn parse_topology(s: &str) -> Option<TopologyStrategy> {
    match s.trim().to_lowercase().as_str() {
        "ring" => Some(TopologyStrategy::Ring),
        "bi_ring" => Some(TopologyStrategy::BidirectionalRing),
        "exp2" => Some(TopologyStrategy::ExponentialTwo),
        "full" => Some(TopologyStrategy::FullyConnected),
        "star" => Some(TopologyStrategy::Star),
        _ => None,
    }
}
