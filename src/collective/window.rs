use crate::error::{GraphError, Result};
use crate::process_group::ProcessGroup;
use crate::substrate::{Exposure, Substrate, WinHandle};
use crate::tensor::Tensor;
use crate::types::{LockType, Rank, ReduceOp};
use crate::window::{WindowEntry, WindowSet};

/// Create one window per group rank, in rank order.
///
/// In window `w_r` this rank exposes `tensor` when `r` is itself, the next
/// buffer of `neighbor_tensors` when `r` is one of `in_ranks` (ascending),
/// and nothing otherwise. `neighbor_tensors.len()` must equal
/// `in_ranks.len()`.
pub async fn create_window_set(
    substrate: &dyn Substrate,
    group: &ProcessGroup,
    in_ranks: &[Rank],
    tensor: &Tensor,
    neighbor_tensors: &[Tensor],
) -> Result<WindowSet> {
    if neighbor_tensors.len() != in_ranks.len() {
        return Err(GraphError::InvalidArgument(format!(
            "{} neighbor buffers for {} in-neighbors",
            neighbor_tensors.len(),
            in_ranks.len()
        )));
    }

    let mut buffers = in_ranks.iter().copied().zip(neighbor_tensors).peekable();
    let mut entries = Vec::with_capacity(group.size() as usize);
    for r in 0..group.size() {
        let memory = if r == group.rank() {
            Some(tensor.clone())
        } else if buffers.peek().is_some_and(|(n, _)| *n == r) {
            buffers.next().map(|(_, t)| t.clone())
        } else {
            None
        };
        let exposure = match &memory {
            Some(t) => Exposure::Buffer(t.clone()),
            None => Exposure::Empty,
        };
        match substrate.win_create(exposure).await {
            Ok(handle) => entries.push(WindowEntry { handle, memory }),
            Err(e) => {
                discard(substrate, &entries).await;
                return Err(e);
            }
        }
    }
    Ok(WindowSet::new(entries))
}

/// Free the windows of a partially created set, in rank order.
async fn discard(substrate: &dyn Substrate, entries: &[WindowEntry]) {
    for entry in entries {
        if let Err(e) = substrate.win_free(entry.handle).await {
            tracing::warn!(
                window = entry.handle.id(),
                error = %e,
                "win_free failed while discarding a partial window set"
            );
        }
    }
}

/// Destroy every window of `set`, in rank order.
pub async fn free_window_set(substrate: &dyn Substrate, set: &WindowSet) -> Result<()> {
    for handle in set.handles() {
        substrate.win_free(handle).await?;
    }
    Ok(())
}

/// Flush visibility of the receive buffers this rank exposes for its
/// in-neighbors. Local; no epoch is required.
pub fn sync_window_set(
    substrate: &dyn Substrate,
    group: &ProcessGroup,
    set: &WindowSet,
) -> Result<()> {
    for r in 0..set.len() as Rank {
        if r == group.rank() || set.memory(r).is_none() {
            continue;
        }
        if let Some(handle) = set.handle(r) {
            substrate.win_sync(handle)?;
        }
    }
    Ok(())
}

/// Fence every window of `set`, in rank order.
pub async fn fence_window_set(substrate: &dyn Substrate, set: &WindowSet) -> Result<()> {
    for handle in set.handles() {
        substrate.win_fence(handle).await?;
    }
    Ok(())
}

/// Write `tensor` into the buffer each destination keeps for this rank.
///
/// Targets are visited in the given order; each one is locked, written and
/// unlocked before the next. The local rank is skipped.
pub async fn win_put(
    substrate: &dyn Substrate,
    group: &ProcessGroup,
    set: &WindowSet,
    tensor: &Tensor,
    destinations: &[Rank],
    lock: LockType,
) -> Result<()> {
    let own = own_handle(group, set, destinations)?;
    let data = tensor.to_bytes()?;
    for &dest in destinations {
        if dest == group.rank() {
            continue;
        }
        substrate.win_lock(own, lock, dest).await?;
        let put = substrate
            .win_put(own, &data, dest, 0, tensor.num_elements(), tensor.dtype())
            .await;
        release(substrate, own, dest, put).await?;
    }
    Ok(())
}

/// Like [`win_put`], but combines into the target buffer with `op`.
pub async fn win_accumulate(
    substrate: &dyn Substrate,
    group: &ProcessGroup,
    set: &WindowSet,
    tensor: &Tensor,
    destinations: &[Rank],
    lock: LockType,
    op: ReduceOp,
) -> Result<()> {
    let own = own_handle(group, set, destinations)?;
    let data = tensor.to_bytes()?;
    for &dest in destinations {
        if dest == group.rank() {
            continue;
        }
        substrate.win_lock(own, lock, dest).await?;
        let acc = substrate
            .win_accumulate(own, &data, dest, 0, tensor.num_elements(), tensor.dtype(), op)
            .await;
        release(substrate, own, dest, acc).await?;
    }
    Ok(())
}

/// Read each source's own tensor (window `w_src`) into the receive buffer
/// this rank keeps for it. The local rank is skipped.
pub async fn win_get(
    substrate: &dyn Substrate,
    group: &ProcessGroup,
    set: &WindowSet,
    sources: &[Rank],
    lock: LockType,
) -> Result<()> {
    // Resolve everything first so a bad source fails before any epoch opens.
    let mut targets = Vec::with_capacity(sources.len());
    for &src in sources {
        group.check(src)?;
        if src == group.rank() {
            continue;
        }
        let entry = set.entry(src).ok_or_else(|| missing_rank(src))?;
        let memory = entry.memory.clone().ok_or_else(|| {
            GraphError::InvalidArgument(format!(
                "no receive buffer for rank {src}: it is not an in-neighbor of rank {}",
                group.rank()
            ))
        })?;
        targets.push((src, entry.handle, memory));
    }

    for (src, handle, memory) in targets {
        let mut buf = vec![0u8; memory.byte_len()];
        substrate.win_lock(handle, lock, src).await?;
        let get = substrate
            .win_get(handle, &mut buf, src, 0, memory.num_elements(), memory.dtype())
            .await;
        release(substrate, handle, src, get).await?;
        memory.copy_from_bytes(&buf)?;
    }
    Ok(())
}

/// Validate destinations and return this rank's own window.
fn own_handle(group: &ProcessGroup, set: &WindowSet, destinations: &[Rank]) -> Result<WinHandle> {
    for &dest in destinations {
        group.check(dest)?;
    }
    set.handle(group.rank())
        .ok_or_else(|| missing_rank(group.rank()))
}

/// Close the epoch on `target`, keeping the access error if both fail.
async fn release(
    substrate: &dyn Substrate,
    win: WinHandle,
    target: Rank,
    access: Result<()>,
) -> Result<()> {
    let unlocked = substrate.win_unlock(win, target).await;
    match (access, unlocked) {
        (Ok(()), unlocked) => unlocked,
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(unlock_err)) => {
            tracing::warn!(
                target_rank = target,
                error = %unlock_err,
                "win_unlock failed after a failed window access"
            );
            Err(e)
        }
    }
}

fn missing_rank(rank: Rank) -> GraphError {
    GraphError::InvalidArgument(format!("window set has no entry for rank {rank}"))
}
