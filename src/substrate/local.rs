use super::{Exposure, GraphComm, Substrate, WinHandle};
use crate::error::{GraphError, Result};
use crate::process_group::ProcessGroup;
use crate::reduce::reduce_slice;
use crate::tensor::Tensor;
use crate::types::{DataType, LockType, Rank, ReduceOp};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, mpsc};

/// One point-to-point message. The primitive name travels with the payload so
/// a receiver that is executing a different collective notices immediately.
struct Frame {
    primitive: &'static str,
    payload: Vec<u8>,
}

struct WindowSlot {
    /// Indexed by rank. `None` for placeholders and freed ranks.
    exposures: Vec<Option<Tensor>>,
    /// Passive-target lock per rank.
    locks: Vec<Arc<RwLock<()>>>,
    /// Ranks that have not freed the window yet.
    live: u32,
}

impl WindowSlot {
    fn new(world_size: u32) -> Self {
        Self {
            exposures: vec![None; world_size as usize],
            locks: (0..world_size).map(|_| Arc::new(RwLock::new(()))).collect(),
            live: world_size,
        }
    }
}

/// State shared by every rank of one simulated group.
struct Fabric {
    world_size: u32,
    ranks_per_host: u32,
    windows: std::sync::Mutex<HashMap<u64, WindowSlot>>,
}

/// Guard kept alive for the duration of an access epoch.
enum HeldLock {
    Shared { _guard: OwnedRwLockReadGuard<()> },
    Exclusive { _guard: OwnedRwLockWriteGuard<()> },
}

/// In-process substrate: every rank of the group lives in the same address
/// space and talks over per-pair FIFO channels.
///
/// Intended for tests and single-host simulation. Collectives are built from
/// point-to-point frames; windows live in a table shared by all ranks, so a
/// put really is one-sided (the target does not participate).
pub struct LocalSubstrate {
    rank: Rank,
    fabric: Arc<Fabric>,
    /// Indexed by destination rank.
    outbox: Vec<mpsc::UnboundedSender<Frame>>,
    /// Indexed by source rank.
    inbox: Vec<Mutex<mpsc::UnboundedReceiver<Frame>>>,
    next_window: AtomicU64,
    next_graph: AtomicU64,
    held: std::sync::Mutex<HashMap<(u64, Rank), HeldLock>>,
}

impl LocalSubstrate {
    /// Build a group of `world_size` ranks with `ranks_per_host` ranks per
    /// simulated host. Element `i` of the result is rank `i`.
    pub fn bootstrap(world_size: u32, ranks_per_host: u32) -> Result<Vec<LocalSubstrate>> {
        if world_size == 0 {
            return Err(GraphError::InvalidArgument(
                "world size must be at least 1".into(),
            ));
        }
        if ranks_per_host == 0 {
            return Err(GraphError::InvalidArgument(
                "ranks per host must be at least 1".into(),
            ));
        }

        let n = world_size as usize;
        let fabric = Arc::new(Fabric {
            world_size,
            ranks_per_host,
            windows: std::sync::Mutex::new(HashMap::new()),
        });

        // senders[src][dst], receivers[dst][src]
        let mut senders: Vec<Vec<mpsc::UnboundedSender<Frame>>> = vec![Vec::new(); n];
        let mut receivers: Vec<Vec<Option<mpsc::UnboundedReceiver<Frame>>>> =
            (0..n).map(|_| (0..n).map(|_| None).collect()).collect();
        for (src, row) in senders.iter_mut().enumerate() {
            for dst_inbox in receivers.iter_mut() {
                let (tx, rx) = mpsc::unbounded_channel();
                row.push(tx);
                dst_inbox[src] = Some(rx);
            }
        }

        let mut out = Vec::with_capacity(n);
        for (rank, (outbox, inbox)) in senders.into_iter().zip(receivers).enumerate() {
            let inbox = inbox
                .into_iter()
                .map(|rx| rx.map(Mutex::new))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| GraphError::substrate("bootstrap", "channel matrix incomplete"))?;
            out.push(LocalSubstrate {
                rank: rank as Rank,
                fabric: Arc::clone(&fabric),
                outbox,
                inbox,
                next_window: AtomicU64::new(0),
                next_graph: AtomicU64::new(0),
                held: std::sync::Mutex::new(HashMap::new()),
            });
        }
        Ok(out)
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn world_size(&self) -> u32 {
        self.fabric.world_size
    }

    fn check_rank(&self, rank: Rank, primitive: &'static str) -> Result<()> {
        if rank >= self.fabric.world_size {
            return Err(GraphError::during(
                primitive,
                GraphError::InvalidRank {
                    rank,
                    world_size: self.fabric.world_size,
                },
            ));
        }
        Ok(())
    }

    fn send(&self, dest: Rank, primitive: &'static str, payload: Vec<u8>) -> Result<()> {
        self.outbox[dest as usize]
            .send(Frame { primitive, payload })
            .map_err(|_| GraphError::during(primitive, GraphError::PeerDisconnected { rank: dest }))
    }

    async fn recv(&self, src: Rank, primitive: &'static str) -> Result<Vec<u8>> {
        let frame = self.inbox[src as usize]
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| {
                GraphError::during(primitive, GraphError::PeerDisconnected { rank: src })
            })?;
        if frame.primitive != primitive {
            return Err(GraphError::substrate(
                primitive,
                format!(
                    "desynchronized: rank {src} sent {} while rank {} expected {primitive}",
                    frame.primitive, self.rank
                ),
            ));
        }
        Ok(frame.payload)
    }

    /// Send an empty frame to every other rank and wait for theirs.
    async fn sync_all(&self, primitive: &'static str) -> Result<()> {
        for peer in self.peers() {
            self.send(peer, primitive, Vec::new())?;
        }
        for peer in self.peers() {
            self.recv(peer, primitive).await?;
        }
        Ok(())
    }

    fn peers(&self) -> impl Iterator<Item = Rank> + '_ {
        (0..self.fabric.world_size).filter(move |&r| r != self.rank)
    }

    /// Shared body of allgather/allgatherv.
    async fn gather_all(
        &self,
        primitive: &'static str,
        send: &[u8],
        recv: &mut [u8],
        counts: &[usize],
        displs: &[usize],
        dtype: DataType,
    ) -> Result<()> {
        let n = self.fabric.world_size as usize;
        if counts.len() != n || displs.len() != n {
            return Err(GraphError::substrate(
                primitive,
                format!(
                    "expected {n} counts and displacements, got {} and {}",
                    counts.len(),
                    displs.len()
                ),
            ));
        }
        let esize = dtype.size_in_bytes();
        check_len(primitive, send.len(), counts[self.rank as usize] * esize)?;

        for peer in self.peers() {
            self.send(peer, primitive, send.to_vec())?;
        }
        for src in 0..n {
            let bytes = counts[src] * esize;
            let offset = displs[src] * esize;
            if offset + bytes > recv.len() {
                return Err(GraphError::during(
                    primitive,
                    GraphError::BufferSizeMismatch {
                        expected: offset + bytes,
                        actual: recv.len(),
                    },
                ));
            }
            if src == self.rank as usize {
                recv[offset..offset + bytes].copy_from_slice(send);
                continue;
            }
            let data = self.recv(src as Rank, primitive).await?;
            check_len(primitive, data.len(), bytes)?;
            recv[offset..offset + bytes].copy_from_slice(&data);
        }
        Ok(())
    }

    /// Shared body of the neighbor gathers.
    #[allow(clippy::too_many_arguments)]
    async fn gather_neighbors(
        &self,
        primitive: &'static str,
        graph: &GraphComm,
        send: &[u8],
        recv: &mut [u8],
        counts: &[usize],
        displs: &[usize],
        dtype: DataType,
    ) -> Result<()> {
        if counts.len() != graph.indegree() || displs.len() != graph.indegree() {
            return Err(GraphError::substrate(
                primitive,
                format!(
                    "expected {} counts and displacements, got {} and {}",
                    graph.indegree(),
                    counts.len(),
                    displs.len()
                ),
            ));
        }
        let esize = dtype.size_in_bytes();
        for &dest in graph.destinations() {
            self.send(dest, primitive, send.to_vec())?;
        }
        for (i, &src) in graph.sources().iter().enumerate() {
            let bytes = counts[i] * esize;
            let offset = displs[i] * esize;
            if offset + bytes > recv.len() {
                return Err(GraphError::during(
                    primitive,
                    GraphError::BufferSizeMismatch {
                        expected: offset + bytes,
                        actual: recv.len(),
                    },
                ));
            }
            let data = self.recv(src, primitive).await?;
            check_len(primitive, data.len(), bytes)?;
            recv[offset..offset + bytes].copy_from_slice(&data);
        }
        Ok(())
    }

    fn with_slot<T>(
        &self,
        win: WinHandle,
        primitive: &'static str,
        f: impl FnOnce(&mut WindowSlot) -> Result<T>,
    ) -> Result<T> {
        let mut windows = self
            .fabric
            .windows
            .lock()
            .map_err(|_| GraphError::LockPoisoned("window table"))?;
        let slot = windows
            .get_mut(&win.id())
            .ok_or_else(|| {
                GraphError::substrate(primitive, format!("unknown window {}", win.id()))
            })?;
        f(slot)
    }

    /// Target exposure for a one-sided access. Requires an open epoch.
    fn target_exposure(
        &self,
        win: WinHandle,
        target: Rank,
        primitive: &'static str,
    ) -> Result<Tensor> {
        self.check_rank(target, primitive)?;
        let epoch_open = self
            .held
            .lock()
            .map_err(|_| GraphError::LockPoisoned("held window locks"))?
            .contains_key(&(win.id(), target));
        if !epoch_open {
            return Err(GraphError::substrate(
                primitive,
                format!("no access epoch open on rank {target} of window {}", win.id()),
            ));
        }
        self.with_slot(win, primitive, |slot| {
            slot.exposures[target as usize].clone().ok_or_else(|| {
                GraphError::substrate(
                    primitive,
                    format!("rank {target} exposes no memory in window {}", win.id()),
                )
            })
        })
    }

    async fn create_graph_inner(
        &self,
        sources: &[Rank],
        destinations: &[Rank],
    ) -> Result<GraphComm> {
        const PRIMITIVE: &str = "create_graph";
        for &r in sources.iter().chain(destinations) {
            self.check_rank(r, PRIMITIVE)?;
        }

        // Exchange adjacency so every rank reaches the same consistency verdict.
        let mine = encode_adjacency(sources, destinations);
        for peer in self.peers() {
            self.send(peer, PRIMITIVE, mine.clone())?;
        }
        let n = self.fabric.world_size as usize;
        let mut all_sources: Vec<Vec<Rank>> = vec![Vec::new(); n];
        let mut all_dests: Vec<Vec<Rank>> = vec![Vec::new(); n];
        for src in 0..n {
            let payload = if src == self.rank as usize {
                mine.clone()
            } else {
                self.recv(src as Rank, PRIMITIVE).await?
            };
            let (s, d) = decode_adjacency(&payload)
                .ok_or_else(|| GraphError::substrate(PRIMITIVE, "malformed adjacency frame"))?;
            all_sources[src] = s;
            all_dests[src] = d;
        }

        for p in 0..n {
            let mut declared = all_sources[p].clone();
            declared.sort_unstable();
            let mut implied: Vec<Rank> = (0..n)
                .filter(|&q| all_dests[q].contains(&(p as Rank)))
                .map(|q| q as Rank)
                .collect();
            implied.sort_unstable();
            if declared != implied {
                return Err(GraphError::InvalidArgument(format!(
                    "inconsistent topology: rank {p} declares in-neighbors {declared:?} \
                     but out-edges point from {implied:?}"
                )));
            }
        }

        let id = self.next_graph.fetch_add(1, Ordering::Relaxed);
        Ok(GraphComm::new(
            id,
            sources.to_vec(),
            destinations.to_vec(),
            false,
        ))
    }

    async fn win_create_inner(&self, exposure: Exposure) -> Result<WinHandle> {
        let win = WinHandle::new(self.next_window.fetch_add(1, Ordering::Relaxed));
        {
            let mut windows = self
                .fabric
                .windows
                .lock()
                .map_err(|_| GraphError::LockPoisoned("window table"))?;
            let slot = windows
                .entry(win.id())
                .or_insert_with(|| WindowSlot::new(self.fabric.world_size));
            slot.exposures[self.rank as usize] = match exposure {
                Exposure::Buffer(t) => Some(t),
                Exposure::Empty => None,
            };
        }
        // Nobody may access the window before every rank has registered.
        self.sync_all("win_create").await?;
        Ok(win)
    }

    async fn win_free_inner(&self, win: WinHandle) -> Result<()> {
        self.sync_all("win_free").await?;
        self.held
            .lock()
            .map_err(|_| GraphError::LockPoisoned("held window locks"))?
            .retain(|(id, _), _| *id != win.id());
        let mut windows = self
            .fabric
            .windows
            .lock()
            .map_err(|_| GraphError::LockPoisoned("window table"))?;
        let slot = windows
            .get_mut(&win.id())
            .ok_or_else(|| {
                GraphError::substrate("win_free", format!("unknown window {}", win.id()))
            })?;
        slot.exposures[self.rank as usize] = None;
        slot.live -= 1;
        if slot.live == 0 {
            windows.remove(&win.id());
        }
        Ok(())
    }

    async fn win_lock_inner(&self, win: WinHandle, lock: LockType, target: Rank) -> Result<()> {
        const PRIMITIVE: &str = "win_lock";
        self.check_rank(target, PRIMITIVE)?;
        let key = (win.id(), target);
        let already_open = self
            .held
            .lock()
            .map_err(|_| GraphError::LockPoisoned("held window locks"))?
            .contains_key(&key);
        if already_open {
            return Err(GraphError::substrate(
                PRIMITIVE,
                format!("epoch already open on rank {target} of window {}", win.id()),
            ));
        }
        let target_lock = self.with_slot(win, PRIMITIVE, |slot| {
            Ok(Arc::clone(&slot.locks[target as usize]))
        })?;
        let guard = match lock {
            LockType::Shared => HeldLock::Shared {
                _guard: target_lock.read_owned().await,
            },
            LockType::Exclusive => HeldLock::Exclusive {
                _guard: target_lock.write_owned().await,
            },
        };
        self.held
            .lock()
            .map_err(|_| GraphError::LockPoisoned("held window locks"))?
            .insert(key, guard);
        Ok(())
    }

    fn win_unlock_inner(&self, win: WinHandle, target: Rank) -> Result<()> {
        let released = self
            .held
            .lock()
            .map_err(|_| GraphError::LockPoisoned("held window locks"))?
            .remove(&(win.id(), target));
        match released {
            Some(_) => Ok(()),
            None => Err(GraphError::substrate(
                "win_unlock",
                format!("no access epoch open on rank {target} of window {}", win.id()),
            )),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn rma(
        &self,
        primitive: &'static str,
        win: WinHandle,
        target: Rank,
        target_disp: usize,
        count: usize,
        dtype: DataType,
        access: impl FnOnce(&mut [u8]) -> Result<()>,
    ) -> Result<()> {
        let exposure = self.target_exposure(win, target, primitive)?;
        let esize = dtype.size_in_bytes();
        let offset = target_disp * esize;
        let bytes = count * esize;
        let mut guard = exposure.write()?;
        if offset + bytes > guard.len() {
            return Err(GraphError::during(
                primitive,
                GraphError::BufferSizeMismatch {
                    expected: offset + bytes,
                    actual: guard.len(),
                },
            ));
        }
        access(&mut guard[offset..offset + bytes])
    }
}

fn check_len(primitive: &'static str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(GraphError::during(
            primitive,
            GraphError::BufferSizeMismatch { expected, actual },
        ));
    }
    Ok(())
}

/// `[n_sources: u32][sources..][destinations..]`, little-endian.
fn encode_adjacency(sources: &[Rank], destinations: &[Rank]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 * (1 + sources.len() + destinations.len()));
    buf.extend_from_slice(&(sources.len() as u32).to_le_bytes());
    for r in sources.iter().chain(destinations) {
        buf.extend_from_slice(&r.to_le_bytes());
    }
    buf
}

fn decode_adjacency(buf: &[u8]) -> Option<(Vec<Rank>, Vec<Rank>)> {
    if buf.len() < 4 || buf.len() % 4 != 0 {
        return None;
    }
    let words: Vec<u32> = buf
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let n_sources = words[0] as usize;
    let rest = &words[1..];
    if n_sources > rest.len() {
        return None;
    }
    Some((rest[..n_sources].to_vec(), rest[n_sources..].to_vec()))
}

impl Substrate for LocalSubstrate {
    fn process_group(&self) -> Result<ProcessGroup> {
        let size = self.fabric.world_size;
        let per_host = self.fabric.ranks_per_host;
        let host = self.rank / per_host;
        let local_size = per_host.min(size - host * per_host);
        let hosts = size.div_ceil(per_host);
        ProcessGroup::new(self.rank, size, self.rank % per_host, local_size, host, hosts)
    }

    fn supports_concurrent_calls(&self) -> bool {
        true
    }

    fn allgather<'a>(
        &'a self,
        send: &'a [u8],
        recv: &'a mut [u8],
        count: usize,
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let n = self.fabric.world_size as usize;
            let counts = vec![count; n];
            let displs: Vec<usize> = (0..n).map(|i| i * count).collect();
            self.gather_all("allgather", send, recv, &counts, &displs, dtype)
                .await
        })
    }

    fn allgatherv<'a>(
        &'a self,
        send: &'a [u8],
        recv: &'a mut [u8],
        counts: &'a [usize],
        displs: &'a [usize],
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.gather_all("allgatherv", send, recv, counts, displs, dtype))
    }

    fn allreduce<'a>(
        &'a self,
        send: &'a [u8],
        recv: &'a mut [u8],
        count: usize,
        dtype: DataType,
        op: ReduceOp,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            const PRIMITIVE: &str = "allreduce";
            let bytes = count * dtype.size_in_bytes();
            check_len(PRIMITIVE, send.len(), bytes)?;
            check_len(PRIMITIVE, recv.len(), bytes)?;

            let n = self.fabric.world_size as usize;
            let counts = vec![count; n];
            let displs: Vec<usize> = (0..n).map(|i| i * count).collect();
            let mut gathered = vec![0u8; bytes * n];
            self.gather_all(PRIMITIVE, send, &mut gathered, &counts, &displs, dtype)
                .await?;

            // Reduce in rank order so every rank computes bit-identical results.
            recv.copy_from_slice(&gathered[..bytes]);
            for chunk in gathered.chunks_exact(bytes.max(1)).skip(1).take(n - 1) {
                reduce_slice(recv, chunk, count, dtype, op)
                    .map_err(|e| GraphError::during(PRIMITIVE, e))?;
            }
            Ok(())
        })
    }

    fn broadcast<'a>(
        &'a self,
        buf: &'a mut [u8],
        count: usize,
        dtype: DataType,
        root: Rank,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            const PRIMITIVE: &str = "broadcast";
            self.check_rank(root, PRIMITIVE)?;
            check_len(PRIMITIVE, buf.len(), count * dtype.size_in_bytes())?;
            if self.rank == root {
                for peer in self.peers() {
                    self.send(peer, PRIMITIVE, buf.to_vec())?;
                }
            } else {
                let data = self.recv(root, PRIMITIVE).await?;
                check_len(PRIMITIVE, data.len(), buf.len())?;
                buf.copy_from_slice(&data);
            }
            Ok(())
        })
    }

    fn barrier(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.sync_all("barrier"))
    }

    fn create_graph<'a>(
        &'a self,
        sources: &'a [Rank],
        destinations: &'a [Rank],
    ) -> BoxFuture<'a, Result<GraphComm>> {
        Box::pin(self.create_graph_inner(sources, destinations))
    }

    fn neighbor_allgather<'a>(
        &'a self,
        graph: &'a GraphComm,
        send: &'a [u8],
        recv: &'a mut [u8],
        count: usize,
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let k = graph.indegree();
            let counts = vec![count; k];
            let displs: Vec<usize> = (0..k).map(|i| i * count).collect();
            self.gather_neighbors(
                "neighbor_allgather",
                graph,
                send,
                recv,
                &counts,
                &displs,
                dtype,
            )
            .await
        })
    }

    fn neighbor_allgatherv<'a>(
        &'a self,
        graph: &'a GraphComm,
        send: &'a [u8],
        recv: &'a mut [u8],
        counts: &'a [usize],
        displs: &'a [usize],
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.gather_neighbors(
            "neighbor_allgatherv",
            graph,
            send,
            recv,
            counts,
            displs,
            dtype,
        ))
    }

    fn win_create(&self, exposure: Exposure) -> BoxFuture<'_, Result<WinHandle>> {
        Box::pin(self.win_create_inner(exposure))
    }

    fn win_free(&self, win: WinHandle) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.win_free_inner(win))
    }

    fn win_lock(
        &self,
        win: WinHandle,
        lock: LockType,
        target: Rank,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.win_lock_inner(win, lock, target))
    }

    fn win_unlock(&self, win: WinHandle, target: Rank) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.win_unlock_inner(win, target) })
    }

    fn win_put<'a>(
        &'a self,
        win: WinHandle,
        origin: &'a [u8],
        target: Rank,
        target_disp: usize,
        count: usize,
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            check_len("win_put", origin.len(), count * dtype.size_in_bytes())?;
            self.rma("win_put", win, target, target_disp, count, dtype, |dst| {
                dst.copy_from_slice(origin);
                Ok(())
            })
        })
    }

    fn win_get<'a>(
        &'a self,
        win: WinHandle,
        dest: &'a mut [u8],
        target: Rank,
        target_disp: usize,
        count: usize,
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            check_len("win_get", dest.len(), count * dtype.size_in_bytes())?;
            self.rma("win_get", win, target, target_disp, count, dtype, |src| {
                dest.copy_from_slice(src);
                Ok(())
            })
        })
    }

    fn win_accumulate<'a>(
        &'a self,
        win: WinHandle,
        origin: &'a [u8],
        target: Rank,
        target_disp: usize,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            check_len("win_accumulate", origin.len(), count * dtype.size_in_bytes())?;
            self.rma(
                "win_accumulate",
                win,
                target,
                target_disp,
                count,
                dtype,
                |dst| {
                    reduce_slice(dst, origin, count, dtype, op)
                        .map_err(|e| GraphError::during("win_accumulate", e))
                },
            )
        })
    }

    fn win_sync(&self, win: WinHandle) -> Result<()> {
        // Exposures sit behind the storage lock, so writes are already visible.
        self.with_slot(win, "win_sync", |_| Ok(()))
    }

    fn win_fence(&self, win: WinHandle) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.with_slot(win, "win_fence", |_| Ok(()))?;
            self.sync_all("win_fence").await
        })
    }
}
