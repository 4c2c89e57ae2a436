//! Exchange phase of every operation kind.
//!
//! Each function takes the handles it needs explicitly (substrate, process
//! group, topology, window set) so several controllers can run side by side
//! in one process. None of them touch request callbacks; the controller
//! completes the request once these return `Ok`.

mod allgather;
mod allreduce;
mod barrier;
mod broadcast;
mod neighbor;
mod window;

pub use allgather::allgather;
pub use allreduce::allreduce;
pub use barrier::barrier;
pub use broadcast::broadcast;
pub use neighbor::{neighbor_allgather, neighbor_allreduce};
pub use window::{
    create_window_set, fence_window_set, free_window_set, sync_window_set, win_accumulate,
    win_get, win_put,
};
