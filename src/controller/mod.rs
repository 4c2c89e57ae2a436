mod async_controller;
mod bootstrap;
mod operations;
mod sync_controller;
mod windows;

pub use async_controller::Controller;
pub use sync_controller::SyncController;
