pub mod collective;
pub mod config;
pub mod controller;
pub mod error;
pub mod negotiate;
pub mod process_group;
mod reduce;
pub mod request;
pub mod substrate;
pub mod tensor;
pub mod topology;
pub mod types;
pub mod window;

pub use config::GraphConfig;
pub use controller::{Controller, SyncController};
pub use error::{ErrorKind, GraphError, Result, Status};
pub use process_group::ProcessGroup;
pub use request::{CommunicationRequest, CompletionCallback};
pub use substrate::{Exposure, GraphComm, LocalSubstrate, Substrate, WinHandle};
pub use tensor::{CpuContext, Element, OpContext, Tensor, TensorShape};
pub use topology::{TopologyGraph, TopologyStrategy, parse_topology};
pub use types::{DataType, LockType, OperationKind, Rank, ReduceOp};
