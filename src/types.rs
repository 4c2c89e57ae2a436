/// Rank of a participant in a communicator scope (0-indexed).
pub type Rank = u32;

/// Element types the controller can move and reduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    F32 = 0,
    F64 = 1,
    F16 = 2,
    BF16 = 3,
    I8 = 4,
    I32 = 5,
    I64 = 6,
    U8 = 7,
    U32 = 8,
    U64 = 9,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::F64 | DataType::I64 | DataType::U64 => 8,
            DataType::F16 | DataType::BF16 => 2,
            DataType::I8 | DataType::U8 => 1,
        }
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::F16 => "f16",
            DataType::BF16 => "bf16",
            DataType::I8 => "i8",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::U8 => "u8",
            DataType::U32 => "u32",
            DataType::U64 => "u64",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Reduction operations for AllReduce and one-sided accumulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReduceOp {
    /// Element-wise sum across ranks.
    #[default]
    Sum,
    /// Element-wise product across ranks.
    Prod,
    /// Element-wise minimum across ranks.
    Min,
    /// Element-wise maximum across ranks.
    Max,
}

impl ReduceOp {
    /// Parse `sum`, `prod`, `min` or `max` (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sum" => Some(ReduceOp::Sum),
            "prod" => Some(ReduceOp::Prod),
            "min" => Some(ReduceOp::Min),
            "max" => Some(ReduceOp::Max),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReduceOp::Sum => f.write_str("sum"),
            ReduceOp::Prod => f.write_str("prod"),
            ReduceOp::Min => f.write_str("min"),
            ReduceOp::Max => f.write_str("max"),
        }
    }
}

/// Passive-target lock mode for one-sided window access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LockType {
    /// Several origins may hold the target concurrently.
    #[default]
    Shared,
    /// One origin holds the target at a time.
    Exclusive,
}

impl LockType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "shared" => Some(LockType::Shared),
            "exclusive" => Some(LockType::Exclusive),
            _ => None,
        }
    }
}

/// The kind of a user-issued communication request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Broadcast,
    AllReduce,
    AllGather,
    NeighborAllGather,
    NeighborAllReduce,
    WinPut,
    WinGet,
    WinAccumulate,
    Barrier,
}

impl OperationKind {
    pub const fn name(self) -> &'static str {
        match self {
            OperationKind::Broadcast => "broadcast",
            OperationKind::AllReduce => "allreduce",
            OperationKind::AllGather => "allgather",
            OperationKind::NeighborAllGather => "neighbor_allgather",
            OperationKind::NeighborAllReduce => "neighbor_allreduce",
            OperationKind::WinPut => "win_put",
            OperationKind::WinGet => "win_get",
            OperationKind::WinAccumulate => "win_accumulate",
            OperationKind::Barrier => "barrier",
        }
    }

    /// Whether the operation is scoped to the topology graph.
    pub const fn needs_topology(self) -> bool {
        matches!(
            self,
            OperationKind::NeighborAllGather | OperationKind::NeighborAllReduce
        )
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
