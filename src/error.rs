use crate::types::{DataType, Rank};

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("{primitive} failed: {reason}")]
    SubstrateFailure {
        primitive: &'static str,
        reason: String,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("unsupported data type: {dtype:?} for operation {op}")]
    UnsupportedDType { dtype: DataType, op: &'static str },

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("invalid rank {rank}: world size is {world_size}")]
    InvalidRank { rank: Rank, world_size: u32 },

    #[error("peer {rank} disconnected unexpectedly")]
    PeerDisconnected { rank: Rank },

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("output allocation failed: {0}")]
    Allocation(String),
}

impl GraphError {
    /// Create a `SubstrateFailure` for the named primitive.
    pub fn substrate(primitive: &'static str, reason: impl Into<String>) -> Self {
        Self::SubstrateFailure {
            primitive,
            reason: reason.into(),
        }
    }

    /// Wrap any error raised while a substrate primitive was running.
    ///
    /// Errors that already name a primitive are passed through untouched.
    pub(crate) fn during(primitive: &'static str, err: GraphError) -> Self {
        match err {
            e @ GraphError::SubstrateFailure { .. } => e,
            other => Self::substrate(primitive, other.to_string()),
        }
    }

    /// Coarse classification used when the error is reported as a [`Status`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::SubstrateFailure { .. }
            | GraphError::PeerDisconnected { .. }
            | GraphError::LockPoisoned(_) => ErrorKind::Substrate,
            GraphError::PreconditionViolation(_) => ErrorKind::Precondition,
            GraphError::InvalidArgument(_)
            | GraphError::UnsupportedDType { .. }
            | GraphError::BufferSizeMismatch { .. }
            | GraphError::InvalidRank { .. }
            | GraphError::Allocation(_) => ErrorKind::InvalidArgument,
        }
    }
}

/// Error classes surfaced to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A substrate primitive returned non-success. Fatal to the request.
    Substrate,
    /// Bad name, rank, shape or buffer. Reported, not fatal to the process.
    InvalidArgument,
    /// Graph collective before topology, or similar ordering violation.
    Precondition,
}

/// Outcome handed to completion callbacks and returned by management calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error { kind: ErrorKind, message: String },
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Status::Ok => None,
            Status::Error { kind, .. } => Some(*kind),
        }
    }
}

impl From<&GraphError> for Status {
    fn from(e: &GraphError) -> Self {
        Status::Error {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<Result<()>> for Status {
    fn from(r: Result<()>) -> Self {
        match r {
            Ok(()) => Status::Ok,
            Err(e) => Status::from(&e),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Ok => f.write_str("OK"),
            Status::Error { kind, message } => write!(f, "{kind:?}: {message}"),
        }
    }
}
