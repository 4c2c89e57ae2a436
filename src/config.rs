//! Runtime-configurable behavior of the controller.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `NEXAR_GRAPH_`) or by constructing a custom `GraphConfig`.

use crate::topology::{TopologyStrategy, parse_topology};
use crate::types::{LockType, ReduceOp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    /// Operator for AllReduce and WinAccumulate.
    pub reduce_op: ReduceOp,

    /// Lock mode taken on each target of a put/get/accumulate.
    pub window_lock: LockType,

    /// Also exchange per-rank slice sizes during global size negotiation and
    /// reject gathers whose trailing dimensions disagree.
    pub verify_slice_shapes: bool,

    /// Topology applied when the controller is created.
    pub topology: Option<TopologyStrategy>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            reduce_op: ReduceOp::Sum,
            window_lock: LockType::Shared,
            verify_slice_shapes: false,
            topology: None,
        }
    }
}

impl GraphConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `NEXAR_GRAPH_REDUCE_OP` (`sum`, `prod`, `min`, `max`)
    /// - `NEXAR_GRAPH_WINDOW_LOCK` (`shared`, `exclusive`)
    /// - `NEXAR_GRAPH_VERIFY_SLICE_SHAPES` (`1`/`true`)
    /// - `NEXAR_GRAPH_TOPOLOGY` (`ring`, `bi_ring`, `exp2`, `full`, `star`)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(v) = get("NEXAR_GRAPH_REDUCE_OP") {
            match ReduceOp::parse(&v) {
                Some(op) => cfg.reduce_op = op,
                None => tracing::warn!(value = %v, "ignoring unknown NEXAR_GRAPH_REDUCE_OP"),
            }
        }
        if let Some(v) = get("NEXAR_GRAPH_WINDOW_LOCK") {
            match LockType::parse(&v) {
                Some(lock) => cfg.window_lock = lock,
                None => tracing::warn!(value = %v, "ignoring unknown NEXAR_GRAPH_WINDOW_LOCK"),
            }
        }
        if let Some(v) = get("NEXAR_GRAPH_VERIFY_SLICE_SHAPES") {
            cfg.verify_slice_shapes = matches!(v.trim(), "1" | "true" | "TRUE" | "yes");
        }
        if let Some(v) = get("NEXAR_GRAPH_TOPOLOGY") {
            match parse_topology(&v) {
                Some(t) => cfg.topology = Some(t),
                None => tracing::warn!(value = %v, "ignoring unknown NEXAR_GRAPH_TOPOLOGY"),
            }
        }

        cfg
    }
}
