//! Prelude module for common re-exports.
//!
//! ```rust
//! use evo_rt_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{MAX_START_LATENCY_CYCLES, STARTUP_GRACE_PERIODS, WORKER_STACK_SIZE};

// ─── Kernel Contract ────────────────────────────────────────────────
pub use crate::kernel::{
    CpuMask, KernelError, MemLock, RtKernel, SchedPolicy, TaskName, TaskPriority, TaskSpec,
    Ticks, WaitOutcome,
};

// ─── Worker Lifecycle ───────────────────────────────────────────────
pub use crate::state::{TransitionError, WorkerState};
