//! System-wide constants for the EVO RT probe.
//!
//! Single source of truth for handshake bounds, stack budgets and default
//! task identities. Imported by all crates — no duplication permitted.

use static_assertions::const_assert;

use crate::kernel::TaskName;

/// Maximum number of handshake polls (one period each) before startup is
/// declared failed.
pub const MAX_START_LATENCY_CYCLES: u32 = 30;

/// Extra wait, in periods, granted to an in-flight initialization after a
/// failed handshake.
pub const STARTUP_GRACE_PERIODS: u32 = 15;

/// Default stack size of the worker thread [bytes].
pub const WORKER_STACK_SIZE: usize = 256 * 1024;

/// Smallest accepted worker stack size [bytes].
pub const MIN_WORKER_STACK_SIZE: usize = 64 * 1024;

/// Stack depth touched before entering hard real-time mode [bytes].
pub const STACK_PREFAULT_SIZE: usize = 32 * 1024;

/// Default kernel name of the management (controller) task.
pub const MANAGEMENT_TASK_NAME: &str = "RTMGMT";

/// Default kernel name of the real-time worker task.
pub const WORKER_TASK_NAME: &str = "RTWORK";

/// [`MANAGEMENT_TASK_NAME`] as a checked task name.
pub const MANAGEMENT_TASK: TaskName = TaskName::from_static(MANAGEMENT_TASK_NAME);

/// [`WORKER_TASK_NAME`] as a checked task name.
pub const WORKER_TASK: TaskName = TaskName::from_static(WORKER_TASK_NAME);

/// Thread name of the spawned worker.
pub const WORKER_THREAD_NAME: &str = "rt-worker";

/// Maximum characters in a kernel task name.
pub const TASK_NAME_MAX_LEN: usize = 6;

/// Capacity of the worker state history (every state fits once).
pub const STATE_HISTORY_LEN: usize = 8;

/// Number of most recent elapsed samples kept for the run report.
pub const RECENT_SAMPLES_LEN: usize = 64;

/// Nanoseconds per second.
pub const NSEC_PER_SEC: i64 = 1_000_000_000;

const_assert!(MAX_START_LATENCY_CYCLES > 0);
const_assert!(WORKER_STACK_SIZE >= MIN_WORKER_STACK_SIZE);
const_assert!(STACK_PREFAULT_SIZE <= MIN_WORKER_STACK_SIZE / 2);
const_assert!(STATE_HISTORY_LEN >= 6);
