//! Harness error taxonomy.

use evo_rt_common::config::ConfigError;
use evo_rt_common::kernel::KernelError;
use evo_rt_common::state::WorkerState;
use std::io;
use thiserror::Error;

/// Everything that can go wrong while starting or stopping the worker.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Invalid period or configuration; nothing was started.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The controller thread could not register its management task.
    #[error("cannot set up management task: {0}")]
    ManagementTask(KernelError),

    /// The worker thread could not be spawned.
    #[error("cannot spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    /// The worker reported `Error` during initialization.
    #[error("worker initialization failed (state {state} after {polls} polls)")]
    WorkerInit { state: WorkerState, polls: u32 },

    /// The worker did not reach `Running` within the handshake bound.
    #[error("worker did not reach Running within {attempts} polls (last state {state})")]
    StartupTimeout { state: WorkerState, attempts: u32 },

    /// `start` called while a worker is live.
    #[error("worker already running")]
    AlreadyRunning,

    /// `start` called on a controller that has already been used.
    #[error("controller already used; create a new one")]
    Spent,

    /// `stop` called without a live worker.
    #[error("no worker running")]
    NotRunning,

    /// The worker thread panicked.
    #[error("worker thread panicked")]
    WorkerPanicked,

    /// Kernel failure outside the handshake.
    #[error("kernel error: {0}")]
    Kernel(KernelError),
}

impl HarnessError {
    /// Worker state carried by handshake failures.
    pub fn last_state(&self) -> Option<WorkerState> {
        match self {
            Self::WorkerInit { state, .. } | Self::StartupTimeout { state, .. } => Some(*state),
            _ => None,
        }
    }

    /// Whether the failure leaves the controller reusable.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
