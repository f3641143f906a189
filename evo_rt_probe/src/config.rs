//! Probe configuration (`--config FILE`).
//!
//! Every section is optional; an empty file yields the built-in defaults.
//!
//! ```toml
//! [handshake]
//! max_attempts = 30
//! grace_periods = 15
//!
//! [worker]
//! name = "RTWORK"
//! priority = 0
//! policy = "fifo"
//! cpus = [2, 3]
//!
//! [jitter]
//! budget_us = 100
//! ```

use evo_rt_common::config::{ConfigError, SharedConfig};
use evo_rt_common::consts::{
    MANAGEMENT_TASK, MAX_START_LATENCY_CYCLES, MIN_WORKER_STACK_SIZE, STARTUP_GRACE_PERIODS,
    WORKER_STACK_SIZE, WORKER_TASK,
};
use evo_rt_common::kernel::{CpuMask, SchedPolicy, TaskName, TaskPriority, TaskSpec};
use serde::{Deserialize, Serialize};

/// Highest CPU index a mask can address.
const MAX_CPU: usize = 63;

/// Complete probe configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Settings shared by all EVO tools.
    pub shared: SharedConfig,
    /// Startup handshake bounds.
    pub handshake: HandshakeConfig,
    /// Real-time worker task.
    pub worker: WorkerTaskConfig,
    /// Controller-side management task.
    pub management: ManagementTaskConfig,
    /// Jitter verdict.
    pub jitter: JitterConfig,
}

/// Startup handshake bounds, both counted in periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandshakeConfig {
    /// Polls before the controller gives up.
    pub max_attempts: u32,
    /// Extra wait after a failed handshake before tearing down.
    pub grace_periods: u32,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_START_LATENCY_CYCLES,
            grace_periods: STARTUP_GRACE_PERIODS,
        }
    }
}

/// Worker task parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerTaskConfig {
    /// Kernel task name (default `RTWORK`).
    pub name: TaskName,
    /// Task priority, `0` = highest (default).
    pub priority: TaskPriority,
    /// Scheduling policy (default FIFO).
    pub policy: SchedPolicy,
    /// Allowed CPU indices; absent = all CPUs.
    pub cpus: Option<Vec<usize>>,
    /// Thread stack [bytes].
    pub stack_size: usize,
}

impl Default for WorkerTaskConfig {
    fn default() -> Self {
        Self {
            name: WORKER_TASK,
            priority: TaskPriority::HIGHEST,
            policy: SchedPolicy::Fifo,
            cpus: None,
            stack_size: WORKER_STACK_SIZE,
        }
    }
}

/// Management task parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagementTaskConfig {
    /// Kernel task name (default `RTMGMT`).
    pub name: TaskName,
    /// Task priority (default lowest).
    pub priority: TaskPriority,
    /// Scheduling policy (default FIFO).
    pub policy: SchedPolicy,
    /// Allowed CPU indices; absent = all CPUs.
    pub cpus: Option<Vec<usize>>,
}

impl Default for ManagementTaskConfig {
    fn default() -> Self {
        Self {
            name: MANAGEMENT_TASK,
            priority: TaskPriority::LOWEST,
            policy: SchedPolicy::Fifo,
            cpus: None,
        }
    }
}

/// Jitter verdict threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JitterConfig {
    /// Largest acceptable |elapsed − period| [µs]; absent = no verdict.
    pub budget_us: Option<u64>,
}

fn cpu_mask(cpus: Option<&[usize]>, section: &str) -> Result<CpuMask, ConfigError> {
    let Some(cpus) = cpus else {
        return Ok(CpuMask::ALL);
    };
    if cpus.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "{section}.cpus cannot be empty"
        )));
    }
    let mut mask = CpuMask(0);
    for &cpu in cpus {
        if cpu > MAX_CPU {
            return Err(ConfigError::ValidationError(format!(
                "{section}.cpus: CPU {cpu} out of range (0-{MAX_CPU})"
            )));
        }
        mask.0 |= CpuMask::single(cpu).0;
    }
    Ok(mask)
}

impl HarnessConfig {
    /// Validate all sections.
    ///
    /// # Errors
    ///
    /// `ConfigError::ValidationError` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.handshake.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "handshake.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.worker.stack_size < MIN_WORKER_STACK_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "worker.stack_size {} below minimum {MIN_WORKER_STACK_SIZE}",
                self.worker.stack_size
            )));
        }
        if self.worker.name == self.management.name {
            return Err(ConfigError::ValidationError(format!(
                "worker and management tasks share the name {}",
                self.worker.name
            )));
        }
        if self.worker.priority >= self.management.priority {
            return Err(ConfigError::ValidationError(format!(
                "worker.priority {} must outrank management.priority {}",
                self.worker.priority.level(),
                self.management.priority.level()
            )));
        }
        if self.jitter.budget_us == Some(0) {
            return Err(ConfigError::ValidationError(
                "jitter.budget_us must be positive".to_string(),
            ));
        }

        cpu_mask(self.worker.cpus.as_deref(), "worker")?;
        cpu_mask(self.management.cpus.as_deref(), "management")?;
        Ok(())
    }

    /// Registration parameters of the worker task.
    pub fn worker_spec(&self) -> Result<TaskSpec, ConfigError> {
        Ok(TaskSpec {
            name: self.worker.name,
            priority: self.worker.priority,
            stack_size: self.worker.stack_size,
            max_msg_size: 0,
            policy: self.worker.policy,
            cpus: cpu_mask(self.worker.cpus.as_deref(), "worker")?,
        })
    }

    /// Registration parameters of the management task.
    pub fn management_spec(&self) -> Result<TaskSpec, ConfigError> {
        Ok(TaskSpec {
            name: self.management.name,
            priority: self.management.priority,
            stack_size: 0,
            max_msg_size: 0,
            policy: self.management.policy,
            cpus: cpu_mask(self.management.cpus.as_deref(), "management")?,
        })
    }

    /// Jitter budget [ns], if configured.
    pub fn jitter_budget_ns(&self) -> Option<i64> {
        self.jitter
            .budget_us
            .map(|us| i64::try_from(us.saturating_mul(1_000)).unwrap_or(i64::MAX))
    }
}
