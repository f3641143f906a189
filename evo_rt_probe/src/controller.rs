//! Controller: spawns the real-time worker, runs the startup handshake and
//! owns the shutdown sequence.
//!
//! ## Startup
//! 1. Validate the period (`Configuration` error, controller stays usable).
//! 2. Grant non-root permission, register the management task.
//! 3. Reset the shared state, spawn the worker.
//! 4. Poll the state once per period, at most `handshake.max_attempts` times.
//! 5. On `Error` or timeout: wait `handshake.grace_periods` periods, cancel,
//!    release the management task, join the worker.
//!
//! ## Shutdown
//! Cancel → join (unbounded) → release the management task → [`RunReport`].
//!
//! A `Controller` runs exactly one worker. Any start failure other than a
//! configuration error spends it.

use evo_rt_common::kernel::RtKernel;
use evo_rt_common::state::WorkerState;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::report::RunReport;
use crate::shutdown::{CancellationToken, WorkerHandle, signal_and_join};
use crate::state::WorkerStateCell;
use crate::timer::PeriodConfig;
use crate::worker::{self, WorkerContext};

/// Controller-side resources of a live worker.
struct LiveWorker<K: RtKernel> {
    management: K::Task,
    worker: WorkerHandle,
    token: CancellationToken,
    started: Instant,
}

enum Phase<K: RtKernel> {
    Fresh,
    Live(LiveWorker<K>),
    Spent,
}

/// Owner of one real-time worker lifecycle.
pub struct Controller<K: RtKernel> {
    kernel: Arc<K>,
    config: HarnessConfig,
    state: Arc<WorkerStateCell>,
    cycles: Arc<AtomicU64>,
    period: Option<PeriodConfig>,
    phase: Phase<K>,
}

impl<K: RtKernel> Controller<K> {
    /// Controller over `kernel`. The configuration is validated here.
    pub fn new(kernel: K, config: HarnessConfig) -> Result<Self, HarnessError> {
        Self::with_shared_kernel(Arc::new(kernel), config)
    }

    /// Controller over a kernel shared with the caller.
    pub fn with_shared_kernel(
        kernel: Arc<K>,
        config: HarnessConfig,
    ) -> Result<Self, HarnessError> {
        config.validate()?;
        Ok(Self {
            kernel,
            config,
            state: Arc::new(WorkerStateCell::new()),
            cycles: Arc::new(AtomicU64::new(0)),
            period: None,
            phase: Phase::Fresh,
        })
    }

    /// Start the worker with a period of `period_secs` seconds.
    ///
    /// Returns once the worker is `Running`.
    ///
    /// # Errors
    ///
    /// - `Configuration` for a non-positive, non-finite or sub-tick period
    /// - `ManagementTask` if the management task cannot be registered
    /// - `Spawn` if the worker thread cannot be created
    /// - `WorkerInit` if the worker reported `Error`
    /// - `StartupTimeout` if the worker did not reach `Running` in time
    /// - `AlreadyRunning` / `Spent` if the controller is not fresh
    pub fn start(&mut self, period_secs: f64) -> Result<(), HarnessError> {
        match self.phase {
            Phase::Fresh => {}
            Phase::Live(_) => return Err(HarnessError::AlreadyRunning),
            Phase::Spent => return Err(HarnessError::Spent),
        }

        let period = PeriodConfig::from_secs_f64(period_secs, &*self.kernel)?;
        let worker_spec = self.config.worker_spec()?;
        let management_spec = self.config.management_spec()?;

        self.phase = Phase::Spent;
        self.period = Some(period);

        info!(
            period_ns = period.period_ns(),
            ticks = %period.ticks(),
            kernel = self.kernel.name(),
            "Starting real-time probe"
        );

        if let Err(e) = self.kernel.allow_nonroot() {
            warn!("Non-root real-time permission not granted: {e}");
        }

        info!(task = %management_spec.name, "Registering management task...");
        let management = self.kernel.register_task(&management_spec).map_err(|e| {
            error!("Management task registration failed: {e}");
            HarnessError::ManagementTask(e)
        })?;

        self.state.reset();
        self.cycles.store(0, Ordering::Relaxed);
        let token = CancellationToken::new();

        info!("Spawning RT thread...");
        let ctx = WorkerContext {
            kernel: Arc::clone(&self.kernel),
            spec: worker_spec,
            period,
            state: Arc::clone(&self.state),
            token: token.clone(),
            cycles: Arc::clone(&self.cycles),
        };
        let worker = match worker::spawn(ctx, self.config.worker.stack_size) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Worker thread spawn failed: {e}");
                self.release_management(management);
                return Err(HarnessError::Spawn(e));
            }
        };

        info!("Waiting for RT thread to run...");
        match await_running(
            &self.state,
            period.duration(),
            self.config.handshake.max_attempts,
        ) {
            Ok(polls) => {
                info!(polls, "OK - real-time thread started");
                self.phase = Phase::Live(LiveWorker {
                    management,
                    worker,
                    token,
                    started: Instant::now(),
                });
                Ok(())
            }
            Err(e) => {
                error!("Real-time thread not running: {e}");
                thread::sleep(period.times(self.config.handshake.grace_periods));
                token.cancel();
                self.release_management(management);
                match worker.join() {
                    Ok(report) => debug!(
                        reached_running = report.reached_running,
                        state = %self.state.load(),
                        "Failed worker joined"
                    ),
                    Err(join_err) => warn!("{join_err}"),
                }
                Err(e)
            }
        }
    }

    /// Stop the worker and collect the run report.
    ///
    /// # Errors
    ///
    /// - `NotRunning` without a live worker (nothing is touched)
    /// - `WorkerPanicked` if the worker thread panicked
    /// - `Kernel` if the management task could not be released
    pub fn stop(&mut self) -> Result<RunReport, HarnessError> {
        if !matches!(self.phase, Phase::Live(_)) {
            return Err(HarnessError::NotRunning);
        }
        let Phase::Live(live) = std::mem::replace(&mut self.phase, Phase::Spent) else {
            return Err(HarnessError::NotRunning);
        };

        info!("Stopping real-time probe...");
        let runtime = live.started.elapsed();
        let joined = signal_and_join(&live.token, live.worker);
        let released = self
            .kernel
            .unregister_task(live.management)
            .map_err(HarnessError::Kernel);

        let report = joined?;
        released?;

        let period = self.period.map_or(0, |p| p.period_ns());
        info!(cycles = self.cycle_count(), "Real-time probe stopped");
        Ok(RunReport::new(
            self.kernel.name(),
            period,
            self.cycle_count(),
            &report.stats,
            &self.state.history(),
            self.config.jitter_budget_ns(),
            runtime,
        ))
    }

    /// Current worker state.
    pub fn state(&self) -> WorkerState {
        self.state.load()
    }

    /// States the worker has passed through in this run.
    pub fn state_history(&self) -> Vec<WorkerState> {
        self.state.history().iter().copied().collect()
    }

    /// Completed servo loop iterations.
    pub fn cycle_count(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Whether a worker is live.
    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Live(_))
    }

    /// Period accepted by the last `start`.
    pub fn period(&self) -> Option<PeriodConfig> {
        self.period
    }

    /// Active configuration.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    fn release_management(&self, management: K::Task) {
        if let Err(e) = self.kernel.unregister_task(management) {
            warn!("Management task release failed: {e}");
        }
    }
}

impl<K: RtKernel> Drop for Controller<K> {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("Controller dropped with a live worker, stopping it");
            if let Err(e) = self.stop() {
                warn!("Stop on drop failed: {e}");
            }
        }
    }
}

/// Poll `cell` until the worker is `Running` or `Error`.
///
/// Checks, then sleeps `interval`, at most `max_attempts` times, followed by
/// a final check. Returns the number of sleeps that preceded success.
pub fn await_running(
    cell: &WorkerStateCell,
    interval: Duration,
    max_attempts: u32,
) -> Result<u32, HarnessError> {
    for polls in 0..max_attempts {
        let state = cell.load();
        if state.ends_handshake() {
            return handshake_result(state, polls);
        }
        thread::sleep(interval);
    }

    match cell.load() {
        state if state.ends_handshake() => handshake_result(state, max_attempts),
        state => Err(HarnessError::StartupTimeout {
            state,
            attempts: max_attempts,
        }),
    }
}

fn handshake_result(state: WorkerState, polls: u32) -> Result<u32, HarnessError> {
    match state {
        WorkerState::Running => Ok(polls),
        state => Err(HarnessError::WorkerInit { state, polls }),
    }
}
