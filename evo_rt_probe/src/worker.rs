//! Real-time worker: promotion, servo loop, demotion.
//!
//! ## Initialization (`Initializing`)
//! 1. Register the thread as a real-time task (highest priority). Failure → `Error`.
//! 2. Grant non-root real-time permission.
//! 3. First release = now + one period; make the task periodic.
//! 4. `lock_memory(CURRENT | FUTURE)`.
//! 5. Switch to hard real-time → `Running`.
//!
//! ## Servo loop (`Running`)
//! Sample kernel time, record the elapsed interval (skipped on the first
//! round), wait for the next release. Exits when the cancellation token is
//! cleared. No allocation inside the loop.
//!
//! ## Cleanup
//! `CleaningUp` → soft real-time → unregister → `Done`.

use evo_rt_common::consts::WORKER_THREAD_NAME;
use evo_rt_common::kernel::{KernelError, MemLock, RtKernel, TaskSpec, WaitOutcome};
use evo_rt_common::state::WorkerState;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use tracing::{debug, error, info, warn};

use crate::shutdown::{CancellationToken, WorkerHandle};
use crate::state::WorkerStateCell;
use crate::timer::{JitterStats, PeriodConfig, PeriodicTimer};

/// Everything the worker thread receives from the controller.
pub struct WorkerContext<K: RtKernel> {
    /// Kernel capability.
    pub kernel: Arc<K>,
    /// Real-time task to register.
    pub spec: TaskSpec,
    /// Loop period (read-only).
    pub period: PeriodConfig,
    /// Shared lifecycle state; the worker is its writer.
    pub state: Arc<WorkerStateCell>,
    /// Cleared by the controller to stop the loop.
    pub token: CancellationToken,
    /// Completed loop iterations.
    pub cycles: Arc<AtomicU64>,
}

/// What the worker hands back through its join handle.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    /// Elapsed-time statistics of the servo loop.
    pub stats: JitterStats,
    /// The worker completed promotion.
    pub reached_running: bool,
}

impl WorkerReport {
    fn aborted(period: PeriodConfig) -> Self {
        Self {
            stats: JitterStats::new(period.period_ns()),
            reached_running: false,
        }
    }
}

/// Spawn the worker thread with the given stack budget.
pub fn spawn<K: RtKernel>(ctx: WorkerContext<K>, stack_size: usize) -> io::Result<WorkerHandle> {
    thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .stack_size(stack_size)
        .spawn(move || run(ctx))
        .map(WorkerHandle::new)
}

/// Worker thread body.
pub fn run<K: RtKernel>(ctx: WorkerContext<K>) -> WorkerReport {
    let WorkerContext {
        kernel,
        spec,
        period,
        state,
        token,
        cycles,
    } = ctx;

    enter(&state, WorkerState::Initializing);

    info!(task = %spec.name, kernel = kernel.name(), "Switching to real-time scheduler...");
    let mut task = match kernel.register_task(&spec) {
        Ok(task) => task,
        Err(e) => {
            error!("Real-time task registration failed: {e}");
            enter(&state, WorkerState::Error);
            return WorkerReport::aborted(period);
        }
    };

    if let Err(e) = kernel.allow_nonroot() {
        warn!("Non-root real-time permission not granted: {e}");
    }

    let mut timer = PeriodicTimer::new(period);
    if let Err(e) = promote(&*kernel, &mut task, &mut timer) {
        error!("Promotion to hard real-time failed: {e}");
        release(&*kernel, task);
        enter(&state, WorkerState::Error);
        return WorkerReport::aborted(period);
    }

    enter(&state, WorkerState::Running);

    info!("Starting the servo loop");
    let mut stats = JitterStats::new(period.period_ns());
    servo_loop(&*kernel, &mut task, &token, &cycles, &mut timer, &mut stats);

    info!(cycles = cycles.load(Ordering::Relaxed), "Exiting RT thread");
    enter(&state, WorkerState::CleaningUp);

    if let Err(e) = kernel.make_soft(&mut task) {
        warn!("Demotion to soft real-time failed: {e}");
    }
    release(&*kernel, task);
    enter(&state, WorkerState::Done);

    WorkerReport {
        stats,
        reached_running: true,
    }
}

/// Arm the timer, make the task periodic, lock memory, go hard real-time.
fn promote<K: RtKernel>(
    kernel: &K,
    task: &mut K::Task,
    timer: &mut PeriodicTimer,
) -> Result<(), KernelError> {
    let tick_period = timer.period().ticks();
    let first = timer.arm(kernel.now());
    info!(%tick_period, "Making real-time task periodic...");
    kernel.make_periodic(task, first, tick_period)?;

    info!("Locking current memory into RAM...");
    if let Err(e) = kernel.lock_memory(MemLock::CURRENT | MemLock::FUTURE) {
        warn!("Memory locking failed, page faults may add latency: {e}");
    }

    info!("Switching to hard real-time...");
    kernel.make_hard(task)
}

fn servo_loop<K: RtKernel>(
    kernel: &K,
    task: &mut K::Task,
    token: &CancellationToken,
    cycles: &AtomicU64,
    timer: &mut PeriodicTimer,
    stats: &mut JitterStats,
) {
    while token.should_continue() {
        let now = kernel.ns_to_ticks(kernel.now_ns());

        match timer.sample(now) {
            None => debug!("First round"),
            Some(elapsed) => {
                let elapsed_ns = kernel.ticks_to_ns(elapsed);
                stats.record(elapsed_ns);
                debug!(period_ms = elapsed_ns as f64 / 1e6, "Period");
            }
        }

        cycles.fetch_add(1, Ordering::Relaxed);

        if kernel.wait_period(task) == WaitOutcome::Overrun {
            stats.record_overrun();
        }
    }
}

fn release<K: RtKernel>(kernel: &K, task: K::Task) {
    if let Err(e) = kernel.unregister_task(task) {
        warn!("Real-time task release failed: {e}");
    }
}

fn enter(state: &WorkerStateCell, next: WorkerState) {
    match state.advance(next) {
        Ok(prev) => debug!("Worker state {prev} -> {next}"),
        Err(e) => warn!("{e}"),
    }
}
