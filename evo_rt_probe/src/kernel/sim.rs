//! Simulation kernel.
//!
//! `SimKernel` implements [`RtKernel`] with wall-clock sleeps on absolute
//! deadlines. It never changes the real scheduler, so the probe can run on
//! any machine (`--simulate`) and the lifecycle can be tested without
//! privileges. Registration failures and delays can be injected per task,
//! and every kernel call is recorded as a [`KernelEvent`].

use evo_rt_common::kernel::{
    CpuMask, KernelError, MemLock, RtKernel, SchedPolicy, TaskName, TaskPriority, TaskSpec, Ticks,
    WaitOutcome,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Kernel call recorded by [`SimKernel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelEvent {
    /// Task registered.
    Registered {
        name: TaskName,
        priority: TaskPriority,
        policy: SchedPolicy,
        cpus: CpuMask,
    },
    /// Task registration refused.
    RegistrationFailed { name: TaskName },
    /// Task released.
    Unregistered { name: TaskName },
    /// Non-root permission granted.
    NonRootAllowed,
    /// Task made periodic.
    Periodic {
        name: TaskName,
        first: Ticks,
        period: Ticks,
    },
    /// Task switched to hard real-time.
    Hard { name: TaskName },
    /// Switch to hard real-time refused.
    HardFailed { name: TaskName },
    /// Task switched to soft real-time.
    Soft { name: TaskName },
    /// Memory locked.
    MemoryLocked(MemLock),
}

impl KernelEvent {
    /// Short tag, handy for ordering assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "registered",
            Self::RegistrationFailed { .. } => "registration_failed",
            Self::Unregistered { .. } => "unregistered",
            Self::NonRootAllowed => "nonroot",
            Self::Periodic { .. } => "periodic",
            Self::Hard { .. } => "hard",
            Self::HardFailed { .. } => "hard_failed",
            Self::Soft { .. } => "soft",
            Self::MemoryLocked(_) => "memory_locked",
        }
    }

    /// Task the event refers to, if any.
    pub fn task(&self) -> Option<TaskName> {
        match self {
            Self::Registered { name, .. }
            | Self::RegistrationFailed { name }
            | Self::Unregistered { name }
            | Self::Periodic { name, .. }
            | Self::Hard { name }
            | Self::HardFailed { name }
            | Self::Soft { name } => Some(*name),
            Self::NonRootAllowed | Self::MemoryLocked(_) => None,
        }
    }
}

/// Handle of a simulated task.
#[derive(Debug)]
pub struct SimTask {
    id: u64,
    name: TaskName,
    period: Option<Duration>,
    next_release: Option<Instant>,
    hard: bool,
}

impl SimTask {
    /// Kernel-assigned id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Registered name.
    pub fn name(&self) -> TaskName {
        self.name
    }

    /// Whether the task is in hard real-time mode.
    pub fn is_hard(&self) -> bool {
        self.hard
    }
}

#[derive(Debug)]
struct SimInner {
    epoch: Instant,
    tick_ns: i64,
    failing: Vec<TaskName>,
    failing_promotion: Vec<TaskName>,
    delays: Vec<(TaskName, Duration)>,
    next_id: AtomicU64,
    live: AtomicUsize,
    events: Mutex<Vec<KernelEvent>>,
}

/// In-process simulation of the real-time kernel.
///
/// Cloning is cheap and clones share the same clock, tasks and event log.
#[derive(Debug, Clone)]
pub struct SimKernel {
    inner: Arc<SimInner>,
}

/// Builder for [`SimKernel`].
#[derive(Debug, Clone)]
pub struct SimKernelBuilder {
    tick_ns: i64,
    failing: Vec<TaskName>,
    failing_promotion: Vec<TaskName>,
    delays: Vec<(TaskName, Duration)>,
}

impl SimKernelBuilder {
    /// Length of one tick [ns] (default 1).
    pub fn tick_ns(mut self, tick_ns: u32) -> Self {
        self.tick_ns = i64::from(tick_ns.max(1));
        self
    }

    /// Refuse registration of `name`.
    pub fn fail_registration(mut self, name: TaskName) -> Self {
        self.failing.push(name);
        self
    }

    /// Refuse the switch of `name` to hard real-time.
    pub fn fail_promotion(mut self, name: TaskName) -> Self {
        self.failing_promotion.push(name);
        self
    }

    /// Block `register_task` for `name` by `delay` before answering.
    pub fn registration_delay(mut self, name: TaskName, delay: Duration) -> Self {
        self.delays.push((name, delay));
        self
    }

    /// Build the kernel; its clock starts now.
    pub fn build(self) -> SimKernel {
        SimKernel {
            inner: Arc::new(SimInner {
                epoch: Instant::now(),
                tick_ns: self.tick_ns,
                failing: self.failing,
                failing_promotion: self.failing_promotion,
                delays: self.delays,
                next_id: AtomicU64::new(1),
                live: AtomicUsize::new(0),
                events: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl SimKernel {
    /// Kernel with 1 ns ticks and no injected faults.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a kernel.
    pub fn builder() -> SimKernelBuilder {
        SimKernelBuilder {
            tick_ns: 1,
            failing: Vec::new(),
            failing_promotion: Vec::new(),
            delays: Vec::new(),
        }
    }

    /// Snapshot of all recorded kernel calls.
    pub fn events(&self) -> Vec<KernelEvent> {
        self.inner.events.lock().clone()
    }

    /// Recorded calls concerning `name`.
    pub fn events_for(&self, name: TaskName) -> Vec<KernelEvent> {
        self.inner
            .events
            .lock()
            .iter()
            .filter(|e| e.task() == Some(name))
            .cloned()
            .collect()
    }

    /// Tasks registered and not yet released.
    pub fn live_tasks(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }

    fn record(&self, event: KernelEvent) {
        trace!(?event, "sim kernel call");
        self.inner.events.lock().push(event);
    }
}

impl Default for SimKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl RtKernel for SimKernel {
    type Task = SimTask;

    fn name(&self) -> &'static str {
        "simulation"
    }

    fn register_task(&self, spec: &TaskSpec) -> Result<SimTask, KernelError> {
        if let Some((_, delay)) = self.inner.delays.iter().find(|(n, _)| *n == spec.name) {
            debug!(task = %spec.name, ?delay, "Delaying simulated registration");
            thread::sleep(*delay);
        }

        if self.inner.failing.contains(&spec.name) {
            self.record(KernelEvent::RegistrationFailed { name: spec.name });
            return Err(KernelError::Registration {
                name: spec.name,
                reason: "injected failure".to_string(),
            });
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.live.fetch_add(1, Ordering::AcqRel);
        self.record(KernelEvent::Registered {
            name: spec.name,
            priority: spec.priority,
            policy: spec.policy,
            cpus: spec.cpus,
        });

        Ok(SimTask {
            id,
            name: spec.name,
            period: None,
            next_release: None,
            hard: false,
        })
    }

    fn unregister_task(&self, task: SimTask) -> Result<(), KernelError> {
        self.inner.live.fetch_sub(1, Ordering::AcqRel);
        self.record(KernelEvent::Unregistered { name: task.name });
        Ok(())
    }

    fn allow_nonroot(&self) -> Result<(), KernelError> {
        self.record(KernelEvent::NonRootAllowed);
        Ok(())
    }

    fn ns_to_ticks(&self, ns: i64) -> Ticks {
        Ticks(ns / self.inner.tick_ns)
    }

    fn ticks_to_ns(&self, ticks: Ticks) -> i64 {
        ticks.get().saturating_mul(self.inner.tick_ns)
    }

    fn now(&self) -> Ticks {
        self.ns_to_ticks(self.now_ns())
    }

    fn now_ns(&self) -> i64 {
        i64::try_from(self.inner.epoch.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    fn make_periodic(
        &self,
        task: &mut SimTask,
        first: Ticks,
        period: Ticks,
    ) -> Result<(), KernelError> {
        let period_ns = self.ticks_to_ns(period);
        if period_ns <= 0 {
            return Err(KernelError::Scheduling(format!(
                "task {} period must be positive, got {period}",
                task.name
            )));
        }
        let first_ns = self.ticks_to_ns(first).max(0) as u64;
        task.period = Some(Duration::from_nanos(period_ns as u64));
        task.next_release = Some(self.inner.epoch + Duration::from_nanos(first_ns));
        self.record(KernelEvent::Periodic {
            name: task.name,
            first,
            period,
        });
        Ok(())
    }

    fn make_hard(&self, task: &mut SimTask) -> Result<(), KernelError> {
        if self.inner.failing_promotion.contains(&task.name) {
            self.record(KernelEvent::HardFailed { name: task.name });
            return Err(KernelError::Scheduling(format!(
                "task {} refused hard real-time mode",
                task.name
            )));
        }
        task.hard = true;
        self.record(KernelEvent::Hard { name: task.name });
        Ok(())
    }

    fn make_soft(&self, task: &mut SimTask) -> Result<(), KernelError> {
        task.hard = false;
        self.record(KernelEvent::Soft { name: task.name });
        Ok(())
    }

    /// Sleeps until the absolute release time. Tasks that were never made
    /// periodic are released immediately.
    fn wait_period(&self, task: &mut SimTask) -> WaitOutcome {
        let (Some(period), Some(release)) = (task.period, task.next_release) else {
            return WaitOutcome::OnTime;
        };

        let now = Instant::now();
        let outcome = if now > release {
            WaitOutcome::Overrun
        } else {
            thread::sleep(release - now);
            WaitOutcome::OnTime
        };
        task.next_release = Some(release + period);
        outcome
    }

    fn lock_memory(&self, flags: MemLock) -> Result<(), KernelError> {
        self.record(KernelEvent::MemoryLocked(flags));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evo_rt_common::consts::{MANAGEMENT_TASK, WORKER_TASK};

    fn spec(name: TaskName) -> TaskSpec {
        TaskSpec {
            name,
            priority: TaskPriority::HIGHEST,
            stack_size: 0,
            max_msg_size: 0,
            policy: SchedPolicy::Fifo,
            cpus: CpuMask(0xF),
        }
    }

    #[test]
    fn tick_conversion_uses_resolution() {
        let kernel = SimKernel::builder().tick_ns(250).build();
        assert_eq!(kernel.ns_to_ticks(1_000), Ticks(4));
        assert_eq!(kernel.ns_to_ticks(999), Ticks(3));
        assert_eq!(kernel.ticks_to_ns(Ticks(4)), 1_000);
        assert_eq!(SimKernel::builder().tick_ns(0).build().ns_to_ticks(7), Ticks(7));
    }

    #[test]
    fn clock_is_monotonic() {
        let kernel = SimKernel::new();
        let a = kernel.now();
        thread::sleep(Duration::from_millis(1));
        let b = kernel.now();
        assert!(b > a);
        assert!(kernel.now_ns() >= 1_000_000);
    }

    #[test]
    fn registration_is_recorded_and_counted() {
        let kernel = SimKernel::new();
        let task = kernel.register_task(&spec(WORKER_TASK)).unwrap();
        assert_eq!(task.name(), WORKER_TASK);
        assert_eq!(kernel.live_tasks(), 1);

        kernel.unregister_task(task).unwrap();
        assert_eq!(kernel.live_tasks(), 0);
        assert_eq!(
            kernel.events_for(WORKER_TASK),
            vec![
                KernelEvent::Registered {
                    name: WORKER_TASK,
                    priority: TaskPriority::HIGHEST,
                    policy: SchedPolicy::Fifo,
                    cpus: CpuMask(0xF),
                },
                KernelEvent::Unregistered { name: WORKER_TASK },
            ]
        );
    }

    #[test]
    fn injected_failure_only_hits_named_task() {
        let kernel = SimKernel::builder().fail_registration(WORKER_TASK).build();
        let err = kernel.register_task(&spec(WORKER_TASK)).unwrap_err();
        assert!(matches!(err, KernelError::Registration { name, .. } if name == WORKER_TASK));
        assert!(kernel.register_task(&spec(MANAGEMENT_TASK)).is_ok());
        assert_eq!(kernel.live_tasks(), 1);
    }

    #[test]
    fn registration_delay_blocks_caller() {
        let kernel = SimKernel::builder()
            .registration_delay(WORKER_TASK, Duration::from_millis(20))
            .build();
        let start = Instant::now();
        kernel.register_task(&spec(WORKER_TASK)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn wait_period_releases_on_absolute_deadlines() {
        let kernel = SimKernel::new();
        let mut task = kernel.register_task(&spec(WORKER_TASK)).unwrap();
        let period = kernel.ns_to_ticks(2_000_000);
        kernel
            .make_periodic(&mut task, kernel.now() + period, period)
            .unwrap();

        let start = Instant::now();
        for _ in 0..5 {
            kernel.wait_period(&mut task);
        }
        assert!(start.elapsed() >= Duration::from_millis(9));
    }

    #[test]
    fn late_wait_is_an_overrun() {
        let kernel = SimKernel::new();
        let mut task = kernel.register_task(&spec(WORKER_TASK)).unwrap();
        let period = kernel.ns_to_ticks(1_000_000);
        kernel.make_periodic(&mut task, kernel.now(), period).unwrap();
        thread::sleep(Duration::from_millis(3));
        assert_eq!(kernel.wait_period(&mut task), WaitOutcome::Overrun);
    }

    #[test]
    fn zero_period_is_rejected() {
        let kernel = SimKernel::new();
        let mut task = kernel.register_task(&spec(WORKER_TASK)).unwrap();
        let result = kernel.make_periodic(&mut task, Ticks(0), Ticks(0));
        assert!(matches!(result, Err(KernelError::Scheduling(_))));
    }

    #[test]
    fn injected_promotion_failure_keeps_task_soft() {
        let kernel = SimKernel::builder().fail_promotion(WORKER_TASK).build();
        let mut task = kernel.register_task(&spec(WORKER_TASK)).unwrap();
        let result = kernel.make_hard(&mut task);
        assert!(matches!(result, Err(KernelError::Scheduling(_))));
        assert!(!task.is_hard());
        assert_eq!(
            kernel.events().last(),
            Some(&KernelEvent::HardFailed { name: WORKER_TASK })
        );

        let mut other = kernel.register_task(&spec(MANAGEMENT_TASK)).unwrap();
        assert!(kernel.make_hard(&mut other).is_ok());
    }

    #[test]
    fn hard_soft_toggle() {
        let kernel = SimKernel::new();
        let mut task = kernel.register_task(&spec(WORKER_TASK)).unwrap();
        kernel.make_hard(&mut task).unwrap();
        assert!(task.is_hard());
        kernel.make_soft(&mut task).unwrap();
        assert!(!task.is_hard());
    }
}
