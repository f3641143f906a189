//! Linux real-time backend.
//!
//! Maps the kernel capability set onto POSIX scheduling primitives:
//!
//! | Capability | Linux primitive |
//! |------------|-----------------|
//! | `register_task` | `sched_setaffinity` + `sched_setscheduler` on the calling thread |
//! | `unregister_task` | restore the saved policy, priority and affinity |
//! | `allow_nonroot` | raise `RLIMIT_RTPRIO` / `RLIMIT_MEMLOCK` soft limits |
//! | `now` | `clock_gettime(CLOCK_MONOTONIC)` |
//! | `wait_period` | `clock_nanosleep(TIMER_ABSTIME)` |
//! | `make_hard` | prefault the stack |
//! | `lock_memory` | `mlockall` |

use evo_rt_common::consts::{NSEC_PER_SEC, STACK_PREFAULT_SIZE};
use evo_rt_common::kernel::{
    CpuMask, KernelError, MemLock, RtKernel, SchedPolicy, TaskName, TaskPriority, TaskSpec, Ticks,
    WaitOutcome,
};
use nix::errno::Errno;
use nix::sched::{CpuSet, sched_getaffinity, sched_setaffinity};
use nix::sys::mman::{MlockallFlags, mlockall};
use nix::sys::resource::{Resource, getrlimit, setrlimit};
use nix::sys::time::TimeSpec;
use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};
use nix::unistd::Pid;
use tracing::{debug, warn};

const CLOCK: ClockId = ClockId::CLOCK_MONOTONIC;

/// Task handle of [`PosixKernel`]; bound to the registering thread.
#[derive(Debug)]
pub struct PosixTask {
    name: TaskName,
    saved_policy: libc::c_int,
    saved_priority: libc::c_int,
    saved_affinity: Option<CpuSet>,
    period_ns: i64,
    next_release_ns: i64,
    hard: bool,
}

/// Real-time kernel on top of the Linux scheduler.
#[derive(Debug, Clone, Copy)]
pub struct PosixKernel {
    tick_ns: i64,
}

impl PosixKernel {
    /// Kernel with nanosecond ticks.
    pub const fn new() -> Self {
        Self { tick_ns: 1 }
    }

    /// Kernel with a coarser tick resolution.
    pub const fn with_tick_ns(tick_ns: u32) -> Self {
        let tick_ns = if tick_ns == 0 { 1 } else { tick_ns as i64 };
        Self { tick_ns }
    }
}

impl Default for PosixKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl RtKernel for PosixKernel {
    type Task = PosixTask;

    fn name(&self) -> &'static str {
        "posix"
    }

    fn register_task(&self, spec: &TaskSpec) -> Result<PosixTask, KernelError> {
        let registration = |reason: String| KernelError::Registration {
            name: spec.name,
            reason,
        };

        let (saved_policy, saved_priority) = current_scheduler().map_err(registration)?;
        let saved_affinity = sched_getaffinity(Pid::from_raw(0)).ok();

        if spec.cpus != CpuMask::ALL {
            let cpuset = cpu_set(spec.cpus).map_err(registration)?;
            sched_setaffinity(Pid::from_raw(0), &cpuset)
                .map_err(|e| registration(format!("sched_setaffinity failed: {e}")))?;
        }

        let policy = native_policy(spec.policy);
        let priority = native_priority(policy, spec.priority);
        if let Err(e) = set_scheduler(policy, priority) {
            if let Some(cpuset) = saved_affinity {
                let _ = sched_setaffinity(Pid::from_raw(0), &cpuset);
            }
            return Err(registration(e));
        }

        debug!(task = %spec.name, id = spec.name.id(), policy, priority, "Registered POSIX task");
        Ok(PosixTask {
            name: spec.name,
            saved_policy,
            saved_priority,
            saved_affinity,
            period_ns: 0,
            next_release_ns: 0,
            hard: false,
        })
    }

    fn unregister_task(&self, task: PosixTask) -> Result<(), KernelError> {
        if let Some(cpuset) = task.saved_affinity {
            sched_setaffinity(Pid::from_raw(0), &cpuset).map_err(|e| {
                KernelError::Unregistration {
                    name: task.name,
                    reason: format!("sched_setaffinity failed: {e}"),
                }
            })?;
        }
        set_scheduler(task.saved_policy, task.saved_priority).map_err(|reason| {
            KernelError::Unregistration {
                name: task.name,
                reason,
            }
        })
    }

    fn allow_nonroot(&self) -> Result<(), KernelError> {
        for resource in [Resource::RLIMIT_RTPRIO, Resource::RLIMIT_MEMLOCK] {
            let (soft, hard) = getrlimit(resource)
                .map_err(|e| KernelError::Permission(format!("getrlimit({resource:?}): {e}")))?;
            if soft < hard {
                setrlimit(resource, hard, hard).map_err(|e| {
                    KernelError::Permission(format!("setrlimit({resource:?}): {e}"))
                })?;
            }
        }
        Ok(())
    }

    fn ns_to_ticks(&self, ns: i64) -> Ticks {
        Ticks(ns / self.tick_ns)
    }

    fn ticks_to_ns(&self, ticks: Ticks) -> i64 {
        ticks.get().saturating_mul(self.tick_ns)
    }

    fn now(&self) -> Ticks {
        self.ns_to_ticks(self.now_ns())
    }

    fn now_ns(&self) -> i64 {
        // CLOCK_MONOTONIC cannot fail on Linux.
        clock_gettime(CLOCK).map_or(0, |ts| timespec_to_ns(&ts))
    }

    fn make_periodic(
        &self,
        task: &mut PosixTask,
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
        task.period_ns = period_ns;
        task.next_release_ns = self.ticks_to_ns(first);
        Ok(())
    }

    fn make_hard(&self, task: &mut PosixTask) -> Result<(), KernelError> {
        prefault_stack();
        task.hard = true;
        Ok(())
    }

    fn make_soft(&self, task: &mut PosixTask) -> Result<(), KernelError> {
        task.hard = false;
        Ok(())
    }

    fn wait_period(&self, task: &mut PosixTask) -> WaitOutcome {
        if task.period_ns == 0 {
            return WaitOutcome::OnTime;
        }

        let release = task.next_release_ns;
        task.next_release_ns = release.saturating_add(task.period_ns);

        if self.now_ns() > release {
            return WaitOutcome::Overrun;
        }

        let deadline = ns_to_timespec(release);
        loop {
            match clock_nanosleep(CLOCK, ClockNanosleepFlags::TIMER_ABSTIME, &deadline) {
                Ok(_) => return WaitOutcome::OnTime,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    warn!(task = %task.name, "clock_nanosleep failed: {e}");
                    return WaitOutcome::Overrun;
                }
            }
        }
    }

    fn lock_memory(&self, flags: MemLock) -> Result<(), KernelError> {
        mlockall(mlockall_flags(flags))
            .map_err(|e| KernelError::MemoryLock(format!("mlockall failed: {e}")))
    }
}

// ─── Scheduler Helpers ──────────────────────────────────────────────

fn native_policy(policy: SchedPolicy) -> libc::c_int {
    match policy {
        SchedPolicy::Fifo => libc::SCHED_FIFO,
        SchedPolicy::RoundRobin => libc::SCHED_RR,
        SchedPolicy::Other => libc::SCHED_OTHER,
    }
}

/// Level 0 maps to the policy maximum; lower levels count down and clamp at
/// the policy minimum.
fn native_priority(policy: libc::c_int, priority: TaskPriority) -> libc::c_int {
    let (min, max) = unsafe {
        (
            libc::sched_get_priority_min(policy),
            libc::sched_get_priority_max(policy),
        )
    };
    map_priority(priority, min, max)
}

fn map_priority(priority: TaskPriority, min: libc::c_int, max: libc::c_int) -> libc::c_int {
    let level = libc::c_int::try_from(priority.level()).unwrap_or(libc::c_int::MAX);
    max.saturating_sub(level).max(min)
}

fn current_scheduler() -> Result<(libc::c_int, libc::c_int), String> {
    let policy = unsafe { libc::sched_getscheduler(0) };
    if policy < 0 {
        let err = std::io::Error::last_os_error();
        return Err(format!("sched_getscheduler failed: {err}"));
    }
    let mut param = libc::sched_param { sched_priority: 0 };
    let ret = unsafe { libc::sched_getparam(0, &mut param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(format!("sched_getparam failed: {err}"));
    }
    Ok((policy, param.sched_priority))
}

fn set_scheduler(policy: libc::c_int, priority: libc::c_int) -> Result<(), String> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let ret = unsafe { libc::sched_setscheduler(0, policy, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(format!(
            "sched_setscheduler({policy}, {priority}) failed: {err}"
        ));
    }
    Ok(())
}

fn cpu_set(mask: CpuMask) -> Result<CpuSet, String> {
    let mut cpuset = CpuSet::new();
    for cpu in mask.iter().filter(|&cpu| cpu < CpuSet::count()) {
        cpuset
            .set(cpu)
            .map_err(|e| format!("CpuSet::set({cpu}) failed: {e}"))?;
    }
    Ok(cpuset)
}

fn mlockall_flags(flags: MemLock) -> MlockallFlags {
    let mut out = MlockallFlags::empty();
    if flags.contains(MemLock::CURRENT) {
        out |= MlockallFlags::MCL_CURRENT;
    }
    if flags.contains(MemLock::FUTURE) {
        out |= MlockallFlags::MCL_FUTURE;
    }
    out
}

/// Touch the top of the stack so the hard loop does not fault on it.
fn prefault_stack() {
    let mut buf = [0u8; STACK_PREFAULT_SIZE];
    for byte in buf.iter_mut() {
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

// ─── Time Helpers ───────────────────────────────────────────────────

fn timespec_to_ns(ts: &TimeSpec) -> i64 {
    (ts.tv_sec() as i64)
        .saturating_mul(NSEC_PER_SEC)
        .saturating_add(ts.tv_nsec() as i64)
}

fn ns_to_timespec(ns: i64) -> TimeSpec {
    let secs = ns.div_euclid(NSEC_PER_SEC);
    let nanos = ns.rem_euclid(NSEC_PER_SEC);
    TimeSpec::new(secs as _, nanos as _)
}
