//! Real-time kernel capability contract.
//!
//! This module defines:
//! - [`RtKernel`] trait - the only way the probe touches the real-time kernel
//! - [`TaskSpec`] and its parts ([`TaskName`], [`TaskPriority`], [`SchedPolicy`], [`CpuMask`])
//! - [`Ticks`] - kernel-internal time unit
//! - [`KernelError`] - error type for kernel operations
//!
//! The kernel is a process-wide external subsystem. The probe receives it as
//! an injected capability so the lifecycle logic can run against the Linux
//! scheduler or an in-process simulation alike.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use static_assertions::assert_impl_all;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use thiserror::Error;

use crate::consts::TASK_NAME_MAX_LEN;

// ─── Time ───────────────────────────────────────────────────────────

/// Kernel-internal time unit.
///
/// The length of one tick is backend specific; convert with
/// [`RtKernel::ns_to_ticks`] / [`RtKernel::ticks_to_ns`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Ticks(pub i64);

impl Ticks {
    /// Zero ticks.
    pub const ZERO: Ticks = Ticks(0);

    /// Raw tick count.
    #[inline]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// `self - earlier`, saturating at zero.
    #[inline]
    pub const fn saturating_since(self, earlier: Ticks) -> Ticks {
        let d = self.0.saturating_sub(earlier.0);
        if d < 0 { Ticks(0) } else { Ticks(d) }
    }
}

impl Add for Ticks {
    type Output = Ticks;

    #[inline]
    fn add(self, rhs: Ticks) -> Ticks {
        Ticks(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Ticks {
    #[inline]
    fn add_assign(&mut self, rhs: Ticks) {
        *self = *self + rhs;
    }
}

impl Sub for Ticks {
    type Output = Ticks;

    #[inline]
    fn sub(self, rhs: Ticks) -> Ticks {
        Ticks(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ticks", self.0)
    }
}

// ─── Task identity ──────────────────────────────────────────────────

/// Kernel task name: 1–6 characters of `[A-Za-z0-9_$]`.
///
/// Stored inline so it can travel inside errors and events without
/// allocation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskName {
    bytes: [u8; TASK_NAME_MAX_LEN],
    len: u8,
}

impl TaskName {
    /// Validate and build a task name.
    pub fn new(name: &str) -> Result<Self, InvalidTaskName> {
        if name.is_empty() || name.len() > TASK_NAME_MAX_LEN {
            return Err(InvalidTaskName::Length(name.to_string()));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '$'))
        {
            return Err(InvalidTaskName::Character {
                name: name.to_string(),
                found: c,
            });
        }

        let mut bytes = [0u8; TASK_NAME_MAX_LEN];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self {
            bytes,
            len: name.len() as u8,
        })
    }

    /// Build a name from a constant, checked at compile time when used in a
    /// `const` item.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not a valid task name.
    pub const fn from_static(name: &'static str) -> Self {
        let raw = name.as_bytes();
        assert!(
            !raw.is_empty() && raw.len() <= TASK_NAME_MAX_LEN,
            "task name must be 1-6 characters"
        );
        let mut bytes = [0u8; TASK_NAME_MAX_LEN];
        let mut i = 0;
        while i < raw.len() {
            let c = raw[i];
            assert!(
                c.is_ascii_alphanumeric() || c == b'_' || c == b'$',
                "invalid task name character"
            );
            bytes[i] = c;
            i += 1;
        }
        Self {
            bytes,
            len: raw.len() as u8,
        }
    }

    /// The name as text.
    pub fn as_str(&self) -> &str {
        // Only ASCII is ever stored.
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }

    /// Numeric task id: base-39 packing of the name, case-insensitive.
    ///
    /// Digits map to 1–10, letters to 11–36, `_` to 37 and `$` to 38.
    pub fn id(&self) -> u64 {
        let packed = self.bytes[..self.len as usize]
            .iter()
            .fold(0u64, |acc, &c| {
                let digit = match c {
                    b'0'..=b'9' => c - b'0' + 1,
                    b'a'..=b'z' => c - b'a' + 11,
                    b'A'..=b'Z' => c - b'A' + 11,
                    b'_' => 37,
                    _ => 38,
                };
                acc * 39 + u64::from(digit)
            });
        packed + 2
    }
}

impl fmt::Debug for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskName({:?})", self.as_str())
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for TaskName {
    type Error = InvalidTaskName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<TaskName> for String {
    fn from(name: TaskName) -> String {
        name.as_str().to_string()
    }
}

/// Task name rejected by [`TaskName::new`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTaskName {
    /// Empty or longer than six characters.
    #[error("task name {0:?} must be 1-6 characters")]
    Length(String),
    /// Contains a character outside `[A-Za-z0-9_$]`.
    #[error("task name {name:?} contains invalid character {found:?}")]
    Character { name: String, found: char },
}

/// Task priority, `0` is the highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskPriority(pub u32);

impl TaskPriority {
    /// Highest usable priority.
    pub const HIGHEST: TaskPriority = TaskPriority(0);
    /// Lowest priority, used for the non-real-time management task.
    pub const LOWEST: TaskPriority = TaskPriority(0x3FFF_FFFF);

    /// Raw level (smaller is more urgent).
    #[inline]
    pub const fn level(self) -> u32 {
        self.0
    }
}

/// Scheduling policy requested at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedPolicy {
    /// First-in first-out real-time.
    #[default]
    Fifo,
    /// Round-robin real-time.
    RoundRobin,
    /// Ordinary time-sharing.
    Other,
}

/// Set of CPUs a task may run on, one bit per CPU index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CpuMask(pub u64);

impl CpuMask {
    /// Every CPU the mask can name.
    pub const ALL: CpuMask = CpuMask(u64::MAX);

    /// Mask with one CPU.
    pub const fn single(cpu: usize) -> CpuMask {
        if cpu < 64 { CpuMask(1 << cpu) } else { CpuMask(0) }
    }

    /// Whether `cpu` is in the set.
    pub const fn contains(self, cpu: usize) -> bool {
        cpu < 64 && self.0 & (1 << cpu) != 0
    }

    /// No CPU allowed.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of CPUs in the set.
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// CPU indices in ascending order.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..64).filter(move |&cpu| self.contains(cpu))
    }
}

impl Default for CpuMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// Everything the kernel needs to register a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSpec {
    /// Kernel-visible name.
    pub name: TaskName,
    /// Priority, `0` = highest.
    pub priority: TaskPriority,
    /// Stack size hint [bytes], `0` = kernel default.
    pub stack_size: usize,
    /// Largest inter-task message [bytes], `0` = kernel default.
    pub max_msg_size: usize,
    /// Scheduling policy.
    pub policy: SchedPolicy,
    /// Allowed CPUs.
    pub cpus: CpuMask,
}

bitflags! {
    /// Which pages `lock_memory` pins.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemLock: u8 {
        /// Pages mapped now.
        const CURRENT = 0b01;
        /// Pages mapped later.
        const FUTURE = 0b10;
    }
}

/// Result of waiting for the next periodic release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Task slept and was released at its deadline.
    OnTime,
    /// The deadline had already passed when the task asked to wait.
    Overrun,
}

// ─── Errors ─────────────────────────────────────────────────────────

/// Error types for kernel operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    /// Task registration refused.
    #[error("registration of task {name} failed: {reason}")]
    Registration { name: TaskName, reason: String },

    /// Releasing a task failed.
    #[error("unregistering task {name} failed: {reason}")]
    Unregistration { name: TaskName, reason: String },

    /// Permission could not be granted.
    #[error("permission error: {0}")]
    Permission(String),

    /// Periodic or hard/soft mode change failed.
    #[error("scheduling error: {0}")]
    Scheduling(String),

    /// Memory locking failed.
    #[error("memory lock failed: {0}")]
    MemoryLock(String),
}

// ─── Capability trait ───────────────────────────────────────────────

/// Capability set consumed from the real-time kernel.
///
/// # Lifecycle of a task
///
/// 1. `register_task()` - binds the calling thread to a kernel task
/// 2. `make_periodic()` / `make_hard()` - promotion
/// 3. `wait_period()` - once per cycle
/// 4. `make_soft()` / `unregister_task()` - demotion and release
///
/// Task handles are bound to the thread that registered them. The probe
/// never shares a handle between threads.
///
/// # Timing Contracts
///
/// | Operation | RT Constraint |
/// |-----------|---------------|
/// | `register_task()` | None (may block) |
/// | `now()` / `now_ns()` | **HARD**, no allocation |
/// | `wait_period()` | **HARD**, only suspension point in the loop |
/// | `unregister_task()` | None |
pub trait RtKernel: Send + Sync + 'static {
    /// Opaque per-task handle.
    type Task: Send + fmt::Debug;

    /// Backend identifier (e.g. "posix", "simulation").
    fn name(&self) -> &'static str;

    /// Register the calling thread as a kernel task.
    fn register_task(&self, spec: &TaskSpec) -> Result<Self::Task, KernelError>;

    /// Release a task registered by the calling thread.
    fn unregister_task(&self, task: Self::Task) -> Result<(), KernelError>;

    /// Let an unprivileged caller use real-time primitives.
    fn allow_nonroot(&self) -> Result<(), KernelError>;

    /// Convert nanoseconds to ticks.
    fn ns_to_ticks(&self, ns: i64) -> Ticks;

    /// Convert ticks to nanoseconds.
    fn ticks_to_ns(&self, ticks: Ticks) -> i64;

    /// Current kernel time in ticks.
    fn now(&self) -> Ticks;

    /// Current kernel time in nanoseconds.
    fn now_ns(&self) -> i64;

    /// Make `task` periodic: first release at `first`, then every `period`.
    fn make_periodic(
        &self,
        task: &mut Self::Task,
        first: Ticks,
        period: Ticks,
    ) -> Result<(), KernelError>;

    /// Switch `task` to hard real-time mode.
    fn make_hard(&self, task: &mut Self::Task) -> Result<(), KernelError>;

    /// Switch `task` back to soft real-time mode.
    fn make_soft(&self, task: &mut Self::Task) -> Result<(), KernelError>;

    /// Block until the next periodic release of `task`.
    fn wait_period(&self, task: &mut Self::Task) -> WaitOutcome;

    /// Pin process memory into RAM.
    fn lock_memory(&self, flags: MemLock) -> Result<(), KernelError>;
}

assert_impl_all!(TaskSpec: Send, Sync, Copy);
assert_impl_all!(KernelError: Send, Sync, std::error::Error);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn task_name_accepts_valid_names() {
        let name = TaskName::new("RT_W$1").unwrap();
        assert_eq!(name.as_str(), "RT_W$1");
        assert_eq!(name.to_string(), "RT_W$1");
        assert_eq!(format!("{name:?}"), "TaskName(\"RT_W$1\")");
    }

    #[test]
    fn task_name_rejects_length_and_characters() {
        assert!(matches!(TaskName::new(""), Err(InvalidTaskName::Length(_))));
        assert!(matches!(
            TaskName::new("MY_TASK"),
            Err(InvalidTaskName::Length(_))
        ));
        let err = TaskName::new("RT-1").unwrap_err();
        assert_eq!(
            err,
            InvalidTaskName::Character {
                name: "RT-1".to_string(),
                found: '-'
            }
        );
    }

    #[test]
    fn static_names_match_runtime_names() {
        const NAME: TaskName = TaskName::from_static("RTWORK");
        assert_eq!(NAME, TaskName::new("RTWORK").unwrap());
    }

    #[test]
    fn task_id_is_case_insensitive_and_distinct() {
        let upper = TaskName::new("RTWORK").unwrap();
        let lower = TaskName::new("rtwork").unwrap();
        let other = TaskName::new("RTMGMT").unwrap();
        assert_eq!(upper.id(), lower.id());
        assert_ne!(upper.id(), other.id());
    }

    #[test]
    fn task_id_known_values() {
        // "A" = 11 + 2, "0" = 1 + 2, "A0" = 11 * 39 + 1 + 2
        assert_eq!(TaskName::new("A").unwrap().id(), 13);
        assert_eq!(TaskName::new("0").unwrap().id(), 3);
        assert_eq!(TaskName::new("A0").unwrap().id(), 11 * 39 + 3);
    }

    #[test]
    fn task_name_serde_validates() {
        #[derive(Debug, Deserialize)]
        struct Wrapper {
            name: TaskName,
        }
        let ok: Wrapper = toml::from_str("name = \"RTWORK\"").unwrap();
        assert_eq!(ok.name.as_str(), "RTWORK");
        assert!(toml::from_str::<Wrapper>("name = \"TOO_LONG\"").is_err());
    }

    #[test]
    fn cpu_mask_basics() {
        let mask = CpuMask(0b1011);
        assert_eq!(mask.count(), 3);
        assert!(mask.contains(0));
        assert!(!mask.contains(2));
        assert!(!mask.contains(64));
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![0, 1, 3]);
        assert_eq!(CpuMask::single(5), CpuMask(0b10_0000));
        assert!(CpuMask::single(64).is_empty());
        assert_eq!(CpuMask::default(), CpuMask::ALL);
        assert_eq!(CpuMask::ALL.count(), 64);
    }

    #[test]
    fn priority_ordering() {
        assert!(TaskPriority::HIGHEST < TaskPriority::LOWEST);
        assert_eq!(TaskPriority::HIGHEST.level(), 0);
    }

    #[test]
    fn sched_policy_serde_names() {
        #[derive(Debug, Deserialize)]
        struct Wrapper {
            policy: SchedPolicy,
        }
        let rr: Wrapper = toml::from_str("policy = \"round_robin\"").unwrap();
        assert_eq!(rr.policy, SchedPolicy::RoundRobin);
        assert_eq!(SchedPolicy::default(), SchedPolicy::Fifo);
    }

    #[test]
    fn memlock_flags_combine() {
        let all = MemLock::CURRENT | MemLock::FUTURE;
        assert!(all.contains(MemLock::CURRENT));
        assert!(all.contains(MemLock::FUTURE));
        assert_eq!(all.bits(), 0b11);
    }

    #[test]
    fn kernel_error_display() {
        let err = KernelError::Registration {
            name: TaskName::new("RTWORK").unwrap(),
            reason: "EPERM".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("RTWORK"));
        assert!(msg.contains("EPERM"));
    }

    proptest! {
        #[test]
        fn ticks_sub_then_add_restores(a in -1_000_000_000_000i64..1_000_000_000_000, b in -1_000_000_000_000i64..1_000_000_000_000) {
            let (a, b) = (Ticks(a), Ticks(b));
            prop_assert_eq!((a - b) + b, a);
        }

        #[test]
        fn saturating_since_never_negative(a in any::<i64>(), b in any::<i64>()) {
            prop_assert!(Ticks(a).saturating_since(Ticks(b)).get() >= 0);
        }
    }
}
