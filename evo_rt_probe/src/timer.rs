//! Periodic timer and per-cycle jitter statistics.
//!
//! [`PeriodConfig`] turns the requested wall-clock period into kernel ticks
//! once, before the worker exists. [`PeriodicTimer`] computes the first
//! release and turns successive kernel timestamps into elapsed intervals.
//! [`JitterStats`] accumulates those intervals in O(1) without allocating.

use evo_rt_common::config::ConfigError;
use evo_rt_common::consts::{NSEC_PER_SEC, RECENT_SAMPLES_LEN};
use evo_rt_common::kernel::{RtKernel, Ticks};
use heapless::Deque;
use serde::Serialize;
use std::time::Duration;

// ─── Period ─────────────────────────────────────────────────────────

/// Validate a period given in seconds and convert it to nanoseconds.
///
/// The fractional nanosecond part is truncated.
pub fn period_ns_from_secs(secs: f64) -> Result<i64, ConfigError> {
    if !secs.is_finite() {
        return Err(ConfigError::ValidationError(format!(
            "period must be a finite number of seconds, got {secs}"
        )));
    }
    if secs <= 0.0 {
        return Err(ConfigError::ValidationError(format!(
            "period must be greater than zero, got {secs}"
        )));
    }
    let ns = secs * NSEC_PER_SEC as f64;
    if ns >= i64::MAX as f64 {
        return Err(ConfigError::ValidationError(format!(
            "period of {secs}s is too large"
        )));
    }
    let ns = ns as i64;
    if ns == 0 {
        return Err(ConfigError::ValidationError(format!(
            "period of {secs}s is shorter than one nanosecond"
        )));
    }
    Ok(ns)
}

/// Immutable period of the servo loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodConfig {
    period_ns: i64,
    ticks: Ticks,
}

impl PeriodConfig {
    /// Build from seconds, rejecting non-positive and non-finite values.
    pub fn from_secs_f64<K: RtKernel>(secs: f64, kernel: &K) -> Result<Self, ConfigError> {
        Self::from_nanos(period_ns_from_secs(secs)?, kernel)
    }

    /// Build from nanoseconds. The period must span at least one kernel tick.
    pub fn from_nanos<K: RtKernel>(period_ns: i64, kernel: &K) -> Result<Self, ConfigError> {
        if period_ns <= 0 {
            return Err(ConfigError::ValidationError(format!(
                "period must be greater than zero, got {period_ns}ns"
            )));
        }
        let ticks = kernel.ns_to_ticks(period_ns);
        if ticks.get() <= 0 {
            return Err(ConfigError::ValidationError(format!(
                "period of {period_ns}ns is shorter than one {} tick",
                kernel.name()
            )));
        }
        Ok(Self { period_ns, ticks })
    }

    /// Period [ns].
    #[inline]
    pub const fn period_ns(&self) -> i64 {
        self.period_ns
    }

    /// Period in kernel ticks.
    #[inline]
    pub const fn ticks(&self) -> Ticks {
        self.ticks
    }

    /// Period as a `Duration`.
    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.period_ns as u64)
    }

    /// `n` periods as a `Duration`.
    pub fn times(&self, n: u32) -> Duration {
        self.duration().saturating_mul(n)
    }
}

// ─── Timer ──────────────────────────────────────────────────────────

/// Tracks release times of the periodic loop.
#[derive(Debug, Clone)]
pub struct PeriodicTimer {
    period: PeriodConfig,
    start: Option<Ticks>,
    previous: Option<Ticks>,
}

impl PeriodicTimer {
    /// Timer for `period`, not yet armed.
    pub const fn new(period: PeriodConfig) -> Self {
        Self {
            period,
            start: None,
            previous: None,
        }
    }

    /// Record `now` as the start and return the first release deadline,
    /// one period later.
    pub fn arm(&mut self, now: Ticks) -> Ticks {
        self.start = Some(now);
        self.previous = None;
        now + self.period.ticks()
    }

    /// Record a loop timestamp.
    ///
    /// Returns the elapsed ticks since the previous sample, or `None` for the
    /// first sample after arming.
    #[inline]
    pub fn sample(&mut self, now: Ticks) -> Option<Ticks> {
        let elapsed = self.previous.map(|prev| now.saturating_since(prev));
        self.previous = Some(now);
        elapsed
    }

    /// Ticks since the timer was armed.
    pub fn since_start(&self, now: Ticks) -> Option<Ticks> {
        self.start.map(|start| now.saturating_since(start))
    }

    /// Configured period.
    pub const fn period(&self) -> PeriodConfig {
        self.period
    }
}

// ─── Statistics ─────────────────────────────────────────────────────

/// O(1) per-cycle timing statistics.
///
/// Jitter is `|elapsed - period|`. The most recent samples are kept in a
/// fixed-capacity ring for the run report.
#[derive(Debug, Clone)]
pub struct JitterStats {
    /// Configured period [ns].
    pub period_ns: i64,
    /// Elapsed samples recorded.
    pub samples: u64,
    /// Last elapsed time [ns].
    pub last_ns: i64,
    /// Smallest elapsed time [ns].
    pub min_ns: i64,
    /// Largest elapsed time [ns].
    pub max_ns: i64,
    /// Running sum for the average.
    pub sum_ns: i64,
    /// Running sum of squares for the standard deviation.
    pub sum_sq_ns: i128,
    /// Largest jitter [ns].
    pub max_jitter_ns: i64,
    /// Releases that arrived after their deadline.
    pub overruns: u64,
    recent: Deque<i64, RECENT_SAMPLES_LEN>,
}

impl JitterStats {
    /// Empty statistics for `period_ns`.
    pub fn new(period_ns: i64) -> Self {
        Self {
            period_ns,
            samples: 0,
            last_ns: 0,
            min_ns: i64::MAX,
            max_ns: 0,
            sum_ns: 0,
            sum_sq_ns: 0,
            max_jitter_ns: 0,
            overruns: 0,
            recent: Deque::new(),
        }
    }

    /// Record one elapsed interval. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, elapsed_ns: i64) {
        self.samples += 1;
        self.last_ns = elapsed_ns;
        self.min_ns = self.min_ns.min(elapsed_ns);
        self.max_ns = self.max_ns.max(elapsed_ns);
        self.sum_ns = self.sum_ns.saturating_add(elapsed_ns);
        self.sum_sq_ns += i128::from(elapsed_ns) * i128::from(elapsed_ns);
        self.max_jitter_ns = self.max_jitter_ns.max(self.jitter_of(elapsed_ns));

        if self.recent.is_full() {
            self.recent.pop_front();
        }
        let _ = self.recent.push_back(elapsed_ns);
    }

    /// Count a late release.
    #[inline]
    pub fn record_overrun(&mut self) {
        self.overruns += 1;
    }

    /// `|elapsed - period|`.
    #[inline]
    pub fn jitter_of(&self, elapsed_ns: i64) -> i64 {
        elapsed_ns.saturating_sub(self.period_ns).saturating_abs()
    }

    /// Smallest elapsed time, if any sample was recorded.
    pub fn min(&self) -> Option<i64> {
        (self.samples > 0).then_some(self.min_ns)
    }

    /// Largest elapsed time, if any sample was recorded.
    pub fn max(&self) -> Option<i64> {
        (self.samples > 0).then_some(self.max_ns)
    }

    /// Average elapsed time [ns] (0 if no samples).
    pub fn avg_ns(&self) -> i64 {
        if self.samples == 0 {
            0
        } else {
            self.sum_ns / self.samples as i64
        }
    }

    /// Population standard deviation of the elapsed time [ns].
    pub fn stddev_ns(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        let n = self.samples as f64;
        let mean = self.sum_ns as f64 / n;
        let variance = (self.sum_sq_ns as f64 / n) - mean * mean;
        variance.max(0.0).sqrt()
    }

    /// Most recent samples, oldest first.
    pub fn recent(&self) -> impl Iterator<Item = i64> + '_ {
        self.recent.iter().copied()
    }
}
