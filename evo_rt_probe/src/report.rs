//! Run report produced by [`Controller::stop`](crate::controller::Controller::stop).

use evo_rt_common::state::WorkerState;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::info;

use crate::timer::JitterStats;

/// Summary of one probe run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Kernel backend name.
    pub kernel: String,
    /// Configured period [ns].
    pub period_ns: i64,
    /// Completed loop iterations.
    pub cycles: u64,
    /// Elapsed samples (one less than `cycles` for a non-empty run).
    pub samples: u64,
    /// Smallest elapsed time [ns], `None` without samples.
    pub min_ns: Option<i64>,
    /// Average elapsed time [ns].
    pub avg_ns: i64,
    /// Largest elapsed time [ns], `None` without samples.
    pub max_ns: Option<i64>,
    /// Standard deviation of the elapsed time [ns].
    pub stddev_ns: f64,
    /// Largest |elapsed − period| [ns].
    pub max_jitter_ns: i64,
    /// Late releases.
    pub overruns: u64,
    /// Most recent elapsed samples [ns], oldest first.
    pub recent_ns: Vec<i64>,
    /// Worker states in order of appearance.
    pub state_history: Vec<WorkerState>,
    /// Jitter budget [ns], if configured.
    pub jitter_budget_ns: Option<i64>,
    /// Time between a successful start and stop [ms].
    pub runtime_ms: u64,
}

impl RunReport {
    /// Assemble a report from the worker's statistics.
    pub fn new(
        kernel: &str,
        period_ns: i64,
        cycles: u64,
        stats: &JitterStats,
        state_history: &[WorkerState],
        jitter_budget_ns: Option<i64>,
        runtime: Duration,
    ) -> Self {
        Self {
            kernel: kernel.to_string(),
            period_ns,
            cycles,
            samples: stats.samples,
            min_ns: stats.min(),
            avg_ns: stats.avg_ns(),
            max_ns: stats.max(),
            stddev_ns: stats.stddev_ns(),
            max_jitter_ns: stats.max_jitter_ns,
            overruns: stats.overruns,
            recent_ns: stats.recent().collect(),
            state_history: state_history.to_vec(),
            jitter_budget_ns,
            runtime_ms: u64::try_from(runtime.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Last state the worker reached.
    pub fn final_state(&self) -> WorkerState {
        self.state_history.last().copied().unwrap_or_default()
    }

    /// `Some(true)` if the worst jitter stayed inside the budget, `None` if no
    /// budget is configured or nothing was sampled.
    pub fn within_budget(&self) -> Option<bool> {
        let budget = self.jitter_budget_ns?;
        (self.samples > 0).then_some(self.max_jitter_ns <= budget)
    }

    /// Emit the report through `tracing`.
    pub fn log(&self) {
        info!(
            kernel = %self.kernel,
            period_ns = self.period_ns,
            cycles = self.cycles,
            samples = self.samples,
            min_ns = self.min_ns.unwrap_or(0),
            avg_ns = self.avg_ns,
            max_ns = self.max_ns.unwrap_or(0),
            stddev_ns = self.stddev_ns,
            max_jitter_ns = self.max_jitter_ns,
            overruns = self.overruns,
            "Run report"
        );
        info!("State history: {}", HistoryDisplay(&self.state_history));
        match self.within_budget() {
            Some(true) => info!("Jitter within budget"),
            Some(false) => info!(
                budget_ns = self.jitter_budget_ns.unwrap_or(0),
                "Jitter budget EXCEEDED"
            ),
            None => {}
        }
    }
}

struct HistoryDisplay<'a>(&'a [WorkerState]);

impl fmt::Display for HistoryDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, state) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{state}")?;
        }
        Ok(())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = |ns: i64| ns as f64 / 1e6;
        writeln!(f, "kernel:        {}", self.kernel)?;
        writeln!(f, "period:        {:.3} ms", ms(self.period_ns))?;
        writeln!(f, "cycles:        {}", self.cycles)?;
        match (self.min_ns, self.max_ns) {
            (Some(min), Some(max)) => writeln!(
                f,
                "elapsed:       min {:.3} / avg {:.3} / max {:.3} ms (σ {:.3} ms)",
                ms(min),
                ms(self.avg_ns),
                ms(max),
                self.stddev_ns / 1e6
            )?,
            _ => writeln!(f, "elapsed:       no samples")?,
        }
        writeln!(f, "max jitter:    {:.3} ms", ms(self.max_jitter_ns))?;
        writeln!(f, "overruns:      {}", self.overruns)?;
        writeln!(f, "states:        {}", HistoryDisplay(&self.state_history))?;
        if let Some(ok) = self.within_budget() {
            writeln!(f, "verdict:       {}", if ok { "PASS" } else { "FAIL" })?;
        }
        Ok(())
    }
}
