//! Integration test: end-to-end probe run.

use evo_rt_common::state::WorkerState;
use evo_rt_probe::SimKernel;
use std::time::Duration;

use super::{controller, wait_cycles};

#[test]
fn one_millisecond_hundred_cycles() {
    let kernel = SimKernel::new();
    let mut probe = controller(&kernel);

    probe.start(0.001).unwrap();
    assert!(wait_cycles(&probe, 100, Duration::from_secs(10)));
    let report = probe.stop().unwrap();

    assert_eq!(
        report.state_history,
        vec![
            WorkerState::Undefined,
            WorkerState::Initializing,
            WorkerState::Running,
            WorkerState::CleaningUp,
            WorkerState::Done,
        ]
    );
    assert!(report.cycles >= 100);
    assert_eq!(report.period_ns, 1_000_000);
    assert_eq!(report.kernel, "simulation");
}

#[test]
fn average_elapsed_tracks_period() {
    let kernel = SimKernel::new();
    let mut probe = controller(&kernel);

    probe.start(0.002).unwrap();
    assert!(wait_cycles(&probe, 20, Duration::from_secs(10)));
    let report = probe.stop().unwrap();

    assert!(report.avg_ns >= report.period_ns / 2, "avg = {}", report.avg_ns);
    assert!(report.avg_ns <= 2 * report.period_ns, "avg = {}", report.avg_ns);
    assert!(report.max_ns.unwrap() >= report.min_ns.unwrap());
}

#[test]
fn negative_period_fails_immediately() {
    let kernel = SimKernel::new();
    let mut probe = controller(&kernel);

    assert!(probe.start(-1.0).is_err());
    assert_eq!(probe.state(), WorkerState::Undefined);
    assert_eq!(probe.state_history(), vec![WorkerState::Undefined]);
    assert_eq!(kernel.live_tasks(), 0);
}
