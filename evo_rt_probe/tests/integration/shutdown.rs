//! Integration test: cooperative shutdown and join.

use evo_rt_common::consts::WORKER_TASK;
use evo_rt_common::state::WorkerState;
use evo_rt_probe::HarnessError;
use evo_rt_probe::kernel::{KernelEvent, SimKernel};
use std::time::Duration;

use super::{controller, wait_cycles};

#[test]
fn stop_joins_worker_and_releases_both_tasks() {
    let kernel = SimKernel::new();
    let mut probe = controller(&kernel);
    probe.start(0.001).unwrap();
    assert!(wait_cycles(&probe, 5, Duration::from_secs(5)));

    let report = probe.stop().unwrap();
    assert_eq!(kernel.live_tasks(), 0);
    assert!(!probe.is_running());
    assert_eq!(probe.state(), WorkerState::Done);
    assert_eq!(report.final_state(), WorkerState::Done);

    let worker_events: Vec<_> = kernel
        .events_for(WORKER_TASK)
        .iter()
        .map(KernelEvent::kind)
        .collect();
    assert_eq!(
        worker_events,
        vec!["registered", "periodic", "hard", "soft", "unregistered"]
    );
}

#[test]
fn loop_stops_counting_after_stop() {
    let kernel = SimKernel::new();
    let mut probe = controller(&kernel);
    probe.start(0.001).unwrap();
    assert!(wait_cycles(&probe, 3, Duration::from_secs(5)));

    let report = probe.stop().unwrap();
    let after_stop = probe.cycle_count();
    std::thread::sleep(Duration::from_millis(10));
    assert_eq!(probe.cycle_count(), after_stop);
    assert_eq!(report.cycles, after_stop);
}

#[test]
fn second_stop_is_not_running() {
    let kernel = SimKernel::new();
    let mut probe = controller(&kernel);
    probe.start(0.001).unwrap();
    probe.stop().unwrap();

    let events_before = kernel.events().len();
    assert!(matches!(probe.stop(), Err(HarnessError::NotRunning)));
    assert_eq!(kernel.events().len(), events_before);
    assert_eq!(probe.state(), WorkerState::Done);
}

#[test]
fn stop_before_start_is_not_running() {
    let kernel = SimKernel::new();
    let mut probe = controller(&kernel);

    assert!(matches!(probe.stop(), Err(HarnessError::NotRunning)));
    assert!(kernel.events().is_empty());

    // Still usable.
    probe.start(0.001).unwrap();
    probe.stop().unwrap();
}

#[test]
fn report_samples_are_one_less_than_cycles() {
    let kernel = SimKernel::new();
    let mut probe = controller(&kernel);
    probe.start(0.001).unwrap();
    assert!(wait_cycles(&probe, 10, Duration::from_secs(5)));

    let report = probe.stop().unwrap();
    assert!(report.cycles >= 10);
    assert_eq!(report.samples, report.cycles - 1);
    assert!(report.min_ns.unwrap() >= 0);
    assert!(!report.recent_ns.is_empty());
    assert!(report.recent_ns.iter().all(|&ns| ns >= 0));
}
