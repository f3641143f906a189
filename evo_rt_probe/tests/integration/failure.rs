//! Integration test: startup failures and cleanup.

use evo_rt_common::consts::{MANAGEMENT_TASK, WORKER_TASK};
use evo_rt_common::state::WorkerState;
use evo_rt_probe::HarnessError;
use evo_rt_probe::kernel::{KernelEvent, SimKernel};
use std::time::{Duration, Instant};

use super::controller;

#[test]
fn worker_registration_failure_is_reported_early() {
    let kernel = SimKernel::builder().fail_registration(WORKER_TASK).build();
    let mut probe = controller(&kernel);
    let max_attempts = probe.config().handshake.max_attempts;

    let err = probe.start(0.01).unwrap_err();
    match err {
        HarnessError::WorkerInit { state, polls } => {
            assert_eq!(state, WorkerState::Error);
            assert!(polls < max_attempts, "polls = {polls}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(probe.state(), WorkerState::Error);
    assert_eq!(
        probe.state_history(),
        vec![
            WorkerState::Undefined,
            WorkerState::Initializing,
            WorkerState::Error
        ]
    );
    assert_eq!(kernel.live_tasks(), 0);
    assert!(kernel
        .events_for(MANAGEMENT_TASK)
        .iter()
        .any(|e| matches!(e, KernelEvent::Unregistered { .. })));
}

#[test]
fn promotion_failure_releases_worker_task() {
    let kernel = SimKernel::builder().fail_promotion(WORKER_TASK).build();
    let mut probe = controller(&kernel);
    let max_attempts = probe.config().handshake.max_attempts;

    let err = probe.start(0.01).unwrap_err();
    match err {
        HarnessError::WorkerInit { state, polls } => {
            assert_eq!(state, WorkerState::Error);
            assert!(polls < max_attempts, "polls = {polls}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        probe.state_history(),
        vec![
            WorkerState::Undefined,
            WorkerState::Initializing,
            WorkerState::Error
        ]
    );
    assert_eq!(kernel.live_tasks(), 0);

    let worker_events: Vec<_> = kernel
        .events_for(WORKER_TASK)
        .iter()
        .map(KernelEvent::kind)
        .collect();
    assert_eq!(
        worker_events,
        vec!["registered", "periodic", "hard_failed", "unregistered"]
    );
}

#[test]
fn failed_start_waits_grace_interval() {
    let kernel = SimKernel::builder().fail_registration(WORKER_TASK).build();
    let mut probe = controller(&kernel);

    let begin = Instant::now();
    assert!(probe.start(0.002).is_err());
    // 15 periods of 2 ms.
    assert!(begin.elapsed() >= Duration::from_millis(30));
}

#[test]
fn failed_start_spends_controller() {
    let kernel = SimKernel::builder().fail_registration(WORKER_TASK).build();
    let mut probe = controller(&kernel);
    assert!(probe.start(0.001).is_err());

    assert!(matches!(probe.start(0.001), Err(HarnessError::Spent)));
    assert!(matches!(probe.stop(), Err(HarnessError::NotRunning)));
}

#[test]
fn management_registration_failure_spawns_nothing() {
    let kernel = SimKernel::builder()
        .fail_registration(MANAGEMENT_TASK)
        .build();
    let mut probe = controller(&kernel);

    let err = probe.start(0.001).unwrap_err();
    assert!(matches!(err, HarnessError::ManagementTask(_)));
    assert_eq!(err.last_state(), None);
    assert_eq!(probe.state(), WorkerState::Undefined);
    assert!(kernel.events_for(WORKER_TASK).is_empty());
    assert_eq!(kernel.live_tasks(), 0);
}

#[test]
fn slow_worker_times_out_in_initializing() {
    // 30 polls of 1 ms plus 15 ms grace stay well below the delay.
    let kernel = SimKernel::builder()
        .registration_delay(WORKER_TASK, Duration::from_millis(200))
        .build();
    let mut probe = controller(&kernel);

    let err = probe.start(0.001).unwrap_err();
    match err {
        HarnessError::StartupTimeout { state, attempts } => {
            assert_eq!(state, WorkerState::Initializing);
            assert_eq!(attempts, 30);
        }
        other => panic!("unexpected error: {other}"),
    }

    // The late worker was joined: it promoted, saw the cleared token and left.
    assert_eq!(probe.state(), WorkerState::Done);
    assert_eq!(probe.cycle_count(), 0);
    assert_eq!(kernel.live_tasks(), 0);
    assert!(!probe.is_running());
}
