//! Integration test: startup handshake.

use evo_rt_common::config::ConfigLoader;
use evo_rt_common::consts::{MANAGEMENT_TASK, WORKER_TASK};
use evo_rt_common::kernel::{CpuMask, SchedPolicy, TaskPriority};
use evo_rt_common::state::WorkerState;
use evo_rt_probe::kernel::KernelEvent;
use evo_rt_probe::{Controller, HarnessConfig, HarnessError, SimKernel};

use super::controller;

#[test]
fn start_returns_with_worker_running() {
    let kernel = SimKernel::new();
    let mut probe = controller(&kernel);

    probe.start(0.001).unwrap();
    assert_eq!(probe.state(), WorkerState::Running);
    assert!(probe.is_running());
    assert_eq!(kernel.live_tasks(), 2);
    assert_eq!(probe.period().unwrap().period_ns(), 1_000_000);

    probe.stop().unwrap();
}

#[test]
fn management_task_registered_before_worker() {
    let kernel = SimKernel::new();
    let mut probe = controller(&kernel);
    probe.start(0.002).unwrap();
    probe.stop().unwrap();

    let registrations: Vec<_> = kernel
        .events()
        .into_iter()
        .filter_map(|e| match e {
            KernelEvent::Registered { name, priority, .. } => Some((name, priority)),
            _ => None,
        })
        .collect();
    assert_eq!(
        registrations,
        vec![
            (MANAGEMENT_TASK, TaskPriority::LOWEST),
            (WORKER_TASK, TaskPriority::HIGHEST),
        ]
    );
}

#[test]
fn configured_task_parameters_reach_kernel() {
    let config = HarnessConfig::from_toml(
        r#"
[worker]
name = "PROBE"
policy = "round_robin"
cpus = [1]
"#,
    )
    .unwrap();
    let kernel = SimKernel::new();
    let mut probe = Controller::new(kernel.clone(), config).unwrap();
    probe.start(0.001).unwrap();
    probe.stop().unwrap();

    let worker = kernel
        .events()
        .into_iter()
        .find(|e| matches!(e, KernelEvent::Registered { name, .. } if name.as_str() == "PROBE"))
        .unwrap();
    assert_eq!(
        worker,
        KernelEvent::Registered {
            name: worker.task().unwrap(),
            priority: TaskPriority::HIGHEST,
            policy: SchedPolicy::RoundRobin,
            cpus: CpuMask::single(1),
        }
    );
}

#[test]
fn non_positive_period_is_rejected_before_kernel_work() {
    for period in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e-12] {
        let kernel = SimKernel::new();
        let mut probe = controller(&kernel);

        let err = probe.start(period).unwrap_err();
        assert!(matches!(err, HarnessError::Configuration(_)), "{period}: {err}");
        assert_eq!(probe.state(), WorkerState::Undefined);
        assert!(kernel.events().is_empty());
        assert!(probe.period().is_none());
    }
}

#[test]
fn configuration_error_does_not_spend_controller() {
    let kernel = SimKernel::new();
    let mut probe = controller(&kernel);

    assert!(probe.start(-1.0).is_err());
    probe.start(0.001).unwrap();
    assert_eq!(probe.state(), WorkerState::Running);
    probe.stop().unwrap();
}

#[test]
fn second_start_while_live_is_rejected() {
    let kernel = SimKernel::new();
    let mut probe = controller(&kernel);
    probe.start(0.001).unwrap();

    assert!(matches!(probe.start(0.001), Err(HarnessError::AlreadyRunning)));
    assert_eq!(kernel.live_tasks(), 2);
    assert!(probe.is_running());

    probe.stop().unwrap();
}

#[test]
fn start_after_stop_is_rejected() {
    let kernel = SimKernel::new();
    let mut probe = controller(&kernel);
    probe.start(0.001).unwrap();
    probe.stop().unwrap();

    assert!(matches!(probe.start(0.001), Err(HarnessError::Spent)));
    assert_eq!(probe.state(), WorkerState::Done);
}
