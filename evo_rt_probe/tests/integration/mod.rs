mod cli;
mod failure;
mod scenario;
mod shutdown;
mod startup;

use evo_rt_probe::{Controller, HarnessConfig, SimKernel};
use std::thread;
use std::time::{Duration, Instant};

/// Controller over a clone of `kernel` with default configuration.
pub fn controller(kernel: &SimKernel) -> Controller<SimKernel> {
    Controller::new(kernel.clone(), HarnessConfig::default()).unwrap()
}

/// Block until the controller counted `n` cycles or `timeout` passed.
pub fn wait_cycles(controller: &Controller<SimKernel>, n: u64, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while controller.cycle_count() < n {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    true
}
