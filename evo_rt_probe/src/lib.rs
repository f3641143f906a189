//! # EVO RT Probe
//!
//! Diagnostic harness for a real-time execution environment: promotes a
//! worker thread to hard real-time, runs it at a fixed period while
//! measuring the elapsed time between releases, and tears it down cleanly.
//!
//! ## Lifecycle
//!
//! ```text
//! Controller                         Worker
//! ──────────                         ──────
//! register management task
//! spawn ───────────────────────────▶ Initializing
//! poll state (≤ max_attempts)        register, periodic, mlock, hard
//!                         ◀───────── Running
//! return Ok                          servo loop (wait_period)
//! ...
//! cancel ──────────────────────────▶ CleaningUp, soft, unregister
//! join    ◀───────────────────────── Done
//! release management task
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use evo_rt_probe::{Controller, HarnessConfig, SimKernel};
//!
//! let mut probe = Controller::new(SimKernel::new(), HarnessConfig::default())?;
//! probe.start(0.001)?;
//! std::thread::sleep(std::time::Duration::from_millis(100));
//! let report = probe.stop()?;
//! println!("{report}");
//! # Ok::<(), evo_rt_probe::HarnessError>(())
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod kernel;
pub mod report;
pub mod shutdown;
pub mod state;
pub mod timer;
pub mod worker;

pub use config::HarnessConfig;
pub use controller::Controller;
pub use error::HarnessError;
#[cfg(all(target_os = "linux", feature = "rt"))]
pub use kernel::PosixKernel;
pub use kernel::SimKernel;
pub use report::RunReport;
