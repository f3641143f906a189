//! Real-time kernel backends.
//!
//! - [`sim`] - in-process simulation, always available
//! - `posix` - Linux scheduler backend, requires the `rt` feature

pub mod sim;

#[cfg(all(target_os = "linux", feature = "rt"))]
pub mod posix;

#[cfg(all(target_os = "linux", feature = "rt"))]
pub use posix::{PosixKernel, PosixTask};
pub use sim::{KernelEvent, SimKernel, SimKernelBuilder, SimTask};
