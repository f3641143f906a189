//! EVO RT Common Library
//!
//! Shared constants, configuration loading and the real-time kernel contract
//! used by the EVO RT probe.
//!
//! # Module Structure
//!
//! - [`consts`] - Handshake bounds, stack budgets, default task names
//! - [`config`] - Configuration loading traits and types
//! - [`kernel`] - `RtKernel` capability trait and its value types
//! - [`state`] - Worker lifecycle states and transition rules
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use evo_rt_common::prelude::*;
//!
//! let name = TaskName::new("RTWORK").unwrap();
//! assert!(WorkerState::Initializing.can_transition_to(WorkerState::Running));
//! assert_eq!(name.as_str(), "RTWORK");
//! ```

pub mod config;
pub mod consts;
pub mod kernel;
pub mod prelude;
pub mod state;
