#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::unused_self
)]

//! SPARO training launcher
//!
//! Resolves a job from a launch file, builds the `torchrun` command line
//! for the open_clip training entry point, and runs it, propagating the
//! child's exit code.

pub mod config;
pub mod invocation;
pub mod runner;

pub use config::{LaunchFile, LaunchFileError, LauncherSettings, StdioMode};
pub use invocation::Invocation;
pub use runner::{LaunchError, LaunchOutcome, Launcher};
pub use sparo_config::{JobArgs, JobConfig};
