//! Configuration types for launching contrastive vision-language training jobs.

#[cfg(feature = "clap")]
mod args;
mod job;
mod overrides;
mod types;

#[cfg(feature = "clap")]
pub use args::*;
pub use job::*;
pub use overrides::*;
pub use types::*;
