//! Autonomous command loop
//!
//! Builds a fixed system context, then cycles: ask the model for a JSON plan,
//! filter and run its shell commands, trim the output into the next
//! observation, and stop when the plan says `done` or the cycle budget runs
//! out.

use std::path::PathBuf;
use thiserror::Error;

pub mod context;
pub mod loop_agent;
pub mod observation;
pub mod plan;
pub mod requester;
pub mod safety;
pub mod shell;

pub use context::{ContextBuilder, SystemContext};
pub use loop_agent::{AgentLoop, CycleOutcome, RunReport, RunStatus};
pub use observation::trim_observation;
pub use plan::{parse_plan, CommandSpec, JsonSpanParser, Plan, PlanParser};
pub use requester::{Backoff, PlanRequester, RequestError};
pub use safety::SafetyFilter;
pub use shell::{CommandOutput, CommandRunner, ShellExecutor};

/// Startup errors. Per-cycle failures never surface here.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("◆ INSTRUCTIONS UNAVAILABLE: {0} is missing, empty, or unreadable")]
    InstructionsUnavailable(PathBuf),
}

pub type Result<T> = std::result::Result<T, AgentError>;
