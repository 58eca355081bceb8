//! Per-request workflow: resolve, clone, analyze, generate, commit, push,
//! open a request, record the outcome.

pub mod pipeline;
pub mod prompt;
pub mod state;

pub use pipeline::{Orchestrator, PipelineDeps, branch_name, commit_message};
pub use state::{OpenItem, Stage};
