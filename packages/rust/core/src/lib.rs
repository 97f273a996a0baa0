//! Plan compilation and execution for Lakeflow.
//!
//! [`PlanCompiler`] turns blueprint scopes into a [`PipelinePlan`] through a
//! connector's [`ScopeResolver`]; [`PipelineRunner`] executes the plan stage
//! by stage against a [`lakeflow_ingest::PluginRegistry`].
//!
//! [`PipelinePlan`]: lakeflow_shared::PipelinePlan

pub mod compiler;
pub mod runner;
pub mod subtasks;

pub use compiler::{
    CODE_EXTRACTOR_PLUGIN, CodeSource, DEFAULT_DIRECTIVES, PlanCompiler, ScopeCache, ScopeResolver,
};
pub use runner::{
    PipelineRunner, ProgressReporter, RunConfig, RunSummary, SilentProgress, task_fingerprint,
};
pub use subtasks::select_subtasks;
