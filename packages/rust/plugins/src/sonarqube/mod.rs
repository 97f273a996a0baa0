//! SonarQube connector: the analysed project behind one project key.
//!
//! Scopes are addressed by project key and carry no source code, so the
//! compiler never adds a code-extraction task for them.

mod planner;
mod tasks;

use lakeflow_ingest::{Plugin, RawDataArgs, SubtaskMeta, TaskContext};
use lakeflow_shared::{DomainIdGenerator, LakeflowError, Result};
use serde::{Deserialize, Serialize};

pub use planner::SonarqubeResolver;
pub use tasks::SonarqubeProject;

pub const PLUGIN_NAME: &str = "sonarqube";

pub(crate) const RAW_PROJECT_TABLE: &str = "_raw_sonarqube_api_projects";

/// Typed view of a sonarqube task's options. `createdDateAfter` stays in the
/// open options map: project collection is not time-bounded.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SonarqubeOptions {
    pub connection_id: u64,
    pub project_key: String,
}

impl SonarqubeOptions {
    pub fn validate(&self) -> Result<()> {
        if self.project_key.is_empty() {
            return Err(LakeflowError::validation("sonarqube: projectKey is required"));
        }
        Ok(())
    }

    fn from_context(ctx: &TaskContext) -> Result<Self> {
        let options: Self = ctx.options()?;
        options.validate()?;
        Ok(options)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SonarqubeApiParams<'a> {
    connection_id: u64,
    project_key: &'a str,
}

pub(crate) fn raw_args(options: &SonarqubeOptions, table: &str) -> Result<RawDataArgs> {
    RawDataArgs::new(
        table,
        &SonarqubeApiParams {
            connection_id: options.connection_id,
            project_key: &options.project_key,
        },
    )
}

pub(crate) fn project_id_generator() -> DomainIdGenerator {
    DomainIdGenerator::new(PLUGIN_NAME, "SonarqubeProject")
}

pub struct SonarqubePlugin;

impl Plugin for SonarqubePlugin {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn description(&self) -> &'static str {
        "Collect analysed projects from SonarQube"
    }

    fn subtask_metas(&self) -> Vec<SubtaskMeta> {
        tasks::catalogue()
    }
}
