//! GitLab connector: merge requests of one project, with their labels and
//! reviewers.

mod models;
mod planner;
mod tasks;

use lakeflow_ingest::{Plugin, RawDataArgs, SubtaskMeta, TaskContext};
use lakeflow_shared::{DomainIdGenerator, LakeflowError, Result};
use serde::{Deserialize, Serialize};

pub use models::{GitlabMergeRequest, GitlabMrLabel, GitlabReviewer};
pub use planner::GitlabResolver;

pub const PLUGIN_NAME: &str = "gitlab";

pub(crate) const RAW_MERGE_REQUEST_TABLE: &str = "_raw_gitlab_api_merge_requests";

/// Label patterns. The first capture group of a matching label becomes the
/// merge request's type or component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationRules {
    #[serde(default)]
    pub pr_type: String,
    #[serde(default)]
    pub pr_component: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitlabOptions {
    pub connection_id: u64,
    pub project_id: u64,
    #[serde(default)]
    pub transformation_rules: TransformationRules,
}

impl GitlabOptions {
    pub fn validate(&self) -> Result<()> {
        if self.project_id == 0 {
            return Err(LakeflowError::validation("gitlab: projectId is required"));
        }
        Ok(())
    }

    /// Scope key of the tool records collected for this project.
    pub fn scope_key(&self) -> String {
        self.project_id.to_string()
    }

    fn from_context(ctx: &TaskContext) -> Result<Self> {
        let options: Self = ctx.options()?;
        options.validate()?;
        Ok(options)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GitlabApiParams {
    connection_id: u64,
    project_id: u64,
}

pub(crate) fn raw_args(options: &GitlabOptions, table: &str) -> Result<RawDataArgs> {
    RawDataArgs::new(
        table,
        &GitlabApiParams {
            connection_id: options.connection_id,
            project_id: options.project_id,
        },
    )
}

pub(crate) fn project_id_generator() -> DomainIdGenerator {
    DomainIdGenerator::new(PLUGIN_NAME, "GitlabProject")
}

pub(crate) fn merge_request_id_generator() -> DomainIdGenerator {
    DomainIdGenerator::new(PLUGIN_NAME, "GitlabMergeRequest")
}

pub(crate) fn account_id_generator() -> DomainIdGenerator {
    DomainIdGenerator::new(PLUGIN_NAME, "GitlabAccount")
}

pub struct GitlabPlugin;

impl Plugin for GitlabPlugin {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn description(&self) -> &'static str {
        "Collect merge requests, labels and reviewers from GitLab"
    }

    fn subtask_metas(&self) -> Vec<SubtaskMeta> {
        tasks::catalogue()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeflow_shared::{TaskOptions, decode_options};
    use serde_json::json;

    #[test]
    fn project_id_is_required() {
        let options: TaskOptions = json!({"connectionId": 2, "projectId": 0})
            .as_object()
            .cloned()
            .unwrap();
        let decoded: GitlabOptions = decode_options(&options).unwrap();
        assert!(decoded.validate().is_err());
    }

    #[test]
    fn rules_default_to_empty_patterns() {
        let options: TaskOptions = json!({"connectionId": 2, "projectId": 42})
            .as_object()
            .cloned()
            .unwrap();
        let decoded: GitlabOptions = decode_options(&options).unwrap();
        assert_eq!(decoded.transformation_rules, TransformationRules::default());
        assert_eq!(
            raw_args(&decoded, RAW_MERGE_REQUEST_TABLE).unwrap().params,
            r#"{"ConnectionId":2,"ProjectId":42}"#
        );
    }
}
