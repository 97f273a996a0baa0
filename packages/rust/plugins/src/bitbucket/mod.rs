//! Bitbucket Cloud connector: pull requests, commits and pull request
//! comments of one repository.

mod models;
mod planner;
mod tasks;

use lakeflow_ingest::{Plugin, RawDataArgs, SubtaskMeta, TaskContext};
use lakeflow_shared::{DomainIdGenerator, LakeflowError, Result};
use serde::{Deserialize, Serialize};

pub use models::{BitbucketCommit, BitbucketPrComment, BitbucketPullRequest};
pub use planner::BitbucketResolver;

pub const PLUGIN_NAME: &str = "bitbucket";

pub(crate) const RAW_PULL_REQUEST_TABLE: &str = "_raw_bitbucket_api_pull_requests";
pub(crate) const RAW_COMMIT_TABLE: &str = "_raw_bitbucket_api_commits";
pub(crate) const RAW_PR_COMMENT_TABLE: &str = "_raw_bitbucket_api_pull_request_comments";

/// Issue status mapping. Carried through plans, unused by the current
/// subtasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationRules {
    #[serde(default)]
    pub issue_status_todo: Vec<String>,
    #[serde(default)]
    pub issue_status_in_progress: Vec<String>,
    #[serde(default)]
    pub issue_status_done: Vec<String>,
    #[serde(default)]
    pub issue_status_other: Vec<String>,
}

/// Options of a bitbucket task.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitbucketOptions {
    pub connection_id: u64,
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub transformation_rules: TransformationRules,
}

impl BitbucketOptions {
    pub fn validate(&self) -> Result<()> {
        if self.owner.is_empty() {
            return Err(LakeflowError::validation("bitbucket: owner is required"));
        }
        if self.repo.is_empty() {
            return Err(LakeflowError::validation("bitbucket: repo is required"));
        }
        Ok(())
    }

    /// `owner/repo`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    fn from_context(ctx: &TaskContext) -> Result<Self> {
        let options: Self = ctx.options()?;
        options.validate()?;
        Ok(options)
    }
}

/// Raw data fingerprint: everything that identifies one repository's
/// collection.
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct BitbucketApiParams<'a> {
    connection_id: u64,
    owner: &'a str,
    repo: &'a str,
}

pub(crate) fn raw_args(options: &BitbucketOptions, table: &str) -> Result<RawDataArgs> {
    RawDataArgs::new(
        table,
        &BitbucketApiParams {
            connection_id: options.connection_id,
            owner: &options.owner,
            repo: &options.repo,
        },
    )
}

pub(crate) fn repo_id_generator() -> DomainIdGenerator {
    DomainIdGenerator::new(PLUGIN_NAME, "BitbucketRepo")
}

pub(crate) fn pull_request_id_generator() -> DomainIdGenerator {
    DomainIdGenerator::new(PLUGIN_NAME, "BitbucketPullRequest")
}

pub(crate) fn account_id_generator() -> DomainIdGenerator {
    DomainIdGenerator::new(PLUGIN_NAME, "BitbucketAccount")
}

pub struct BitbucketPlugin;

impl Plugin for BitbucketPlugin {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn description(&self) -> &'static str {
        "Collect pull requests, commits and comments from Bitbucket Cloud"
    }

    fn subtask_metas(&self) -> Vec<SubtaskMeta> {
        tasks::catalogue()
    }
}
