//! Bitbucket API payloads and the tool records extracted from them.

use chrono::{DateTime, Utc};
use lakeflow_ingest::ToolRecord;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// API payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiLink {
    #[serde(default)]
    pub href: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiAccount {
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiHash {
    #[serde(default)]
    pub hash: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiBranch {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiRepoRef {
    #[serde(default)]
    pub full_name: String,
}

/// One side (source or destination) of a pull request.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiPullRequestEnd {
    #[serde(default)]
    pub branch: ApiBranch,
    #[serde(default)]
    pub commit: Option<ApiHash>,
    #[serde(default)]
    pub repository: Option<ApiRepoRef>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiPullRequestLinks {
    #[serde(default)]
    pub html: ApiLink,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiPullRequest {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub state: String,
    pub created_on: DateTime<Utc>,
    pub updated_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub author: ApiAccount,
    #[serde(default)]
    pub merge_commit: Option<ApiHash>,
    #[serde(default)]
    pub links: ApiPullRequestLinks,
    #[serde(default)]
    pub source: ApiPullRequestEnd,
    #[serde(default)]
    pub destination: ApiPullRequestEnd,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiCommitAuthor {
    #[serde(default)]
    pub raw: String,
    #[serde(default)]
    pub user: Option<ApiAccount>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiCommit {
    pub hash: String,
    #[serde(default)]
    pub message: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub author: ApiCommitAuthor,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiContent {
    #[serde(default)]
    pub raw: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiPullRequestRef {
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiComment {
    pub id: u64,
    #[serde(default)]
    pub content: ApiContent,
    #[serde(default)]
    pub user: ApiAccount,
    pub created_on: DateTime<Utc>,
    #[serde(default)]
    pub pullrequest: Option<ApiPullRequestRef>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiCloneLink {
    pub name: String,
    pub href: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiRepoLinks {
    #[serde(default)]
    pub clone: Vec<ApiCloneLink>,
}

/// `GET repositories/{owner}/{repo}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiRepo {
    pub full_name: String,
    #[serde(default)]
    pub links: ApiRepoLinks,
}

// ---------------------------------------------------------------------------
// Tool records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitbucketPullRequest {
    pub bitbucket_id: u64,
    /// `owner/repo` of the repository the pull request was collected from.
    pub repo_id: String,
    pub number: u64,
    pub base_repo_id: String,
    pub head_repo_id: String,
    pub state: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub author_id: String,
    pub author_name: String,
    #[serde(rename = "type")]
    pub pr_type: String,
    pub component: String,
    pub bitbucket_created_at: DateTime<Utc>,
    pub bitbucket_updated_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Short hash as reported by the API.
    pub merge_commit_sha: String,
    pub base_ref: String,
    pub base_commit_sha: String,
    pub head_ref: String,
    pub head_commit_sha: String,
}

impl ToolRecord for BitbucketPullRequest {
    const RECORD_TYPE: &'static str = "BitbucketPullRequest";

    fn natural_key(&self) -> String {
        format!("{}#{}", self.repo_id, self.bitbucket_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitbucketCommit {
    pub sha: String,
    pub repo_id: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub author_id: String,
    pub committed_date: DateTime<Utc>,
}

impl ToolRecord for BitbucketCommit {
    const RECORD_TYPE: &'static str = "BitbucketCommit";

    /// Forks share history, so the same sha can belong to several repositories.
    fn natural_key(&self) -> String {
        format!("{}#{}", self.repo_id, self.sha)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitbucketPrComment {
    pub bitbucket_id: u64,
    pub repo_id: String,
    pub pull_request_id: u64,
    pub body: String,
    pub author_id: String,
    pub author_name: String,
    pub created_at: DateTime<Utc>,
}

impl ToolRecord for BitbucketPrComment {
    const RECORD_TYPE: &'static str = "BitbucketPrComment";

    fn natural_key(&self) -> String {
        format!("{}#{}", self.repo_id, self.bitbucket_id)
    }
}

/// Input key of the comment collector: one pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PullRequestInput {
    pub bitbucket_id: u64,
}

/// Split a raw git author (`Name <email>`) into its parts.
pub(crate) fn split_author(raw: &str) -> (String, String) {
    match (raw.find('<'), raw.rfind('>')) {
        (Some(open), Some(close)) if open < close => (
            raw[..open].trim().to_string(),
            raw[open + 1..close].trim().to_string(),
        ),
        _ => (raw.trim().to_string(), String::new()),
    }
}
