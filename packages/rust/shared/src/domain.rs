//! Canonical cross-source entities written to the domain layer.
//!
//! Entities reference each other by [`DomainId`], never by pointer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::didgen::DomainId;

/// A canonical entity stored in the domain layer.
pub trait DomainEntity: Serialize {
    /// Logical table the entity belongs to.
    const ENTITY_TYPE: &'static str;

    fn id(&self) -> &DomainId;
}

/// A pull request or merge request, whatever the code host calls it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: DomainId,
    pub base_repo_id: DomainId,
    pub head_repo_id: DomainId,
    pub status: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub author_id: DomainId,
    pub author_name: String,
    pub created_date: DateTime<Utc>,
    pub merged_date: Option<DateTime<Utc>>,
    pub closed_date: Option<DateTime<Utc>>,
    pub pull_request_key: u64,
    #[serde(rename = "type")]
    pub pr_type: String,
    pub component: String,
    pub merge_commit_sha: String,
    pub base_ref: String,
    pub base_commit_sha: String,
    pub head_ref: String,
    pub head_commit_sha: String,
}

impl DomainEntity for PullRequest {
    const ENTITY_TYPE: &'static str = "pull_requests";

    fn id(&self) -> &DomainId {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestComment {
    pub id: DomainId,
    pub pull_request_id: DomainId,
    pub body: String,
    pub account_id: DomainId,
    pub created_date: DateTime<Utc>,
}

impl DomainEntity for PullRequestComment {
    const ENTITY_TYPE: &'static str = "pull_request_comments";

    fn id(&self) -> &DomainId {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestLabel {
    pub id: DomainId,
    pub pull_request_id: DomainId,
    pub label_name: String,
}

impl DomainEntity for PullRequestLabel {
    const ENTITY_TYPE: &'static str = "pull_request_labels";

    fn id(&self) -> &DomainId {
        &self.id
    }
}

/// A project scanned by a security testing tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StProject {
    pub id: DomainId,
    pub name: String,
    pub qualifier: String,
    pub visibility: String,
    pub last_analysis_date: Option<DateTime<Utc>>,
}

impl DomainEntity for StProject {
    const ENTITY_TYPE: &'static str = "st_projects";

    fn id(&self) -> &DomainId {
        &self.id
    }
}
