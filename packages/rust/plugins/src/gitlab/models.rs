use chrono::{DateTime, Utc};
use lakeflow_ingest::ToolRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiUser {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub web_url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiMergeRequest {
    pub id: u64,
    pub iid: u64,
    #[serde(default)]
    pub project_id: u64,
    #[serde(default)]
    pub source_project_id: u64,
    #[serde(default)]
    pub target_project_id: u64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub user_notes_count: u64,
    #[serde(default)]
    pub work_in_progress: bool,
    #[serde(default)]
    pub source_branch: String,
    #[serde(default)]
    pub target_branch: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merge_commit_sha: Option<String>,
    #[serde(default)]
    pub merged_by: Option<ApiUser>,
    #[serde(default)]
    pub author: ApiUser,
    #[serde(default)]
    pub reviewers: Vec<ApiUser>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// `GET projects/{id}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiProject {
    pub id: u64,
    #[serde(default)]
    pub path_with_namespace: String,
    #[serde(default)]
    pub http_url_to_repo: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitlabMergeRequest {
    pub gitlab_id: u64,
    pub iid: u64,
    pub project_id: u64,
    pub source_project_id: u64,
    pub target_project_id: u64,
    pub state: String,
    pub title: String,
    pub description: String,
    pub web_url: String,
    pub user_notes_count: u64,
    pub work_in_progress: bool,
    pub source_branch: String,
    pub target_branch: String,
    pub merge_commit_sha: String,
    pub gitlab_created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_by_username: String,
    pub author_username: String,
    pub author_user_id: u64,
    #[serde(rename = "type")]
    pub pr_type: String,
    pub component: String,
    /// Old GitLab versions omit the close timestamps from list responses.
    pub is_detail_required: bool,
}

impl ToolRecord for GitlabMergeRequest {
    const RECORD_TYPE: &'static str = "GitlabMergeRequest";

    fn natural_key(&self) -> String {
        self.gitlab_id.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitlabMrLabel {
    pub mr_id: u64,
    pub label_name: String,
}

impl ToolRecord for GitlabMrLabel {
    const RECORD_TYPE: &'static str = "GitlabMrLabel";

    fn natural_key(&self) -> String {
        format!("{}#{}", self.mr_id, self.label_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitlabReviewer {
    pub gitlab_id: u64,
    pub merge_request_id: u64,
    pub project_id: u64,
    pub username: String,
    pub name: String,
    pub state: String,
    pub web_url: String,
}

impl ToolRecord for GitlabReviewer {
    const RECORD_TYPE: &'static str = "GitlabReviewer";

    fn natural_key(&self) -> String {
        format!("{}#{}", self.merge_request_id, self.gitlab_id)
    }
}
