use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use lakeflow_ingest::{
    ApiCollector, ApiExtractor, Convert, Converted, DataConverter, Extracted, OffsetPagination,
    PageTotal, SubtaskMeta, TaskContext, ToolRecord, decode_raw,
};
use lakeflow_shared::domain::{PullRequest, PullRequestLabel};
use lakeflow_shared::{DomainIdGenerator, DomainType, LakeflowError, RawRecord, Result};
use regex::Regex;

use super::models::{ApiMergeRequest, GitlabMergeRequest, GitlabMrLabel, GitlabReviewer};
use super::{
    GitlabOptions, PLUGIN_NAME, RAW_MERGE_REQUEST_TABLE, account_id_generator,
    merge_request_id_generator, project_id_generator, raw_args,
};

pub(crate) fn catalogue() -> Vec<SubtaskMeta> {
    vec![
        SubtaskMeta {
            name: "collectApiMergeRequests",
            entry_point: collect_api_merge_requests,
            enabled_by_default: true,
            required: false,
            domain_types: &[DomainType::CodeReview],
            description: "Collect merge request data from the GitLab api",
        },
        SubtaskMeta {
            name: "extractApiMergeRequests",
            entry_point: extract_api_merge_requests,
            enabled_by_default: true,
            required: false,
            domain_types: &[DomainType::CodeReview],
            description: "Extract raw merge requests into merge request, label and reviewer records",
        },
        SubtaskMeta {
            name: "convertApiMergeRequests",
            entry_point: convert_api_merge_requests,
            enabled_by_default: true,
            required: false,
            domain_types: &[DomainType::CodeReview],
            description: "Convert tool layer merge requests into domain pull requests",
        },
        SubtaskMeta {
            name: "convertMrLabels",
            entry_point: convert_mr_labels,
            enabled_by_default: true,
            required: false,
            domain_types: &[DomainType::CodeReview],
            description: "Convert merge request labels into domain pull request labels",
        },
    ]
}

fn collect_api_merge_requests(ctx: &TaskContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let options = GitlabOptions::from_context(ctx)?;
        let url = format!("projects/{}/merge_requests", options.project_id);
        let pages = OffsetPagination::new("page", "per_page", PageTotal::UntilEmpty)
            .with_param("state", "all");
        ApiCollector::new(
            raw_args(&options, RAW_MERGE_REQUEST_TABLE)?,
            &url,
            "",
            Arc::new(pages),
        )
        .execute(ctx)
        .await?;
        Ok(())
    })
}

/// Compile an optional label pattern. An empty pattern disables it.
fn label_pattern(name: &str, pattern: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|e| LakeflowError::validation(format!("gitlab: invalid {name} pattern: {e}")))
}

/// First capture group of `pattern` in `label`, if any.
fn capture(pattern: Option<&Regex>, label: &str) -> Option<String> {
    pattern?
        .captures(label)?
        .get(1)
        .map(|group| group.as_str().to_string())
}

fn extract_api_merge_requests(ctx: &TaskContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let options = GitlabOptions::from_context(ctx)?;
        let rules = &options.transformation_rules;
        let type_pattern = label_pattern("prType", &rules.pr_type)?;
        let component_pattern = label_pattern("prComponent", &rules.pr_component)?;
        let project_id = options.project_id;

        let extract = move |raw: &RawRecord| -> Result<Vec<Extracted>> {
            let mr: ApiMergeRequest = decode_raw(raw)?;
            let mut record = merge_request_record(mr.id, &mr);
            record.is_detail_required = !contains(&raw.data, br#""merged_at":"#)
                && !contains(&raw.data, br#""closed_at":"#);

            let mut out = Vec::with_capacity(1 + mr.labels.len() + mr.reviewers.len());
            for label in &mr.labels {
                out.push(Extracted::new(&GitlabMrLabel {
                    mr_id: mr.id,
                    label_name: label.clone(),
                })?);
                // Later labels override earlier matches.
                if let Some(pr_type) = capture(type_pattern.as_ref(), label) {
                    record.pr_type = pr_type;
                }
                if let Some(component) = capture(component_pattern.as_ref(), label) {
                    record.component = component;
                }
            }
            for reviewer in &mr.reviewers {
                out.push(Extracted::new(&GitlabReviewer {
                    gitlab_id: reviewer.id,
                    merge_request_id: mr.id,
                    project_id,
                    username: reviewer.username.clone(),
                    name: reviewer.name.clone(),
                    state: reviewer.state.clone(),
                    web_url: reviewer.web_url.clone(),
                })?);
            }
            out.insert(0, Extracted::new(&record)?);
            Ok(out)
        };

        ApiExtractor::new(
            raw_args(&options, RAW_MERGE_REQUEST_TABLE)?,
            &options.scope_key(),
            extract,
        )
        .execute(ctx)
        .await?;
        Ok(())
    })
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn merge_request_record(gitlab_id: u64, mr: &ApiMergeRequest) -> GitlabMergeRequest {
    GitlabMergeRequest {
        gitlab_id,
        iid: mr.iid,
        project_id: mr.project_id,
        source_project_id: mr.source_project_id,
        target_project_id: mr.target_project_id,
        state: mr.state.clone(),
        title: mr.title.clone(),
        description: mr.description.clone().unwrap_or_default(),
        web_url: mr.web_url.clone(),
        user_notes_count: mr.user_notes_count,
        work_in_progress: mr.work_in_progress,
        source_branch: mr.source_branch.clone(),
        target_branch: mr.target_branch.clone(),
        merge_commit_sha: mr.merge_commit_sha.clone().unwrap_or_default(),
        gitlab_created_at: mr.created_at,
        merged_at: mr.merged_at,
        closed_at: mr.closed_at,
        merged_by_username: mr
            .merged_by
            .as_ref()
            .map(|user| user.username.clone())
            .unwrap_or_default(),
        author_username: mr.author.username.clone(),
        author_user_id: mr.author.id,
        pr_type: String::new(),
        component: String::new(),
        is_detail_required: false,
    }
}

struct MergeRequestConverter {
    connection_id: u64,
}

#[async_trait]
impl Convert for MergeRequestConverter {
    type Input = GitlabMergeRequest;

    async fn convert(&self, _ctx: &TaskContext, mr: GitlabMergeRequest) -> Result<Vec<Converted>> {
        let projects = project_id_generator();
        let entity = PullRequest {
            id: merge_request_id_generator().generate(self.connection_id, &[&mr.gitlab_id]),
            base_repo_id: projects.generate(self.connection_id, &[&mr.target_project_id]),
            head_repo_id: projects.generate(self.connection_id, &[&mr.source_project_id]),
            status: mr.state,
            title: mr.title,
            description: mr.description,
            url: mr.web_url,
            author_id: account_id_generator().generate(self.connection_id, &[&mr.author_user_id]),
            author_name: mr.author_username,
            created_date: mr.gitlab_created_at,
            merged_date: mr.merged_at,
            closed_date: mr.closed_at,
            pull_request_key: mr.iid,
            pr_type: mr.pr_type,
            component: mr.component,
            merge_commit_sha: mr.merge_commit_sha,
            base_ref: mr.target_branch,
            base_commit_sha: String::new(),
            head_ref: mr.source_branch,
            head_commit_sha: String::new(),
        };
        Ok(vec![Converted::new(&entity)?])
    }
}

fn convert_api_merge_requests(ctx: &TaskContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let options = GitlabOptions::from_context(ctx)?;
        DataConverter::new(
            raw_args(&options, RAW_MERGE_REQUEST_TABLE)?,
            GitlabMergeRequest::RECORD_TYPE,
            &options.scope_key(),
            MergeRequestConverter {
                connection_id: options.connection_id,
            },
        )
        .execute(ctx)
        .await?;
        Ok(())
    })
}

struct LabelConverter {
    connection_id: u64,
}

#[async_trait]
impl Convert for LabelConverter {
    type Input = GitlabMrLabel;

    async fn convert(&self, _ctx: &TaskContext, label: GitlabMrLabel) -> Result<Vec<Converted>> {
        let entity = PullRequestLabel {
            id: DomainIdGenerator::new(PLUGIN_NAME, "GitlabMrLabel")
                .generate(self.connection_id, &[&label.mr_id, &label.label_name]),
            pull_request_id: merge_request_id_generator()
                .generate(self.connection_id, &[&label.mr_id]),
            label_name: label.label_name,
        };
        Ok(vec![Converted::new(&entity)?])
    }
}

fn convert_mr_labels(ctx: &TaskContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let options = GitlabOptions::from_context(ctx)?;
        DataConverter::new(
            raw_args(&options, RAW_MERGE_REQUEST_TABLE)?,
            GitlabMrLabel::RECORD_TYPE,
            &options.scope_key(),
            LabelConverter {
                connection_id: options.connection_id,
            },
        )
        .execute(ctx)
        .await?;
        Ok(())
    })
}
