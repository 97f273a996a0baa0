//! Bitbucket subtasks, in execution order.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use lakeflow_ingest::{
    ApiCollector, ApiExtractor, Convert, Converted, CursorIterator, CursorPagination,
    DataConverter, Extracted, OffsetPagination, PageTotal, SubtaskMeta, TaskContext, ToolRecord,
    decode_raw,
};
use lakeflow_shared::domain::{PullRequest, PullRequestComment};
use lakeflow_shared::{DomainIdGenerator, DomainType, LakeflowError, RawRecord, Result};
use tracing::debug;

use super::models::{
    ApiComment, ApiCommit, ApiHash, ApiPullRequest, ApiRepoRef, BitbucketCommit, BitbucketPrComment,
    BitbucketPullRequest, PullRequestInput, split_author,
};
use super::{
    BitbucketOptions, RAW_COMMIT_TABLE, RAW_PR_COMMENT_TABLE, RAW_PULL_REQUEST_TABLE,
    account_id_generator, pull_request_id_generator, raw_args, repo_id_generator,
};

/// Length of the merge commit hashes the pull request API reports.
const SHORT_SHA_LEN: usize = 12;

pub(crate) fn catalogue() -> Vec<SubtaskMeta> {
    vec![
        SubtaskMeta {
            name: "collectApiPullRequests",
            entry_point: collect_api_pull_requests,
            enabled_by_default: true,
            required: false,
            domain_types: &[DomainType::CodeReview],
            description: "Collect pull request data from the Bitbucket api",
        },
        SubtaskMeta {
            name: "extractApiPullRequests",
            entry_point: extract_api_pull_requests,
            enabled_by_default: true,
            required: false,
            domain_types: &[DomainType::CodeReview],
            description: "Extract raw pull requests into the tool layer",
        },
        SubtaskMeta {
            name: "collectApiCommits",
            entry_point: collect_api_commits,
            enabled_by_default: true,
            required: false,
            domain_types: &[DomainType::Code],
            description: "Collect commit data from the Bitbucket api",
        },
        SubtaskMeta {
            name: "extractApiCommits",
            entry_point: extract_api_commits,
            enabled_by_default: true,
            required: false,
            domain_types: &[DomainType::Code],
            description: "Extract raw commits into the tool layer",
        },
        SubtaskMeta {
            name: "collectApiPullRequestsComments",
            entry_point: collect_api_pull_request_comments,
            enabled_by_default: true,
            required: false,
            domain_types: &[DomainType::CodeReview],
            description: "Collect the comments of every collected pull request",
        },
        SubtaskMeta {
            name: "extractApiPullRequestsComments",
            entry_point: extract_api_pull_request_comments,
            enabled_by_default: true,
            required: false,
            domain_types: &[DomainType::CodeReview],
            description: "Extract raw pull request comments into the tool layer",
        },
        SubtaskMeta {
            name: "convertPullRequests",
            entry_point: convert_pull_requests,
            enabled_by_default: true,
            required: true,
            domain_types: &[DomainType::CodeReview],
            description: "Convert tool layer pull requests into domain pull requests",
        },
        SubtaskMeta {
            name: "convertPullRequestComments",
            entry_point: convert_pull_request_comments,
            enabled_by_default: true,
            required: false,
            domain_types: &[DomainType::CodeReview],
            description: "Convert tool layer comments into domain pull request comments",
        },
    ]
}

fn cursor_pages() -> Arc<CursorPagination> {
    Arc::new(CursorPagination::new("/next", "page", "pagelen").with_param("state", "all"))
}

// ---------------------------------------------------------------------------
// Pull requests
// ---------------------------------------------------------------------------

fn collect_api_pull_requests(ctx: &TaskContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let options = BitbucketOptions::from_context(ctx)?;
        let url = format!("repositories/{}/{}/pullrequests", options.owner, options.repo);
        ApiCollector::new(
            raw_args(&options, RAW_PULL_REQUEST_TABLE)?,
            &url,
            "/values",
            cursor_pages(),
        )
        .execute(ctx)
        .await?;
        Ok(())
    })
}

fn extract_api_pull_requests(ctx: &TaskContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let options = BitbucketOptions::from_context(ctx)?;
        let repo_id = options.full_name();
        let extract = move |raw: &RawRecord| -> Result<Vec<Extracted>> {
            let pr: ApiPullRequest = decode_raw(raw)?;
            Ok(vec![Extracted::new(&pull_request_record(&repo_id, pr))?])
        };
        ApiExtractor::new(
            raw_args(&options, RAW_PULL_REQUEST_TABLE)?,
            &options.full_name(),
            extract,
        )
        .execute(ctx)
        .await?;
        Ok(())
    })
}

fn pull_request_record(repo_id: &str, pr: ApiPullRequest) -> BitbucketPullRequest {
    let closed_at = match pr.state.as_str() {
        "MERGED" | "DECLINED" | "SUPERSEDED" => pr.updated_on,
        _ => None,
    };
    let repo_name = |end: &Option<ApiRepoRef>| {
        end.as_ref()
            .map(|r| r.full_name.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| repo_id.to_string())
    };
    let sha = |hash: Option<ApiHash>| hash.map(|h| h.hash).unwrap_or_default();

    BitbucketPullRequest {
        bitbucket_id: pr.id,
        repo_id: repo_id.to_string(),
        number: pr.id,
        base_repo_id: repo_name(&pr.destination.repository),
        head_repo_id: repo_name(&pr.source.repository),
        state: pr.state,
        title: pr.title,
        description: pr.description,
        url: pr.links.html.href,
        author_id: pr.author.account_id,
        author_name: pr.author.display_name,
        pr_type: String::new(),
        component: String::new(),
        bitbucket_created_at: pr.created_on,
        bitbucket_updated_at: pr.updated_on,
        // Filled from the merge commit at conversion time.
        merged_at: None,
        closed_at,
        merge_commit_sha: sha(pr.merge_commit),
        base_ref: pr.destination.branch.name,
        base_commit_sha: sha(pr.destination.commit),
        head_ref: pr.source.branch.name,
        head_commit_sha: sha(pr.source.commit),
    }
}

// ---------------------------------------------------------------------------
// Commits
// ---------------------------------------------------------------------------

fn collect_api_commits(ctx: &TaskContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let options = BitbucketOptions::from_context(ctx)?;
        let url = format!("repositories/{}/{}/commits", options.owner, options.repo);
        let pages = OffsetPagination::new("page", "pagelen", PageTotal::Reported("/size".into()))
            .with_param("state", "all");
        ApiCollector::new(
            raw_args(&options, RAW_COMMIT_TABLE)?,
            &url,
            "/values",
            Arc::new(pages),
        )
        .execute(ctx)
        .await?;
        Ok(())
    })
}

fn extract_api_commits(ctx: &TaskContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let options = BitbucketOptions::from_context(ctx)?;
        let repo_id = options.full_name();
        let extract = move |raw: &RawRecord| -> Result<Vec<Extracted>> {
            let commit: ApiCommit = decode_raw(raw)?;
            let (author_name, author_email) = split_author(&commit.author.raw);
            let record = BitbucketCommit {
                sha: commit.hash,
                repo_id: repo_id.clone(),
                message: commit.message,
                author_name,
                author_email,
                author_id: commit.author.user.map(|u| u.account_id).unwrap_or_default(),
                committed_date: commit.date,
            };
            Ok(vec![Extracted::new(&record)?])
        };
        ApiExtractor::new(raw_args(&options, RAW_COMMIT_TABLE)?, &options.full_name(), extract)
            .execute(ctx)
            .await?;
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Pull request comments
// ---------------------------------------------------------------------------

fn collect_api_pull_request_comments(ctx: &TaskContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let options = BitbucketOptions::from_context(ctx)?;
        let pull_requests = CursorIterator::<PullRequestInput>::open(
            &ctx.storage,
            options.connection_id,
            BitbucketPullRequest::RECORD_TYPE,
            &options.full_name(),
        )
        .await?;
        let url = format!(
            "repositories/{}/{}/pullrequests/{{bitbucket_id}}/comments",
            options.owner, options.repo
        );
        let summary = ApiCollector::new(
            raw_args(&options, RAW_PR_COMMENT_TABLE)?,
            &url,
            "/values",
            cursor_pages(),
        )
        .with_input(Box::new(pull_requests))
        .execute(ctx)
        .await?;
        debug!(skipped = summary.skipped, "pull requests without comments");
        Ok(())
    })
}

fn extract_api_pull_request_comments(ctx: &TaskContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let options = BitbucketOptions::from_context(ctx)?;
        let repo_id = options.full_name();
        let extract = move |raw: &RawRecord| -> Result<Vec<Extracted>> {
            let comment: ApiComment = decode_raw(raw)?;
            let pull_request_id = comment
                .pullrequest
                .as_ref()
                .map(|pr| pr.id)
                .or_else(|| {
                    raw.input
                        .as_ref()
                        .and_then(|input| input.get("bitbucket_id"))
                        .and_then(serde_json::Value::as_u64)
                })
                .ok_or_else(|| {
                    LakeflowError::decode(raw.origin(), "comment names no pull request")
                })?;
            let record = BitbucketPrComment {
                bitbucket_id: comment.id,
                repo_id: repo_id.clone(),
                pull_request_id,
                body: comment.content.raw,
                author_id: comment.user.account_id,
                author_name: comment.user.display_name,
                created_at: comment.created_on,
            };
            Ok(vec![Extracted::new(&record)?])
        };
        ApiExtractor::new(
            raw_args(&options, RAW_PR_COMMENT_TABLE)?,
            &options.full_name(),
            extract,
        )
        .execute(ctx)
        .await?;
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

struct PullRequestConverter {
    connection_id: u64,
}

#[async_trait]
impl Convert for PullRequestConverter {
    type Input = BitbucketPullRequest;

    async fn convert(&self, ctx: &TaskContext, pr: BitbucketPullRequest) -> Result<Vec<Converted>> {
        let short_sha: String = pr.merge_commit_sha.chars().take(SHORT_SHA_LEN).collect();
        let merge_commit = if short_sha.is_empty() {
            None
        } else {
            ctx.storage
                .find_tool_record_by_key_prefix(
                    self.connection_id,
                    BitbucketCommit::RECORD_TYPE,
                    &format!("{}#{short_sha}", pr.repo_id),
                )
                .await?
                .and_then(|data| serde_json::from_value::<BitbucketCommit>(data).ok())
        };
        let merged_date = merge_commit.map(|commit| commit.committed_date);

        let repos = repo_id_generator();
        let entity = PullRequest {
            id: pull_request_id_generator()
                .generate(self.connection_id, &[&pr.repo_id, &pr.bitbucket_id]),
            base_repo_id: repos.generate(self.connection_id, &[&pr.base_repo_id]),
            head_repo_id: repos.generate(self.connection_id, &[&pr.head_repo_id]),
            status: pr.state,
            title: pr.title,
            description: pr.description,
            url: pr.url,
            author_id: account_id_generator().generate(self.connection_id, &[&pr.author_id]),
            author_name: pr.author_name,
            created_date: pr.bitbucket_created_at,
            merged_date,
            closed_date: pr.closed_at,
            pull_request_key: pr.number,
            pr_type: pr.pr_type,
            component: pr.component,
            merge_commit_sha: pr.merge_commit_sha,
            base_ref: pr.base_ref,
            base_commit_sha: pr.base_commit_sha,
            head_ref: pr.head_ref,
            head_commit_sha: pr.head_commit_sha,
        };
        Ok(vec![Converted::new(&entity)?])
    }
}

fn convert_pull_requests(ctx: &TaskContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let options = BitbucketOptions::from_context(ctx)?;
        DataConverter::new(
            raw_args(&options, RAW_PULL_REQUEST_TABLE)?,
            BitbucketPullRequest::RECORD_TYPE,
            &options.full_name(),
            PullRequestConverter {
                connection_id: options.connection_id,
            },
        )
        .execute(ctx)
        .await?;
        Ok(())
    })
}

struct CommentConverter {
    connection_id: u64,
}

#[async_trait]
impl Convert for CommentConverter {
    type Input = BitbucketPrComment;

    async fn convert(&self, _ctx: &TaskContext, comment: BitbucketPrComment) -> Result<Vec<Converted>> {
        let entity = PullRequestComment {
            id: DomainIdGenerator::new(super::PLUGIN_NAME, "BitbucketPrComment")
                .generate(self.connection_id, &[&comment.repo_id, &comment.bitbucket_id]),
            pull_request_id: pull_request_id_generator()
                .generate(self.connection_id, &[&comment.repo_id, &comment.pull_request_id]),
            body: comment.body,
            account_id: account_id_generator().generate(self.connection_id, &[&comment.author_id]),
            created_date: comment.created_at,
        };
        Ok(vec![Converted::new(&entity)?])
    }
}

fn convert_pull_request_comments(ctx: &TaskContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let options = BitbucketOptions::from_context(ctx)?;
        DataConverter::new(
            raw_args(&options, RAW_PR_COMMENT_TABLE)?,
            BitbucketPrComment::RECORD_TYPE,
            &options.full_name(),
            CommentConverter {
                connection_id: options.connection_id,
            },
        )
        .execute(ctx)
        .await?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeflow_ingest::{ApiClient, HttpConfig, Plugin, resolve_subtasks};
    use lakeflow_shared::{Connection, Credentials, TaskOptions};
    use lakeflow_storage::Storage;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use url::Url;
    use uuid::Uuid;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::bitbucket::BitbucketPlugin;

    async fn context(server: &MockServer) -> TaskContext {
        let tmp = std::env::temp_dir().join(format!("lakeflow_bitbucket_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&tmp).await.unwrap());
        context_for(server, storage, "apache")
    }

    fn context_for(server: &MockServer, storage: Arc<Storage>, owner: &str) -> TaskContext {
        let connection = Connection {
            id: 1,
            plugin: "bitbucket".into(),
            endpoint: Url::parse(&format!("{}/2.0/", server.uri())).unwrap(),
            credentials: Credentials::None,
        };
        let client = Arc::new(ApiClient::new(&connection, &HttpConfig::default()).unwrap());
        let options: TaskOptions = json!({"connectionId": 1, "owner": owner, "repo": "lake"})
            .as_object()
            .cloned()
            .unwrap();
        TaskContext::new(options, storage, CancellationToken::new())
            .with_connection(connection, client)
            .with_page_size(2)
    }

    fn pr(id: u64, merge_hash: Option<&str>) -> serde_json::Value {
        json!({
            "id": id,
            "title": format!("PR {id}"),
            "description": "",
            "state": if merge_hash.is_some() { "MERGED" } else { "OPEN" },
            "type": "pullrequest",
            "created_on": "2023-03-01T10:00:00+00:00",
            "updated_on": "2023-03-02T10:00:00+00:00",
            "author": {"account_id": "acc-1", "display_name": "Jane"},
            "merge_commit": merge_hash.map(|h| json!({"hash": h})),
            "links": {"html": {"href": format!("https://bitbucket.org/apache/lake/pull-requests/{id}")}},
            "source": {"branch": {"name": "feature"}, "commit": {"hash": "aaa"}, "repository": {"full_name": "fork/lake"}},
            "destination": {"branch": {"name": "main"}, "commit": {"hash": "bbb"}, "repository": {"full_name": "apache/lake"}}
        })
    }

    async fn run(ctx: &TaskContext, names: &[&str]) {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let subtasks = resolve_subtasks(&BitbucketPlugin, &names).unwrap();
        BitbucketPlugin.execute(ctx, &subtasks).await.unwrap();
    }

    #[tokio::test]
    async fn merged_date_comes_from_the_merge_commit() {
        let server = MockServer::start().await;
        let next = format!(
            "{}/2.0/repositories/apache/lake/pullrequests?page=tok2&pagelen=2",
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/2.0/repositories/apache/lake/pullrequests"))
            .and(query_param_is_missing("page"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [pr(1, Some("0123456789ab")), pr(2, Some("ffffffffffff"))],
                "next": next
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2.0/repositories/apache/lake/pullrequests"))
            .and(query_param("page", "tok2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [pr(3, None)]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2.0/repositories/apache/lake/commits"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "size": 1,
                "values": [{
                    "hash": "0123456789abcdef0123456789abcdef01234567",
                    "message": "merge",
                    "date": "2023-03-05T12:00:00+00:00",
                    "author": {"raw": "Jane <jane@example.com>"}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = context(&server).await;
        run(
            &ctx,
            &[
                "collectApiPullRequests",
                "extractApiPullRequests",
                "collectApiCommits",
                "extractApiCommits",
                "convertPullRequests",
            ],
        )
        .await;

        let ids = DomainIdGenerator::new("bitbucket", "BitbucketPullRequest");
        let merged = ctx
            .storage
            .get_domain_entity("pull_requests", ids.generate(1, &[&"apache/lake", &1]).as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged["merged_date"], "2023-03-05T12:00:00Z");
        assert_eq!(merged["base_repo_id"], "bitbucket:BitbucketRepo:1:apache/lake");
        assert_eq!(merged["head_repo_id"], "bitbucket:BitbucketRepo:1:fork/lake");

        // Merge commit never collected: the join misses, the field stays empty.
        let orphan = ctx
            .storage
            .get_domain_entity("pull_requests", ids.generate(1, &[&"apache/lake", &2]).as_str())
            .await
            .unwrap()
            .unwrap();
        assert!(orphan["merged_date"].is_null());
        assert_eq!(orphan["status"], "MERGED");

        assert_eq!(ctx.storage.count_domain_entities("pull_requests").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn comments_skip_pull_requests_that_vanished() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2.0/repositories/apache/lake/pullrequests"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [pr(1, None), pr(2, None)]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2.0/repositories/apache/lake/pullrequests/1/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [{
                    "id": 10,
                    "content": {"raw": "looks good"},
                    "user": {"account_id": "acc-2", "display_name": "Bob"},
                    "created_on": "2023-03-01T11:00:00+00:00",
                    "pullrequest": {"id": 1}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2.0/repositories/apache/lake/pullrequests/2/comments"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = context(&server).await;
        run(
            &ctx,
            &[
                "collectApiPullRequests",
                "extractApiPullRequests",
                "collectApiPullRequestsComments",
                "extractApiPullRequestsComments",
                "convertPullRequestComments",
            ],
        )
        .await;

        assert_eq!(ctx.storage.count_tool_records(1, "BitbucketPrComment").await.unwrap(), 1);
        let comment_id = DomainIdGenerator::new("bitbucket", "BitbucketPrComment")
            .generate(1, &[&"apache/lake", &10]);
        let comment = ctx
            .storage
            .get_domain_entity("pull_request_comments", comment_id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(comment["body"], "looks good");
        assert_eq!(
            comment["pull_request_id"],
            DomainIdGenerator::new("bitbucket", "BitbucketPullRequest")
                .generate(1, &[&"apache/lake", &1])
                .as_str()
        );
    }

    #[tokio::test]
    async fn offset_commits_stop_at_the_reported_total() {
        let server = MockServer::start().await;
        for page in 1..=3 {
            Mock::given(method("GET"))
                .and(path("/2.0/repositories/apache/lake/commits"))
                .and(query_param("page", page.to_string()))
                .and(query_param("state", "all"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "size": 5,
                    "values": [{
                        "hash": format!("{page:040}"),
                        "message": "m",
                        "date": "2023-03-05T12:00:00+00:00",
                        "author": {"raw": "ci"}
                    }]
                })))
                .expect(1)
                .mount(&server)
                .await;
        }

        let ctx = context(&server).await;
        run(&ctx, &["collectApiCommits", "extractApiCommits"]).await;
        assert_eq!(ctx.storage.count_tool_records(1, "BitbucketCommit").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn fork_and_upstream_keep_their_own_copy_of_a_shared_commit() {
        let server = MockServer::start().await;
        let shared = json!({
            "hash": "0123456789abcdef0123456789abcdef01234567",
            "message": "merge",
            "date": "2023-03-05T12:00:00+00:00",
            "author": {"raw": "Jane <jane@example.com>"}
        });
        Mock::given(method("GET"))
            .and(path("/2.0/repositories/apache/lake/pullrequests"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [pr(1, Some("0123456789ab"))]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2.0/repositories/apache/lake/commits"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "size": 1,
                "values": [shared.clone()]
            })))
            .mount(&server)
            .await;
        // The fork serves the shared commit once, then nothing.
        Mock::given(method("GET"))
            .and(path("/2.0/repositories/fork/lake/commits"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "size": 1,
                "values": [shared]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2.0/repositories/fork/lake/commits"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "size": 0,
                "values": []
            })))
            .mount(&server)
            .await;

        let upstream = context(&server).await;
        let fork = context_for(&server, upstream.storage.clone(), "fork");
        let commits = ["collectApiCommits", "extractApiCommits"];
        run(&upstream, &["collectApiPullRequests", "extractApiPullRequests"]).await;
        run(&upstream, &commits).await;
        run(&fork, &commits).await;
        assert_eq!(upstream.storage.count_tool_records(1, "BitbucketCommit").await.unwrap(), 2);

        run(&fork, &commits).await;
        assert_eq!(upstream.storage.count_tool_records(1, "BitbucketCommit").await.unwrap(), 1);

        run(&upstream, &["convertPullRequests"]).await;
        let id = DomainIdGenerator::new("bitbucket", "BitbucketPullRequest")
            .generate(1, &[&"apache/lake", &1]);
        let merged = upstream
            .storage
            .get_domain_entity("pull_requests", id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged["merged_date"], "2023-03-05T12:00:00Z");
    }
}
