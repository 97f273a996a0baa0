//! Raw capture: paginated fetches written page by page into a raw table.
//!
//! A collector run opens a new generation for its fingerprint, writes every
//! page in its own transaction, and commits the generation only once the
//! whole collection finished. Readers keep seeing the previous generation
//! until then, and a failed or cancelled run is discarded.

use std::sync::Arc;
use std::time::Instant;

use lakeflow_shared::{LakeflowError, Result};
use lakeflow_storage::Generation;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::context::TaskContext;
use crate::iterator::InputSource;
use crate::pagination::{NextPage, PaginationStrategy};

/// Raw table and parameter fingerprint shared by a collector and the
/// extractor that reads its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDataArgs {
    pub table: String,
    pub params: String,
}

impl RawDataArgs {
    /// `params` is serialized to JSON and used verbatim as the fingerprint,
    /// so its field order must be stable.
    pub fn new<P: Serialize>(table: &str, params: &P) -> Result<Self> {
        let params = serde_json::to_string(params)
            .map_err(|e| LakeflowError::validation(format!("unserializable raw params: {e}")))?;
        Ok(Self {
            table: table.to_string(),
            params,
        })
    }
}

/// Counters reported by one collector run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectSummary {
    pub requests: usize,
    pub records: usize,
    /// Inputs whose resource answered 404.
    pub skipped: usize,
}

/// Paginated API collector.
pub struct ApiCollector {
    raw: RawDataArgs,
    request: PageRequest,
    input: Option<Box<dyn InputSource>>,
}

/// What to request and how to walk its pages.
struct PageRequest {
    url_template: String,
    items_pointer: String,
    pagination: Arc<dyn PaginationStrategy>,
}

impl ApiCollector {
    /// `url_template` is relative to the connection endpoint and may contain
    /// `{field}` placeholders filled from each input. `items_pointer` locates
    /// the item array inside a response (`""` for a bare array).
    pub fn new(
        raw: RawDataArgs,
        url_template: &str,
        items_pointer: &str,
        pagination: Arc<dyn PaginationStrategy>,
    ) -> Self {
        Self {
            raw,
            request: PageRequest {
                url_template: url_template.to_string(),
                items_pointer: items_pointer.to_string(),
                pagination,
            },
            input: None,
        }
    }

    /// Run one paginated collection per input key.
    pub fn with_input(mut self, input: Box<dyn InputSource>) -> Self {
        self.input = Some(input);
        self
    }

    #[instrument(skip_all, fields(table = %self.raw.table))]
    pub async fn execute(self, ctx: &TaskContext) -> Result<CollectSummary> {
        let start = Instant::now();
        let ApiCollector {
            raw,
            request,
            input,
        } = self;
        let generation = ctx.storage.begin_generation(&raw.table, &raw.params).await?;

        let mut summary = CollectSummary::default();
        match request.collect_all(ctx, &generation, input, &mut summary).await {
            Ok(()) => {
                ctx.storage.commit_generation(&generation).await?;
                info!(
                    requests = summary.requests,
                    records = summary.records,
                    skipped = summary.skipped,
                    duration_ms = start.elapsed().as_millis(),
                    "collection committed"
                );
                Ok(summary)
            }
            Err(e) => {
                if let Err(cleanup) = ctx.storage.abandon_generation(&generation).await {
                    warn!(error = %cleanup, "failed to discard unfinished generation");
                }
                Err(e)
            }
        }
    }
}

impl PageRequest {
    async fn collect_all(
        &self,
        ctx: &TaskContext,
        generation: &Generation,
        input: Option<Box<dyn InputSource>>,
        summary: &mut CollectSummary,
    ) -> Result<()> {
        let Some(mut input) = input else {
            return self.collect_one(ctx, generation, None, summary).await;
        };
        loop {
            ctx.check_cancelled()?;
            let Some(key) = input.next_input().await? else {
                return Ok(());
            };
            self.collect_one(ctx, generation, Some(&key), summary).await?;
        }
    }

    async fn collect_one(
        &self,
        ctx: &TaskContext,
        generation: &Generation,
        input: Option<&Value>,
        summary: &mut CollectSummary,
    ) -> Result<()> {
        let client = ctx.client()?;
        let path = render_template(&self.url_template, input)?;
        let mut state = self.pagination.initial(ctx.page_size);

        loop {
            ctx.check_cancelled()?;
            let query = self.pagination.query(&state);
            let response = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(LakeflowError::Cancelled),
                response = client.get(&path, &query) => response,
            };
            summary.requests += 1;

            let response = match response {
                Ok(response) => response,
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, "resource not found, skipping");
                    summary.skipped += 1;
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let envelope: Value = response.json()?;
            let items = items_at(&envelope, &self.items_pointer, response.url.as_str())?;
            let payloads = items
                .iter()
                .map(serde_json::to_vec)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| LakeflowError::decode(response.url.as_str(), e))?;

            let written = ctx
                .storage
                .write_raw_page(generation, response.url.as_str(), input, &payloads)
                .await?;
            summary.records += written;
            debug!(url = %response.url, items = written, "page stored");

            match self.pagination.next(&state, &envelope, items.len())? {
                NextPage::Fetch(next) => state = next,
                NextPage::EndOfCollection => {
                    state.finished = true;
                    debug!(finished = state.finished, "end of collection");
                    return Ok(());
                }
            }
        }
    }
}

fn items_at<'a>(envelope: &'a Value, pointer: &str, url: &str) -> Result<&'a Vec<Value>> {
    match envelope.pointer(pointer) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(LakeflowError::decode(
            url,
            format!("expected an item array at `{pointer}`"),
        )),
    }
}

/// Fill `{field}` placeholders from `input`.
pub fn render_template(template: &str, input: Option<&Value>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            LakeflowError::validation(format!("unclosed placeholder in `{template}`"))
        })?;
        let field = &after[..close];
        let value = input.and_then(|v| v.get(field)).ok_or_else(|| {
            LakeflowError::validation(format!("`{template}` needs input field `{field}`"))
        })?;
        match value {
            Value::String(s) => out.push_str(s),
            Value::Number(n) => out.push_str(&n.to_string()),
            other => {
                return Err(LakeflowError::validation(format!(
                    "input field `{field}` is not a scalar: {other}"
                )));
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiClient, HttpConfig};
    use crate::pagination::{CursorPagination, OffsetPagination, PageTotal};
    use lakeflow_shared::{Connection, Credentials, TaskOptions};
    use lakeflow_storage::Storage;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use url::Url;
    use uuid::Uuid;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn context(server: &MockServer, page_size: u32) -> TaskContext {
        let tmp = std::env::temp_dir().join(format!("lakeflow_collect_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&tmp).await.unwrap());
        let connection = Connection {
            id: 1,
            plugin: "bitbucket".into(),
            endpoint: Url::parse(&format!("{}/2.0/", server.uri())).unwrap(),
            credentials: Credentials::None,
        };
        let client = Arc::new(ApiClient::new(&connection, &HttpConfig::default()).unwrap());
        TaskContext::new(TaskOptions::new(), storage, CancellationToken::new())
            .with_connection(connection, client)
            .with_page_size(page_size)
    }

    fn raw() -> RawDataArgs {
        RawDataArgs::new(
            "_raw_bitbucket_api_pull_requests",
            &json!({"ConnectionId": 1, "Owner": "a", "Repo": "b"}),
        )
        .unwrap()
    }

    #[test]
    fn template_rendering() {
        let input = json!({"bitbucket_id": 7, "slug": "x"});
        assert_eq!(
            render_template("pullrequests/{bitbucket_id}/comments", Some(&input)).unwrap(),
            "pullrequests/7/comments"
        );
        assert_eq!(render_template("plain", None).unwrap(), "plain");
        assert!(render_template("pullrequests/{missing}", Some(&input)).is_err());
        assert!(render_template("pullrequests/{bitbucket_id", Some(&input)).is_err());
    }

    #[tokio::test]
    async fn cursor_collection_stops_at_missing_next_link() {
        let server = MockServer::start().await;
        let base = format!("{}/2.0/repositories/a/b/pullrequests", server.uri());

        Mock::given(method("GET"))
            .and(path("/2.0/repositories/a/b/pullrequests"))
            .and(query_param_is_missing("page"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [{"id": 1}, {"id": 2}],
                "next": format!("{base}?pagelen=2&page=c2")
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2.0/repositories/a/b/pullrequests"))
            .and(query_param("page", "c2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [{"id": 3}, {"id": 4}],
                "next": format!("{base}?pagelen=2&page=c3")
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2.0/repositories/a/b/pullrequests"))
            .and(query_param("page", "c3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [{"id": 5}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = context(&server, 2).await;
        let pagination = Arc::new(CursorPagination::new("/next", "page", "pagelen").with_param("state", "all"));
        let summary = ApiCollector::new(raw(), "repositories/a/b/pullrequests", "/values", pagination)
            .execute(&ctx)
            .await
            .unwrap();

        assert_eq!(summary.requests, 3);
        assert_eq!(summary.records, 5);
        let raw = raw();
        assert_eq!(ctx.storage.count_raw_records(&raw.table, &raw.params).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn offset_collection_requests_reported_pages() {
        let server = MockServer::start().await;
        let items: Vec<_> = (0..20).map(|i| json!({"hash": i})).collect();
        Mock::given(method("GET"))
            .and(path("/2.0/repositories/a/b/commits"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"values": items, "size": 95})),
            )
            .expect(5)
            .mount(&server)
            .await;

        let ctx = context(&server, 20).await;
        let pagination = Arc::new(
            OffsetPagination::new("page", "pagelen", PageTotal::Reported("/size".into()))
                .with_param("state", "all"),
        );
        let raw = RawDataArgs::new("_raw_bitbucket_api_commits", &json!({"ConnectionId": 1})).unwrap();
        let summary = ApiCollector::new(raw, "repositories/a/b/commits", "/values", pagination)
            .execute(&ctx)
            .await
            .unwrap();
        assert_eq!(summary.requests, 5);
    }

    #[tokio::test]
    async fn failed_run_keeps_previous_generation() {
        let server = MockServer::start().await;
        Mock::given(path("/2.0/repositories/a/b/pullrequests"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"values": [{"id": 1}]})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(path("/2.0/repositories/a/b/pullrequests"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let ctx = context(&server, 50).await;
        let pagination: Arc<dyn PaginationStrategy> = Arc::new(CursorPagination::new("/next", "page", "pagelen"));
        ApiCollector::new(raw(), "repositories/a/b/pullrequests", "/values", pagination.clone())
            .execute(&ctx)
            .await
            .unwrap();

        let err = ApiCollector::new(raw(), "repositories/a/b/pullrequests", "/values", pagination)
            .execute(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, LakeflowError::Authentication { .. }));

        let raw = raw();
        assert_eq!(ctx.storage.count_raw_records(&raw.table, &raw.params).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancelled_collection_is_not_committed() {
        let server = MockServer::start().await;
        let ctx = context(&server, 50).await;
        ctx.cancel.cancel();

        let pagination = Arc::new(CursorPagination::new("/next", "page", "pagelen"));
        let err = ApiCollector::new(raw(), "repositories/a/b/pullrequests", "/values", pagination)
            .execute(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, LakeflowError::Cancelled));

        let raw = raw();
        let mut cursor = ctx.storage.raw_records(&raw.table, &raw.params).await.unwrap();
        assert!(cursor.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn envelope_without_items_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(path("/2.0/repositories/a/b/pullrequests"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "nope"})))
            .mount(&server)
            .await;

        let ctx = context(&server, 50).await;
        let pagination = Arc::new(CursorPagination::new("/next", "page", "pagelen"));
        let err = ApiCollector::new(raw(), "repositories/a/b/pullrequests", "/values", pagination)
            .execute(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, LakeflowError::Decode { .. }));
    }
}
