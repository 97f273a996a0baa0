//! Core data model shared by the compiler, the collection pipeline and the
//! connectors.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{LakeflowError, Result};

/// Option key carrying the connection id in every connector task.
pub const OPT_CONNECTION_ID: &str = "connectionId";

/// Option key under which surviving transformation rules are namespaced.
pub const OPT_TRANSFORMATION_RULES: &str = "transformationRules";

/// Open key/value options of a task. Kept as a JSON object so connectors the
/// compiler does not know about still round-trip through plans.
pub type TaskOptions = serde_json::Map<String, serde_json::Value>;

/// Decode task options into a connector's typed option struct.
///
/// Missing required fields and wrong types surface as validation errors.
pub fn decode_options<T: DeserializeOwned>(options: &TaskOptions) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(options.clone()))
        .map_err(|e| LakeflowError::validation(format!("invalid task options: {e}")))
}

// ---------------------------------------------------------------------------
// DomainType
// ---------------------------------------------------------------------------

/// Entity domains a scope may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DomainType {
    #[serde(rename = "CODE")]
    Code,
    #[serde(rename = "TICKET")]
    Ticket,
    #[serde(rename = "CODEREVIEW")]
    CodeReview,
    #[serde(rename = "CROSS")]
    Cross,
    #[serde(rename = "CICD")]
    Cicd,
    #[serde(rename = "CODEQUALITY")]
    CodeQuality,
    #[serde(rename = "SECURITYTESTING")]
    SecurityTesting,
}

impl DomainType {
    /// Every known domain, in declaration order.
    pub const ALL: [DomainType; 7] = [
        DomainType::Code,
        DomainType::Ticket,
        DomainType::CodeReview,
        DomainType::Cross,
        DomainType::Cicd,
        DomainType::CodeQuality,
        DomainType::SecurityTesting,
    ];

    /// Wire tag of this domain.
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainType::Code => "CODE",
            DomainType::Ticket => "TICKET",
            DomainType::CodeReview => "CODEREVIEW",
            DomainType::Cross => "CROSS",
            DomainType::Cicd => "CICD",
            DomainType::CodeQuality => "CODEQUALITY",
            DomainType::SecurityTesting => "SECURITYTESTING",
        }
    }
}

impl fmt::Display for DomainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DomainType {
    type Err = LakeflowError;

    fn from_str(s: &str) -> Result<Self> {
        DomainType::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| LakeflowError::validation(format!("unknown domain type `{s}`")))
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// How requests against a connection authenticate.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    #[default]
    None,
    Basic { username: String, password: String },
    Token(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::None => f.write_str("None"),
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Credentials::Token(_) => f.write_str("Token(***)"),
        }
    }
}

/// A configured data source endpoint. Owns no data; tasks and raw records
/// refer to it by `id`.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: u64,
    pub plugin: String,
    pub endpoint: Url,
    pub credentials: Credentials,
}

// ---------------------------------------------------------------------------
// Scope & blueprint
// ---------------------------------------------------------------------------

/// A user-declared unit of data to collect, e.g. one repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scope {
    /// Scope identifier (a project key for some connectors).
    #[serde(default)]
    pub id: String,
    /// Requested entity domains.
    #[serde(rename = "entities", default)]
    pub entities: Vec<DomainType>,
    /// Source-specific options.
    #[serde(default)]
    pub options: serde_json::Value,
    /// Transformation rules and embedded directives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<serde_json::Value>,
}

impl Scope {
    /// Whether the scope requests `domain`.
    pub fn requests(&self, domain: DomainType) -> bool {
        self.entities.contains(&domain)
    }
}

/// Limits applied to every task of a compiled plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date_after: Option<DateTime<Utc>>,
}

/// A blueprint file: the scopes of one connection plus its sync policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blueprint {
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub sync_policy: SyncPolicy,
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// One unit of work: a plugin, the subtasks it runs, and its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineTask {
    pub plugin: String,
    #[serde(default)]
    pub subtasks: Vec<String>,
    #[serde(default)]
    pub options: TaskOptions,
}

/// Tasks that may run concurrently. Order inside a stage carries no meaning.
pub type Stage = Vec<PipelineTask>;

/// Ordered list of stages; stage N+1 starts only after stage N completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelinePlan(Vec<Stage>);

impl PipelinePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure the stage at `index` exists, appending empty stages as
    /// needed, and return it.
    pub fn ensure_stage(&mut self, index: usize) -> &mut Stage {
        if self.0.len() <= index {
            self.0.resize_with(index + 1, Vec::new);
        }
        &mut self.0[index]
    }

    /// Append `task` to the stage at `index`, growing the plan if needed.
    pub fn push_task(&mut self, index: usize, task: PipelineTask) {
        self.ensure_stage(index).push(task);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.0
    }

    /// Total number of tasks across all stages.
    pub fn task_count(&self) -> usize {
        self.0.iter().map(Vec::len).sum()
    }
}

// ---------------------------------------------------------------------------
// RawRecord
// ---------------------------------------------------------------------------

/// One raw API item as captured by a collector.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// Row id inside its raw table.
    pub id: i64,
    /// Raw table the row lives in.
    pub table: String,
    /// Parameter fingerprint identifying the producing collection.
    pub params: String,
    /// Untouched payload bytes of one item.
    pub data: Vec<u8>,
    /// Request URL the item came from.
    pub url: String,
    /// Input key that drove the request, for iterator-driven collectors.
    pub input: Option<serde_json::Value>,
}

impl RawRecord {
    /// Identity used in diagnostics: `<table>#<id>`.
    pub fn origin(&self) -> String {
        format!("{}#{}", self.table, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_stage_grows_the_plan() {
        let mut plan = PipelinePlan::new();
        plan.push_task(
            2,
            PipelineTask {
                plugin: "refdiff".into(),
                subtasks: vec![],
                options: TaskOptions::new(),
            },
        );
        assert_eq!(plan.len(), 3);
        assert!(plan.stages()[0].is_empty());
        assert_eq!(plan.stages()[2][0].plugin, "refdiff");
        assert_eq!(plan.task_count(), 1);

        plan.ensure_stage(1);
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn plan_serializes_as_nested_arrays() {
        let mut plan = PipelinePlan::new();
        let mut options = TaskOptions::new();
        options.insert(OPT_CONNECTION_ID.into(), 1.into());
        plan.push_task(
            0,
            PipelineTask {
                plugin: "bitbucket".into(),
                subtasks: vec!["collectApiPullRequests".into()],
                options,
            },
        );

        let json = serde_json::to_value(&plan).expect("serialize");
        assert_eq!(json[0][0]["plugin"], "bitbucket");
        assert_eq!(json[0][0]["options"]["connectionId"], 1);

        let parsed: PipelinePlan = serde_json::from_value(json).expect("deserialize");
        assert_eq!(parsed, plan);
    }

    #[test]
    fn domain_tags_parse_and_reject_unknown() {
        let scope: Scope = serde_json::from_str(
            r#"{"id":"1","entities":["CODE","CODEREVIEW"],"options":{"owner":"a","repo":"b"}}"#,
        )
        .expect("parse scope");
        assert!(scope.requests(DomainType::Code));
        assert!(scope.requests(DomainType::CodeReview));
        assert!(!scope.requests(DomainType::Ticket));

        let bad = serde_json::from_str::<Scope>(r#"{"entities":["WIKI"]}"#);
        assert!(bad.is_err());
        assert!("WIKI".parse::<DomainType>().is_err());
        assert_eq!("CICD".parse::<DomainType>().unwrap(), DomainType::Cicd);
    }

    #[test]
    fn decode_options_reports_validation_errors() {
        #[derive(Debug, Deserialize)]
        struct Opts {
            #[allow(dead_code)]
            owner: String,
        }

        let mut options = TaskOptions::new();
        options.insert("owner".into(), 42.into());
        let err = decode_options::<Opts>(&options).unwrap_err();
        assert!(matches!(err, LakeflowError::Validation { .. }));
    }

    #[test]
    fn credentials_are_redacted_in_debug_output() {
        let creds = Credentials::Basic {
            username: "alice".into(),
            password: "hunter2".into(),
        };
        let text = format!("{creds:?}");
        assert!(text.contains("alice"));
        assert!(!text.contains("hunter2"));
        assert_eq!(format!("{:?}", Credentials::Token("abc".into())), "Token(***)");
    }

    #[test]
    fn blueprint_fixture_validates() {
        let fixture = std::fs::read_to_string("../../../fixtures/json/blueprint.fixture.json")
            .expect("read fixture");
        let parsed: Blueprint = serde_json::from_str(&fixture).expect("deserialize blueprint");
        assert_eq!(parsed.scopes.len(), 2);
        assert!(parsed.scopes[0].requests(DomainType::Code));
        assert!(parsed.scopes[0].transformation.is_some());
        assert!(parsed.sync_policy.created_date_after.is_some());
    }
}
