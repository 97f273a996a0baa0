use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use lakeflow_ingest::{
    ApiCollector, ApiExtractor, Convert, Converted, DataConverter, Extracted, OffsetPagination,
    PageTotal, SubtaskMeta, TaskContext, ToolRecord, decode_raw,
};
use lakeflow_shared::domain::StProject;
use lakeflow_shared::{DomainType, LakeflowError, RawRecord, Result};
use serde::{Deserialize, Serialize};

use super::{RAW_PROJECT_TABLE, SonarqubeOptions, project_id_generator, raw_args};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiProject {
    key: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    qualifier: String,
    #[serde(default)]
    visibility: String,
    #[serde(default)]
    last_analysis_date: Option<String>,
    #[serde(default)]
    revision: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SonarqubeProject {
    pub project_key: String,
    pub name: String,
    pub qualifier: String,
    pub visibility: String,
    pub last_analysis_date: Option<DateTime<Utc>>,
    pub revision: String,
}

impl ToolRecord for SonarqubeProject {
    const RECORD_TYPE: &'static str = "SonarqubeProject";

    fn natural_key(&self) -> String {
        self.project_key.clone()
    }
}

pub(crate) fn catalogue() -> Vec<SubtaskMeta> {
    vec![
        SubtaskMeta {
            name: "collectProjects",
            entry_point: collect_projects,
            enabled_by_default: true,
            required: false,
            domain_types: &[DomainType::SecurityTesting],
            description: "Collect project data from the SonarQube api",
        },
        SubtaskMeta {
            name: "extractProjects",
            entry_point: extract_projects,
            enabled_by_default: true,
            required: false,
            domain_types: &[DomainType::SecurityTesting],
            description: "Extract raw projects into the tool layer",
        },
        SubtaskMeta {
            name: "convertProjects",
            entry_point: convert_projects,
            enabled_by_default: true,
            required: false,
            domain_types: &[DomainType::SecurityTesting],
            description: "Convert tool layer projects into security testing projects",
        },
    ]
}

fn collect_projects(ctx: &TaskContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let options = SonarqubeOptions::from_context(ctx)?;
        let pages = OffsetPagination::new("p", "ps", PageTotal::Reported("/paging/total".into()))
            .with_param("projects", &options.project_key);
        ApiCollector::new(
            raw_args(&options, RAW_PROJECT_TABLE)?,
            "projects/search",
            "/components",
            Arc::new(pages),
        )
        .execute(ctx)
        .await?;
        Ok(())
    })
}

/// SonarQube writes offsets without a colon (`+0000`).
fn parse_sonar_time(raw: &RawRecord, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z"))
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| LakeflowError::decode(raw.origin(), format!("bad timestamp `{value}`: {e}")))
}

fn extract_projects(ctx: &TaskContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let options = SonarqubeOptions::from_context(ctx)?;
        let extract = |raw: &RawRecord| -> Result<Vec<Extracted>> {
            let project: ApiProject = decode_raw(raw)?;
            let last_analysis_date = project
                .last_analysis_date
                .as_deref()
                .map(|value| parse_sonar_time(raw, value))
                .transpose()?;
            let record = SonarqubeProject {
                project_key: project.key,
                name: project.name,
                qualifier: project.qualifier,
                visibility: project.visibility,
                last_analysis_date,
                revision: project.revision,
            };
            Ok(vec![Extracted::new(&record)?])
        };
        ApiExtractor::new(raw_args(&options, RAW_PROJECT_TABLE)?, &options.project_key, extract)
            .execute(ctx)
            .await?;
        Ok(())
    })
}

struct ProjectConverter {
    connection_id: u64,
}

#[async_trait]
impl Convert for ProjectConverter {
    type Input = SonarqubeProject;

    async fn convert(&self, _ctx: &TaskContext, project: SonarqubeProject) -> Result<Vec<Converted>> {
        let entity = StProject {
            id: project_id_generator().generate(self.connection_id, &[&project.project_key]),
            name: project.name,
            qualifier: project.qualifier,
            visibility: project.visibility,
            last_analysis_date: project.last_analysis_date,
        };
        Ok(vec![Converted::new(&entity)?])
    }
}

fn convert_projects(ctx: &TaskContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let options = SonarqubeOptions::from_context(ctx)?;
        DataConverter::new(
            raw_args(&options, RAW_PROJECT_TABLE)?,
            SonarqubeProject::RECORD_TYPE,
            &options.project_key,
            ProjectConverter {
                connection_id: options.connection_id,
            },
        )
        .execute(ctx)
        .await?;
        Ok(())
    })
}
