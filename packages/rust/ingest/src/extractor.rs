//! Extraction: raw payloads into structured tool-layer records.

use std::time::Instant;

use lakeflow_shared::{LakeflowError, RawRecord, Result};
use lakeflow_storage::{RawOrigin, ToolRecordRow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, instrument};

use crate::collector::RawDataArgs;
use crate::context::TaskContext;

const BATCH_SIZE: usize = 500;

/// A structured record persisted in the tool layer.
pub trait ToolRecord: Serialize {
    const RECORD_TYPE: &'static str;

    /// Key unique among records of this type under one connection.
    fn natural_key(&self) -> String;
}

/// A tool record with its type erased, so one raw item can fan out into
/// records of several types.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub record_type: &'static str,
    pub natural_key: String,
    pub data: serde_json::Value,
}

impl Extracted {
    pub fn new<R: ToolRecord>(record: &R) -> Result<Self> {
        let data = serde_json::to_value(record)
            .map_err(|e| LakeflowError::decode(R::RECORD_TYPE, e))?;
        Ok(Self {
            record_type: R::RECORD_TYPE,
            natural_key: record.natural_key(),
            data,
        })
    }
}

/// Deserialize a raw payload, naming the raw row on failure.
pub fn decode_raw<T: DeserializeOwned>(raw: &RawRecord) -> Result<T> {
    serde_json::from_slice(&raw.data).map_err(|e| LakeflowError::decode(raw.origin(), e))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub raw_records: usize,
    pub records: usize,
}

/// Streams the committed raw rows of one fingerprint through `extract` and
/// replaces the tool records previously derived from them.
pub struct ApiExtractor<F> {
    raw: RawDataArgs,
    scope_key: String,
    extract: F,
}

impl<F> ApiExtractor<F>
where
    F: FnMut(&RawRecord) -> Result<Vec<Extracted>> + Send,
{
    pub fn new(raw: RawDataArgs, scope_key: &str, extract: F) -> Self {
        Self {
            raw,
            scope_key: scope_key.to_string(),
            extract,
        }
    }

    #[instrument(skip_all, fields(table = %self.raw.table))]
    pub async fn execute(mut self, ctx: &TaskContext) -> Result<ExtractSummary> {
        let start = Instant::now();
        let connection_id = ctx.connection()?.id;
        let storage = &ctx.storage;

        storage
            .delete_tool_records_from(&self.raw.table, &self.raw.params)
            .await?;
        let mut cursor = storage.raw_records(&self.raw.table, &self.raw.params).await?;

        let mut summary = ExtractSummary::default();
        let mut batch = Vec::with_capacity(BATCH_SIZE);
        while let Some(raw) = cursor.next().await? {
            ctx.check_cancelled()?;
            summary.raw_records += 1;

            for record in (self.extract)(&raw)? {
                batch.push(ToolRecordRow {
                    connection_id,
                    record_type: record.record_type.to_string(),
                    natural_key: record.natural_key,
                    scope_key: self.scope_key.clone(),
                    data: record.data,
                    origin: RawOrigin {
                        table: raw.table.clone(),
                        params: raw.params.clone(),
                        id: Some(raw.id),
                    },
                });
            }
            if batch.len() >= BATCH_SIZE {
                summary.records += batch.len();
                storage.insert_tool_records(&batch).await?;
                batch.clear();
            }
        }
        summary.records += batch.len();
        storage.insert_tool_records(&batch).await?;

        info!(
            raw_records = summary.raw_records,
            records = summary.records,
            duration_ms = start.elapsed().as_millis(),
            "extraction finished"
        );
        Ok(summary)
    }
}
