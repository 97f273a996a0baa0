//! Conversion: tool-layer records into canonical domain entities.
//!
//! Input rows are streamed through a [`CursorIterator`], never loaded
//! wholesale. A converter may join against other tool records; a lookup
//! that finds nothing leaves the dependent field empty. Entities are written
//! with an idempotent upsert keyed by their domain id.

use std::time::Instant;

use async_trait::async_trait;
use lakeflow_shared::{DomainEntity, DomainId, LakeflowError, Result};
use lakeflow_storage::{DomainEntityRow, RawOrigin};
use serde::de::DeserializeOwned;
use tracing::{info, instrument};

use crate::collector::RawDataArgs;
use crate::context::TaskContext;
use crate::iterator::CursorIterator;

const BATCH_SIZE: usize = 500;

/// A domain entity with its type erased.
#[derive(Debug, Clone)]
pub struct Converted {
    pub entity_type: &'static str,
    pub id: DomainId,
    pub data: serde_json::Value,
}

impl Converted {
    pub fn new<E: DomainEntity>(entity: &E) -> Result<Self> {
        let data = serde_json::to_value(entity)
            .map_err(|e| LakeflowError::decode(E::ENTITY_TYPE, e))?;
        Ok(Self {
            entity_type: E::ENTITY_TYPE,
            id: entity.id().clone(),
            data,
        })
    }
}

/// Maps one tool record to zero or more domain entities.
#[async_trait]
pub trait Convert: Send + Sync {
    type Input: DeserializeOwned + Send;

    async fn convert(&self, ctx: &TaskContext, input: Self::Input) -> Result<Vec<Converted>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertSummary {
    pub inputs: usize,
    pub entities: usize,
    /// Entities that were new or changed.
    pub written: u64,
}

/// Runs a [`Convert`] over every `record_type` record of one scope.
pub struct DataConverter<C> {
    raw: RawDataArgs,
    record_type: String,
    scope_key: String,
    convert: C,
}

impl<C: Convert> DataConverter<C> {
    /// `raw` names the raw data the input records were extracted from; it is
    /// recorded as the provenance of every emitted entity.
    pub fn new(raw: RawDataArgs, record_type: &str, scope_key: &str, convert: C) -> Self {
        Self {
            raw,
            record_type: record_type.to_string(),
            scope_key: scope_key.to_string(),
            convert,
        }
    }

    #[instrument(skip_all, fields(record_type = %self.record_type))]
    pub async fn execute(self, ctx: &TaskContext) -> Result<ConvertSummary> {
        let start = Instant::now();
        let connection_id = ctx.connection()?.id;
        let mut inputs = CursorIterator::<C::Input>::open(
            &ctx.storage,
            connection_id,
            &self.record_type,
            &self.scope_key,
        )
        .await?;

        let origin = RawOrigin {
            table: self.raw.table.clone(),
            params: self.raw.params.clone(),
            id: None,
        };
        let mut summary = ConvertSummary::default();
        let mut batch = Vec::with_capacity(BATCH_SIZE);

        while let Some(input) = inputs.next().await? {
            ctx.check_cancelled()?;
            summary.inputs += 1;

            for entity in self.convert.convert(ctx, input).await? {
                batch.push(DomainEntityRow {
                    entity_type: entity.entity_type.to_string(),
                    id: entity.id.into(),
                    data: entity.data,
                    origin: Some(origin.clone()),
                });
            }
            if batch.len() >= BATCH_SIZE {
                summary.entities += batch.len();
                summary.written += ctx.storage.upsert_domain_entities(&batch).await?;
                batch.clear();
            }
        }
        summary.entities += batch.len();
        summary.written += ctx.storage.upsert_domain_entities(&batch).await?;

        info!(
            inputs = summary.inputs,
            entities = summary.entities,
            written = summary.written,
            duration_ms = start.elapsed().as_millis(),
            "conversion finished"
        );
        Ok(summary)
    }
}
