//! Subtask selection from a connector catalogue.

use lakeflow_ingest::SubtaskMeta;
use lakeflow_shared::{DomainType, LakeflowError, Result};

/// Names of the subtasks a scope requesting `entities` needs, in catalogue
/// order.
///
/// A subtask is selected when it is required, or when it is enabled by
/// default and shares a domain with `entities`. No requested domains at all
/// yields an empty list, which the runner reads as "plugin defaults".
pub fn select_subtasks(catalogue: &[SubtaskMeta], entities: &[DomainType]) -> Result<Vec<String>> {
    if entities.is_empty() {
        return Ok(Vec::new());
    }

    let selected: Vec<String> = catalogue
        .iter()
        .filter(|meta| {
            meta.required
                || (meta.enabled_by_default
                    && meta.domain_types.iter().any(|d| entities.contains(d)))
        })
        .map(|meta| meta.name.to_string())
        .collect();

    if selected.is_empty() {
        let requested: Vec<&str> = entities.iter().map(DomainType::as_str).collect();
        return Err(LakeflowError::validation(format!(
            "no subtask selected for domains [{}]",
            requested.join(", ")
        )));
    }
    Ok(selected)
}
