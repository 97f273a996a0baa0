//! Connector capabilities and the registry the runner dispatches through.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use lakeflow_shared::{DomainType, LakeflowError, Result};
use tracing::info;

use crate::context::TaskContext;

/// Entry point of one subtask.
pub type SubtaskEntryPoint = for<'a> fn(&'a TaskContext) -> BoxFuture<'a, Result<()>>;

/// Catalogue entry describing one subtask of a connector.
#[derive(Clone, Copy)]
pub struct SubtaskMeta {
    pub name: &'static str,
    pub entry_point: SubtaskEntryPoint,
    /// Selected when its domains are requested.
    pub enabled_by_default: bool,
    /// Selected whatever the requested domains.
    pub required: bool,
    pub domain_types: &'static [DomainType],
    pub description: &'static str,
}

impl fmt::Debug for SubtaskMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubtaskMeta")
            .field("name", &self.name)
            .field("enabled_by_default", &self.enabled_by_default)
            .field("required", &self.required)
            .field("domain_types", &self.domain_types)
            .finish()
    }
}

/// A connector: a named set of subtasks run in catalogue order.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Full subtask catalogue, in execution order.
    fn subtask_metas(&self) -> Vec<SubtaskMeta>;

    /// Whether tasks of this plugin carry a `connectionId`.
    fn requires_connection(&self) -> bool {
        true
    }

    /// Run `subtasks` sequentially. Each subtask completes before the next starts.
    async fn execute(&self, ctx: &TaskContext, subtasks: &[SubtaskMeta]) -> Result<()> {
        for meta in subtasks {
            ctx.check_cancelled()?;
            info!(plugin = self.name(), subtask = meta.name, "running subtask");
            (meta.entry_point)(ctx).await?;
        }
        Ok(())
    }
}

/// Pick the subtasks named in a task, keeping catalogue order.
///
/// An empty list selects every required or enabled-by-default subtask.
pub fn resolve_subtasks(plugin: &dyn Plugin, names: &[String]) -> Result<Vec<SubtaskMeta>> {
    let catalogue = plugin.subtask_metas();
    if names.is_empty() {
        return Ok(catalogue
            .into_iter()
            .filter(|m| m.required || m.enabled_by_default)
            .collect());
    }

    if let Some(unknown) = names
        .iter()
        .find(|name| !catalogue.iter().any(|m| m.name == name.as_str()))
    {
        return Err(LakeflowError::validation(format!(
            "plugin `{}` has no subtask `{unknown}`",
            plugin.name()
        )));
    }

    Ok(catalogue
        .into_iter()
        .filter(|m| names.iter().any(|name| name == m.name))
        .collect())
}

/// Plugins available to the runner, by name.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: BTreeMap<&'static str, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin, replacing any plugin of the same name.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(plugin.name(), plugin);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Registered plugins in name order.
    pub fn plugins(&self) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        self.plugins.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_ctx: &TaskContext) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    struct Dummy;

    impl Plugin for Dummy {
        fn name(&self) -> &'static str {
            "dummy"
        }

        fn description(&self) -> &'static str {
            "test plugin"
        }

        fn subtask_metas(&self) -> Vec<SubtaskMeta> {
            let meta = |name, enabled_by_default| SubtaskMeta {
                name,
                entry_point: noop,
                enabled_by_default,
                required: false,
                domain_types: &[DomainType::Code],
                description: "",
            };
            vec![meta("collect", true), meta("extract", true), meta("optional", false)]
        }
    }

    #[test]
    fn empty_selection_takes_enabled_subtasks() {
        let metas = resolve_subtasks(&Dummy, &[]).unwrap();
        let names: Vec<_> = metas.iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["collect", "extract"]);
    }

    #[test]
    fn named_selection_keeps_catalogue_order() {
        let metas = resolve_subtasks(&Dummy, &["extract".into(), "optional".into()]).unwrap();
        let names: Vec<_> = metas.iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["extract", "optional"]);
    }

    #[test]
    fn unknown_subtask_is_rejected() {
        let err = resolve_subtasks(&Dummy, &["collectEverything".into()]).unwrap_err();
        assert!(err.to_string().contains("collectEverything"));
    }

    #[test]
    fn registry_lookup() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(Dummy));
        assert!(registry.contains("dummy"));
        assert!(registry.get("refdiff").is_none());
        assert_eq!(registry.plugins().count(), 1);
    }
}
