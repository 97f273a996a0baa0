//! Blueprint scopes into an ordered [`PipelinePlan`].
//!
//! Scope `i` targets stage `i`:
//! - the connector task is appended to stage `i`
//! - when the scope requests source code, a code-extraction task carrying
//!   the clone URL and repository id is appended to stage `i` as well
//! - every directive block found in the transformation rules is removed from
//!   them and becomes its own task at stage `i + 1`, growing the plan if
//!   needed
//!
//! The compiler never branches on connector identity; everything connector
//! specific goes through a [`ScopeResolver`].

use async_trait::async_trait;
use lakeflow_ingest::SubtaskMeta;
use lakeflow_shared::{
    Blueprint, DomainId, DomainType, LakeflowError, OPT_CONNECTION_ID, OPT_TRANSFORMATION_RULES,
    PipelinePlan, PipelineTask, Result, Scope, SyncPolicy, TaskOptions,
};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::subtasks::select_subtasks;

/// Plugin that receives code-extraction tasks.
pub const CODE_EXTRACTOR_PLUGIN: &str = "gitextractor";

/// Directive blocks recognised in transformation rules by default.
pub const DEFAULT_DIRECTIVES: &[&str] = &["refdiff"];

/// Repository a scope points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSource {
    /// Domain id of the repository, as the connector's converters compute it.
    pub repo_id: DomainId,
    /// Clone URL with credentials embedded.
    pub clone_url: Url,
}

/// Connector-specific part of plan compilation.
#[async_trait]
pub trait ScopeResolver: Send + Sync {
    /// Plugin name of the connector tasks.
    fn plugin(&self) -> &str;

    fn connection_id(&self) -> u64;

    /// Connector options taken from the scope, before the compiler adds the
    /// connection id and transformation rules.
    fn scope_options(&self, scope: &Scope, _sync_policy: &SyncPolicy) -> Result<TaskOptions> {
        match &scope.options {
            Value::Object(options) => Ok(options.clone()),
            Value::Null => Ok(TaskOptions::new()),
            other => Err(LakeflowError::validation(format!(
                "scope options must be an object, got {other}"
            ))),
        }
    }

    /// Check that merged options decode into the connector's option type.
    fn validate_options(&self, options: &TaskOptions) -> Result<()>;

    /// Look up the repository behind a scope. `None` when the connector has
    /// no source code to offer.
    async fn code_source(&self, options: &TaskOptions) -> Result<Option<CodeSource>>;
}

/// Lookups memoized for the duration of one scope's compilation.
#[derive(Debug, Default)]
pub struct ScopeCache {
    code_source: Option<Option<CodeSource>>,
}

impl ScopeCache {
    /// The scope's code source, resolved on first use only.
    pub async fn code_source(
        &mut self,
        resolver: &dyn ScopeResolver,
        options: &TaskOptions,
    ) -> Result<Option<CodeSource>> {
        if let Some(cached) = &self.code_source {
            return Ok(cached.clone());
        }
        let resolved = resolver.code_source(options).await?;
        debug!(found = resolved.is_some(), "code source resolved");
        self.code_source = Some(resolved.clone());
        Ok(resolved)
    }
}

/// Compiles blueprints into stage lists.
#[derive(Debug, Clone)]
pub struct PlanCompiler {
    directives: Vec<String>,
    code_extractor: String,
}

impl Default for PlanCompiler {
    fn default() -> Self {
        Self {
            directives: DEFAULT_DIRECTIVES.iter().map(|d| d.to_string()).collect(),
            code_extractor: CODE_EXTRACTOR_PLUGIN.to_string(),
        }
    }
}

impl PlanCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also treat `name` blocks in transformation rules as directives.
    pub fn with_directive(mut self, name: &str) -> Self {
        if !self.directives.iter().any(|d| d == name) {
            self.directives.push(name.to_string());
        }
        self
    }

    /// Compile every scope of `blueprint`. The first failing scope aborts
    /// the compilation, its index attached to the error.
    #[instrument(skip_all, fields(plugin = resolver.plugin(), scopes = blueprint.scopes.len()))]
    pub async fn compile(
        &self,
        blueprint: &Blueprint,
        resolver: &dyn ScopeResolver,
        catalogue: &[SubtaskMeta],
    ) -> Result<PipelinePlan> {
        let mut plan = PipelinePlan::new();
        for (index, scope) in blueprint.scopes.iter().enumerate() {
            let mut cache = ScopeCache::default();
            self.compile_scope(
                index,
                scope,
                &blueprint.sync_policy,
                resolver,
                catalogue,
                &mut cache,
                &mut plan,
            )
            .await
            .map_err(|e| e.in_scope(index))?;
        }

        info!(
            stages = plan.len(),
            tasks = plan.task_count(),
            "plan compiled"
        );
        Ok(plan)
    }

    #[allow(clippy::too_many_arguments)]
    async fn compile_scope(
        &self,
        index: usize,
        scope: &Scope,
        sync_policy: &SyncPolicy,
        resolver: &dyn ScopeResolver,
        catalogue: &[SubtaskMeta],
        cache: &mut ScopeCache,
        plan: &mut PipelinePlan,
    ) -> Result<()> {
        let mut rules = match &scope.transformation {
            None | Some(Value::Null) => TaskOptions::new(),
            Some(Value::Object(rules)) => rules.clone(),
            Some(other) => {
                return Err(LakeflowError::validation(format!(
                    "transformation must be an object, got {other}"
                )));
            }
        };
        let directives = self.take_directives(&mut rules)?;

        let mut options = resolver.scope_options(scope, sync_policy)?;
        options.insert(OPT_CONNECTION_ID.into(), resolver.connection_id().into());
        if scope.transformation.is_some() {
            options.insert(OPT_TRANSFORMATION_RULES.into(), Value::Object(rules));
        }
        resolver.validate_options(&options)?;

        let subtasks = select_subtasks(catalogue, &scope.entities)?;
        plan.push_task(
            index,
            PipelineTask {
                plugin: resolver.plugin().to_string(),
                subtasks,
                options: options.clone(),
            },
        );

        if scope.requests(DomainType::Code) {
            match cache.code_source(resolver, &options).await? {
                Some(source) => plan.push_task(index, self.code_extraction_task(&source)),
                None => warn!(
                    scope = index,
                    plugin = resolver.plugin(),
                    "connector has no code source, skipping code extraction"
                ),
            }
        }

        for (name, mut block) in directives {
            if !block.contains_key("repoId") {
                match cache.code_source(resolver, &options).await? {
                    Some(source) => {
                        block.insert("repoId".into(), source.repo_id.as_str().into());
                    }
                    None => warn!(scope = index, directive = %name, "directive has no repository id"),
                }
            }
            plan.push_task(
                index + 1,
                PipelineTask {
                    plugin: name,
                    subtasks: Vec::new(),
                    options: block,
                },
            );
        }
        Ok(())
    }

    /// Remove directive blocks from `rules`, in directive declaration order.
    fn take_directives(&self, rules: &mut TaskOptions) -> Result<Vec<(String, TaskOptions)>> {
        let mut found = Vec::new();
        for name in &self.directives {
            match rules.remove(name) {
                None | Some(Value::Null) => {}
                Some(Value::Object(block)) => found.push((name.clone(), block)),
                Some(other) => {
                    return Err(LakeflowError::validation(format!(
                        "directive `{name}` must be an object, got {other}"
                    )));
                }
            }
        }
        Ok(found)
    }

    fn code_extraction_task(&self, source: &CodeSource) -> PipelineTask {
        let mut options = TaskOptions::new();
        options.insert("url".into(), source.clone_url.as_str().into());
        options.insert("repoId".into(), source.repo_id.as_str().into());
        PipelineTask {
            plugin: self.code_extractor.clone(),
            subtasks: Vec::new(),
            options,
        }
    }
}
