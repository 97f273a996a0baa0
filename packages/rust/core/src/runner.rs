//! Plan execution: stages in order, tasks of one stage concurrently.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lakeflow_ingest::{ApiClient, HttpConfig, PluginRegistry, TaskContext, resolve_subtasks};
use lakeflow_shared::{
    AppConfig, Connection, LakeflowError, OPT_CONNECTION_ID, PipelinePlan, PipelineTask, Result,
    Stage,
};
use lakeflow_storage::Storage;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Runner settings derived from the app config.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Tasks of one stage running at once.
    pub max_concurrent_tasks: usize,
    pub page_size: u32,
    pub http: HttpConfig,
}

impl RunConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            max_concurrent_tasks: config.defaults.max_concurrent_tasks as usize,
            page_size: config.defaults.page_size,
            http: HttpConfig::from(&config.http),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub stages: usize,
    pub tasks: usize,
    pub elapsed: Duration,
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called before the tasks of a stage are started.
    fn stage_started(&self, stage: usize, tasks: usize);
    /// Called when a task completed successfully.
    fn task_finished(&self, stage: usize, plugin: &str);
    /// Called when every stage completed.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage_started(&self, _stage: usize, _tasks: usize) {}
    fn task_finished(&self, _stage: usize, _plugin: &str) {}
    fn done(&self, _summary: &RunSummary) {}
}

/// Stable identity of a task: SHA-256 over the plugin name and its options
/// serialized with sorted keys.
pub fn task_fingerprint(task: &PipelineTask) -> String {
    let mut canonical = String::new();
    write_canonical(&Value::Object(task.options.clone()), &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(task.plugin.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Executes compiled plans against registered plugins.
pub struct PipelineRunner {
    registry: PluginRegistry,
    storage: Arc<Storage>,
    config: RunConfig,
    connections: HashMap<u64, (Connection, Arc<ApiClient>)>,
}

impl PipelineRunner {
    pub fn new(registry: PluginRegistry, storage: Arc<Storage>, config: RunConfig) -> Self {
        Self {
            registry,
            storage,
            config,
            connections: HashMap::new(),
        }
    }

    /// Make `connection` available to tasks naming its id. All tasks of one
    /// connection share a single API client.
    pub fn with_connection(mut self, connection: Connection) -> Result<Self> {
        let client = Arc::new(ApiClient::new(&connection, &self.config.http)?);
        self.connections.insert(connection.id, (connection, client));
        Ok(self)
    }

    /// Reject a plan that could not run to completion: unknown plugins or
    /// subtasks, unknown connections, duplicate tasks within a stage.
    pub fn preflight(&self, plan: &PipelinePlan) -> Result<()> {
        for (index, stage) in plan.stages().iter().enumerate() {
            let mut fingerprints = HashSet::new();
            for task in stage {
                self.check_task(task).map_err(|e| e.in_task(index, &task.plugin))?;
                if !fingerprints.insert(task_fingerprint(task)) {
                    return Err(LakeflowError::validation(
                        "duplicate task within one stage",
                    )
                    .in_task(index, &task.plugin));
                }
            }
        }
        Ok(())
    }

    fn check_task(&self, task: &PipelineTask) -> Result<()> {
        let plugin = self.registry.get(&task.plugin).ok_or_else(|| {
            LakeflowError::validation(format!("plugin `{}` is not registered", task.plugin))
        })?;
        resolve_subtasks(plugin.as_ref(), &task.subtasks)?;
        if plugin.requires_connection() {
            self.connection_for(task)?;
        }
        Ok(())
    }

    fn connection_for(&self, task: &PipelineTask) -> Result<&(Connection, Arc<ApiClient>)> {
        let id = task
            .options
            .get(OPT_CONNECTION_ID)
            .and_then(Value::as_u64)
            .ok_or_else(|| LakeflowError::validation("task options carry no connectionId"))?;
        self.connections
            .get(&id)
            .ok_or_else(|| LakeflowError::config(format!("connection {id} is not configured")))
    }

    fn task_context(
        &self,
        task: &PipelineTask,
        requires_connection: bool,
        cancel: CancellationToken,
    ) -> Result<TaskContext> {
        let ctx = TaskContext::new(task.options.clone(), Arc::clone(&self.storage), cancel)
            .with_page_size(self.config.page_size);
        if !requires_connection {
            return Ok(ctx);
        }
        let (connection, client) = self.connection_for(task)?;
        Ok(ctx.with_connection(connection.clone(), Arc::clone(client)))
    }

    /// Run every stage of `plan`. The run and its outcome are recorded in
    /// the store.
    #[instrument(skip_all, fields(stages = plan.len(), tasks = plan.task_count()))]
    pub async fn run(
        &self,
        plan: &PipelinePlan,
        cancel: CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        self.preflight(plan)?;

        let start = Instant::now();
        let plan_json = serde_json::to_string(plan)
            .map_err(|e| LakeflowError::Internal(format!("failed to serialize plan: {e}")))?;
        let run_id = self.storage.insert_pipeline_run(&plan_json).await?;
        info!(%run_id, "starting pipeline run");

        let outcome = self.run_stages(plan, &cancel, progress).await;
        let (status, error) = match &outcome {
            Ok(()) => ("succeeded", None),
            Err(e) if e.is_cancelled() => ("cancelled", Some(e.to_string())),
            Err(e) => ("failed", Some(e.to_string())),
        };
        self.storage
            .finish_pipeline_run(&run_id, status, error.as_deref())
            .await?;
        outcome?;

        let summary = RunSummary {
            run_id,
            stages: plan.len(),
            tasks: plan.task_count(),
            elapsed: start.elapsed(),
        };
        info!(
            run_id = %summary.run_id,
            duration_ms = summary.elapsed.as_millis(),
            "pipeline run finished"
        );
        progress.done(&summary);
        Ok(summary)
    }

    async fn run_stages(
        &self,
        plan: &PipelinePlan,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        for (index, stage) in plan.stages().iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(LakeflowError::Cancelled);
            }
            self.run_stage(index, stage, cancel, progress).await?;
        }
        Ok(())
    }

    /// Run the tasks of one stage and wait for all of them. The first
    /// failure cancels the remaining tasks of the stage.
    async fn run_stage(
        &self,
        index: usize,
        stage: &Stage,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        let start = Instant::now();
        progress.stage_started(index, stage.len());
        info!(stage = index, tasks = stage.len(), "stage started");

        let stage_cancel = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_tasks.max(1)));
        let mut set = JoinSet::new();
        let mut names = HashMap::new();

        for task in stage {
            let plugin = self.registry.get(&task.plugin).ok_or_else(|| {
                LakeflowError::validation(format!("plugin `{}` is not registered", task.plugin))
                    .in_task(index, &task.plugin)
            })?;
            let subtasks = resolve_subtasks(plugin.as_ref(), &task.subtasks)
                .map_err(|e| e.in_task(index, &task.plugin))?;
            let ctx = self
                .task_context(task, plugin.requires_connection(), stage_cancel.clone())
                .map_err(|e| e.in_task(index, &task.plugin))?;
            let semaphore = Arc::clone(&semaphore);

            let handle = set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|e| {
                    LakeflowError::Internal(format!("task semaphore closed: {e}"))
                })?;
                ctx.check_cancelled()?;
                plugin.execute(&ctx, &subtasks).await
            });
            names.insert(handle.id(), task.plugin.clone());
        }

        let mut failure: Option<LakeflowError> = None;
        while let Some(joined) = set.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => (e.id(), Err(LakeflowError::Internal(format!("task died: {e}")))),
            };
            let plugin = names.get(&id).map(String::as_str).unwrap_or("unknown");

            match result {
                Ok(()) => {
                    debug!(stage = index, plugin, "task finished");
                    progress.task_finished(index, plugin);
                }
                Err(e) => {
                    if failure.is_none() {
                        warn!(stage = index, plugin, error = %e, "task failed, cancelling stage");
                    }
                    stage_cancel.cancel();
                    let e = e.in_task(index, plugin);
                    // A sibling's cancellation never hides the real cause.
                    failure = match failure {
                        Some(prev) if !(prev.is_cancelled() && !e.is_cancelled()) => Some(prev),
                        _ => Some(e),
                    };
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        info!(
            stage = index,
            duration_ms = start.elapsed().as_millis(),
            "stage finished"
        );
        Ok(())
    }
}
