//! Code extraction: clone or open a git repository and walk its history.
//!
//! The walking itself is delegated to a [`RepoWalker`]. [`GitCliWalker`]
//! drives the `git` binary.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use lakeflow_ingest::{Plugin, SubtaskMeta, TaskContext};
use lakeflow_shared::{LakeflowError, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::set_userinfo;

pub const PLUGIN_NAME: &str = "gitextractor";

/// Options of a code-extraction task. Everything needed to reach the
/// repository travels in here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitExtractorOptions {
    #[serde(default)]
    pub repo_id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub passphrase: String,
    #[serde(default)]
    pub proxy: String,
}

/// Where a repository lives, as told by its URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoLocation {
    Http(String),
    /// `git@host:path`, with any `ssh://` prefix removed.
    Ssh(String),
    Local(PathBuf),
}

impl GitExtractorOptions {
    pub fn validate(&self) -> Result<()> {
        if self.repo_id.is_empty() {
            return Err(LakeflowError::validation("gitextractor: empty repoId"));
        }
        if self.url.is_empty() {
            return Err(LakeflowError::validation("gitextractor: empty url"));
        }
        self.location()?;
        if !self.proxy.is_empty() && !self.proxy.starts_with("http://") {
            return Err(LakeflowError::validation(
                "gitextractor: only http proxies are supported",
            ));
        }
        Ok(())
    }

    pub fn location(&self) -> Result<RepoLocation> {
        let stripped = self.url.trim_start_matches("ssh://");
        if self.url.starts_with("http") {
            Ok(RepoLocation::Http(self.url.clone()))
        } else if stripped.starts_with("git@") {
            Ok(RepoLocation::Ssh(stripped.to_string()))
        } else if self.url.starts_with('/') {
            Ok(RepoLocation::Local(PathBuf::from(&self.url)))
        } else {
            Err(LakeflowError::validation(format!(
                "gitextractor: unsupported url `{}`",
                self.url
            )))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkSummary {
    pub commits: u64,
}

/// Reads a repository's history on behalf of the code-extraction plugin.
#[async_trait]
pub trait RepoWalker: Send + Sync {
    async fn clone_over_http(
        &self,
        ctx: &TaskContext,
        url: &str,
        options: &GitExtractorOptions,
    ) -> Result<WalkSummary>;

    async fn clone_over_ssh(
        &self,
        ctx: &TaskContext,
        url: &str,
        options: &GitExtractorOptions,
    ) -> Result<WalkSummary>;

    async fn local_repo(
        &self,
        ctx: &TaskContext,
        path: &Path,
        options: &GitExtractorOptions,
    ) -> Result<WalkSummary>;
}

pub struct GitExtractorPlugin {
    walker: Arc<dyn RepoWalker>,
}

impl GitExtractorPlugin {
    pub fn new(walker: Arc<dyn RepoWalker>) -> Self {
        Self { walker }
    }
}

#[async_trait]
impl Plugin for GitExtractorPlugin {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn description(&self) -> &'static str {
        "Extract commit history from a git repository"
    }

    fn subtask_metas(&self) -> Vec<SubtaskMeta> {
        Vec::new()
    }

    fn requires_connection(&self) -> bool {
        false
    }

    #[instrument(skip_all, fields(plugin = PLUGIN_NAME))]
    async fn execute(&self, ctx: &TaskContext, _subtasks: &[SubtaskMeta]) -> Result<()> {
        let start = Instant::now();
        let options: GitExtractorOptions = ctx.options()?;
        options.validate()?;
        ctx.check_cancelled()?;

        let summary = match options.location()? {
            RepoLocation::Http(url) => self.walker.clone_over_http(ctx, &url, &options).await?,
            RepoLocation::Ssh(url) => self.walker.clone_over_ssh(ctx, &url, &options).await?,
            RepoLocation::Local(path) => self.walker.local_repo(ctx, &path, &options).await?,
        };

        info!(
            repo_id = %options.repo_id,
            commits = summary.commits,
            duration_ms = start.elapsed().as_millis(),
            "repository walked"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// git CLI walker
// ---------------------------------------------------------------------------

/// Walks repositories with the `git` binary found on `PATH`.
///
/// Remote repositories are cloned bare into a scratch directory that is
/// removed once the walk finished.
pub struct GitCliWalker {
    git: PathBuf,
    scratch: PathBuf,
}

impl Default for GitCliWalker {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCliWalker {
    pub fn new() -> Self {
        Self {
            git: PathBuf::from("git"),
            scratch: std::env::temp_dir(),
        }
    }

    async fn git(&self, ctx: &TaskContext, args: &[&str], envs: &[(&str, &str)]) -> Result<String> {
        let mut command = Command::new(&self.git);
        command
            .args(args)
            .envs(envs.iter().copied())
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        debug!(subcommand = args.first().copied().unwrap_or_default(), "running git");

        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(LakeflowError::Cancelled),
            output = command.output() => output.map_err(|e| {
                LakeflowError::Internal(format!("failed to run git: {e}"))
            })?,
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LakeflowError::Network(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.lines().last().unwrap_or_default()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn count_commits(&self, ctx: &TaskContext, repo: &Path) -> Result<WalkSummary> {
        let repo = repo.to_string_lossy();
        let count = self
            .git(ctx, &["-C", &repo, "rev-list", "--all", "--count"], &[])
            .await?;
        let commits = count.parse().map_err(|e| {
            LakeflowError::decode("git rev-list", format!("unexpected count `{count}`: {e}"))
        })?;
        Ok(WalkSummary { commits })
    }

    fn scratch_dir(&self) -> PathBuf {
        self.scratch.join(format!("lakeflow_git_{}", Uuid::now_v7()))
    }

    async fn walk_clone(
        &self,
        ctx: &TaskContext,
        url: &str,
        config: &[String],
        envs: &[(&str, &str)],
    ) -> Result<WalkSummary> {
        let dest = self.scratch_dir();
        let dest_str = dest.to_string_lossy().to_string();
        let mut args: Vec<&str> = Vec::new();
        for entry in config {
            args.push("-c");
            args.push(entry);
        }
        args.extend(["clone", "--bare", "--quiet", url, dest_str.as_str()]);

        let result = match self.git(ctx, &args, envs).await {
            Ok(_) => self.count_commits(ctx, &dest).await,
            Err(e) => Err(e),
        };
        if let Err(e) = tokio::fs::remove_dir_all(&dest).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %dest.display(), error = %e, "failed to remove scratch clone");
            }
        }
        result
    }
}

#[async_trait]
impl RepoWalker for GitCliWalker {
    async fn clone_over_http(
        &self,
        ctx: &TaskContext,
        url: &str,
        options: &GitExtractorOptions,
    ) -> Result<WalkSummary> {
        let mut url = Url::parse(url)
            .map_err(|e| LakeflowError::validation(format!("invalid clone url: {e}")))?;
        if !options.user.is_empty() {
            set_userinfo(&mut url, &options.user, &options.password)?;
        }
        let mut config = Vec::new();
        if !options.proxy.is_empty() {
            config.push(format!("http.proxy={}", options.proxy));
        }
        self.walk_clone(ctx, url.as_str(), &config, &[]).await
    }

    async fn clone_over_ssh(
        &self,
        ctx: &TaskContext,
        url: &str,
        options: &GitExtractorOptions,
    ) -> Result<WalkSummary> {
        if options.private_key.is_empty() {
            return self.walk_clone(ctx, url, &[], &[]).await;
        }
        if !options.passphrase.is_empty() {
            return Err(LakeflowError::validation(
                "gitextractor: passphrase-protected keys need an ssh agent",
            ));
        }

        let key_path = self.scratch.join(format!("lakeflow_key_{}", Uuid::now_v7()));
        let result = match write_private_key(&key_path, &options.private_key).await {
            Ok(()) => {
                let ssh_command = format!(
                    "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
                    key_path.display()
                );
                self.walk_clone(ctx, url, &[], &[("GIT_SSH_COMMAND", ssh_command.as_str())])
                    .await
            }
            Err(e) => Err(e),
        };
        match tokio::fs::remove_file(&key_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "failed to remove temporary key file"),
        }
        result
    }

    async fn local_repo(
        &self,
        ctx: &TaskContext,
        path: &Path,
        _options: &GitExtractorOptions,
    ) -> Result<WalkSummary> {
        self.count_commits(ctx, path).await
    }
}

/// Write `key` to a fresh file only the owner can read.
async fn write_private_key(path: &Path, key: &str) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut open = tokio::fs::OpenOptions::new();
    open.write(true).create_new(true);
    #[cfg(unix)]
    open.mode(0o600);
    let mut file = open.open(path).await.map_err(|e| LakeflowError::io(path, e))?;
    file.write_all(key.as_bytes())
        .await
        .map_err(|e| LakeflowError::io(path, e))?;
    file.flush().await.map_err(|e| LakeflowError::io(path, e))
}
