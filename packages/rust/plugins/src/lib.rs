//! Connectors shipped with Lakeflow.
//!
//! Each connector module provides a [`Plugin`](lakeflow_ingest::Plugin) with
//! its subtask catalogue and, for data sources, a
//! [`ScopeResolver`](lakeflow_core::ScopeResolver) used by the plan compiler.

pub mod bitbucket;
pub mod gitextractor;
pub mod gitlab;
pub mod sonarqube;

use std::sync::Arc;

use lakeflow_core::ScopeResolver;
use lakeflow_ingest::{ApiClient, PluginRegistry};
use lakeflow_shared::{Connection, LakeflowError, Result};
use url::Url;

use crate::gitextractor::{GitExtractorPlugin, RepoWalker};

/// Registry with every bundled plugin. Code extraction goes through `walker`.
pub fn registry(walker: Arc<dyn RepoWalker>) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register(Arc::new(bitbucket::BitbucketPlugin));
    registry.register(Arc::new(gitlab::GitlabPlugin));
    registry.register(Arc::new(sonarqube::SonarqubePlugin));
    registry.register(Arc::new(GitExtractorPlugin::new(walker)));
    registry
}

/// The scope resolver of the plugin owning `connection`.
pub fn resolver_for(
    connection: Connection,
    client: Arc<ApiClient>,
) -> Result<Box<dyn ScopeResolver>> {
    match connection.plugin.as_str() {
        bitbucket::PLUGIN_NAME => Ok(Box::new(bitbucket::BitbucketResolver::new(
            connection, client,
        ))),
        gitlab::PLUGIN_NAME => Ok(Box::new(gitlab::GitlabResolver::new(connection, client))),
        sonarqube::PLUGIN_NAME => Ok(Box::new(sonarqube::SonarqubeResolver::new(connection))),
        other => Err(LakeflowError::config(format!(
            "connection {}: plugin `{other}` cannot compile blueprints",
            connection.id
        ))),
    }
}

/// Embed credentials into a clone URL.
pub(crate) fn set_userinfo(url: &mut Url, username: &str, password: &str) -> Result<()> {
    url.set_username(username)
        .and_then(|()| url.set_password(Some(password)))
        .map_err(|()| LakeflowError::validation(format!("cannot embed credentials in `{url}`")))
}
