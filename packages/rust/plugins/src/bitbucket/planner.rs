use std::sync::Arc;

use async_trait::async_trait;
use lakeflow_core::{CodeSource, ScopeResolver};
use lakeflow_ingest::ApiClient;
use lakeflow_shared::{Connection, Credentials, LakeflowError, Result, TaskOptions, decode_options};
use tracing::debug;
use url::Url;

use super::models::ApiRepo;
use super::{BitbucketOptions, PLUGIN_NAME, repo_id_generator};
use crate::set_userinfo;

/// Compiles bitbucket scopes. The repository lookup goes through the
/// connection's API client.
pub struct BitbucketResolver {
    connection: Connection,
    client: Arc<ApiClient>,
}

impl BitbucketResolver {
    pub fn new(connection: Connection, client: Arc<ApiClient>) -> Self {
        Self { connection, client }
    }
}

#[async_trait]
impl ScopeResolver for BitbucketResolver {
    fn plugin(&self) -> &str {
        PLUGIN_NAME
    }

    fn connection_id(&self) -> u64 {
        self.connection.id
    }

    fn validate_options(&self, options: &TaskOptions) -> Result<()> {
        decode_options::<BitbucketOptions>(options)?.validate()
    }

    async fn code_source(&self, options: &TaskOptions) -> Result<Option<CodeSource>> {
        let options: BitbucketOptions = decode_options(options)?;
        let path = format!("repositories/{}/{}", options.owner, options.repo);
        let repo: ApiRepo = self.client.get_json(&path, &[]).await?;

        let href = repo
            .links
            .clone
            .iter()
            .find(|link| link.name == "https")
            .map(|link| link.href.as_str())
            .ok_or_else(|| {
                LakeflowError::validation(format!("no https clone url for {}", repo.full_name))
            })?;
        let mut clone_url = Url::parse(href).map_err(|e| {
            LakeflowError::validation(format!("invalid clone url `{href}`: {e}"))
        })?;
        match &self.connection.credentials {
            Credentials::Basic { username, password } => {
                set_userinfo(&mut clone_url, username, password)?;
            }
            Credentials::Token(token) => set_userinfo(&mut clone_url, "x-token-auth", token)?,
            Credentials::None => {}
        }
        debug!(repo = %repo.full_name, "clone url resolved");

        Ok(Some(CodeSource {
            repo_id: repo_id_generator().generate(self.connection.id, &[&options.full_name()]),
            clone_url,
        }))
    }
}
