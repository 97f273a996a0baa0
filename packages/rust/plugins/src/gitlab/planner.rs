use std::sync::Arc;

use async_trait::async_trait;
use lakeflow_core::{CodeSource, ScopeResolver};
use lakeflow_ingest::ApiClient;
use lakeflow_shared::{Connection, Credentials, LakeflowError, Result, TaskOptions, decode_options};
use tracing::debug;
use url::Url;

use super::models::ApiProject;
use super::{GitlabOptions, PLUGIN_NAME, project_id_generator};
use crate::set_userinfo;

/// Compiles gitlab scopes. Clone URLs come from the project API.
pub struct GitlabResolver {
    connection: Connection,
    client: Arc<ApiClient>,
}

impl GitlabResolver {
    pub fn new(connection: Connection, client: Arc<ApiClient>) -> Self {
        Self { connection, client }
    }
}

#[async_trait]
impl ScopeResolver for GitlabResolver {
    fn plugin(&self) -> &str {
        PLUGIN_NAME
    }

    fn connection_id(&self) -> u64 {
        self.connection.id
    }

    fn validate_options(&self, options: &TaskOptions) -> Result<()> {
        decode_options::<GitlabOptions>(options)?.validate()
    }

    async fn code_source(&self, options: &TaskOptions) -> Result<Option<CodeSource>> {
        let options: GitlabOptions = decode_options(options)?;
        let project: ApiProject = self
            .client
            .get_json(&format!("projects/{}", options.project_id), &[])
            .await?;
        if project.http_url_to_repo.is_empty() {
            return Err(LakeflowError::validation(format!(
                "gitlab project {} has no http clone url",
                project.id
            )));
        }

        let mut clone_url = Url::parse(&project.http_url_to_repo).map_err(|e| {
            LakeflowError::validation(format!(
                "invalid clone url `{}`: {e}",
                project.http_url_to_repo
            ))
        })?;
        match &self.connection.credentials {
            Credentials::Token(token) => set_userinfo(&mut clone_url, "oauth2", token)?,
            Credentials::Basic { username, password } => {
                set_userinfo(&mut clone_url, username, password)?;
            }
            Credentials::None => {}
        }
        debug!(project = %project.path_with_namespace, "clone url resolved");

        Ok(Some(CodeSource {
            repo_id: project_id_generator().generate(self.connection.id, &[&options.project_id]),
            clone_url,
        }))
    }
}
