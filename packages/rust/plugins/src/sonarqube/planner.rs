use async_trait::async_trait;
use chrono::SecondsFormat;
use lakeflow_core::{CodeSource, ScopeResolver};
use lakeflow_shared::{
    Connection, LakeflowError, Result, Scope, SyncPolicy, TaskOptions, decode_options,
};

use super::{PLUGIN_NAME, SonarqubeOptions};

/// Compiles sonarqube scopes: the scope id is the project key.
pub struct SonarqubeResolver {
    connection: Connection,
}

impl SonarqubeResolver {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl ScopeResolver for SonarqubeResolver {
    fn plugin(&self) -> &str {
        PLUGIN_NAME
    }

    fn connection_id(&self) -> u64 {
        self.connection.id
    }

    fn scope_options(&self, scope: &Scope, sync_policy: &SyncPolicy) -> Result<TaskOptions> {
        if scope.id.is_empty() {
            return Err(LakeflowError::validation("sonarqube: scope id (project key) is empty"));
        }
        let mut options = TaskOptions::new();
        options.insert("projectKey".into(), scope.id.clone().into());
        if let Some(after) = sync_policy.created_date_after {
            options.insert(
                "createdDateAfter".into(),
                after.to_rfc3339_opts(SecondsFormat::Secs, true).into(),
            );
        }
        Ok(options)
    }

    fn validate_options(&self, options: &TaskOptions) -> Result<()> {
        decode_options::<SonarqubeOptions>(options)?.validate()
    }

    async fn code_source(&self, _options: &TaskOptions) -> Result<Option<CodeSource>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeflow_core::PlanCompiler;
    use lakeflow_ingest::Plugin;
    use lakeflow_shared::Blueprint;
    use serde_json::json;
    use url::Url;

    use crate::sonarqube::SonarqubePlugin;

    fn resolver() -> SonarqubeResolver {
        SonarqubeResolver::new(Connection {
            id: 4,
            plugin: PLUGIN_NAME.into(),
            endpoint: Url::parse("https://sonar.example.com/api/").unwrap(),
            credentials: lakeflow_shared::Credentials::Token("squ".into()),
        })
    }

    #[tokio::test]
    async fn scope_id_becomes_the_project_key() {
        let blueprint: Blueprint = serde_json::from_value(json!({
            "scopes": [{"id": "org:app", "entities": ["SECURITYTESTING", "CODE"]}],
            "syncPolicy": {"createdDateAfter": "2023-01-01T00:00:00Z"}
        }))
        .unwrap();

        let plan = PlanCompiler::new()
            .compile(&blueprint, &resolver(), &SonarqubePlugin.subtask_metas())
            .await
            .unwrap();

        // No code source: only the sonarqube task, even though CODE was asked for.
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.stages()[0].len(), 1);
        let task = &plan.stages()[0][0];
        assert_eq!(task.plugin, "sonarqube");
        assert_eq!(task.options["projectKey"], "org:app");
        assert_eq!(task.options["connectionId"], 4);
        assert_eq!(task.options["createdDateAfter"], "2023-01-01T00:00:00Z");
        assert_eq!(
            task.subtasks,
            vec!["collectProjects", "extractProjects", "convertProjects"]
        );
    }

    #[tokio::test]
    async fn empty_scope_id_is_rejected() {
        let blueprint: Blueprint = serde_json::from_value(json!({
            "scopes": [{"id": "", "entities": ["SECURITYTESTING"]}]
        }))
        .unwrap();
        let err = PlanCompiler::new()
            .compile(&blueprint, &resolver(), &SonarqubePlugin.subtask_metas())
            .await
            .unwrap_err();
        assert!(matches!(err, LakeflowError::Scope { index: 0, .. }));
    }
}
