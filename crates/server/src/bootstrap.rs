use std::sync::Arc;

use shopkeep_agent::{AgentRuntime, OpenAiCompatibleClient, ToolDispatcher};
use shopkeep_core::config::{AppConfig, ConfigError};
use shopkeep_db::{
    connect_with_config, migrations, DbPool, SqlCheckpointStore, SqlCommerceStore,
    SqlProductRepository,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("llm client setup failed: {0}")]
    LlmClient(String),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        llm_model = %config.llm.model,
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let llm = OpenAiCompatibleClient::from_config(&config)
        .map_err(|error| BootstrapError::LlmClient(error.to_string()))?;
    let store = Arc::new(SqlCommerceStore::new(db_pool.clone()));
    let search = Arc::new(SqlProductRepository::new(db_pool.clone()));
    let checkpoints = Arc::new(SqlCheckpointStore::new(db_pool.clone()));
    let runtime = AgentRuntime::from_config(
        &config,
        Arc::new(llm),
        ToolDispatcher::new(store, search),
        checkpoints,
    );

    Ok(Application { config, db_pool, runtime: Arc::new(runtime) })
}

#[cfg(test)]
mod tests {
    use shopkeep_core::config::{AppConfig, ConfigOverrides, LoadOptions};

    use crate::bootstrap::{bootstrap_with_config, Application, BootstrapError};

    async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
        bootstrap_with_config(AppConfig::load(options)?).await
    }

    fn overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_the_runtime() {
        let app = bootstrap(overrides("sqlite::memory:")).await.expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' \
             AND name IN ('products', 'carts', 'orders', 'conversation_checkpoints')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 4);

        let sessions = app.runtime.list_sessions().await.expect("list sessions");
        assert!(sessions.is_empty());
        assert_eq!(app.runtime.settings().max_graph_steps, app.config.agent.max_graph_steps);

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_rejects_non_sqlite_database_urls() {
        let result = bootstrap(overrides("postgres://localhost/shopkeep")).await;
        assert!(matches!(result, Err(BootstrapError::Config(_))));
    }
}
