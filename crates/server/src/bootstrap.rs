use std::sync::Arc;
use std::time::Duration;

use pedido_agent::{AgentRuntime, ConversationLog, HandlerDeps, HttpNluEngine, NluEngine, NluError};
use pedido_channel::{ChannelRunner, ReconnectPolicy, TransportError};
use pedido_core::config::{AppConfig, ConfigError, LoadOptions};
use pedido_core::MoneyFormat;
use pedido_db::repositories::{
    SqlAuditEventRepository, SqlAuditSink, SqlClientRepository, SqlConversationRepository,
    SqlOrderRepository, SqlProductRepository,
};
use pedido_db::{connect_with_config, migrations, DbPool};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use crate::service::RouterService;
use crate::webhook::{self, WebhookState};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
    pub channel_runner: ChannelRunner,
    pub webhook: WebhookState,
    pub audit_writer: JoinHandle<()>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("nlu engine setup failed: {0}")]
    Nlu(#[source] NluError),
    #[error("channel transport setup failed: {0}")]
    Channel(#[source] TransportError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    config.validate()?;

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

    let nlu: Arc<dyn NluEngine> =
        Arc::new(HttpNluEngine::from_config(&config).map_err(BootstrapError::Nlu)?);
    let (audit, audit_writer) =
        SqlAuditSink::spawn(Arc::new(SqlAuditEventRepository::new(db_pool.clone())));

    let deps = HandlerDeps {
        products: Arc::new(SqlProductRepository::new(db_pool.clone())),
        clients: Arc::new(SqlClientRepository::new(db_pool.clone())),
        orders: Arc::new(SqlOrderRepository::new(db_pool.clone())),
        conversation: ConversationLog::new(
            Arc::new(SqlConversationRepository::new(db_pool.clone())),
            config.conversation.draft_recovery_window,
        ),
        audit: Arc::new(audit),
        money: MoneyFormat::new(config.conversation.currency_symbol.clone()),
    };
    let runtime = Arc::new(AgentRuntime::new(
        nlu,
        deps,
        Duration::from_secs(config.nlu.timeout_secs),
    ));
    info!(
        event_name = "system.bootstrap.router_ready",
        correlation_id = "bootstrap",
        nlu_provider = config.nlu.provider.as_str(),
        nlu_model = %config.nlu.model,
        "turn router wired"
    );

    let (webhook, transport) = webhook::channel(&config).map_err(BootstrapError::Channel)?;
    let channel_runner = ChannelRunner::new(
        Arc::new(transport),
        Arc::new(RouterService::new(runtime.clone())),
        ReconnectPolicy::default(),
        Duration::from_secs(config.channel.idle_worker_secs),
    );

    Ok(Application { config, db_pool, runtime, channel_runner, webhook, audit_writer })
}
