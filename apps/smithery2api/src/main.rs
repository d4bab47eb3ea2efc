use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use smithery_common::GlobalConfig;
use smithery_core::{ChatEngine, MasterKeyAuth};
use smithery_provider_core::{Credential, CredentialPool, ModelGate};
use smithery_provider_impl::{
    SmitheryProvider, SmitheryProviderConfig, UpstreamClientConfig, WreqUpstreamClient,
};
use smithery_router::{RouterState, ServiceInfo, router};
use smithery_provider_core::MetricsSink;
use smithery_storage::{MemoryMetricsStore, MetricsStore, ModelVisibilityStore, SqliteMetricsStore};

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("smithery2api failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let config = cli.load_patch()?.into_config()?;
    log_config(&config);

    let credentials: Vec<Credential> = config
        .credentials
        .iter()
        .cloned()
        .enumerate()
        .map(|(index, entry)| Credential::from_config(index, entry, &config.project_ref))
        .collect();
    for (index, credential) in credentials.iter().enumerate() {
        info!(
            credential_index = index,
            name = %credential.name,
            email = %credential.masked_email.as_deref().unwrap_or("-"),
            "credential loaded"
        );
    }
    let pool = Arc::new(CredentialPool::new(credentials)?);

    let visibility = Arc::new(ModelVisibilityStore::load(
        &config.known_models,
        &config.hidden_models,
        Some(config.visibility_path.clone()),
    ));
    info!(
        hidden = ?visibility.hidden_models(),
        path = %config.visibility_path.display(),
        "model visibility loaded"
    );
    let (metrics, metrics_sink): (Arc<dyn MetricsStore>, Arc<dyn MetricsSink>) =
        match &config.metrics_db_path {
            Some(path) => {
                let store = Arc::new(SqliteMetricsStore::open(path).await?);
                info!(backend = "sqlite", path = %path.display(), "request metrics store ready");
                (store.clone(), store)
            }
            None => {
                let store = Arc::new(MemoryMetricsStore::new(config.metrics_max_records));
                info!(
                    backend = "memory",
                    max_records = config.metrics_max_records,
                    "request metrics store ready"
                );
                (store.clone(), store)
            }
        };

    let client = Arc::new(WreqUpstreamClient::new(UpstreamClientConfig::from_global(
        &config,
    ))?);
    let provider = Arc::new(SmitheryProvider::new(
        client,
        SmitheryProviderConfig::from_global(&config),
    ));
    let engine = ChatEngine::new(
        pool,
        ModelGate::new(visibility.clone()),
        provider,
        metrics_sink,
    )
    .with_retry_next_credential(config.retry_next_credential);

    let app = router(RouterState {
        engine,
        auth: MasterKeyAuth::new(config.master_key.clone()),
        visibility,
        metrics,
        service: ServiceInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    });

    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("smithery2api=info,smithery=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_config(config: &GlobalConfig) {
    info!(
        host = %config.host,
        port = config.port,
        auth_enabled = config.auth_enabled(),
        proxy = %config.proxy.as_deref().unwrap_or(""),
        timeout_secs = config.timeout_secs,
        upstream_url = %config.upstream_url,
        credentials = config.credentials.len(),
        known_models = config.known_models.len(),
        aliases = config.model_aliases.len(),
        retry_next_credential = config.retry_next_credential,
        metrics_db_path = %config
            .metrics_db_path
            .as_deref()
            .map(|path| path.display().to_string())
            .unwrap_or_default(),
        "config loaded"
    );
    if !config.auth_enabled() {
        warn!("no master key configured; client authentication is disabled");
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
