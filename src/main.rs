use challenge_manager::{
    api::{self, AppState},
    cluster::{ClusterContext, KubeClusterClient},
    config::ManagerConfig,
    orchestrator::{Orchestrator, OrchestratorSettings},
    store::{
        ChallengeConfigStore, ChallengeRepository, InMemoryChallengeRepository,
        KubeChallengeRepository,
    },
    telemetry::{self, Metrics},
};
use kube::Client;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let metrics = Arc::new(Metrics::default());

    info!("Starting challenge manager");
    let config = ManagerConfig::from_env()?;
    info!(namespace = %config.namespace, base_domain = %config.base_domain, "Configuration loaded");
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let repository: Arc<dyn ChallengeRepository> = match config.challenges_file.as_deref() {
        Some(path) if config.repository == "memory" => {
            let json = tokio::fs::read_to_string(path).await?;
            Arc::new(InMemoryChallengeRepository::from_json(&json)?)
        }
        _ => Arc::new(KubeChallengeRepository::new(client.clone(), &config.namespace)),
    };
    let store = ChallengeConfigStore::new(repository, config.cache_ttl(), Arc::clone(&metrics));

    let cluster = Arc::new(KubeClusterClient::new(ClusterContext::from_config(
        client, &config,
    )));
    let orchestrator = Orchestrator::new(
        store,
        cluster,
        OrchestratorSettings::from_config(&config)?,
        metrics,
    );

    // instances created before a restart would otherwise never be reaped
    if let Err(e) = orchestrator.recover().await {
        warn!("Startup recovery failed, continuing without it: {}", e);
    }
    let maintenance = orchestrator.spawn_maintenance();

    let app = api::create_router(AppState {
        orchestrator,
        expose_errors: !config.is_production(),
    });
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    maintenance.abort();
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
