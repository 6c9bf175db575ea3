// src/bin/coordinator.rs

use anyhow::Result;
use monitoramento_sites::api::{self, ApiState};
use monitoramento_sites::config::Config;
use monitoramento_sites::coordinator::CoordinatorScheduler;
use monitoramento_sites::notify::{self, NotificationDispatcher};
use monitoramento_sites::storage::Storage;
use monitoramento_sites::store::SharedStore;
use monitoramento_sites::sync::RegistrySync;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::load()?;
    let storage = Arc::new(Storage::connect(config.database_url()?).await?);
    let store = SharedStore::connect(&config.redis_url()).await?;
    store.ping().await?;

    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::clone(&storage),
        notify::default_registry(),
    ));
    let scheduler =
        CoordinatorScheduler::new(Arc::clone(&storage), store.clone(), dispatcher);
    let sync = Arc::new(RegistrySync::new(
        Arc::clone(&storage),
        store.clone(),
        Arc::clone(&scheduler),
    ));

    // Partida: bulk sync + verificação com retry; divergência persistente
    // aborta o processo com código diferente de zero.
    let sites = sync.startup().await?;
    info!("[COORDINATOR] {} sites ativos agendados", sites.len());
    let guard = sync.spawn_guard();

    let app = api::router(ApiState {
        sync,
        storage,
        store,
    });
    let listener = tokio::net::TcpListener::bind(&config.api_bind).await?;
    info!("[API] escutando em {}", config.api_bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("[COORDINATOR] encerrando tickers de consenso");
    guard.abort();
    scheduler.shutdown().await;
    Ok(())
}
