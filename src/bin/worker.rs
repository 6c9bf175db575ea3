// src/bin/worker.rs

use anyhow::Result;
use monitoramento_sites::config::Config;
use monitoramento_sites::scheduler::WorkerScheduler;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::load()?;

    // Falha de shared store durante a partida é irrecuperável: o processo
    // sai com código diferente de zero.
    let scheduler = WorkerScheduler::start(&config).await?;

    tokio::signal::ctrl_c().await?;
    info!(
        "[WORKER {}] sinal de parada recebido ({} sites agendados)",
        scheduler.worker_id(),
        scheduler.active_sites().await
    );
    scheduler.drain().await;
    Ok(())
}
