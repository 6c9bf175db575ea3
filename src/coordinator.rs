//! coordinator.rs: scheduler de consenso do coordenador.
//!
//! Um tick de um minuto por site ativo, independente do `checkInterval` do
//! próprio site: o coordenador agrega o que estiver no cache de medições.
//! Se a persistência atrasar além do minuto, o tick sobreposto é descartado
//! em vez de enfileirado; uma linha de consenso por minuto por site é teto,
//! não piso.

use crate::consensus::ConsensusEngine;
use crate::error::Result;
use crate::notify::NotificationDispatcher;
use crate::storage::Storage;
use crate::store::SharedStore;
use crate::types::{Site, SiteStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

const CONSENSUS_TICK: Duration = Duration::from_secs(60);

/// Bootstrap conta como transição: sem linha anterior, notifica.
pub fn should_notify(previous_is_up: Option<bool>, new_is_up: bool) -> bool {
    previous_is_up != Some(new_is_up)
}

/// Mensagem e categoria de uma transição de consenso.
pub fn transition_message(url: &str, is_up: bool, at: DateTime<Utc>) -> (String, &'static str) {
    if is_up {
        (
            format!("Site {url} está no ar (consenso em {})", at.to_rfc3339()),
            "site_up",
        )
    } else {
        (
            format!("Site {url} está fora do ar (consenso em {})", at.to_rfc3339()),
            "site_down",
        )
    }
}

pub struct CoordinatorScheduler {
    storage: Arc<Storage>,
    engine: ConsensusEngine,
    dispatcher: Arc<NotificationDispatcher>,
    tickers: Mutex<HashMap<i64, JoinHandle<()>>>,
}

impl CoordinatorScheduler {
    pub fn new(
        storage: Arc<Storage>,
        store: SharedStore,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            storage,
            engine: ConsensusEngine::new(store),
            dispatcher,
            tickers: Mutex::new(HashMap::new()),
        })
    }

    /// Instala o tick de consenso de um site. Idempotente: um timer já
    /// existente é cancelado antes; sites inativos são apenas removidos.
    pub async fn add_site_schedule(self: &Arc<Self>, site: &Site) {
        if !site.is_active {
            self.remove_site_schedule(site.id).await;
            return;
        }
        let mut tickers = self.tickers.lock().await;
        if let Some(old) = tickers.remove(&site.id) {
            old.abort();
        }
        let this = Arc::clone(self);
        let site_id = site.id;
        let url = site.url.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(CONSENSUS_TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = this.run_tick(site_id, &url).await {
                    error!("[CONSENSO] tick falhou para o site {site_id}: {e}");
                }
            }
        });
        tickers.insert(site.id, handle);
        info!("[CONSENSO] tick de consenso instalado para o site {site_id}");
    }

    pub async fn update_site_schedule(self: &Arc<Self>, site: &Site) {
        self.add_site_schedule(site).await;
    }

    pub async fn remove_site_schedule(&self, site_id: i64) {
        if let Some(handle) = self.tickers.lock().await.remove(&site_id) {
            handle.abort();
            info!("[CONSENSO] tick de consenso removido do site {site_id}");
        }
    }

    pub async fn scheduled_count(&self) -> usize {
        self.tickers.lock().await.len()
    }

    /// Cancela todos os tickers; medições em trânsito são abandonadas.
    pub async fn shutdown(&self) {
        let mut tickers = self.tickers.lock().await;
        for (_, handle) in tickers.drain() {
            handle.abort();
        }
    }

    /// Um tick de consenso: lê as medições vivas, persiste as linhas por
    /// worker e só então a linha agregada, e compara com a linha de consenso
    /// mais recente anterior ao tick para decidir a notificação.
    async fn run_tick(&self, site_id: i64, url: &str) -> Result<()> {
        let tick_at = Utc::now();
        let Some((measurements, consensus)) = self.engine.evaluate(site_id).await? else {
            debug!("[CONSENSO] site {site_id} sem medições vivas; tick silencioso");
            return Ok(());
        };

        for m in &measurements {
            self.storage
                .insert_site_status(&SiteStatus::from_measurement(site_id, m))
                .await?;
        }

        let previous = self.storage.latest_consensus_before(site_id, tick_at).await?;
        let row = consensus.to_status(site_id, tick_at);
        self.storage.insert_site_status(&row).await?;

        let previous_is_up = previous.map(|p| p.is_up);
        if should_notify(previous_is_up, row.is_up) {
            info!(
                "[CONSENSO] transição do site {site_id}: {:?} -> {}",
                previous_is_up, row.is_up
            );
            let (message, category) = transition_message(url, row.is_up, tick_at);
            self.dispatcher.dispatch(site_id, &message, category).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_conta_como_transicao() {
        assert!(should_notify(None, true));
        assert!(should_notify(None, false));
    }

    #[test]
    fn estado_igual_nao_notifica() {
        assert!(!should_notify(Some(true), true));
        assert!(!should_notify(Some(false), false));
    }

    #[test]
    fn mudanca_de_estado_notifica() {
        assert!(should_notify(Some(true), false));
        assert!(should_notify(Some(false), true));
    }

    #[test]
    fn mensagem_carrega_url_e_categoria() {
        let (msg, category) = transition_message("https://a.test", false, Utc::now());
        assert!(msg.contains("https://a.test"));
        assert_eq!(category, "site_down");
        let (_, category) = transition_message("https://a.test", true, Utc::now());
        assert_eq!(category, "site_up");
    }
}
