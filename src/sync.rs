//! sync.rs: sincronização do registry entre o banco durável e o shared store.
//!
//! Na partida do coordenador, todos os sites ativos são projetados via bulk
//! sync e a projeção é verificada; divergência persistente aborta o
//! processo. Em runtime, cada create/update/delete de site propaga a mesma
//! mudança para o shared store e para o scheduler de consenso.

use crate::coordinator::CoordinatorScheduler;
use crate::error::{MonitorError, Result};
use crate::storage::Storage;
use crate::store::SharedStore;
use crate::types::{Site, SiteConfig, SitePatch};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};
use url::Url;

// tentativa inicial + 3 novas tentativas
const SYNC_ATTEMPTS: u32 = 4;
const SYNC_RETRY_DELAY: Duration = Duration::from_secs(5);
const RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// Valida a URL de um site: absoluta e com esquema http/https.
pub fn validate_url(raw: &str) -> Result<()> {
    match Url::parse(raw) {
        Ok(u) if (u.scheme() == "http" || u.scheme() == "https") && u.host_str().is_some() => {
            Ok(())
        }
        _ => Err(MonitorError::BadInput(format!("URL inválida: {raw}"))),
    }
}

/// Intervalo de checagem em minutos: inteiro entre 1 e 60.
pub fn validate_interval(minutes: i32) -> Result<()> {
    if (1..=60).contains(&minutes) {
        Ok(())
    } else {
        Err(MonitorError::BadInput(format!(
            "checkInterval fora de 1..=60: {minutes}"
        )))
    }
}

pub struct RegistrySync {
    storage: Arc<Storage>,
    store: SharedStore,
    scheduler: Arc<CoordinatorScheduler>,
}

impl RegistrySync {
    pub fn new(
        storage: Arc<Storage>,
        store: SharedStore,
        scheduler: Arc<CoordinatorScheduler>,
    ) -> Self {
        Self {
            storage,
            store,
            scheduler,
        }
    }

    /// Sequência de partida do coordenador: bulk sync dos sites ativos,
    /// verificação com até 3 novas tentativas espaçadas de 5 s após a
    /// primeira e, com o registry íntegro, instalação do tick de consenso de
    /// cada site. Esgotadas as tentativas, a partida aborta.
    pub async fn startup(&self) -> Result<Vec<Site>> {
        let sites = self.storage.list_active_sites().await?;
        let configs: Vec<SiteConfig> = sites.iter().map(SiteConfig::from).collect();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sync_and_verify(&configs).await {
                Ok(true) => break,
                Ok(false) => warn!(
                    "[SYNC] verificação divergente (tentativa {attempt}/{SYNC_ATTEMPTS})"
                ),
                Err(e) => warn!(
                    "[SYNC] bulk sync falhou (tentativa {attempt}/{SYNC_ATTEMPTS}): {e}"
                ),
            }
            if attempt >= SYNC_ATTEMPTS {
                return Err(MonitorError::RegistryOutOfSync(format!(
                    "verificação falhou após {SYNC_ATTEMPTS} tentativas"
                )));
            }
            tokio::time::sleep(SYNC_RETRY_DELAY).await;
        }
        info!("[SYNC] registry sincronizado: {} sites ativos", configs.len());

        for site in &sites {
            self.scheduler.add_site_schedule(site).await;
        }
        Ok(sites)
    }

    async fn sync_and_verify(&self, configs: &[SiteConfig]) -> Result<bool> {
        self.store.bulk_sync(configs).await?;
        self.store.verify_sync(configs).await
    }

    /// Guarda de runtime: reverifica a projeção periodicamente e refaz o
    /// bulk sync quando o shared store diverge do banco (p.ex. depois de um
    /// flush ou de uma reconexão). Workers recebem o `bulk` e reinstalam os
    /// timers exatamente como no payload.
    pub fn spawn_guard(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(RECONCILE_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // o primeiro tick imediato é inócuo: a partida acabou de verificar
            loop {
                ticker.tick().await;
                if let Err(e) = this.reconcile().await {
                    warn!("[SYNC] reconciliação do registry falhou: {e}");
                }
            }
        })
    }

    async fn reconcile(&self) -> Result<()> {
        let sites = self.storage.list_active_sites().await?;
        let configs: Vec<SiteConfig> = sites.iter().map(SiteConfig::from).collect();
        if self.store.verify_sync(&configs).await? {
            return Ok(());
        }
        warn!("[SYNC] projeção divergente detectada; refazendo bulk sync");
        self.store.bulk_sync(&configs).await?;
        Ok(())
    }

    /// create: grava a linha durável, projeta no shared store e instala o
    /// tick de consenso.
    pub async fn create_site(
        &self,
        name: &str,
        url: &str,
        check_interval: i32,
        user_id: i64,
    ) -> Result<Site> {
        let site = self
            .storage
            .insert_site(name, url, check_interval, user_id)
            .await?;
        self.store.sync_site(&SiteConfig::from(&site)).await?;
        self.scheduler.add_site_schedule(&site).await;
        info!("[SYNC] site {} criado e sincronizado", site.id);
        Ok(site)
    }

    /// update: reescreve a linha, re-projeta e re-agenda (um site que ficou
    /// inativo perde o tick; os workers cancelam ao receber o update).
    pub async fn update_site(&self, id: i64, patch: &SitePatch) -> Result<Site> {
        let site = self
            .storage
            .update_site(id, patch)
            .await?
            .ok_or(MonitorError::SiteNotFound(id))?;
        self.store.sync_site(&SiteConfig::from(&site)).await?;
        self.scheduler.update_site_schedule(&site).await;
        info!("[SYNC] site {} atualizado e re-sincronizado", site.id);
        Ok(site)
    }

    /// delete: histórico de status primeiro, depois o site, depois a
    /// projeção e o tick. As chaves `checks:*` do site expiram sozinhas.
    pub async fn delete_site(&self, id: i64) -> Result<()> {
        let site = self
            .storage
            .get_site(id)
            .await?
            .ok_or(MonitorError::SiteNotFound(id))?;
        let history = self.storage.delete_site_statuses(id).await?;
        self.storage.delete_site(id).await?;
        self.store.remove_site(id).await?;
        self.scheduler.remove_site_schedule(id).await;
        info!(
            "[SYNC] site {} removido ({history} linhas de histórico apagadas)",
            site.id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_http_e_https_sao_aceitas() {
        assert!(validate_url("http://example.test").is_ok());
        assert!(validate_url("https://example.test/caminho?x=1").is_ok());
    }

    #[test]
    fn url_relativa_ou_de_outro_esquema_e_rejeitada() {
        assert!(validate_url("example.test").is_err());
        assert!(validate_url("/caminho").is_err());
        assert!(validate_url("ftp://example.test").is_err());
        assert!(validate_url("data:text/plain,oi").is_err());
    }

    #[test]
    fn intervalo_aceita_os_limites() {
        assert!(validate_interval(1).is_ok());
        assert!(validate_interval(60).is_ok());
    }

    #[test]
    fn intervalo_fora_da_faixa_e_rejeitado() {
        assert!(validate_interval(0).is_err());
        assert!(validate_interval(61).is_err());
        assert!(validate_interval(-1).is_err());
    }
}
