//! scheduler.rs: scheduler do worker de sondas.
//!
//! Máquina de estados do processo: STARTING abre a conexão com o shared
//! store e reivindica a chave de presença; RUNNING assina o canal de
//! updates, carrega o snapshot do registry e agenda os sites; DRAINING
//! cancela todos os timers, libera a presença e encerra.
//!
//! Ticks do mesmo site nunca se sobrepõem neste worker: com uma sonda em
//! voo, o próximo tick é descartado, não enfileirado. Sites diferentes
//! rodam em paralelo.

use crate::config::Config;
use crate::error::Result;
use crate::probe::Prober;
use crate::store::{self, SharedStore};
use crate::types::{RegistryUpdate, SiteConfig, WorkerPresence, WorkerState};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

/// Intervalo entre ticks de um site, a partir do `checkInterval` em minutos.
fn tick_period(check_interval_minutes: i32) -> Duration {
    Duration::from_secs(check_interval_minutes.max(1) as u64 * 60)
}

struct SiteTimer {
    config: SiteConfig,
    handle: JoinHandle<()>,
}

pub struct WorkerScheduler {
    store: SharedStore,
    prober: Arc<Prober>,
    region: String,
    started_at: DateTime<Utc>,
    timers: Mutex<HashMap<i64, SiteTimer>>,
    aux_tasks: Mutex<Vec<JoinHandle<()>>>,
    state: Mutex<WorkerState>,
}

impl WorkerScheduler {
    /// STARTING: conecta ao shared store e reivindica a presença. Qualquer
    /// falha aqui é fatal para o processo; a partir daí o scheduler entra em
    /// RUNNING e passa a se recuperar sozinho.
    pub async fn start(config: &Config) -> anyhow::Result<Arc<Self>> {
        let region = config.worker_region.clone();
        info!("[WORKER {region}] iniciando (STARTING)");

        let store = SharedStore::connect(&config.redis_url()).await?;
        store.ping().await?;
        let prober = Arc::new(Prober::new(
            region.clone(),
            config.check_timeout(),
            config.tcp_ports(),
        )?);

        let scheduler = Arc::new(Self {
            store,
            prober,
            region,
            started_at: Utc::now(),
            timers: Mutex::new(HashMap::new()),
            aux_tasks: Mutex::new(Vec::new()),
            state: Mutex::new(WorkerState::Starting),
        });

        scheduler.write_presence().await?;

        // RUNNING: snapshot e agendamento acontecem dentro do loop de
        // assinatura, que refaz ambos a cada (re)conexão.
        *scheduler.state.lock().await = WorkerState::Running;
        let mut aux = scheduler.aux_tasks.lock().await;
        aux.push(tokio::spawn(Arc::clone(&scheduler).subscription_loop()));
        aux.push(tokio::spawn(Arc::clone(&scheduler).heartbeat_loop()));
        drop(aux);

        info!("[WORKER {}] em execução (RUNNING)", scheduler.region);
        Ok(scheduler)
    }

    pub fn worker_id(&self) -> &str {
        &self.region
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.lock().await
    }

    pub async fn active_sites(&self) -> usize {
        self.timers.lock().await.len()
    }

    /// Snapshot das configurações atualmente agendadas neste worker.
    pub async fn scheduled_sites(&self) -> Vec<SiteConfig> {
        self.timers
            .lock()
            .await
            .values()
            .map(|t| t.config.clone())
            .collect()
    }

    /// DRAINING: cancela timers e tarefas auxiliares (abortando sondas em
    /// voo), libera a presença e fecha.
    pub async fn drain(&self) {
        *self.state.lock().await = WorkerState::Draining;
        info!("[WORKER {}] drenando (DRAINING)", self.region);

        for handle in self.aux_tasks.lock().await.drain(..) {
            handle.abort();
        }
        let mut timers = self.timers.lock().await;
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
        drop(timers);

        if let Err(e) = self.store.remove_presence(&self.region).await {
            warn!("[WORKER {}] falha ao liberar presença: {e}", self.region);
        }
        *self.state.lock().await = WorkerState::Stopped;
        info!("[WORKER {}] parado (STOPPED)", self.region);
    }

    // ---------- presença ----------

    fn presence(&self, active_sites: i64) -> WorkerPresence {
        WorkerPresence {
            worker_id: self.region.clone(),
            region: self.region.clone(),
            started_at: self.started_at,
            last_heartbeat: Utc::now(),
            active_sites,
        }
    }

    async fn write_presence(&self) -> Result<()> {
        let active = self.timers.lock().await.len() as i64;
        self.store.write_presence(&self.presence(active)).await
    }

    /// Reescreve a presença a cada 30 s (TTL de 60 s tolera uma batida
    /// perdida). Falhas são logadas e a próxima batida tenta de novo.
    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(store::HEARTBEAT_INTERVAL_SECS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.write_presence().await {
                warn!("[HEARTBEAT {}] falha ao renovar presença: {e}", self.region);
            } else {
                debug!("[HEARTBEAT {}] presença renovada", self.region);
            }
        }
    }

    // ---------- agendamento por site ----------

    /// (Re)agenda um site: cancela o timer existente e, se o site estiver
    /// ativo, instala um novo com sonda inicial imediata.
    async fn apply_site(self: &Arc<Self>, site: SiteConfig) {
        let mut timers = self.timers.lock().await;
        if let Some(old) = timers.remove(&site.id) {
            old.handle.abort();
        }
        if !site.is_active {
            debug!(
                "[WORKER {}] site {} inativo; timer cancelado",
                self.region, site.id
            );
            return;
        }
        debug!(
            "[WORKER {}] agendando site {} a cada {} min",
            self.region, site.id, site.check_interval
        );
        let handle = self.spawn_site_task(site.clone());
        timers.insert(site.id, SiteTimer { config: site, handle });
    }

    fn spawn_site_task(self: &Arc<Self>, site: SiteConfig) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(tick_period(site.check_interval));
            // sonda em voo descarta o tick seguinte em vez de enfileirar
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                // o primeiro tick dispara imediatamente: sonda inicial
                ticker.tick().await;
                let measurement = this.prober.probe(&site.url).await;
                debug!(
                    "[PROBE {}] site {} medido: isUp={}",
                    this.region, site.id, measurement.is_up
                );
                if let Err(e) = this.store.write_measurement(site.id, &measurement).await {
                    error!(
                        "[PROBE {}] falha ao publicar medição do site {}: {e}",
                        this.region, site.id
                    );
                }
            }
        })
    }

    async fn remove_site(&self, site_id: i64) {
        if let Some(timer) = self.timers.lock().await.remove(&site_id) {
            timer.handle.abort();
            info!(
                "[WORKER {}] site {site_id} removido do agendamento",
                self.region
            );
        }
    }

    /// `bulk`: cancela TODOS os timers, limpa o estado local e agenda cada
    /// entrada ativa do payload.
    async fn apply_bulk(self: &Arc<Self>, sites: Vec<SiteConfig>) {
        let mut timers = self.timers.lock().await;
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
        drop(timers);
        let total = sites.len();
        for site in sites {
            if site.is_active {
                self.apply_site(site).await;
            }
        }
        info!(
            "[WORKER {}] bulk aplicado: {} sites no payload, {} agendados",
            self.region,
            total,
            self.active_sites().await
        );
    }

    async fn apply_update(self: &Arc<Self>, update: RegistryUpdate) {
        match update {
            RegistryUpdate::Add { site } | RegistryUpdate::Update { site } => {
                self.apply_site(site).await;
            }
            RegistryUpdate::Delete { site } => self.remove_site(site.id).await,
            RegistryUpdate::Bulk { sites } => self.apply_bulk(sites).await,
        }
    }

    // ---------- assinatura do registry ----------

    /// Assina `site-config-updates` e aplica cada mensagem. A cada
    /// (re)conexão o snapshot do registry é relido e aplicado como bulk,
    /// reconciliando o que foi perdido enquanto desconectado. Na queda, as
    /// sondas continuam com o último registry conhecido e a reconexão segue
    /// backoff exponencial até 60 s.
    async fn subscription_loop(self: Arc<Self>) {
        let mut backoff = Duration::from_secs(1);
        loop {
            match self.store.subscribe().await {
                Ok(mut pubsub) => {
                    info!(
                        "[WORKER {}] inscrito em {}",
                        self.region,
                        store::UPDATES_CHANNEL
                    );
                    backoff = Duration::from_secs(1);

                    match self.store.read_registry().await {
                        Ok(snapshot) => self.apply_bulk(snapshot).await,
                        Err(e) => warn!(
                            "[WORKER {}] falha ao ler snapshot do registry: {e}",
                            self.region
                        ),
                    }

                    let mut stream = pubsub.on_message();
                    while let Some(msg) = stream.next().await {
                        let payload: String = match msg.get_payload() {
                            Ok(p) => p,
                            Err(e) => {
                                warn!("[WORKER {}] payload ilegível: {e}", self.region);
                                continue;
                            }
                        };
                        match serde_json::from_str::<RegistryUpdate>(&payload) {
                            Ok(update) => self.apply_update(update).await,
                            Err(e) => warn!(
                                "[WORKER {}] mensagem malformada no canal: {e}",
                                self.region
                            ),
                        }
                    }
                    warn!(
                        "[WORKER {}] conexão de pub/sub encerrada; reconectando",
                        self.region
                    );
                }
                Err(e) => warn!(
                    "[WORKER {}] falha ao assinar canal: {e}; nova tentativa em {:?}",
                    self.region, backoff
                ),
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(60));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervalo_minimo_de_um_minuto() {
        assert_eq!(tick_period(1), Duration::from_secs(60));
    }

    #[test]
    fn intervalo_maximo_de_uma_hora() {
        assert_eq!(tick_period(60), Duration::from_secs(3600));
    }

    #[test]
    fn intervalo_invalido_cai_para_o_minimo() {
        assert_eq!(tick_period(0), Duration::from_secs(60));
        assert_eq!(tick_period(-5), Duration::from_secs(60));
    }
}
