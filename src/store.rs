//! store.rs: client do shared store (Redis) que liga workers ao coordenador.
//!
//! Cinco primitivas sustentam o core: o hash de registry `sites:config`, as
//! chaves de medição `checks:{siteId}:{workerId}` com TTL, os hashes de
//! presença `workers:{workerId}` com TTL, o canal de pub/sub
//! `site-config-updates` e o lock advisory `sync:lock` (set-if-absent com
//! TTL). Erros de transporte sobem para o chamador; só o bulk sync e o
//! heartbeat têm política própria de retry.

use crate::error::{MonitorError, Result};
use crate::types::{Measurement, RegistryUpdate, SiteConfig, SiteRef, WorkerPresence};
use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use tracing::warn;

pub const REGISTRY_KEY: &str = "sites:config";
pub const UPDATES_CHANNEL: &str = "site-config-updates";
pub const SYNC_LOCK_KEY: &str = "sync:lock";

pub const MEASUREMENT_TTL_SECS: u64 = 600;
pub const PRESENCE_TTL_SECS: u64 = 60;
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const SYNC_LOCK_TTL_SECS: u64 = 60;

const PRESENCE_PREFIX: &str = "workers:";

pub fn measurement_key(site_id: i64, worker_id: &str) -> String {
    format!("checks:{site_id}:{worker_id}")
}

pub fn presence_key(worker_id: &str) -> String {
    format!("{PRESENCE_PREFIX}{worker_id}")
}

/// Compara a projeção armazenada com a esperada pelos campos que o
/// `verifySync` cobre: url, intervalo e flag de ativo.
pub fn projection_matches(stored: &SiteConfig, expected: &SiteConfig) -> bool {
    stored.url == expected.url
        && stored.check_interval == expected.check_interval
        && stored.is_active == expected.is_active
}

#[derive(Clone)]
pub struct SharedStore {
    client: redis::Client,
    conn: ConnectionManager,
}

impl SharedStore {
    /// Abre a conexão multiplexada de comandos. O pub/sub usa conexões
    /// dedicadas criadas em `subscribe`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    // ---------- registry ----------

    /// Upsert da projeção de um site, seguido do publish de `update`.
    pub async fn sync_site(&self, site: &SiteConfig) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(site)?;
        let _: () = conn.hset(REGISTRY_KEY, site.id.to_string(), json).await?;
        self.publish(&RegistryUpdate::Update { site: site.clone() })
            .await
    }

    /// Remove a projeção e publica `delete`.
    pub async fn remove_site(&self, site_id: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(REGISTRY_KEY, site_id.to_string()).await?;
        self.publish(&RegistryUpdate::Delete {
            site: SiteRef { id: site_id },
        })
        .await
    }

    /// Reescreve o hash inteiro sob o lock advisory `sync:lock` e publica
    /// `bulk`. O lock é liberado em todo caminho, inclusive em erro.
    pub async fn bulk_sync(&self, sites: &[SiteConfig]) -> Result<()> {
        self.acquire_sync_lock().await?;
        let result = self.bulk_sync_locked(sites).await;
        if let Err(e) = self.release_sync_lock().await {
            warn!("[STORE] falha ao liberar {SYNC_LOCK_KEY}: {e}");
        }
        result
    }

    async fn bulk_sync_locked(&self, sites: &[SiteConfig]) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.del(REGISTRY_KEY).ignore();
        for site in sites {
            pipe.hset(REGISTRY_KEY, site.id.to_string(), serde_json::to_string(site)?)
                .ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        self.publish(&RegistryUpdate::Bulk {
            sites: sites.to_vec(),
        })
        .await
    }

    /// Verifica o invariante de registry: contagens iguais e todo campo do
    /// hash igual à projeção esperada em `(url, checkInterval, isActive)`.
    pub async fn verify_sync(&self, sites: &[SiteConfig]) -> Result<bool> {
        let stored = self.read_registry().await?;
        if stored.len() != sites.len() {
            return Ok(false);
        }
        let by_id: HashMap<i64, &SiteConfig> = stored.iter().map(|s| (s.id, s)).collect();
        Ok(sites.iter().all(|expected| {
            by_id
                .get(&expected.id)
                .is_some_and(|got| projection_matches(got, expected))
        }))
    }

    /// Snapshot completo do registry. Campos malformados são descartados
    /// com log, nunca derrubam o leitor.
    pub async fn read_registry(&self) -> Result<Vec<SiteConfig>> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(REGISTRY_KEY).await?;
        let mut sites = Vec::with_capacity(map.len());
        for (field, value) in map {
            match serde_json::from_str::<SiteConfig>(&value) {
                Ok(site) => sites.push(site),
                Err(e) => warn!("[STORE] projeção malformada em {REGISTRY_KEY}[{field}]: {e}"),
            }
        }
        Ok(sites)
    }

    async fn acquire_sync_lock(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(SYNC_LOCK_KEY)
            .arg(Utc::now().timestamp_millis())
            .arg("NX")
            .arg("EX")
            .arg(SYNC_LOCK_TTL_SECS)
            .query_async(&mut conn)
            .await?;
        match acquired {
            Some(_) => Ok(()),
            None => Err(MonitorError::SyncLockHeld),
        }
    }

    async fn release_sync_lock(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(SYNC_LOCK_KEY).await?;
        Ok(())
    }

    // ---------- medições ----------

    /// Grava a medição de um par (site, worker) com TTL de 600 s. Gravada
    /// mesmo quando todas as camadas falharam: a estrutura codifica os erros.
    pub async fn write_measurement(&self, site_id: i64, m: &Measurement) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(m)?;
        redis::cmd("SET")
            .arg(measurement_key(site_id, &m.worker_id))
            .arg(json)
            .arg("EX")
            .arg(MEASUREMENT_TTL_SECS)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Última medição de um worker para um site; `None` se a chave expirou
    /// ou nunca existiu.
    pub async fn read_measurement(
        &self,
        site_id: i64,
        worker_id: &str,
    ) -> Result<Option<Measurement>> {
        let mut conn = self.conn.clone();
        let key = measurement_key(site_id, worker_id);
        let value: Option<String> = conn.get(&key).await?;
        Ok(value.and_then(|json| match serde_json::from_str(&json) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("[STORE] medição malformada em {key}: {e}");
                None
            }
        }))
    }

    // ---------- presença ----------

    /// Reescreve o hash de presença e renova o TTL de 60 s.
    pub async fn write_presence(&self, presence: &WorkerPresence) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = presence_key(&presence.worker_id);
        let mut pipe = redis::pipe();
        for (field, value) in presence.to_fields() {
            pipe.hset(&key, field, value).ignore();
        }
        pipe.cmd("EXPIRE").arg(&key).arg(PRESENCE_TTL_SECS).ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    pub async fn remove_presence(&self, worker_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(presence_key(worker_id)).await?;
        Ok(())
    }

    /// Ids de todos os workers com chave de presença viva, em ordem lexical.
    ///
    /// Varredura incremental com SCAN: roda a cada tick de consenso e não
    /// pode travar o event loop do Redis como um KEYS faria.
    pub async fn list_worker_ids(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{PRESENCE_PREFIX}*");
        let mut ids = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            ids.extend(
                keys.into_iter()
                    .filter_map(|k| k.strip_prefix(PRESENCE_PREFIX).map(str::to_string)),
            );
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    pub async fn get_presence(&self, worker_id: &str) -> Result<Option<WorkerPresence>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(presence_key(worker_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(WorkerPresence::from_fields(worker_id, &fields))
    }

    pub async fn list_workers(&self) -> Result<Vec<WorkerPresence>> {
        let mut workers = Vec::new();
        for id in self.list_worker_ids().await? {
            if let Some(p) = self.get_presence(&id).await? {
                workers.push(p);
            }
        }
        Ok(workers)
    }

    // ---------- pub/sub ----------

    pub async fn publish(&self, update: &RegistryUpdate) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(update)?;
        let _: () = conn.publish(UPDATES_CHANNEL, json).await?;
        Ok(())
    }

    /// Conexão dedicada de pub/sub já inscrita em `site-config-updates`.
    /// O chamador consome via `on_message` e trata a queda da conexão.
    pub async fn subscribe(&self) -> Result<redis::aio::PubSub> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(UPDATES_CHANNEL).await?;
        Ok(pubsub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projecao(url: &str, interval: i32, active: bool) -> SiteConfig {
        SiteConfig {
            id: 1,
            url: url.into(),
            check_interval: interval,
            is_active: active,
            user_id: 10,
        }
    }

    #[test]
    fn chaves_seguem_o_contrato_de_wire() {
        assert_eq!(measurement_key(12, "sa-east"), "checks:12:sa-east");
        assert_eq!(presence_key("eu-west"), "workers:eu-west");
    }

    #[test]
    fn verificacao_compara_url_intervalo_e_ativo() {
        let esperado = projecao("https://a.test", 5, true);
        assert!(projection_matches(&esperado, &esperado));
        assert!(!projection_matches(
            &projecao("https://b.test", 5, true),
            &esperado
        ));
        assert!(!projection_matches(
            &projecao("https://a.test", 6, true),
            &esperado
        ));
        assert!(!projection_matches(
            &projecao("https://a.test", 5, false),
            &esperado
        ));
    }

    #[test]
    fn user_id_nao_participa_da_verificacao() {
        let esperado = projecao("https://a.test", 5, true);
        let mut outro_dono = esperado.clone();
        outro_dono.user_id = 99;
        assert!(projection_matches(&outro_dono, &esperado));
    }
}
