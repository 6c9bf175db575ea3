//! types.rs: modelos de dados da plataforma de monitoramento de sites.
//!
//! Representação fiel e idiomática do schema PostgreSQL (`sites`,
//! `site_statuses`, `notification_settings`) e dos formatos JSON trafegados
//! pelo shared store: projeção de registry, medições, presença de workers e
//! mensagens de pub/sub. Os campos JSON seguem o contrato de wire em
//! camelCase.

use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use tokio_postgres::Row;

/// Worker id reservado para a linha de consenso persistida pelo coordenador.
pub const CONSENSUS_WORKER_ID: &str = "consensus_worker";

/// Estado do scheduler do worker (não persistido)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// Struct de site monitorado (tabela `sites`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    pub name: String,
    pub url: String,
    /// Intervalo de checagem em minutos (1 a 60).
    pub check_interval: i32,
    pub is_active: bool,
    pub user_id: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<Row> for Site {
    fn from(row: Row) -> Self {
        Self {
            id: row.get("id"),
            name: row.get("name"),
            url: row.get("url"),
            check_interval: row.get("check_interval"),
            is_active: row.get("is_active"),
            user_id: row.get("user_id"),
            created_at: row.try_get("created_at").ok(),
            updated_at: row.try_get("updated_at").ok(),
        }
    }
}

/// Atualização parcial de um site (corpo do PATCH); campos ausentes
/// preservam o valor atual.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SitePatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub check_interval: Option<i32>,
    pub is_active: Option<bool>,
}

/// Projeção do site mantida no hash `sites:config` do shared store.
///
/// Invariante: para cada site ativo no banco existe exatamente um campo no
/// hash com estes valores. Removida atomicamente junto com o site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    pub id: i64,
    pub url: String,
    pub check_interval: i32,
    pub is_active: bool,
    pub user_id: i64,
}

impl From<&Site> for SiteConfig {
    fn from(site: &Site) -> Self {
        Self {
            id: site.id,
            url: site.url.clone(),
            check_interval: site.check_interval,
            is_active: site.is_active,
            user_id: site.user_id,
        }
    }
}

/// Referência mínima de site, usada na mensagem de `delete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRef {
    pub id: i64,
}

/// Mensagem publicada no canal `site-config-updates`.
///
/// `bulk` supersede logicamente qualquer `add`/`update`/`delete` anterior no
/// mesmo stream: o worker cancela todos os timers e reinstala só o payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum RegistryUpdate {
    Add { site: SiteConfig },
    Update { site: SiteConfig },
    Delete { site: SiteRef },
    Bulk { sites: Vec<SiteConfig> },
}

/// Sub-checagem DNS de uma medição.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsCheck {
    pub is_resolved: bool,
    pub addresses: Vec<IpAddr>,
    pub nameservers: Vec<String>,
    /// Milissegundos até a resposta, ou até a detecção da falha.
    pub response_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sub-checagem TCP de uma porta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpCheck {
    pub port: u16,
    pub is_connected: bool,
    pub response_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sub-checagem ICMP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingCheck {
    pub is_up: bool,
    pub response_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Certificado TLS observado no handshake (aceito mesmo se autoassinado).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SslInfo {
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub issuer: String,
    pub days_until_expiry: i64,
}

/// Sub-checagem HTTP/S.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpCheck {
    pub is_up: bool,
    pub status: Option<u16>,
    pub response_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl: Option<SslInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Resultado completo de uma sonda para um par (site, worker).
///
/// Nunca representa falha como erro: cada camada captura o próprio erro na
/// estrutura. `is_up` deriva da camada HTTP. Publicada no shared store sob
/// `checks:{siteId}:{workerId}` com TTL de 600 s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub url: String,
    pub checked_at: DateTime<Utc>,
    pub worker_id: String,
    pub is_up: bool,
    pub dns_check: DnsCheck,
    pub tcp_checks: Vec<TcpCheck>,
    pub ping_check: PingCheck,
    pub http_check: HttpCheck,
}

/// Presença de um worker (hash `workers:{workerId}`, TTL 60 s).
///
/// A ausência da chave significa "worker considerado offline".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPresence {
    pub worker_id: String,
    pub region: String,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub active_sites: i64,
}

impl WorkerPresence {
    /// Campos do hash Redis, na ordem em que são gravados.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("region", self.region.clone()),
            ("startedAt", self.started_at.to_rfc3339()),
            ("lastHeartbeat", self.last_heartbeat.to_rfc3339()),
            ("activeSites", self.active_sites.to_string()),
        ]
    }

    /// Reconstrói a presença a partir de um HGETALL. Retorna `None` se os
    /// campos obrigatórios estiverem ausentes ou malformados.
    pub fn from_fields(worker_id: &str, fields: &HashMap<String, String>) -> Option<Self> {
        let parse_ts = |k: &str| {
            fields
                .get(k)
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };
        Some(Self {
            worker_id: worker_id.to_string(),
            region: fields.get("region")?.clone(),
            started_at: parse_ts("startedAt")?,
            last_heartbeat: parse_ts("lastHeartbeat")?,
            active_sites: fields
                .get("activeSites")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        })
    }
}

/// Linha durável de status (tabela `site_statuses`, append-only).
///
/// Persistida a cada tick de consenso: uma linha por medição de worker e
/// depois uma linha agregada com `worker_id = "consensus_worker"`. Os tempos
/// de resposta da linha de consenso são nulos.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteStatus {
    pub id: i64,
    pub site_id: i64,
    pub worker_id: String,
    pub checked_at: DateTime<Utc>,
    pub is_up: bool,
    pub ping_is_up: bool,
    pub http_is_up: bool,
    pub dns_is_up: bool,
    pub ping_response_time: Option<i64>,
    pub http_response_time: Option<i64>,
    pub dns_response_time: Option<i64>,
    pub http_status: Option<i32>,
    pub dns_records: serde_json::Value,
    pub dns_nameservers: serde_json::Value,
    pub tcp_checks: serde_json::Value,
    pub has_ssl: bool,
    pub ssl_valid_from: Option<DateTime<Utc>>,
    pub ssl_valid_to: Option<DateTime<Utc>>,
    pub ssl_issuer: Option<String>,
    pub ssl_days_until_expiry: Option<i32>,
    pub error: Option<String>,
}

impl From<Row> for SiteStatus {
    fn from(row: Row) -> Self {
        Self {
            id: row.get("id"),
            site_id: row.get("site_id"),
            worker_id: row.get("worker_id"),
            checked_at: row.get("checked_at"),
            is_up: row.get("is_up"),
            ping_is_up: row.get("ping_is_up"),
            http_is_up: row.get("http_is_up"),
            dns_is_up: row.get("dns_is_up"),
            ping_response_time: row.get("ping_response_time"),
            http_response_time: row.get("http_response_time"),
            dns_response_time: row.get("dns_response_time"),
            http_status: row.get("http_status"),
            dns_records: row.get("dns_records"),
            dns_nameservers: row.get("dns_nameservers"),
            tcp_checks: row.get("tcp_checks"),
            has_ssl: row.get("has_ssl"),
            ssl_valid_from: row.get("ssl_valid_from"),
            ssl_valid_to: row.get("ssl_valid_to"),
            ssl_issuer: row.get("ssl_issuer"),
            ssl_days_until_expiry: row.get("ssl_days_until_expiry"),
            error: row.get("error"),
        }
    }
}

impl SiteStatus {
    /// Linha durável correspondente à medição de um worker.
    pub fn from_measurement(site_id: i64, m: &Measurement) -> Self {
        Self {
            id: 0, // será preenchido pelo banco
            site_id,
            worker_id: m.worker_id.clone(),
            checked_at: m.checked_at,
            is_up: m.is_up,
            ping_is_up: m.ping_check.is_up,
            http_is_up: m.http_check.is_up,
            dns_is_up: m.dns_check.is_resolved,
            ping_response_time: Some(m.ping_check.response_time),
            http_response_time: Some(m.http_check.response_time),
            dns_response_time: Some(m.dns_check.response_time),
            http_status: m.http_check.status.map(i32::from),
            dns_records: serde_json::json!(m.dns_check.addresses),
            dns_nameservers: serde_json::json!(m.dns_check.nameservers),
            tcp_checks: serde_json::json!(m.tcp_checks),
            has_ssl: m.http_check.ssl.is_some(),
            ssl_valid_from: m.http_check.ssl.as_ref().map(|s| s.valid_from),
            ssl_valid_to: m.http_check.ssl.as_ref().map(|s| s.valid_to),
            ssl_issuer: m.http_check.ssl.as_ref().map(|s| s.issuer.clone()),
            ssl_days_until_expiry: m
                .http_check
                .ssl
                .as_ref()
                .map(|s| s.days_until_expiry as i32),
            error: m.http_check.error.clone(),
        }
    }
}

/// Enum de canal de notificação (PostgreSQL)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSql, FromSql)]
#[postgres(name = "notification_channel", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Email,
    Slack,
    Telegram,
    Discord,
    Push,
}

impl NotificationChannel {
    /// Chave do canal no registro de notificadores.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Slack => "slack",
            Self::Telegram => "telegram",
            Self::Discord => "discord",
            Self::Push => "push",
        }
    }
}

/// Configuração de notificação de um site (entidade externa, somente leitura)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSetting {
    pub id: i64,
    pub site_id: i64,
    pub channel: NotificationChannel,
    pub target: String,
    pub enabled: bool,
}

impl From<Row> for NotificationSetting {
    fn from(row: Row) -> Self {
        Self {
            id: row.get("id"),
            site_id: row.get("site_id"),
            channel: row.get("channel"),
            target: row.get("target"),
            enabled: row.get("enabled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn medicao_exemplo() -> Measurement {
        Measurement {
            url: "https://example.test".into(),
            checked_at: Utc::now(),
            worker_id: "sa-east".into(),
            is_up: true,
            dns_check: DnsCheck {
                is_resolved: true,
                addresses: vec!["93.184.216.34".parse().unwrap()],
                nameservers: vec!["a.iana-servers.net".into()],
                response_time: 12,
                error: None,
            },
            tcp_checks: vec![
                TcpCheck {
                    port: 80,
                    is_connected: true,
                    response_time: 40,
                    error: None,
                },
                TcpCheck {
                    port: 443,
                    is_connected: false,
                    response_time: 3000,
                    error: Some("timeout".into()),
                },
            ],
            ping_check: PingCheck {
                is_up: true,
                response_time: 18,
                error: None,
            },
            http_check: HttpCheck {
                is_up: true,
                status: Some(200),
                response_time: 130,
                ssl: Some(SslInfo {
                    valid_from: Utc::now(),
                    valid_to: Utc::now(),
                    issuer: "R11".into(),
                    days_until_expiry: 10,
                }),
                error: None,
            },
        }
    }

    #[test]
    fn medicao_roundtrip_json() {
        let m = medicao_exemplo();
        let json = serde_json::to_string(&m).unwrap();
        let de: Measurement = serde_json::from_str(&json).unwrap();
        assert_eq!(m, de);
    }

    #[test]
    fn medicao_usa_nomes_de_campo_do_contrato() {
        let v = serde_json::to_value(medicao_exemplo()).unwrap();
        assert!(v.get("checkedAt").is_some());
        assert!(v.get("workerId").is_some());
        assert!(v.get("isUp").is_some());
        assert!(v["dnsCheck"].get("isResolved").is_some());
        assert!(v["tcpChecks"][0].get("isConnected").is_some());
        assert!(v["httpCheck"]["ssl"].get("daysUntilExpiry").is_some());
        // erro ausente não aparece no JSON
        assert!(v["pingCheck"].get("error").is_none());
    }

    #[test]
    fn registry_update_serializa_acao() {
        let msg = RegistryUpdate::Delete { site: SiteRef { id: 7 } };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["action"], "delete");
        assert_eq!(v["site"]["id"], 7);

        let bulk: RegistryUpdate =
            serde_json::from_str(r#"{"action":"bulk","sites":[]}"#).unwrap();
        assert_eq!(bulk, RegistryUpdate::Bulk { sites: vec![] });
    }

    #[test]
    fn projecao_de_site_usa_camel_case() {
        let site = Site {
            id: 1,
            name: "exemplo".into(),
            url: "https://example.test".into(),
            check_interval: 5,
            is_active: true,
            user_id: 42,
            created_at: None,
            updated_at: None,
        };
        let v = serde_json::to_value(SiteConfig::from(&site)).unwrap();
        assert_eq!(v["checkInterval"], 5);
        assert_eq!(v["isActive"], true);
        assert_eq!(v["userId"], 42);
    }

    #[test]
    fn presenca_roundtrip_em_campos_de_hash() {
        let p = WorkerPresence {
            worker_id: "sa-east".into(),
            region: "sa-east".into(),
            started_at: Utc::now(),
            last_heartbeat: Utc::now(),
            active_sites: 3,
        };
        let map: HashMap<String, String> = p
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let de = WorkerPresence::from_fields("sa-east", &map).unwrap();
        assert_eq!(de.region, p.region);
        assert_eq!(de.active_sites, 3);
        assert_eq!(de.last_heartbeat, p.last_heartbeat);
    }

    #[test]
    fn status_de_medicao_preserva_ssl() {
        let m = medicao_exemplo();
        let st = SiteStatus::from_measurement(9, &m);
        assert_eq!(st.site_id, 9);
        assert_eq!(st.worker_id, "sa-east");
        assert!(st.has_ssl);
        assert_eq!(st.ssl_days_until_expiry, Some(10));
        assert_eq!(st.http_status, Some(200));
        assert_eq!(st.ping_response_time, Some(18));
    }
}
