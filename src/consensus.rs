//! consensus.rs: consolidação das medições mais recentes dos workers.
//!
//! Para cada site, o coordenador lê a última medição viva de cada worker
//! presente e deriva um status de consenso por camada. A regra exige ao
//! menos dois workers discordando de "up" para derrubar uma camada; com um
//! único worker o consenso permanece "up", um viés deliberado quando a
//! frota está degradada.

use crate::error::Result;
use crate::store::SharedStore;
use crate::types::{CONSENSUS_WORKER_ID, Measurement, SiteStatus, SslInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Status consolidado de uma porta TCP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpConsensus {
    pub port: u16,
    pub is_up: bool,
}

/// Resultado do consenso para um site em um instante.
///
/// Tempos de resposta não fazem parte do consenso; a linha durável agregada
/// os persiste como nulos.
#[derive(Debug, Clone, PartialEq)]
pub struct Consensus {
    pub is_up: bool,
    pub ping_is_up: bool,
    pub http_is_up: bool,
    pub dns_is_up: bool,
    pub tcp: Vec<TcpConsensus>,
    pub ssl: Option<SslInfo>,
    pub dns_records: Vec<IpAddr>,
    pub dns_nameservers: Vec<String>,
}

/// Uma camada cai somente com dois ou mais dissidentes.
fn layer_up(votes: &[bool]) -> bool {
    let down = votes.iter().filter(|up| !**up).count();
    if votes.len() >= 2 { down < 2 } else { true }
}

/// Consolida o conjunto V de medições. Retorna `None` quando V é vazio:
/// ausência de dados produz silêncio, não alerta falso.
pub fn consolidate(measurements: &[Measurement]) -> Option<Consensus> {
    if measurements.is_empty() {
        return None;
    }

    // Ordem lexical por worker id torna determinística a escolha da
    // "primeira" medição nos passos de SSL e DNS.
    let mut v: Vec<&Measurement> = measurements.iter().collect();
    v.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));

    let collect = |f: fn(&Measurement) -> bool| v.iter().map(|m| f(m)).collect::<Vec<bool>>();
    let is_up = layer_up(&collect(|m| m.is_up));
    let ping_is_up = layer_up(&collect(|m| m.ping_check.is_up));
    let http_is_up = layer_up(&collect(|m| m.http_check.is_up));
    let dns_is_up = layer_up(&collect(|m| m.dns_check.is_resolved));

    // SSL: primeira medição que reporta certificado.
    let ssl = v.iter().find_map(|m| m.http_check.ssl.clone());

    // Detalhes de DNS: primeira medição com DNS resolvido.
    let (dns_records, dns_nameservers) = v
        .iter()
        .find(|m| m.dns_check.is_resolved)
        .map(|m| {
            (
                m.dns_check.addresses.clone(),
                m.dns_check.nameservers.clone(),
            )
        })
        .unwrap_or_default();

    // TCP por porta, com a mesma regra de dois dissidentes sobre |V|.
    let mut ports: BTreeMap<u16, usize> = BTreeMap::new();
    for m in &v {
        for t in &m.tcp_checks {
            if !t.is_connected {
                *ports.entry(t.port).or_insert(0) += 1;
            } else {
                ports.entry(t.port).or_insert(0);
            }
        }
    }
    let tcp = ports
        .into_iter()
        .map(|(port, disconnected)| TcpConsensus {
            port,
            is_up: !(v.len() >= 2 && disconnected >= 2),
        })
        .collect();

    Some(Consensus {
        is_up,
        ping_is_up,
        http_is_up,
        dns_is_up,
        tcp,
        ssl,
        dns_records,
        dns_nameservers,
    })
}

impl Consensus {
    /// Linha durável agregada, com `worker_id = "consensus_worker"` e tempos
    /// de resposta nulos.
    pub fn to_status(&self, site_id: i64, checked_at: DateTime<Utc>) -> SiteStatus {
        SiteStatus {
            id: 0,
            site_id,
            worker_id: CONSENSUS_WORKER_ID.to_string(),
            checked_at,
            is_up: self.is_up,
            ping_is_up: self.ping_is_up,
            http_is_up: self.http_is_up,
            dns_is_up: self.dns_is_up,
            ping_response_time: None,
            http_response_time: None,
            dns_response_time: None,
            http_status: None,
            dns_records: serde_json::json!(self.dns_records),
            dns_nameservers: serde_json::json!(self.dns_nameservers),
            tcp_checks: serde_json::json!(self.tcp),
            has_ssl: self.ssl.is_some(),
            ssl_valid_from: self.ssl.as_ref().map(|s| s.valid_from),
            ssl_valid_to: self.ssl.as_ref().map(|s| s.valid_to),
            ssl_issuer: self.ssl.as_ref().map(|s| s.issuer.clone()),
            ssl_days_until_expiry: self.ssl.as_ref().map(|s| s.days_until_expiry as i32),
            error: None,
        }
    }
}

/// Motor de consenso ligado ao shared store.
pub struct ConsensusEngine {
    store: SharedStore,
}

impl ConsensusEngine {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Enumera os workers presentes, busca as medições vivas do site e
    /// consolida. Chaves expiradas ou ausentes são simplesmente descartadas;
    /// com V vazio o tick não emite nada.
    pub async fn evaluate(&self, site_id: i64) -> Result<Option<(Vec<Measurement>, Consensus)>> {
        let workers = self.store.list_worker_ids().await?;
        let mut measurements = Vec::with_capacity(workers.len());
        for worker_id in &workers {
            if let Some(m) = self.store.read_measurement(site_id, worker_id).await? {
                measurements.push(m);
            }
        }
        measurements.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        Ok(consolidate(&measurements).map(|c| (measurements, c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DnsCheck, HttpCheck, PingCheck, TcpCheck};

    fn medicao(worker: &str, up: bool) -> Measurement {
        Measurement {
            url: "https://example.test".into(),
            checked_at: Utc::now(),
            worker_id: worker.into(),
            is_up: up,
            dns_check: DnsCheck {
                is_resolved: up,
                addresses: if up {
                    vec![format!("10.0.0.{}", worker.len()).parse().unwrap()]
                } else {
                    vec![]
                },
                nameservers: if up { vec![format!("ns.{worker}.test")] } else { vec![] },
                response_time: 10,
                error: None,
            },
            tcp_checks: vec![TcpCheck {
                port: 80,
                is_connected: up,
                response_time: 20,
                error: None,
            }],
            ping_check: PingCheck {
                is_up: up,
                response_time: 15,
                error: None,
            },
            http_check: HttpCheck {
                is_up: up,
                status: if up { Some(200) } else { None },
                response_time: 100,
                ssl: None,
                error: None,
            },
        }
    }

    #[test]
    fn v_vazio_nao_emite_consenso() {
        assert!(consolidate(&[]).is_none());
    }

    #[test]
    fn worker_unico_reportando_down_nao_derruba() {
        let c = consolidate(&[medicao("a", false)]).unwrap();
        assert!(c.is_up);
        assert!(c.ping_is_up);
        assert!(c.http_is_up);
        assert!(c.dns_is_up);
    }

    #[test]
    fn um_dissidente_entre_dois_nao_derruba() {
        let c = consolidate(&[medicao("a", false), medicao("b", true)]).unwrap();
        assert!(c.is_up);
    }

    #[test]
    fn dois_dissidentes_entre_tres_derrubam() {
        let c = consolidate(&[medicao("a", false), medicao("b", false), medicao("c", true)])
            .unwrap();
        assert!(!c.is_up);
        assert!(!c.ping_is_up);
        assert!(!c.http_is_up);
    }

    #[test]
    fn camadas_sao_independentes() {
        // ping caiu em toda a frota, HTTP segue de pé
        let mut a = medicao("a", true);
        let mut b = medicao("b", true);
        let mut c = medicao("c", true);
        for m in [&mut a, &mut b, &mut c] {
            m.ping_check.is_up = false;
        }
        let consenso = consolidate(&[a, b, c]).unwrap();
        assert!(!consenso.ping_is_up);
        assert!(consenso.is_up);
        assert!(consenso.http_is_up);
    }

    #[test]
    fn ssl_vem_da_primeira_medicao_em_ordem_lexical() {
        let mut a = medicao("a", true);
        let mut b = medicao("b", true);
        a.http_check.ssl = Some(SslInfo {
            valid_from: Utc::now(),
            valid_to: Utc::now(),
            issuer: "emissor-a".into(),
            days_until_expiry: 5,
        });
        b.http_check.ssl = Some(SslInfo {
            valid_from: Utc::now(),
            valid_to: Utc::now(),
            issuer: "emissor-b".into(),
            days_until_expiry: 9,
        });
        // ordem de entrada invertida; o resultado não muda
        let c = consolidate(&[b, a]).unwrap();
        assert_eq!(c.ssl.as_ref().unwrap().issuer, "emissor-a");
    }

    #[test]
    fn detalhes_de_dns_vem_da_primeira_medicao_resolvida() {
        let a = medicao("a", false);
        let b = medicao("b", true);
        let c = consolidate(&[a, b]).unwrap();
        assert_eq!(c.dns_nameservers, vec!["ns.b.test".to_string()]);
        assert!(!c.dns_records.is_empty());
    }

    #[test]
    fn tcp_por_porta_segue_a_regra_de_dois_dissidentes() {
        let mut a = medicao("a", true);
        let mut b = medicao("b", true);
        let c = medicao("c", true);
        // porta 443 só reportada por a e b, ambas desconectadas
        for m in [&mut a, &mut b] {
            m.tcp_checks.push(TcpCheck {
                port: 443,
                is_connected: false,
                response_time: 30,
                error: Some("connection refused".into()),
            });
        }
        let consenso = consolidate(&[a, b, c]).unwrap();
        let p80 = consenso.tcp.iter().find(|t| t.port == 80).unwrap();
        let p443 = consenso.tcp.iter().find(|t| t.port == 443).unwrap();
        assert!(p80.is_up);
        assert!(!p443.is_up);
    }

    #[test]
    fn porta_com_um_so_dissidente_permanece_de_pe() {
        let mut a = medicao("a", true);
        let b = medicao("b", true);
        a.tcp_checks[0].is_connected = false;
        let consenso = consolidate(&[a, b]).unwrap();
        assert!(consenso.tcp.iter().find(|t| t.port == 80).unwrap().is_up);
    }

    #[test]
    fn linha_de_consenso_tem_tempos_nulos() {
        let consenso = consolidate(&[medicao("a", true), medicao("b", true)]).unwrap();
        let status = consenso.to_status(7, Utc::now());
        assert_eq!(status.worker_id, CONSENSUS_WORKER_ID);
        assert!(status.ping_response_time.is_none());
        assert!(status.http_response_time.is_none());
        assert!(status.dns_response_time.is_none());
        assert!(status.is_up);
    }
}
