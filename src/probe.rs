//! probe.rs: execução de uma medição completa para uma URL.
//!
//! As quatro camadas (DNS, TCP, Ping, HTTP) rodam em paralelo, cada uma
//! limitada pelo timeout global da sonda. A sonda nunca falha: toda camada
//! captura o próprio erro na estrutura e a `Measurement` retornada é sempre
//! completa.

use crate::types::{DnsCheck, HttpCheck, Measurement, PingCheck, TcpCheck};
use crate::{dns, http, ping, tcp};
use chrono::{DateTime, Utc};
use std::time::Duration;
use url::Url;

pub struct Prober {
    worker_id: String,
    timeout: Duration,
    tcp_ports: Vec<u16>,
    http_client: reqwest::Client,
}

impl Prober {
    /// Monta a sonda com o client HTTP compartilhado entre medições.
    pub fn new(
        worker_id: impl Into<String>,
        timeout: Duration,
        tcp_ports: Vec<u16>,
    ) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self {
            worker_id: worker_id.into(),
            timeout,
            tcp_ports,
            http_client,
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Executa uma medição completa. Custo de parede limitado pela camada
    /// mais lenta, nunca pela soma delas.
    pub async fn probe(&self, url: &str) -> Measurement {
        let checked_at = Utc::now();

        let parsed = match Url::parse(url) {
            Ok(u) if u.host_str().is_some() => u,
            _ => return self.unreachable(url, checked_at, "URL inválida"),
        };
        let host = parsed.host_str().unwrap_or_default().to_string();

        let dns_fut = async {
            match tokio::time::timeout(self.timeout, dns::check_dns(&host)).await {
                Ok(check) => check,
                Err(_) => DnsCheck {
                    is_resolved: false,
                    addresses: Vec::new(),
                    nameservers: Vec::new(),
                    response_time: self.timeout.as_millis() as i64,
                    error: Some("timeout".to_string()),
                },
            }
        };
        let tcp_fut = tcp::check_tcp(&host, &self.tcp_ports, self.timeout);
        let ping_fut = ping::check_ping(&host, self.timeout);
        let http_fut = http::check_http(&self.http_client, &parsed, self.timeout);

        let (dns_check, tcp_checks, ping_check, http_check) =
            tokio::join!(dns_fut, tcp_fut, ping_fut, http_fut);

        Measurement {
            url: url.to_string(),
            checked_at,
            worker_id: self.worker_id.clone(),
            is_up: http_check.is_up,
            dns_check,
            tcp_checks,
            ping_check,
            http_check,
        }
    }

    /// Medição completa com todas as camadas em falha; usada quando nem a
    /// URL pôde ser interpretada.
    fn unreachable(&self, url: &str, checked_at: DateTime<Utc>, reason: &str) -> Measurement {
        Measurement {
            url: url.to_string(),
            checked_at,
            worker_id: self.worker_id.clone(),
            is_up: false,
            dns_check: DnsCheck {
                is_resolved: false,
                addresses: Vec::new(),
                nameservers: Vec::new(),
                response_time: 0,
                error: Some(reason.to_string()),
            },
            tcp_checks: self
                .tcp_ports
                .iter()
                .map(|&port| TcpCheck {
                    port,
                    is_connected: false,
                    response_time: 0,
                    error: Some(reason.to_string()),
                })
                .collect(),
            ping_check: PingCheck {
                is_up: false,
                response_time: 0,
                error: Some(reason.to_string()),
            },
            http_check: HttpCheck {
                is_up: false,
                status: None,
                response_time: 0,
                ssl: None,
                error: Some(reason.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn url_invalida_ainda_produz_medicao_completa() {
        let prober = Prober::new("sa-east", Duration::from_secs(5), vec![80, 443]).unwrap();
        let m = prober.probe("isso nao é uma url").await;
        assert!(!m.is_up);
        assert_eq!(m.worker_id, "sa-east");
        assert_eq!(m.tcp_checks.len(), 2);
        assert!(m.dns_check.error.is_some());
        assert!(m.ping_check.error.is_some());
        assert!(m.http_check.error.is_some());
    }

    #[tokio::test]
    async fn url_sem_host_e_tratada_como_invalida() {
        let prober = Prober::new("sa-east", Duration::from_secs(5), vec![80]).unwrap();
        let m = prober.probe("data:text/plain,oi").await;
        assert!(!m.is_up);
        assert_eq!(m.http_check.error.as_deref(), Some("URL inválida"));
    }
}
