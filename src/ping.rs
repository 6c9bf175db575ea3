//! ping.rs: sub-checagem ICMP nativa usando surge-ping.
//!
//! O host é resolvido para um IP antes do echo; timeout é tratado como
//! "não vivo". ICMP exige socket raw, então a falta de privilégio aparece
//! como erro capturado na estrutura, nunca como panic.

use crate::types::PingCheck;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use trust_dns_resolver::TokioAsyncResolver;

pub async fn check_ping(host: &str, timeout: Duration) -> PingCheck {
    let start = Instant::now();

    let ip: IpAddr = match host.parse() {
        Ok(ip) => ip,
        Err(_) => match resolve_first(host).await {
            Some(ip) => ip,
            None => {
                return PingCheck {
                    is_up: false,
                    response_time: start.elapsed().as_millis() as i64,
                    error: Some(format!("resolução DNS falhou para {host}")),
                };
            }
        },
    };

    let payload = [0u8; 32]; // Payload padrão de 32 bytes
    match tokio::time::timeout(timeout, surge_ping::ping(ip, &payload)).await {
        Ok(Ok((_reply, dur))) => PingCheck {
            is_up: true,
            response_time: dur.as_millis() as i64,
            error: None,
        },
        Ok(Err(e)) => PingCheck {
            is_up: false,
            response_time: start.elapsed().as_millis() as i64,
            error: Some(e.to_string()),
        },
        Err(_) => PingCheck {
            is_up: false,
            response_time: start.elapsed().as_millis() as i64,
            error: Some("timeout".to_string()),
        },
    }
}

async fn resolve_first(host: &str) -> Option<IpAddr> {
    let resolver = TokioAsyncResolver::tokio_from_system_conf().ok()?;
    resolver.lookup_ip(host).await.ok()?.iter().next()
}
