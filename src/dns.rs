//! dns.rs: sub-checagem DNS com registros A e NS.
//!
//! Usa o resolver do sistema via trust-dns. `is_resolved` exige ao menos um
//! registro A; falha na consulta de NS não é fatal e resulta em lista vazia.

use crate::types::DnsCheck;
use std::net::IpAddr;
use std::time::Instant;
use trust_dns_resolver::TokioAsyncResolver;

pub async fn check_dns(host: &str) -> DnsCheck {
    let start = Instant::now();
    let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
        Ok(r) => r,
        Err(e) => {
            return DnsCheck {
                is_resolved: false,
                addresses: Vec::new(),
                nameservers: Vec::new(),
                response_time: start.elapsed().as_millis() as i64,
                error: Some(format!("resolver: {e}")),
            };
        }
    };

    let (is_resolved, addresses, error) = match resolver.ipv4_lookup(host).await {
        Ok(lookup) => {
            let addrs: Vec<IpAddr> = lookup.iter().map(|a| IpAddr::V4(a.0)).collect();
            (!addrs.is_empty(), addrs, None)
        }
        Err(e) => (false, Vec::new(), Some(e.to_string())),
    };
    let response_time = start.elapsed().as_millis() as i64;

    let nameservers = match resolver.ns_lookup(host).await {
        Ok(lookup) => lookup.iter().map(|ns| ns.0.to_utf8()).collect(),
        Err(_) => Vec::new(),
    };

    DnsCheck {
        is_resolved,
        addresses,
        nameservers,
        response_time,
        error,
    }
}
