//! tcp.rs: sub-checagem de conectividade TCP por porta.

use crate::types::TcpCheck;
use futures::future::join_all;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// Tenta abrir um socket para cada porta, em paralelo, preservando a ordem
/// das portas no resultado. O socket é fechado em todo caminho de saída.
pub async fn check_tcp(host: &str, ports: &[u16], timeout: Duration) -> Vec<TcpCheck> {
    join_all(ports.iter().map(|&port| check_port(host, port, timeout))).await
}

async fn check_port(host: &str, port: u16, timeout: Duration) -> TcpCheck {
    let addr = format!("{host}:{port}");
    let start = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            TcpCheck {
                port,
                is_connected: true,
                response_time: start.elapsed().as_millis() as i64,
                error: None,
            }
        }
        Ok(Err(e)) => TcpCheck {
            port,
            is_connected: false,
            response_time: start.elapsed().as_millis() as i64,
            error: Some(e.to_string()),
        },
        Err(_) => TcpCheck {
            port,
            is_connected: false,
            response_time: start.elapsed().as_millis() as i64,
            error: Some("timeout".to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn porta_fechada_captura_erro_sem_panico() {
        // porta reservada, nada escutando em loopback
        let checks = check_tcp("127.0.0.1", &[1], Duration::from_secs(2)).await;
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].port, 1);
        assert!(!checks[0].is_connected);
        assert!(checks[0].error.is_some());
    }

    #[tokio::test]
    async fn resultado_preserva_ordem_das_portas() {
        let checks = check_tcp("127.0.0.1", &[1, 2], Duration::from_secs(2)).await;
        assert_eq!(checks[0].port, 1);
        assert_eq!(checks[1].port, 2);
    }
}
