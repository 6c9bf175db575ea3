//! http.rs: sub-checagem HTTP/S.
//!
//! GET com redirects limitados e certificados inválidos aceitos. A camada
//! está "up" quando alguma resposta chega e o status não é 404. Para https,
//! a inspeção do certificado roda em paralelo com o GET.

use crate::tls;
use crate::types::HttpCheck;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

pub async fn check_http(client: &reqwest::Client, url: &Url, timeout: Duration) -> HttpCheck {
    let start = Instant::now();

    let ssl_fut = async {
        if url.scheme() != "https" {
            return None;
        }
        let host = url.host_str().unwrap_or_default().to_string();
        let port = url.port().unwrap_or(443);
        match tls::inspect_certificate(&host, port, timeout).await {
            Ok(info) => Some(info),
            Err(e) => {
                debug!("[HTTP] inspeção TLS falhou para {url}: {e}");
                None
            }
        }
    };

    let (ssl, response) = tokio::join!(ssl_fut, client.get(url.clone()).send());

    match response {
        Ok(resp) => {
            let status = resp.status().as_u16();
            HttpCheck {
                is_up: status != 404,
                status: Some(status),
                response_time: start.elapsed().as_millis() as i64,
                ssl,
                error: None,
            }
        }
        Err(e) => HttpCheck {
            is_up: false,
            status: None,
            response_time: start.elapsed().as_millis() as i64,
            ssl,
            error: Some(e.to_string()),
        },
    }
}
