//! tls.rs: inspeção do certificado TLS do peer.
//!
//! Handshake direto com tokio-rustls usando um verificador que aceita
//! qualquer cadeia (inclusive autoassinada): o objetivo é observar o
//! certificado, não rejeitá-lo. O DER do peer é parseado com x509-parser.

use crate::types::SslInfo;
use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use x509_parser::prelude::*;

#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

/// Abre uma conexão TLS com o host e extrai os dados do certificado do peer.
pub async fn inspect_certificate(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<SslInfo, String> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| e.to_string())?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    let server_name = ServerName::try_from(host.to_string()).map_err(|e| e.to_string())?;

    let tcp = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| "timeout na conexão TCP".to_string())?
        .map_err(|e| e.to_string())?;

    let tls = tokio::time::timeout(timeout, connector.connect(server_name, tcp))
        .await
        .map_err(|_| "timeout no handshake TLS".to_string())?
        .map_err(|e| e.to_string())?;

    let (_, session) = tls.get_ref();
    let cert = session
        .peer_certificates()
        .and_then(|certs| certs.first())
        .ok_or_else(|| "peer não apresentou certificado".to_string())?;

    parse_certificate(cert.as_ref(), Utc::now())
}

/// Extrai validade e emissor do DER. O emissor usa o CN, caindo para o O.
fn parse_certificate(der: &[u8], now: DateTime<Utc>) -> Result<SslInfo, String> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|e| e.to_string())?;
    let validity = cert.validity();

    let valid_from = DateTime::<Utc>::from_timestamp(validity.not_before.timestamp(), 0)
        .ok_or_else(|| "notBefore fora de alcance".to_string())?;
    let valid_to = DateTime::<Utc>::from_timestamp(validity.not_after.timestamp(), 0)
        .ok_or_else(|| "notAfter fora de alcance".to_string())?;

    let issuer = cert
        .issuer()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .or_else(|| {
            cert.issuer()
                .iter_organization()
                .next()
                .and_then(|attr| attr.as_str().ok())
        })
        .unwrap_or("desconhecido")
        .to_string();

    Ok(SslInfo {
        valid_from,
        valid_to,
        issuer,
        days_until_expiry: days_until(valid_to.timestamp(), now.timestamp()),
    })
}

/// floor((validTo - now) / 1 dia), também para certificados já expirados.
fn days_until(valid_to_ts: i64, now_ts: i64) -> i64 {
    (valid_to_ts - now_ts).div_euclid(86_400)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dias_ate_expirar_arredonda_para_baixo() {
        assert_eq!(days_until(10 * 86_400, 0), 10);
        assert_eq!(days_until(10 * 86_400 + 3600, 0), 10);
        assert_eq!(days_until(86_399, 0), 0);
    }

    #[test]
    fn certificado_expirado_tem_dias_negativos() {
        assert_eq!(days_until(0, 86_400), -1);
        // floor, não truncamento em direção a zero
        assert_eq!(days_until(0, 86_400 + 3600), -2);
    }
}
