use config as config_crate;
use serde::Deserialize;
use std::time::Duration;

/// Configuração operacional do sistema.
///
/// Carregada de um arquivo `config.*` opcional sobreposto pelas variáveis de
/// ambiente (`REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD`, `DATABASE_URL`,
/// `WORKER_REGION`, `CHECK_TIMEOUT_SECS`, `PROBE_PORTS`, `API_BIND`).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Host do shared store (Redis).
    #[serde(default = "default_redis_host")]
    pub redis_host: String,
    /// Porta do shared store.
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,
    /// Senha do shared store, se exigida.
    #[serde(default)]
    pub redis_password: Option<String>,
    /// URL de conexão com o banco PostgreSQL (somente coordenador).
    #[serde(default)]
    pub database_url: Option<String>,
    /// Região deste worker; usada como worker id estável.
    #[serde(default = "default_region")]
    pub worker_region: String,
    /// Timeout global de cada sonda, em segundos.
    #[serde(default = "default_check_timeout")]
    pub check_timeout_secs: u64,
    /// Portas TCP sondadas, separadas por vírgula (padrão "80,443").
    #[serde(default)]
    pub probe_ports: Option<String>,
    /// Endereço de bind da superfície HTTP do coordenador.
    #[serde(default = "default_api_bind")]
    pub api_bind: String,
}

fn default_redis_host() -> String {
    "127.0.0.1".into()
}
fn default_redis_port() -> u16 {
    6379
}
fn default_region() -> String {
    "local".into()
}
fn default_check_timeout() -> u64 {
    30
}
fn default_api_bind() -> String {
    "0.0.0.0:3000".into()
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let settings = config_crate::Config::builder()
            .add_source(config_crate::File::with_name("config").required(false))
            .add_source(config_crate::Environment::default())
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Validação customizada
    pub fn validate(&self) -> Result<(), String> {
        if self.check_timeout_secs == 0 {
            return Err("check_timeout_secs deve ser maior que zero".into());
        }
        if self.worker_region.trim().is_empty() {
            return Err("worker_region não pode ser vazia".into());
        }
        if let Some(ports) = &self.probe_ports {
            for p in ports.split(',') {
                p.trim()
                    .parse::<u16>()
                    .map_err(|_| format!("porta TCP inválida em probe_ports: {p:?}"))?;
            }
        }
        Ok(())
    }

    /// URL de conexão com o shared store.
    pub fn redis_url(&self) -> String {
        match &self.redis_password {
            Some(pass) => format!("redis://:{}@{}:{}/", pass, self.redis_host, self.redis_port),
            None => format!("redis://{}:{}/", self.redis_host, self.redis_port),
        }
    }

    /// URL do banco durável; erro se não configurada.
    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL não configurada"))
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    /// Portas TCP sondadas por cada medição.
    pub fn tcp_ports(&self) -> Vec<u16> {
        match &self.probe_ports {
            Some(ports) => ports
                .split(',')
                .filter_map(|p| p.trim().parse().ok())
                .collect(),
            None => vec![80, 443],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_padrao() -> Config {
        Config {
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            redis_password: None,
            database_url: None,
            worker_region: "sa-east".into(),
            check_timeout_secs: 30,
            probe_ports: None,
            api_bind: default_api_bind(),
        }
    }

    #[test]
    fn portas_padrao_sao_80_e_443() {
        assert_eq!(config_padrao().tcp_ports(), vec![80, 443]);
    }

    #[test]
    fn portas_customizadas_sao_parseadas() {
        let mut c = config_padrao();
        c.probe_ports = Some("8080, 8443".into());
        assert_eq!(c.tcp_ports(), vec![8080, 8443]);
    }

    #[test]
    fn valida_porta_invalida() {
        let mut c = config_padrao();
        c.probe_ports = Some("80,abc".into());
        assert!(c.validate().is_err());
    }

    #[test]
    fn url_do_redis_inclui_senha() {
        let mut c = config_padrao();
        c.redis_password = Some("s3gr3d0".into());
        assert_eq!(c.redis_url(), "redis://:s3gr3d0@127.0.0.1:6379/");
    }
}
