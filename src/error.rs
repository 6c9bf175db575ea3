//! error.rs: taxonomia de erros em camadas.
//!
//! Falhas de camada de sonda (DNS/TCP/Ping/HTTP) nunca aparecem aqui: são
//! capturadas dentro da própria `Measurement`. Os loops internos (schedulers,
//! subscribers, notificadores) logam e continuam; os handlers HTTP traduzem
//! as variantes de domínio em códigos 4xx.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// Transporte com o shared store (Redis).
    #[error("falha de transporte com o shared store: {0}")]
    Store(#[from] redis::RedisError),

    /// Transporte com o banco durável (PostgreSQL).
    #[error("falha de transporte com o banco: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("pool de conexões do banco: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("montagem do pool de conexões: {0}")]
    PoolBuild(#[from] deadpool_postgres::BuildError),

    #[error("codificação JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// `sync:lock` já detido por outro processo de bulk sync.
    #[error("lock de sincronização já detido")]
    SyncLockHeld,

    /// Violação do invariante de registry: `verifySync` falhou após o
    /// `bulkSync`. Fatal na partida do coordenador, reentável em runtime.
    #[error("registry divergente após bulk sync: {0}")]
    RegistryOutOfSync(String),

    #[error("entrada inválida: {0}")]
    BadInput(String),

    #[error("site {0} não encontrado")]
    SiteNotFound(i64),

    #[error("acesso negado ao site {0}")]
    Forbidden(i64),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
