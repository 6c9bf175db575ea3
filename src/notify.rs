//! notify.rs: despacho de notificações em transições de consenso.
//!
//! O core depende apenas da capacidade `Notifier`; os adapters concretos
//! (SMTP, chats, push) são colaboradores externos. Adicionar um canal é
//! registrar uma entrada no `NotifierRegistry`. Erros por canal são logados
//! e engolidos, nunca propagam ao chamador.

use crate::storage::Storage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Capacidade de envio por um canal de notificação.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Valida o destino configurado para este canal.
    fn verify_target(&self, target: &str) -> bool;
    /// Envia a mensagem ao destino.
    async fn send(&self, target: &str, message: &str) -> anyhow::Result<()>;
}

/// Registro de notificadores por tipo de canal
/// (`email`, `slack`, `telegram`, `discord`, `push`).
#[derive(Default)]
pub struct NotifierRegistry {
    channels: HashMap<String, Arc<dyn Notifier>>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, notifier: Arc<dyn Notifier>) {
        self.channels.insert(kind.into(), notifier);
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn Notifier>> {
        self.channels.get(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.channels.keys().map(String::as_str).collect()
    }
}

/// Observa transições de estado e empurra alertas pelos canais habilitados.
pub struct NotificationDispatcher {
    storage: Arc<Storage>,
    registry: NotifierRegistry,
}

impl NotificationDispatcher {
    pub fn new(storage: Arc<Storage>, registry: NotifierRegistry) -> Self {
        Self { storage, registry }
    }

    /// Envia `message` a todos os canais habilitados do site.
    ///
    /// Falhas de canal ou de carga não derrubam o tick do coordenador: tudo
    /// é logado e engolido aqui.
    pub async fn dispatch(&self, site_id: i64, message: &str, category: &str) {
        let site = match self.storage.get_site(site_id).await {
            Ok(Some(site)) => site,
            Ok(None) => {
                warn!("[NOTIFY] site {site_id} não encontrado; alerta descartado");
                return;
            }
            Err(e) => {
                error!("[NOTIFY] falha ao carregar o site {site_id}: {e}");
                return;
            }
        };

        let settings = match self
            .storage
            .list_enabled_notification_settings(site_id)
            .await
        {
            Ok(settings) => settings,
            Err(e) => {
                error!("[NOTIFY] falha ao carregar canais do site {site_id}: {e}");
                return;
            }
        };
        if settings.is_empty() {
            debug!("[NOTIFY] site {} sem canais habilitados", site.name);
            return;
        }

        for setting in settings {
            let channel = setting.channel.as_str();
            let Some(notifier) = self.registry.get(channel) else {
                warn!(
                    "[NOTIFY] canal {channel} sem notificador registrado para o site {}",
                    site.name
                );
                continue;
            };
            if !notifier.verify_target(&setting.target) {
                warn!(
                    "[NOTIFY] destino inválido {:?} no canal {channel} do site {}",
                    setting.target, site.name
                );
                continue;
            }
            match notifier.send(&setting.target, message).await {
                Ok(()) => info!(
                    "[NOTIFY] {} enviado via {channel} para o site {} ({category})",
                    setting.target, site.name
                ),
                Err(e) => error!(
                    "[NOTIFY] envio via {channel} falhou para o site {} ({category}): {e}",
                    site.name
                ),
            }
        }
    }
}

/// Notificador de desenvolvimento: registra a mensagem no log estruturado.
pub struct LogNotifier {
    kind: &'static str,
}

impl LogNotifier {
    pub fn new(kind: &'static str) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn verify_target(&self, target: &str) -> bool {
        !target.trim().is_empty()
    }

    async fn send(&self, target: &str, message: &str) -> anyhow::Result<()> {
        info!("[NOTIFY {}] -> {target}: {message}", self.kind);
        Ok(())
    }
}

/// Registro padrão com os cinco canais suportados apontando para o log.
pub fn default_registry() -> NotifierRegistry {
    let mut registry = NotifierRegistry::new();
    for kind in ["email", "slack", "telegram", "discord", "push"] {
        registry.register(kind, Arc::new(LogNotifier::new(kind)));
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registro_padrao_cobre_os_cinco_canais() {
        use crate::types::NotificationChannel;
        let registry = default_registry();
        for channel in [
            NotificationChannel::Email,
            NotificationChannel::Slack,
            NotificationChannel::Telegram,
            NotificationChannel::Discord,
            NotificationChannel::Push,
        ] {
            assert!(
                registry.get(channel.as_str()).is_some(),
                "canal ausente: {}",
                channel.as_str()
            );
        }
        assert!(registry.get("pombo-correio").is_none());
    }

    #[test]
    fn destino_vazio_e_rejeitado() {
        let notifier = LogNotifier::new("email");
        assert!(!notifier.verify_target("   "));
        assert!(notifier.verify_target("ops@example.test"));
    }
}
