//! api.rs: superfície HTTP do coordenador.
//!
//! Só os endpoints dos quais o core depende: mutação do registry de sites e
//! leitura da presença de workers. Os handlers traduzem a taxonomia de erros
//! em códigos 4xx/5xx; o restante da superfície pública (contas, temas,
//! relatórios) vive fora do core.

use crate::error::{MonitorError, Result};
use crate::storage::Storage;
use crate::store::SharedStore;
use crate::sync::{self, RegistrySync};
use crate::types::{Site, SitePatch};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

const DEFAULT_CHECK_INTERVAL: i32 = 5;

#[derive(Clone)]
pub struct ApiState {
    pub sync: Arc<RegistrySync>,
    pub storage: Arc<Storage>,
    pub store: SharedStore,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/sites", post(create_site))
        .route("/sites/{id}", axum::routing::patch(update_site).delete(delete_site))
        .route("/workers", get(list_workers))
        .route("/workers/ids", get(list_worker_ids))
        .with_state(state)
}

/// Erro de domínio embrulhado para a camada HTTP.
pub struct ApiError(MonitorError);

impl From<MonitorError> for ApiError {
    fn from(e: MonitorError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            MonitorError::BadInput(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            MonitorError::SiteNotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            MonitorError::Forbidden(_) => (StatusCode::FORBIDDEN, self.0.to_string()),
            MonitorError::SyncLockHeld => (StatusCode::CONFLICT, self.0.to_string()),
            _ => {
                error!("[API] erro interno: {}", self.0);
                (StatusCode::INTERNAL_SERVER_ERROR, "erro interno".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Dono informado pelo chamador via `x-user-id`; ausente significa chamada
/// interna sem checagem de dono.
fn caller_user_id(headers: &HeaderMap) -> Result<Option<i64>> {
    match headers.get("x-user-id") {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .map(Some)
            .ok_or_else(|| MonitorError::BadInput("cabeçalho x-user-id inválido".into())),
    }
}

fn check_owner(site: &Site, caller: Option<i64>) -> Result<()> {
    match caller {
        Some(user_id) if user_id != site.user_id => Err(MonitorError::Forbidden(site.id)),
        _ => Ok(()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSiteBody {
    name: String,
    url: String,
    check_interval: Option<i32>,
}

async fn create_site(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CreateSiteBody>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    if body.name.trim().is_empty() {
        return Err(MonitorError::BadInput("name não pode ser vazio".into()).into());
    }
    sync::validate_url(&body.url)?;
    let interval = body.check_interval.unwrap_or(DEFAULT_CHECK_INTERVAL);
    sync::validate_interval(interval)?;
    let user_id = caller_user_id(&headers)?.unwrap_or(0);

    let site = state
        .sync
        .create_site(body.name.trim(), &body.url, interval, user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(site)))
}

async fn update_site(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(patch): Json<SitePatch>,
) -> std::result::Result<Json<Site>, ApiError> {
    if let Some(url) = &patch.url {
        sync::validate_url(url)?;
    }
    if let Some(interval) = patch.check_interval {
        sync::validate_interval(interval)?;
    }
    let current = state
        .storage
        .get_site(id)
        .await?
        .ok_or(MonitorError::SiteNotFound(id))?;
    check_owner(&current, caller_user_id(&headers)?)?;

    let site = state.sync.update_site(id, &patch).await?;
    Ok(Json(site))
}

async fn delete_site(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> std::result::Result<StatusCode, ApiError> {
    let current = state
        .storage
        .get_site(id)
        .await?
        .ok_or(MonitorError::SiteNotFound(id))?;
    check_owner(&current, caller_user_id(&headers)?)?;

    state.sync.delete_site(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_workers(
    State(state): State<ApiState>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let workers = state.store.list_workers().await?;
    Ok(Json(workers))
}

async fn list_worker_ids(
    State(state): State<ApiState>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let ids = state.store.list_worker_ids().await?;
    Ok(Json(ids))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site_de(user_id: i64) -> Site {
        Site {
            id: 1,
            name: "exemplo".into(),
            url: "https://example.test".into(),
            check_interval: 5,
            is_active: true,
            user_id,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn chamada_sem_cabecalho_nao_checa_dono() {
        assert!(check_owner(&site_de(42), None).is_ok());
    }

    #[test]
    fn dono_correto_passa_e_errado_recebe_forbidden() {
        assert!(check_owner(&site_de(42), Some(42)).is_ok());
        assert!(matches!(
            check_owner(&site_de(42), Some(7)),
            Err(MonitorError::Forbidden(1))
        ));
    }

    #[test]
    fn cabecalho_de_dono_malformado_e_bad_input() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", "abc".parse().unwrap());
        assert!(matches!(
            caller_user_id(&headers),
            Err(MonitorError::BadInput(_))
        ));

        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", "42".parse().unwrap());
        assert_eq!(caller_user_id(&headers).unwrap(), Some(42));
    }
}
