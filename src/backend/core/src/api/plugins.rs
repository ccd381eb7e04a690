//! Plugin administration handlers.
//!
//! The whole surface is admin-only; requests land here already carrying the
//! resolved session extension.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::middleware::SessionState;
use crate::plugins::{LoadedPlugin, PluginId};

use super::{require_admin, ApiResponse, AppState};

/// Summary view of a loaded plugin.
#[derive(Debug, Serialize)]
pub struct PluginSummary {
    pub id: String,
    pub compact_id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub enabled: bool,
    pub routes: usize,
    pub has_frontend: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalogue_id: Option<i64>,
}

impl PluginSummary {
    fn build(plugin: &LoadedPlugin, catalogue_id: Option<i64>) -> Self {
        Self {
            id: plugin.id.dotted(),
            compact_id: plugin.id.compact(),
            name: plugin.info.name.clone(),
            version: plugin.info.version.clone(),
            description: plugin.info.description.clone(),
            author: plugin.info.author.clone(),
            enabled: plugin.is_enabled(),
            routes: plugin.routes.len(),
            has_frontend: plugin.frontend.is_some(),
            catalogue_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoadPluginRequest {
    /// Artifact filename inside the plugin store.
    pub filename: String,
}

/// `GET /api/admin/plugins` - list loaded plugins.
pub async fn list_plugins(
    State(state): State<AppState>,
    Extension(session): Extension<SessionState>,
) -> Result<Json<ApiResponse<Vec<PluginSummary>>>> {
    require_admin(session.0.as_deref())?;

    let summaries = state
        .manager
        .list()
        .await
        .iter()
        .map(|plugin| {
            let catalogue_id = state.loader.catalogue_id_for(&plugin.id.compact());
            PluginSummary::build(plugin, catalogue_id)
        })
        .collect();
    Ok(Json(ApiResponse::success(summaries)))
}

/// `POST /api/admin/plugins` - load an artifact by filename.
pub async fn load_plugin(
    State(state): State<AppState>,
    Extension(session): Extension<SessionState>,
    Json(request): Json<LoadPluginRequest>,
) -> Result<Json<ApiResponse<PluginSummary>>> {
    require_admin(session.0.as_deref())?;

    let loaded = state.loader.load_file(&request.filename).await?;
    let catalogue_id = state.loader.catalogue_id_for(&loaded.id.compact());
    Ok(Json(ApiResponse::success(PluginSummary::build(
        &loaded,
        catalogue_id,
    ))))
}

/// `POST /api/admin/plugins/:plugin_id/unload`
pub async fn unload_plugin(
    State(state): State<AppState>,
    Extension(session): Extension<SessionState>,
    Path(plugin_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>> {
    require_admin(session.0.as_deref())?;

    state.loader.unload(&plugin_id).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "unloaded": plugin_id,
    }))))
}

/// `POST /api/admin/plugins/:plugin_id/enable`
pub async fn enable_plugin(
    State(state): State<AppState>,
    Extension(session): Extension<SessionState>,
    Path(plugin_id): Path<String>,
) -> Result<Json<ApiResponse<PluginSummary>>> {
    require_admin(session.0.as_deref())?;
    set_enabled(&state, &plugin_id, true).await
}

/// `POST /api/admin/plugins/:plugin_id/disable`
pub async fn disable_plugin(
    State(state): State<AppState>,
    Extension(session): Extension<SessionState>,
    Path(plugin_id): Path<String>,
) -> Result<Json<ApiResponse<PluginSummary>>> {
    require_admin(session.0.as_deref())?;
    set_enabled(&state, &plugin_id, false).await
}

async fn set_enabled(
    state: &AppState,
    plugin_id: &str,
    enabled: bool,
) -> Result<Json<ApiResponse<PluginSummary>>> {
    let compact = PluginId::parse(plugin_id)
        .map_err(crate::error::GshubError::from)?
        .compact();
    let plugin = state
        .manager
        .get(&compact)
        .await
        .ok_or_else(|| crate::error::GshubError::plugin_not_found(compact.clone()))?;

    plugin.set_enabled(enabled);
    let catalogue_id = state.loader.catalogue_id_for(&compact);
    Ok(Json(ApiResponse::success(PluginSummary::build(
        &plugin,
        catalogue_id,
    ))))
}
