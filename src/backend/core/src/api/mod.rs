//! HTTP API layer.
//!
//! Mounts the unversioned health/metrics endpoints, the plugin admin
//! surface, the server control operations, the plugin frontend aggregation
//! endpoints and the plugin request router itself.

pub mod handlers;
pub mod plugins;
pub mod servers;

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{any, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::control::ServerControlService;
use crate::db::Database;
use crate::middleware::{session_middleware, AuthService, Session};
use crate::plugins::http::{self as plugin_http, PluginRouterConfig};
use crate::plugins::loader::PluginLoader;
use crate::plugins::PluginManager;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<PluginManager>,
    pub loader: Arc<PluginLoader>,
    pub control: Arc<ServerControlService>,
    pub auth: Arc<AuthService>,
    pub router_config: PluginRouterConfig,
    pub db: Option<Arc<Database>>,
    pub metrics: Option<PrometheusHandle>,
}

/// Uniform envelope for non-plugin API responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Require an authenticated session.
pub fn require_session(session: Option<&Session>) -> crate::error::Result<&Session> {
    session.ok_or_else(|| crate::error::GshubError::unauthorized("Authentication required"))
}

/// Require an authenticated admin session.
pub fn require_admin(session: Option<&Session>) -> crate::error::Result<&Session> {
    let session = require_session(session)?;
    if !session.user.admin {
        return Err(crate::error::GshubError::forbidden("Admin access required"));
    }
    Ok(session)
}

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Unversioned endpoints
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        // Aggregated plugin frontend assets
        .route(
            "/api/frontend/plugins.js",
            get(plugin_http::frontend_javascript),
        )
        .route(
            "/api/frontend/plugins.css",
            get(plugin_http::frontend_stylesheet),
        )
        // Plugin administration
        .route(
            "/api/admin/plugins",
            get(plugins::list_plugins).post(plugins::load_plugin),
        )
        .route(
            "/api/admin/plugins/:plugin_id/unload",
            post(plugins::unload_plugin),
        )
        .route(
            "/api/admin/plugins/:plugin_id/enable",
            post(plugins::enable_plugin),
        )
        .route(
            "/api/admin/plugins/:plugin_id/disable",
            post(plugins::disable_plugin),
        )
        // Server control
        .route("/api/servers/:server_id/start", post(servers::start_server))
        .route("/api/servers/:server_id/stop", post(servers::stop_server))
        .route(
            "/api/servers/:server_id/restart",
            post(servers::restart_server),
        )
        .route(
            "/api/servers/:server_id/update",
            post(servers::update_server),
        )
        .route(
            "/api/servers/:server_id/install",
            post(servers::install_server),
        )
        .route(
            "/api/servers/:server_id/reinstall",
            post(servers::reinstall_server),
        )
        .route(
            "/api/servers/:server_id/delete",
            post(servers::delete_server),
        )
        // Plugin request router
        .route("/api/plugins/:plugin_id", any(plugin_http::handle_plugin_root))
        .route(
            "/api/plugins/:plugin_id/*rest",
            any(plugin_http::handle_plugin_request),
        )
        // Middleware
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
