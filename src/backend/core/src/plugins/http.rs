//! Plugin HTTP surface.
//!
//! Routes under `/api/plugins/{plugin_id}/...` are multiplexed onto the
//! matching plugin's declared routes; `/api/frontend/plugins.{js,css}`
//! aggregate the optional frontend bundles of every enabled plugin.
//!
//! Host-side failures map onto plain status codes: 400 for an unusable id or
//! oversized body, 404 for unknown plugins/routes, 503 for disabled plugins,
//! 504 for handler timeouts and 500 for everything else, with details logged
//! rather than leaked.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, warn};

use crate::api::AppState;
use crate::middleware::SessionState;

use super::codec;
use super::routes::HttpRoute;
use super::{LoadedPlugin, PluginError, PluginId};

/// Router limits taken from configuration.
#[derive(Debug, Clone)]
pub struct PluginRouterConfig {
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for PluginRouterConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_body_bytes: 1024 * 1024,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handlers
// ═══════════════════════════════════════════════════════════════════════════════

/// `ANY /api/plugins/:plugin_id` - the plugin-local root path.
pub async fn handle_plugin_root(
    State(state): State<AppState>,
    Path(plugin_id): Path<String>,
    request: Request,
) -> Response {
    serve(state, plugin_id, "/".to_string(), request).await
}

/// `ANY /api/plugins/:plugin_id/*rest` - everything below the root.
pub async fn handle_plugin_request(
    State(state): State<AppState>,
    Path((plugin_id, rest)): Path<(String, String)>,
    request: Request,
) -> Response {
    serve(state, plugin_id, format!("/{}", rest), request).await
}

async fn serve(state: AppState, raw_plugin_id: String, local_path: String, request: Request) -> Response {
    if raw_plugin_id.is_empty() {
        return status_message(StatusCode::BAD_REQUEST, "missing plugin id");
    }

    // Accept the dotted or compact form; the registry keys on compact.
    let compact = match PluginId::parse(&raw_plugin_id) {
        Ok(id) => id.compact(),
        Err(_) => return status_message(StatusCode::BAD_REQUEST, "invalid plugin id"),
    };

    let Some(plugin) = state.manager.get(&compact).await else {
        return status_message(StatusCode::NOT_FOUND, "plugin not found");
    };
    if !plugin.is_enabled() {
        return status_message(StatusCode::SERVICE_UNAVAILABLE, "plugin disabled");
    }

    let (parts, body) = request.into_parts();

    let Some((route, params)) = match_route(&plugin, &parts.method, &local_path) else {
        return status_message(StatusCode::NOT_FOUND, "no matching plugin route");
    };

    // Auth gate runs before the admin gate; both are host-controlled.
    let session = parts
        .extensions
        .get::<SessionState>()
        .and_then(|state| state.0.clone());
    if let Some(response) = authorize(&route, session.as_deref()) {
        return response;
    }

    let body = match axum::body::to_bytes(body, state.router_config.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => return status_message(StatusCode::BAD_REQUEST, "request body too large"),
    };

    let wire_request = codec::HttpRequest {
        method: parts.method.as_str().to_string(),
        path: local_path.clone(),
        headers: first_header_values(&parts.headers),
        params,
        query: expand_query(parts.uri.query().unwrap_or_default()),
        body: body.to_vec(),
        session: session.map(|s| s.snapshot()),
    };

    let call = plugin.handle_http_request(&wire_request);
    match tokio::time::timeout(state.router_config.request_timeout, call).await {
        Err(_) => {
            warn!(plugin = %compact, path = %local_path, "Plugin HTTP handler timed out");
            status_message(StatusCode::GATEWAY_TIMEOUT, "plugin timed out")
        }
        Ok(Err(PluginError::Timeout)) => {
            warn!(plugin = %compact, path = %local_path, "Plugin HTTP handler timed out");
            status_message(StatusCode::GATEWAY_TIMEOUT, "plugin timed out")
        }
        Ok(Err(e)) => {
            error!(plugin = %compact, path = %local_path, error = %e, "Plugin HTTP handler failed");
            status_message(StatusCode::INTERNAL_SERVER_ERROR, "plugin request failed")
        }
        Ok(Ok(wire_response)) => build_response(wire_response),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Request pipeline pieces
// ═══════════════════════════════════════════════════════════════════════════════

fn match_route(
    plugin: &Arc<LoadedPlugin>,
    method: &Method,
    local_path: &str,
) -> Option<(HttpRoute, HashMap<String, String>)> {
    for route in &plugin.routes {
        if !route.allows_method(method) {
            continue;
        }
        if let Some(params) = route.match_path(local_path) {
            return Some((route.clone(), params));
        }
    }
    None
}

fn authorize(route: &HttpRoute, session: Option<&crate::middleware::Session>) -> Option<Response> {
    if route.requires_auth || route.admin_only {
        let Some(session) = session else {
            return Some(status_message(
                StatusCode::UNAUTHORIZED,
                "authentication required",
            ));
        };
        if route.admin_only && !session.user.admin {
            return Some(status_message(StatusCode::FORBIDDEN, "admin access required"));
        }
    }
    None
}

/// First value per header name, as delivered to the guest.
fn first_header_values(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.entry(name.as_str().to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    map
}

/// Expand query parameters into arrays, splitting comma-separated values.
fn expand_query(raw_query: &str) -> HashMap<String, Vec<String>> {
    let mut query: HashMap<String, Vec<String>> = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(raw_query.as_bytes()) {
        let values = query.entry(key.into_owned()).or_default();
        for part in value.split(',') {
            if !part.is_empty() {
                values.push(part.to_string());
            }
        }
    }
    query
}

fn build_response(wire: codec::HttpResponse) -> Response {
    let status = if wire.status == 0 {
        StatusCode::OK
    } else {
        StatusCode::from_u16(wire.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    };

    let mut response = Response::builder().status(status);
    let mut saw_content_type = false;

    if let Some(headers) = response.headers_mut() {
        for (name, value) in &wire.headers {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            let Ok(value) = HeaderValue::from_str(value) else {
                continue;
            };
            if name == header::CONTENT_TYPE {
                saw_content_type = true;
            }
            headers.insert(name, value);
        }
        if !saw_content_type {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }
    }

    response
        .body(Body::from(wire.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn status_message(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": { "message": message },
        })),
    )
        .into_response()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Frontend bundle aggregation
// ═══════════════════════════════════════════════════════════════════════════════

const JS_HEADER: &str = "// gshub aggregated plugin frontend\n";
const CSS_HEADER: &str = "/* gshub aggregated plugin frontend */\n";

/// `GET /api/frontend/plugins.js`
pub async fn frontend_javascript(State(state): State<AppState>) -> Response {
    let body = aggregate_frontend(&state, JS_HEADER, |bundle| &bundle.javascript, |id| {
        format!("\n// plugin: {}\n", id)
    })
    .await;
    asset_response(body, "application/javascript; charset=utf-8")
}

/// `GET /api/frontend/plugins.css`
pub async fn frontend_stylesheet(State(state): State<AppState>) -> Response {
    let body = aggregate_frontend(&state, CSS_HEADER, |bundle| &bundle.stylesheet, |id| {
        format!("\n/* plugin: {} */\n", id)
    })
    .await;
    asset_response(body, "text/css; charset=utf-8")
}

async fn aggregate_frontend(
    state: &AppState,
    header_comment: &str,
    select: impl Fn(&codec::FrontendBundle) -> &Vec<u8>,
    banner: impl Fn(&str) -> String,
) -> Vec<u8> {
    let mut body = header_comment.as_bytes().to_vec();

    for plugin in state.manager.list().await {
        if !plugin.is_enabled() {
            continue;
        }
        let Some(bundle) = &plugin.frontend else {
            continue;
        };
        let content = select(bundle);
        if content.is_empty() {
            continue;
        }
        body.extend_from_slice(banner(&plugin.id.compact()).as_bytes());
        body.extend_from_slice(content);
    }
    body
}

fn asset_response(body: Vec<u8>, content_type: &'static str) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_query_splits_commas() {
        let query = expand_query("tags=a,b,c&tags=d");
        assert_eq!(query["tags"], vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_expand_query_plain_values() {
        let query = expand_query("name=rope&count=2");
        assert_eq!(query["name"], vec!["rope"]);
        assert_eq!(query["count"], vec!["2"]);
    }

    #[test]
    fn test_expand_query_decodes() {
        let query = expand_query("q=hello%20world");
        assert_eq!(query["q"], vec!["hello world"]);
    }

    #[test]
    fn test_first_header_values() {
        let mut headers = HeaderMap::new();
        headers.append("accept", HeaderValue::from_static("application/json"));
        headers.append("accept", HeaderValue::from_static("text/plain"));

        let map = first_header_values(&headers);
        assert_eq!(map["accept"], "application/json");
    }

    #[test]
    fn test_build_response_defaults() {
        let response = build_response(codec::HttpResponse {
            status: 0,
            headers: HashMap::new(),
            body: b"{}".to_vec(),
        });
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_build_response_passthrough() {
        let response = build_response(codec::HttpResponse {
            status: 204,
            headers: HashMap::from([("content-type".to_string(), "text/plain".to_string())]),
            body: Vec::new(),
        });
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain"
        );
    }
}
