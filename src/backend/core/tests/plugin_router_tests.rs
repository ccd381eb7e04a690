//! Router-level tests for the plugin HTTP surface: auth gating, matching,
//! limits, timeouts, request bridging and frontend aggregation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Duration as ChronoDuration;
use gshub_core::api::{build_router, AppState};
use gshub_core::control::ServerControlService;
use gshub_core::domain::User;
use gshub_core::events::{EventDispatcher, SubscriptionRegistry};
use gshub_core::middleware::AuthService;
use gshub_core::plugins::capabilities::CapabilityHub;
use gshub_core::plugins::http::PluginRouterConfig;
use gshub_core::plugins::loader::PluginLoader;
use gshub_core::plugins::{codec, GuestPlugin, PluginError, PluginManager};
use gshub_core::repo::memory::{
    MemoryAccessTokenRepository, MemoryPluginCatalogueRepository, MemoryUserRepository,
};
use gshub_core::repo::Repositories;
use tower::ServiceExt;

const MAX_BODY: usize = 1024 * 1024;

// ═══════════════════════════════════════════════════════════════════════════════
// Echo plugin
// ═══════════════════════════════════════════════════════════════════════════════

struct EchoPlugin {
    id: String,
    bundle: Option<codec::FrontendBundle>,
}

impl EchoPlugin {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            bundle: None,
        }
    }

    fn with_bundle(id: &str, javascript: &str, stylesheet: &str) -> Self {
        Self {
            id: id.to_string(),
            bundle: Some(codec::FrontendBundle {
                javascript: javascript.as_bytes().to_vec(),
                stylesheet: stylesheet.as_bytes().to_vec(),
            }),
        }
    }

    fn route(path: &str, methods: &[&str], requires_auth: bool, admin_only: bool) -> codec::RouteSpec {
        codec::RouteSpec {
            path: path.to_string(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            requires_auth,
            admin_only,
            description: String::new(),
        }
    }
}

#[async_trait]
impl GuestPlugin for EchoPlugin {
    async fn get_info(&self) -> Result<codec::PluginInfo, PluginError> {
        Ok(codec::PluginInfo {
            id: self.id.clone(),
            name: "Echo".into(),
            version: "1.0.0".into(),
            description: String::new(),
            author: "tests".into(),
            api_version: "1".into(),
        })
    }

    async fn initialize(
        &self,
        _config: &[(String, String)],
    ) -> Result<codec::InitializeResult, PluginError> {
        Ok(codec::InitializeResult {
            success: true,
            message: String::new(),
        })
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn handle_event(
        &self,
        _event: &codec::EventEnvelope,
    ) -> Result<codec::HandleEventResult, PluginError> {
        Ok(codec::HandleEventResult {
            handled: false,
            should_cancel: false,
            message: String::new(),
        })
    }

    async fn subscribed_events(&self) -> Result<Vec<String>, PluginError> {
        Ok(Vec::new())
    }

    async fn http_routes(&self) -> Result<Vec<codec::RouteSpec>, PluginError> {
        Ok(vec![
            Self::route("/public", &["GET"], false, false),
            Self::route("/status", &["GET"], true, false),
            Self::route("/config", &["POST"], true, true),
            Self::route("/users/{id}/items/{item}", &["GET"], false, false),
            Self::route("/echo", &["POST"], false, false),
            Self::route("/hang", &["GET"], false, false),
        ])
    }

    async fn handle_http_request(
        &self,
        request: &codec::HttpRequest,
    ) -> Result<codec::HttpResponse, PluginError> {
        match request.path.as_str() {
            "/public" => Ok(text_response(200, "public-ok")),
            "/status" => Ok(text_response(200, "status-ok")),
            "/config" => Ok(codec::HttpResponse {
                status: 204,
                headers: HashMap::new(),
                body: Vec::new(),
            }),
            "/echo" => Ok(codec::HttpResponse {
                // Status 0 exercises the router's default mapping.
                status: 0,
                headers: HashMap::new(),
                body: request.body.clone(),
            }),
            "/hang" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(text_response(200, "never"))
            }
            _ => {
                // The parameterized route reflects what the host delivered.
                let reflection = serde_json::json!({
                    "method": request.method,
                    "path": request.path,
                    "params": request.params,
                    "query": request.query,
                    "user_id": request.session.as_ref().map(|s| s.user.id),
                    "token_abilities": request
                        .session
                        .as_ref()
                        .and_then(|s| s.token.as_ref())
                        .map(|t| t.abilities.clone()),
                });
                Ok(codec::HttpResponse {
                    status: 200,
                    headers: HashMap::new(),
                    body: serde_json::to_vec(&reflection).unwrap_or_default(),
                })
            }
        }
    }

    async fn frontend_bundle(&self) -> Result<Option<codec::FrontendBundle>, PluginError> {
        Ok(self.bundle.clone())
    }
}

fn text_response(status: u16, body: &str) -> codec::HttpResponse {
    codec::HttpResponse {
        status,
        headers: HashMap::from([("content-type".to_string(), "text/plain".to_string())]),
        body: body.as_bytes().to_vec(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Harness
// ═══════════════════════════════════════════════════════════════════════════════

struct Harness {
    router: Router,
    auth: Arc<AuthService>,
    manager: Arc<PluginManager>,
}

async fn harness_with(guests: Vec<EchoPlugin>) -> Harness {
    let users = Arc::new(MemoryUserRepository::default());
    users.insert(User {
        id: 1,
        login: "root".into(),
        email: "root@example.com".into(),
        name: None,
        admin: true,
    });
    users.insert(User {
        id: 2,
        login: "player".into(),
        email: "player@example.com".into(),
        name: None,
        admin: false,
    });

    let repos = Repositories {
        users: users.clone(),
        access_tokens: Arc::new(MemoryAccessTokenRepository::default()),
        ..Repositories::in_memory()
    };

    let subscriptions = Arc::new(SubscriptionRegistry::new());
    let manager = Arc::new(PluginManager::new(
        Arc::new(CapabilityHub::new()),
        subscriptions.clone(),
        Duration::from_secs(5),
    ));
    for guest in guests {
        manager
            .register_guest(Arc::new(guest), HashMap::new())
            .await
            .unwrap();
    }

    let dispatcher = Arc::new(EventDispatcher::new(
        subscriptions,
        manager.clone(),
        Duration::from_secs(5),
    ));
    let control = Arc::new(ServerControlService::new(repos.clone(), dispatcher));
    let auth = Arc::new(AuthService::new(
        repos.users.clone(),
        repos.access_tokens.clone(),
        Some("router-test-secret"),
    ));

    let store_dir = tempfile::tempdir().unwrap().into_path();
    let loader = Arc::new(PluginLoader::new(
        gshub_core::filestore::from_dsn(&format!("local:{}", store_dir.display())).unwrap(),
        Vec::new(),
        Arc::new(MemoryPluginCatalogueRepository::default()),
        manager.clone(),
    ));

    let state = AppState {
        manager: manager.clone(),
        loader,
        control,
        auth: auth.clone(),
        router_config: PluginRouterConfig {
            request_timeout: Duration::from_millis(300),
            max_body_bytes: MAX_BODY,
        },
        db: None,
        metrics: None,
    };

    Harness {
        router: build_router(state),
        auth,
        manager,
    }
}

async fn harness() -> Harness {
    harness_with(vec![EchoPlugin::new("com.example.echo")]).await
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_as(uri: &str, jwt: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", jwt))
        .body(Body::empty())
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Auth gating
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn auth_route_without_session_is_401() {
    let harness = harness().await;
    let response = harness
        .router
        .oneshot(get("/api/plugins/com-example-echo/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn auth_route_with_session_reaches_plugin() {
    let harness = harness().await;
    let jwt = harness.auth.issue_jwt(2, ChronoDuration::hours(1)).unwrap();

    let response = harness
        .router
        .oneshot(get_as("/api/plugins/com-example-echo/status", &jwt))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"status-ok");
}

#[tokio::test]
async fn admin_route_with_non_admin_session_is_403() {
    let harness = harness().await;
    let jwt = harness.auth.issue_jwt(2, ChronoDuration::hours(1)).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/api/plugins/com-example-echo/config")
        .header(header::AUTHORIZATION, format!("Bearer {}", jwt))
        .body(Body::empty())
        .unwrap();
    let response = harness.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_route_with_admin_session_flows_through() {
    let harness = harness().await;
    let jwt = harness.auth.issue_jwt(1, ChronoDuration::hours(1)).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/api/plugins/com-example-echo/config")
        .header(header::AUTHORIZATION, format!("Bearer {}", jwt))
        .body(Body::empty())
        .unwrap();
    let response = harness.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn admin_route_without_session_is_401_not_403() {
    let harness = harness().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/plugins/com-example-echo/config")
        .body(Body::empty())
        .unwrap();
    let response = harness.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Lookup and matching
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn unknown_plugin_is_404() {
    let harness = harness().await;
    let response = harness
        .router
        .oneshot(get("/api/plugins/com-example-ghost/public"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_plugin_id_is_400() {
    let harness = harness().await;
    let response = harness
        .router
        .oneshot(get("/api/plugins/Not..Valid/public"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn dotted_plugin_id_is_normalized() {
    let harness = harness().await;
    let response = harness
        .router
        .oneshot(get("/api/plugins/com.example.echo/public"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"public-ok");
}

#[tokio::test]
async fn unmatched_path_is_404() {
    let harness = harness().await;
    let response = harness
        .router
        .oneshot(get("/api/plugins/com-example-echo/nope"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn method_mismatch_is_404() {
    let harness = harness().await;
    let request = Request::builder()
        .method("DELETE")
        .uri("/api/plugins/com-example-echo/public")
        .body(Body::empty())
        .unwrap();
    let response = harness.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn extra_path_segments_do_not_match() {
    let harness = harness().await;
    let response = harness
        .router
        .oneshot(get("/api/plugins/com-example-echo/public/extra"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn disabled_plugin_is_503() {
    let harness = harness().await;
    harness
        .manager
        .get("com-example-echo")
        .await
        .unwrap()
        .set_enabled(false);

    let response = harness
        .router
        .oneshot(get("/api/plugins/com-example-echo/public"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Request bridging
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn path_params_and_query_expansion_reach_plugin() {
    let harness = harness().await;
    let jwt = harness.auth.issue_jwt(2, ChronoDuration::hours(1)).unwrap();

    let response = harness
        .router
        .oneshot(get_as(
            "/api/plugins/com-example-echo/users/7/items/rope?tags=a,b,c&tags=d",
            &jwt,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let reflection: serde_json::Value =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(reflection["method"], "GET");
    assert_eq!(reflection["path"], "/users/7/items/rope");
    assert_eq!(reflection["params"]["id"], "7");
    assert_eq!(reflection["params"]["item"], "rope");
    assert_eq!(
        reflection["query"]["tags"],
        serde_json::json!(["a", "b", "c", "d"])
    );
    assert_eq!(reflection["user_id"], 2);
    // JWT sessions carry no personal access token.
    assert_eq!(reflection["token_abilities"], serde_json::Value::Null);
}

#[tokio::test]
async fn unauthenticated_request_has_absent_session() {
    let harness = harness().await;
    let response = harness
        .router
        .oneshot(get("/api/plugins/com-example-echo/users/7/items/rope"))
        .await
        .unwrap();

    let reflection: serde_json::Value =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(reflection["user_id"], serde_json::Value::Null);
}

#[tokio::test]
async fn body_at_limit_is_accepted_and_echoed() {
    let harness = harness().await;
    let payload = vec![0x42u8; MAX_BODY];

    let request = Request::builder()
        .method("POST")
        .uri("/api/plugins/com-example-echo/echo")
        .body(Body::from(payload.clone()))
        .unwrap();
    let response = harness.router.oneshot(request).await.unwrap();

    // Status 0 from the plugin maps to 200 and the default content type.
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(body_bytes(response).await, payload);
}

#[tokio::test]
async fn body_over_limit_is_400() {
    let harness = harness().await;
    let payload = vec![0x42u8; MAX_BODY + 1];

    let request = Request::builder()
        .method("POST")
        .uri("/api/plugins/com-example-echo/echo")
        .body(Body::from(payload))
        .unwrap();
    let response = harness.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn hanging_handler_times_out_with_504() {
    let harness = harness().await;
    let response = harness
        .router
        .oneshot(get("/api/plugins/com-example-echo/hang"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Frontend aggregation
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn frontend_bundles_are_aggregated() {
    let harness = harness_with(vec![
        EchoPlugin::with_bundle("com.example.alpha", "A", "a-css"),
        EchoPlugin::new("com.example.empty"),
        EchoPlugin::with_bundle("com.example.gamma", "C", "c-css"),
    ])
    .await;

    let response = harness
        .router
        .clone()
        .oneshot(get("/api/frontend/plugins.js"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/javascript; charset=utf-8"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-cache"
    );

    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.starts_with("// gshub aggregated plugin frontend"));
    assert!(body.contains("com-example-alpha"));
    assert!(body.contains('A'));
    assert!(body.contains("com-example-gamma"));
    assert!(body.contains('C'));
    assert!(!body.contains("com-example-empty"));

    let response = harness
        .router
        .oneshot(get("/api/frontend/plugins.css"))
        .await
        .unwrap();
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/css; charset=utf-8"
    );
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.contains("a-css"));
    assert!(body.contains("c-css"));
}

#[tokio::test]
async fn frontend_aggregation_without_plugins_is_header_only() {
    let harness = harness_with(Vec::new()).await;

    let response = harness
        .router
        .oneshot(get("/api/frontend/plugins.js"))
        .await
        .unwrap();
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert_eq!(body, "// gshub aggregated plugin frontend\n");
}

#[tokio::test]
async fn disabled_plugin_contributes_no_frontend() {
    let harness = harness_with(vec![EchoPlugin::with_bundle(
        "com.example.alpha",
        "A",
        "",
    )])
    .await;
    harness
        .manager
        .get("com-example-alpha")
        .await
        .unwrap()
        .set_enabled(false);

    let response = harness
        .router
        .oneshot(get("/api/frontend/plugins.js"))
        .await
        .unwrap();
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(!body.contains("com-example-alpha"));
}
