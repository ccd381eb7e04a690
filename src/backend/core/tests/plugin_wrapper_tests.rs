//! Concurrency tests for the per-plugin wrapper: guest invocations from the
//! dispatcher path and the HTTP path never overlap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gshub_core::events::SubscriptionRegistry;
use gshub_core::plugins::capabilities::CapabilityHub;
use gshub_core::plugins::{codec, GuestPlugin, PluginError, PluginManager};

/// Guest that records how many invocations are in flight at once.
struct ConcurrencyProbe {
    active: AtomicUsize,
    max_seen: AtomicUsize,
}

impl ConcurrencyProbe {
    fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        }
    }

    async fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GuestPlugin for Arc<ConcurrencyProbe> {
    async fn get_info(&self) -> Result<codec::PluginInfo, PluginError> {
        Ok(codec::PluginInfo {
            id: "com.example.probe".into(),
            name: "Probe".into(),
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
        self.enter().await;
        Ok(())
    }

    async fn handle_event(
        &self,
        _event: &codec::EventEnvelope,
    ) -> Result<codec::HandleEventResult, PluginError> {
        self.enter().await;
        Ok(codec::HandleEventResult {
            handled: true,
            should_cancel: false,
            message: String::new(),
        })
    }

    async fn subscribed_events(&self) -> Result<Vec<String>, PluginError> {
        Ok(Vec::new())
    }

    async fn http_routes(&self) -> Result<Vec<codec::RouteSpec>, PluginError> {
        Ok(Vec::new())
    }

    async fn handle_http_request(
        &self,
        _request: &codec::HttpRequest,
    ) -> Result<codec::HttpResponse, PluginError> {
        self.enter().await;
        Ok(codec::HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body: Vec::new(),
        })
    }

    async fn frontend_bundle(&self) -> Result<Option<codec::FrontendBundle>, PluginError> {
        Ok(None)
    }
}

#[tokio::test]
async fn guest_calls_are_serialized_per_plugin() {
    let manager = PluginManager::new(
        Arc::new(CapabilityHub::new()),
        Arc::new(SubscriptionRegistry::new()),
        Duration::from_secs(5),
    );

    let probe = Arc::new(ConcurrencyProbe::new());
    let plugin = manager
        .register_guest(Arc::new(probe.clone()), HashMap::new())
        .await
        .unwrap();

    let event = codec::EventEnvelope {
        kind: "server_pre_start".into(),
        server: None,
        task: None,
        metadata: Vec::new(),
    };
    let request = codec::HttpRequest {
        method: "GET".into(),
        path: "/".into(),
        headers: HashMap::new(),
        params: HashMap::new(),
        query: HashMap::new(),
        body: Vec::new(),
        session: None,
    };

    // Mixed event and HTTP invocations racing for the same plugin.
    let mut tasks = tokio::task::JoinSet::new();
    for index in 0..16 {
        let plugin = plugin.clone();
        let event = event.clone();
        let request = request.clone();
        tasks.spawn(async move {
            if index % 2 == 0 {
                plugin.handle_event(&event).await.map(|_| ())
            } else {
                plugin.handle_http_request(&request).await.map(|_| ())
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    assert_eq!(probe.max_seen.load(Ordering::SeqCst), 1);
}
