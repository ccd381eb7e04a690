//! Plugin manager: the process-wide registry of loaded plugins.
//!
//! The registry lock is held only for map operations, never across guest
//! calls. Guest calls serialize on the per-plugin lock inside the runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::events::{EventKind, SubscriptionRegistry};

use super::capabilities::CapabilityHub;
use super::routes::HttpRoute;
use super::runtime::WasmPlugin;
use super::{GuestPlugin, LoadedPlugin, PluginError, PluginId};

struct ManagerInner {
    plugins: HashMap<String, Arc<LoadedPlugin>>,
    closed: bool,
}

pub struct PluginManager {
    inner: RwLock<ManagerInner>,
    hub: Arc<CapabilityHub>,
    subscriptions: Arc<SubscriptionRegistry>,
    call_timeout: Duration,
}

impl PluginManager {
    pub fn new(
        hub: Arc<CapabilityHub>,
        subscriptions: Arc<SubscriptionRegistry>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            inner: RwLock::new(ManagerInner {
                plugins: HashMap::new(),
                closed: false,
            }),
            hub,
            subscriptions,
            call_timeout,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Loading
    // ─────────────────────────────────────────────────────────────────────────

    /// Load a plugin from artifact bytes.
    ///
    /// Creates an isolated sandbox, verifies the API version, initializes the
    /// guest and registers it. Every failure path releases the sandbox before
    /// returning (the engine is dropped with the instance).
    pub async fn load(
        &self,
        artifact: &[u8],
        config: HashMap<String, String>,
    ) -> Result<Arc<LoadedPlugin>, PluginError> {
        if self.inner.read().await.closed {
            return Err(PluginError::NotAvailable);
        }

        let guest = Arc::new(WasmPlugin::instantiate(artifact, self.hub.clone(), self.call_timeout).await?);

        // Label the sandbox with its compact id for host-side logging before
        // any capability call can be made from initialize().
        let info = guest.get_info().await?;
        let id = PluginId::parse(&info.id)?;
        guest.set_label(&id.compact()).await;

        self.register_guest(guest, config).await
    }

    /// Register a guest behind the [`GuestPlugin`] surface.
    ///
    /// Runs the identity, initialization, route-validation and frontend
    /// fetch steps and publishes the plugin into the registry.
    pub async fn register_guest(
        &self,
        guest: Arc<dyn GuestPlugin>,
        config: HashMap<String, String>,
    ) -> Result<Arc<LoadedPlugin>, PluginError> {
        if self.inner.read().await.closed {
            return Err(PluginError::NotAvailable);
        }

        let info = guest.get_info().await?;
        let id = PluginId::parse(&info.id)?;
        let compact = id.compact();

        if self.inner.read().await.plugins.contains_key(&compact) {
            return Err(PluginError::AlreadyLoaded(compact));
        }

        let config_pairs: Vec<(String, String)> =
            config.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let result = guest.initialize(&config_pairs).await?;
        if !result.success {
            return Err(PluginError::InitRejected(result.message));
        }

        let mut routes = Vec::new();
        for spec in guest.http_routes().await? {
            routes.push(HttpRoute::validate(&spec)?);
        }

        // The frontend bundle is optional; failures only cost the assets.
        let frontend = match guest.frontend_bundle().await {
            Ok(bundle) => bundle.filter(|b| !b.is_empty()),
            Err(e) => {
                warn!(plugin = %compact, error = %e, "Frontend bundle fetch failed");
                None
            }
        };

        let mut kinds = Vec::new();
        for tag in guest.subscribed_events().await? {
            match EventKind::from_tag(&tag) {
                Some(kind) => kinds.push(kind),
                None => warn!(plugin = %compact, tag = %tag, "Unknown event subscription"),
            }
        }

        let loaded = Arc::new(LoadedPlugin::new(
            id,
            info.clone(),
            config,
            routes,
            frontend,
            guest,
        ));

        {
            let mut inner = self.inner.write().await;
            if inner.closed {
                return Err(PluginError::NotAvailable);
            }
            if inner.plugins.contains_key(&compact) {
                return Err(PluginError::AlreadyLoaded(compact));
            }
            inner.plugins.insert(compact.clone(), loaded.clone());
        }
        self.subscriptions.register(&compact, &kinds);

        info!(
            plugin = %compact,
            name = %info.name,
            version = %info.version,
            routes = loaded.routes.len(),
            events = kinds.len(),
            "Plugin loaded"
        );
        Ok(loaded)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Unloading
    // ─────────────────────────────────────────────────────────────────────────

    /// Unload a plugin by id (dotted or compact).
    ///
    /// The guest shutdown is best effort; the sandbox is released regardless.
    pub async fn unload(&self, plugin_id: &str) -> Result<(), PluginError> {
        let compact = PluginId::parse(plugin_id)?.compact();

        let removed = {
            let mut inner = self.inner.write().await;
            inner.plugins.remove(&compact)
        };
        let plugin = removed.ok_or_else(|| PluginError::NotFound(compact.clone()))?;

        self.subscriptions.unregister(&compact);

        if let Err(e) = plugin.shutdown_guest().await {
            warn!(plugin = %compact, error = %e, "Guest shutdown failed during unload");
        }

        info!(plugin = %compact, "Plugin unloaded");
        Ok(())
    }

    /// Shut the manager down: mark closed, best-effort guest shutdown for
    /// every plugin, release every sandbox. Shutdown failures are joined into
    /// the returned error.
    pub async fn shutdown(&self) -> Result<(), PluginError> {
        let plugins: Vec<(String, Arc<LoadedPlugin>)> = {
            let mut inner = self.inner.write().await;
            inner.closed = true;
            inner.plugins.drain().collect()
        };

        let mut failures = Vec::new();
        for (compact, plugin) in plugins {
            self.subscriptions.unregister(&compact);
            if let Err(e) = plugin.shutdown_guest().await {
                warn!(plugin = %compact, error = %e, "Guest shutdown failed");
                failures.push(format!("{}: {}", compact, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PluginError::Guest(failures.join("; ")))
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookup
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a plugin by its compact id.
    pub async fn get(&self, compact_id: &str) -> Option<Arc<LoadedPlugin>> {
        self.inner.read().await.plugins.get(compact_id).cloned()
    }

    /// All loaded plugins, ordered by compact id.
    pub async fn list(&self) -> Vec<Arc<LoadedPlugin>> {
        let inner = self.inner.read().await;
        let mut plugins: Vec<_> = inner.plugins.values().cloned().collect();
        plugins.sort_by(|a, b| a.id.compact().cmp(&b.id.compact()));
        plugins
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.read().await.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::codec;
    use async_trait::async_trait;

    /// Scripted guest used to exercise the registry without a sandbox.
    struct StubGuest {
        id: String,
        init_success: bool,
        routes: Vec<codec::RouteSpec>,
        events: Vec<String>,
        shutdown_fails: bool,
    }

    impl StubGuest {
        fn named(id: &str) -> Self {
            Self {
                id: id.to_string(),
                init_success: true,
                routes: Vec::new(),
                events: vec!["server_pre_start".into()],
                shutdown_fails: false,
            }
        }
    }

    #[async_trait]
    impl GuestPlugin for StubGuest {
        async fn get_info(&self) -> Result<codec::PluginInfo, PluginError> {
            Ok(codec::PluginInfo {
                id: self.id.clone(),
                name: "Stub".into(),
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
                success: self.init_success,
                message: if self.init_success {
                    String::new()
                } else {
                    "refused".into()
                },
            })
        }

        async fn shutdown(&self) -> Result<(), PluginError> {
            if self.shutdown_fails {
                Err(PluginError::Guest("shutdown failed".into()))
            } else {
                Ok(())
            }
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
            Ok(self.events.clone())
        }

        async fn http_routes(&self) -> Result<Vec<codec::RouteSpec>, PluginError> {
            Ok(self.routes.clone())
        }

        async fn handle_http_request(
            &self,
            _request: &codec::HttpRequest,
        ) -> Result<codec::HttpResponse, PluginError> {
            Ok(codec::HttpResponse {
                status: 200,
                headers: Default::default(),
                body: Vec::new(),
            })
        }

        async fn frontend_bundle(&self) -> Result<Option<codec::FrontendBundle>, PluginError> {
            Ok(None)
        }
    }

    fn manager() -> (PluginManager, Arc<SubscriptionRegistry>) {
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let manager = PluginManager::new(
            Arc::new(CapabilityHub::new()),
            subscriptions.clone(),
            Duration::from_secs(5),
        );
        (manager, subscriptions)
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let (manager, subscriptions) = manager();

        let plugin = manager
            .register_guest(Arc::new(StubGuest::named("com.example.backups")), HashMap::new())
            .await
            .unwrap();

        assert_eq!(plugin.id.compact(), "com-example-backups");
        assert!(manager.get("com-example-backups").await.is_some());
        assert_eq!(
            subscriptions.subscribers(EventKind::ServerPreStart),
            vec!["com-example-backups"]
        );
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let (manager, _) = manager();

        manager
            .register_guest(Arc::new(StubGuest::named("com.example.backups")), HashMap::new())
            .await
            .unwrap();

        let err = manager
            .register_guest(Arc::new(StubGuest::named("com.example.backups")), HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::AlreadyLoaded(_)));
    }

    #[tokio::test]
    async fn test_init_rejection_fails_load() {
        let (manager, _) = manager();

        let mut guest = StubGuest::named("com.example.bad");
        guest.init_success = false;

        let err = manager
            .register_guest(Arc::new(guest), HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::InitRejected(_)));
        assert!(manager.get("com-example-bad").await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_route_fails_load() {
        let (manager, _) = manager();

        let mut guest = StubGuest::named("com.example.routes");
        guest.routes = vec![codec::RouteSpec {
            path: "/a//b".into(),
            methods: vec!["GET".into()],
            requires_auth: false,
            admin_only: false,
            description: String::new(),
        }];

        let err = manager
            .register_guest(Arc::new(guest), HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::InvalidRoute(_)));
    }

    #[tokio::test]
    async fn test_unload_removes_subscriptions() {
        let (manager, subscriptions) = manager();

        manager
            .register_guest(Arc::new(StubGuest::named("com.example.backups")), HashMap::new())
            .await
            .unwrap();

        // Accepts the dotted form as well.
        manager.unload("com.example.backups").await.unwrap();
        assert!(manager.get("com-example-backups").await.is_none());
        assert!(subscriptions.subscribers(EventKind::ServerPreStart).is_empty());
    }

    #[tokio::test]
    async fn test_unload_missing_is_not_found() {
        let (manager, _) = manager();
        let err = manager.unload("com.example.ghost").await.unwrap_err();
        assert!(matches!(err, PluginError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_shutdown_closes_and_joins_errors() {
        let (manager, _) = manager();

        let mut failing = StubGuest::named("com.example.flaky");
        failing.shutdown_fails = true;
        manager
            .register_guest(Arc::new(failing), HashMap::new())
            .await
            .unwrap();
        manager
            .register_guest(Arc::new(StubGuest::named("com.example.fine")), HashMap::new())
            .await
            .unwrap();

        let err = manager.shutdown().await.unwrap_err();
        assert!(err.to_string().contains("com-example-flaky"));

        // The registry is closed and emptied regardless of failures.
        assert!(manager.is_closed().await);
        assert!(manager.get("com-example-fine").await.is_none());

        let err = manager
            .register_guest(Arc::new(StubGuest::named("com.example.late")), HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::NotAvailable));
    }
}
