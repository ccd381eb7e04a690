//! Plugin loader: artifact store access, auto-load reconciliation and the
//! catalogue-id to manager-id mapping.
//!
//! Startup is fail-fast: the first active catalogue entry that does not load
//! aborts `load_all`, so operators never run with a silently degraded plugin
//! set.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::domain::{NewPluginCatalogueEntry, PluginCatalogueEntry, PluginStatus};
use crate::error::{GshubError, Result};
use crate::filestore::FileStore;
use crate::repo::PluginCatalogueRepository;

use super::{LoadedPlugin, PluginError, PluginId, PluginManager};

// ═══════════════════════════════════════════════════════════════════════════════
// Host seam
// ═══════════════════════════════════════════════════════════════════════════════

/// The loader's view of the plugin manager.
#[async_trait]
pub trait PluginHost: Send + Sync {
    async fn load_artifact(
        &self,
        artifact: &[u8],
        config: HashMap<String, String>,
    ) -> std::result::Result<Arc<LoadedPlugin>, PluginError>;

    async fn unload_plugin(&self, id: &str) -> std::result::Result<(), PluginError>;
}

#[async_trait]
impl PluginHost for PluginManager {
    async fn load_artifact(
        &self,
        artifact: &[u8],
        config: HashMap<String, String>,
    ) -> std::result::Result<Arc<LoadedPlugin>, PluginError> {
        self.load(artifact, config).await
    }

    async fn unload_plugin(&self, id: &str) -> std::result::Result<(), PluginError> {
        self.unload(id).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Loader
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct IdMap {
    by_catalogue: HashMap<i64, String>,
    by_compact: HashMap<String, i64>,
}

pub struct PluginLoader {
    store: Arc<dyn FileStore>,
    autoload: Vec<String>,
    catalogue: Arc<dyn PluginCatalogueRepository>,
    host: Arc<dyn PluginHost>,
    map: RwLock<IdMap>,
}

impl PluginLoader {
    pub fn new(
        store: Arc<dyn FileStore>,
        autoload: Vec<String>,
        catalogue: Arc<dyn PluginCatalogueRepository>,
        host: Arc<dyn PluginHost>,
    ) -> Self {
        Self {
            store,
            autoload,
            catalogue,
            host,
            map: RwLock::new(IdMap::default()),
        }
    }

    /// Reconcile the auto-load list against the catalogue, then load every
    /// active catalogue entry.
    pub async fn load_all(&self) -> Result<()> {
        for filename in &self.autoload {
            self.reconcile_autoload(filename).await?;
        }

        for entry in self.catalogue.list_by_status(PluginStatus::Active).await? {
            self.load_entry(&entry).await?;
        }

        info!(count = self.map.read().by_catalogue.len(), "Plugin load complete");
        Ok(())
    }

    /// Fingerprint an auto-load artifact and ensure its catalogue entry is
    /// active. The artifact is loaded only to learn its declared identity and
    /// unloaded immediately; the lasting load happens through the catalogue
    /// pass.
    async fn reconcile_autoload(&self, filename: &str) -> Result<()> {
        let artifact = self.store.read(filename).await.map_err(GshubError::from)?;

        let loaded = self
            .host
            .load_artifact(&artifact, HashMap::new())
            .await
            .map_err(GshubError::from)?;
        let id = loaded.id.clone();
        let info = loaded.info.clone();
        drop(loaded);

        self.host
            .unload_plugin(&id.compact())
            .await
            .map_err(GshubError::from)?;

        match self.catalogue.find_by_plugin_id(&id.dotted()).await? {
            Some(entry) => {
                if entry.status != PluginStatus::Active {
                    debug!(plugin = %id.compact(), "Re-activating catalogue entry");
                    self.catalogue.set_status(entry.id, PluginStatus::Active).await?;
                }
            }
            None => {
                info!(plugin = %id.compact(), filename = filename, "Registering auto-load plugin");
                self.catalogue
                    .create(NewPluginCatalogueEntry {
                        plugin_id: info.id,
                        name: info.name,
                        version: info.version,
                        description: info.description,
                        author: info.author,
                        api_version: info.api_version,
                        filename: Some(filename.to_string()),
                        status: PluginStatus::Active,
                    })
                    .await?;
            }
        }
        Ok(())
    }

    /// Load one active catalogue entry and record its manager id.
    async fn load_entry(&self, entry: &PluginCatalogueEntry) -> Result<()> {
        let filename = match &entry.filename {
            Some(filename) => filename.clone(),
            None => format!("{}.wasm", entry.plugin_id),
        };

        let artifact = self.store.read(&filename).await.map_err(GshubError::from)?;
        let loaded = self
            .host
            .load_artifact(&artifact, HashMap::new())
            .await
            .map_err(GshubError::from)?;
        let compact = loaded.id.compact();

        {
            let mut map = self.map.write();
            map.by_catalogue.insert(entry.id, compact.clone());
            map.by_compact.insert(compact.clone(), entry.id);
        }

        self.catalogue.touch_last_loaded(entry.id).await?;
        debug!(plugin = %compact, catalogue_id = entry.id, "Catalogue plugin loaded");
        Ok(())
    }

    /// Load a single artifact by filename on demand (admin surface), creating
    /// or re-activating its catalogue entry and recording the mapping.
    pub async fn load_file(&self, filename: &str) -> Result<Arc<LoadedPlugin>> {
        self.reconcile_autoload(filename).await?;

        let artifact = self.store.read(filename).await.map_err(GshubError::from)?;
        let loaded = self
            .host
            .load_artifact(&artifact, HashMap::new())
            .await
            .map_err(GshubError::from)?;
        let dotted = loaded.id.dotted();
        let compact = loaded.id.compact();

        let entry = self
            .catalogue
            .find_by_plugin_id(&dotted)
            .await?
            .ok_or_else(|| GshubError::not_found("plugin catalogue entry", dotted))?;

        {
            let mut map = self.map.write();
            map.by_catalogue.insert(entry.id, compact.clone());
            map.by_compact.insert(compact, entry.id);
        }
        self.catalogue.touch_last_loaded(entry.id).await?;
        Ok(loaded)
    }

    /// Unload a plugin and drop its mapping; the catalogue entry survives.
    pub async fn unload(&self, plugin_id: &str) -> Result<()> {
        let compact = PluginId::parse(plugin_id).map_err(GshubError::from)?.compact();
        self.host
            .unload_plugin(&compact)
            .await
            .map_err(GshubError::from)?;

        let mut map = self.map.write();
        if let Some(catalogue_id) = map.by_compact.remove(&compact) {
            map.by_catalogue.remove(&catalogue_id);
        }
        Ok(())
    }

    /// Manager id for a catalogue id.
    pub fn manager_id_for(&self, catalogue_id: i64) -> Option<String> {
        self.map.read().by_catalogue.get(&catalogue_id).cloned()
    }

    /// Catalogue id for a compact manager id.
    pub fn catalogue_id_for(&self, compact_id: &str) -> Option<i64> {
        self.map.read().by_compact.get(compact_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filestore::local::LocalFileStore;
    use crate::plugins::codec;
    use crate::plugins::GuestPlugin;
    use crate::repo::memory::MemoryPluginCatalogueRepository;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    struct NoopGuest;

    #[async_trait]
    impl GuestPlugin for NoopGuest {
        async fn get_info(&self) -> std::result::Result<codec::PluginInfo, PluginError> {
            unreachable!("loader tests never call the guest")
        }

        async fn initialize(
            &self,
            _config: &[(String, String)],
        ) -> std::result::Result<codec::InitializeResult, PluginError> {
            unreachable!()
        }

        async fn shutdown(&self) -> std::result::Result<(), PluginError> {
            Ok(())
        }

        async fn handle_event(
            &self,
            _event: &codec::EventEnvelope,
        ) -> std::result::Result<codec::HandleEventResult, PluginError> {
            unreachable!()
        }

        async fn subscribed_events(&self) -> std::result::Result<Vec<String>, PluginError> {
            Ok(Vec::new())
        }

        async fn http_routes(&self) -> std::result::Result<Vec<codec::RouteSpec>, PluginError> {
            Ok(Vec::new())
        }

        async fn handle_http_request(
            &self,
            _request: &codec::HttpRequest,
        ) -> std::result::Result<codec::HttpResponse, PluginError> {
            unreachable!()
        }

        async fn frontend_bundle(
            &self,
        ) -> std::result::Result<Option<codec::FrontendBundle>, PluginError> {
            Ok(None)
        }
    }

    /// Host stub that derives the plugin id from the artifact bytes and
    /// records the call sequence.
    struct RecordingHost {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingHost {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PluginHost for RecordingHost {
        async fn load_artifact(
            &self,
            artifact: &[u8],
            config: HashMap<String, String>,
        ) -> std::result::Result<Arc<LoadedPlugin>, PluginError> {
            let dotted = String::from_utf8_lossy(artifact).into_owned();
            let id = PluginId::parse(&dotted)?;
            self.calls.lock().push(format!("load:{}", id.compact()));

            Ok(Arc::new(LoadedPlugin::new(
                id,
                codec::PluginInfo {
                    id: dotted.clone(),
                    name: format!("Plugin {}", dotted),
                    version: "1.0.0".into(),
                    description: String::new(),
                    author: "tests".into(),
                    api_version: "1".into(),
                },
                config,
                Vec::new(),
                None,
                Arc::new(NoopGuest),
            )))
        }

        async fn unload_plugin(&self, id: &str) -> std::result::Result<(), PluginError> {
            self.calls.lock().push(format!("unload:{}", id));
            Ok(())
        }
    }

    async fn store_with(files: &[(&str, &str)]) -> (TempDir, Arc<dyn FileStore>) {
        let tmp = TempDir::new().unwrap();
        let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(tmp.path()));
        for (name, contents) in files {
            store.write(name, contents.as_bytes()).await.unwrap();
        }
        (tmp, store)
    }

    #[tokio::test]
    async fn test_autoload_creates_catalogue_entry_and_reloads() {
        let (_tmp, store) = store_with(&[("backups.wasm", "com.example.backups")]).await;
        let catalogue = Arc::new(MemoryPluginCatalogueRepository::default());
        let host = Arc::new(RecordingHost::new());

        let loader = PluginLoader::new(
            store,
            vec!["backups.wasm".into()],
            catalogue.clone(),
            host.clone(),
        );
        loader.load_all().await.unwrap();

        // Fingerprint load + unload, then the lasting catalogue load.
        assert_eq!(
            *host.calls.lock(),
            vec![
                "load:com-example-backups",
                "unload:com-example-backups",
                "load:com-example-backups",
            ]
        );

        let entry = catalogue
            .find_by_plugin_id("com.example.backups")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.status, PluginStatus::Active);
        assert_eq!(entry.filename.as_deref(), Some("backups.wasm"));
        assert!(entry.last_loaded_at.is_some());

        assert_eq!(
            loader.manager_id_for(entry.id).as_deref(),
            Some("com-example-backups")
        );
        assert_eq!(loader.catalogue_id_for("com-example-backups"), Some(entry.id));
    }

    #[tokio::test]
    async fn test_autoload_reactivates_inactive_entry() {
        let (_tmp, store) = store_with(&[("backups.wasm", "com.example.backups")]).await;
        let catalogue = Arc::new(MemoryPluginCatalogueRepository::default());
        let entry = catalogue
            .create(NewPluginCatalogueEntry {
                plugin_id: "com.example.backups".into(),
                name: "Backups".into(),
                version: "1.0.0".into(),
                description: String::new(),
                author: "tests".into(),
                api_version: "1".into(),
                filename: Some("backups.wasm".into()),
                status: PluginStatus::Inactive,
            })
            .await
            .unwrap();

        let loader = PluginLoader::new(
            store,
            vec!["backups.wasm".into()],
            catalogue.clone(),
            Arc::new(RecordingHost::new()),
        );
        loader.load_all().await.unwrap();

        let entry = catalogue.get(entry.id).await.unwrap().unwrap();
        assert_eq!(entry.status, PluginStatus::Active);
    }

    #[tokio::test]
    async fn test_missing_autoload_artifact_fails() {
        let (_tmp, store) = store_with(&[]).await;
        let loader = PluginLoader::new(
            store,
            vec!["ghost.wasm".into()],
            Arc::new(MemoryPluginCatalogueRepository::default()),
            Arc::new(RecordingHost::new()),
        );

        assert!(loader.load_all().await.is_err());
    }

    #[tokio::test]
    async fn test_catalogue_entry_without_filename_uses_id() {
        let (_tmp, store) = store_with(&[("com.example.maps.wasm", "com.example.maps")]).await;
        let catalogue = Arc::new(MemoryPluginCatalogueRepository::default());
        catalogue
            .create(NewPluginCatalogueEntry {
                plugin_id: "com.example.maps".into(),
                name: "Maps".into(),
                version: "1.0.0".into(),
                description: String::new(),
                author: "tests".into(),
                api_version: "1".into(),
                filename: None,
                status: PluginStatus::Active,
            })
            .await
            .unwrap();

        let loader = PluginLoader::new(
            store,
            Vec::new(),
            catalogue,
            Arc::new(RecordingHost::new()),
        );
        loader.load_all().await.unwrap();

        assert_eq!(loader.catalogue_id_for("com-example-maps"), Some(1));
    }

    #[tokio::test]
    async fn test_unload_drops_mapping() {
        let (_tmp, store) = store_with(&[("backups.wasm", "com.example.backups")]).await;
        let catalogue = Arc::new(MemoryPluginCatalogueRepository::default());
        let loader = PluginLoader::new(
            store,
            vec!["backups.wasm".into()],
            catalogue,
            Arc::new(RecordingHost::new()),
        );
        loader.load_all().await.unwrap();

        loader.unload("com.example.backups").await.unwrap();
        assert_eq!(loader.catalogue_id_for("com-example-backups"), None);
    }
}
