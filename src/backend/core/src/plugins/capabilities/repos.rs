//! Repository capabilities: per-entity persistence access for plugins.
//!
//! Each entity is its own capability so grants can stay narrow. Lookups are
//! filter- or id-based; the only mutators exposed are daemon-task creation
//! and server-setting writes, mirroring what the panel's own handlers use.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{NewDaemonTask, TaskKind};
use crate::plugins::codec::{
    self, CreateDaemonTaskRequest, CreateDaemonTaskResponse, FindRequest, GetByCodeRequest,
    GetByIdRequest, ServerSettingGetRequest, ServerSettingGetResponse, ServerSettingSaveRequest,
};
use crate::repo::{Filter, Repositories};

use super::{CapabilityError, CapabilityService};

fn to_filter(request: &FindRequest) -> Filter {
    request.filter.iter().cloned().collect()
}

fn failed(e: crate::error::GshubError) -> CapabilityError {
    CapabilityError::failed(e.to_string())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Read-only entity capabilities
// ═══════════════════════════════════════════════════════════════════════════════

macro_rules! lookup_capability {
    ($name:ident, $tag:literal, $repo:ident) => {
        pub struct $name {
            repos: Repositories,
        }

        impl $name {
            pub fn new(repos: Repositories) -> Self {
                Self { repos }
            }
        }

        #[async_trait]
        impl CapabilityService for $name {
            fn name(&self) -> &'static str {
                $tag
            }

            async fn invoke(
                &self,
                _plugin_id: &str,
                method: &str,
                body: &[u8],
            ) -> Result<Vec<u8>, CapabilityError> {
                match method {
                    "find" => {
                        let request: FindRequest = codec::decode(body)?;
                        let rows = self
                            .repos
                            .$repo
                            .find(&to_filter(&request))
                            .await
                            .map_err(failed)?;
                        Ok(codec::encode(&rows)?)
                    }
                    "get" => {
                        let request: GetByIdRequest = codec::decode(body)?;
                        let row = self.repos.$repo.get(request.id).await.map_err(failed)?;
                        Ok(codec::encode(&row)?)
                    }
                    other => Err(CapabilityError::UnknownMethod(
                        $tag.to_string(),
                        other.to_string(),
                    )),
                }
            }
        }
    };
}

lookup_capability!(ServersRepoCapability, "repo_servers", servers);
lookup_capability!(UsersRepoCapability, "repo_users", users);
lookup_capability!(NodesRepoCapability, "repo_nodes", nodes);
lookup_capability!(GameModsRepoCapability, "repo_game_mods", game_mods);

/// Games are keyed by code rather than numeric id.
pub struct GamesRepoCapability {
    repos: Repositories,
}

impl GamesRepoCapability {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }
}

#[async_trait]
impl CapabilityService for GamesRepoCapability {
    fn name(&self) -> &'static str {
        "repo_games"
    }

    async fn invoke(
        &self,
        _plugin_id: &str,
        method: &str,
        body: &[u8],
    ) -> Result<Vec<u8>, CapabilityError> {
        match method {
            "find" => {
                let request: FindRequest = codec::decode(body)?;
                let rows = self
                    .repos
                    .games
                    .find(&to_filter(&request))
                    .await
                    .map_err(failed)?;
                Ok(codec::encode(&rows)?)
            }
            "get" => {
                let request: GetByCodeRequest = codec::decode(body)?;
                let row = self.repos.games.get(&request.code).await.map_err(failed)?;
                Ok(codec::encode(&row)?)
            }
            other => Err(CapabilityError::UnknownMethod(
                "repo_games".to_string(),
                other.to_string(),
            )),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Daemon tasks
// ═══════════════════════════════════════════════════════════════════════════════

pub struct DaemonTasksRepoCapability {
    repos: Repositories,
}

impl DaemonTasksRepoCapability {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }
}

#[async_trait]
impl CapabilityService for DaemonTasksRepoCapability {
    fn name(&self) -> &'static str {
        "repo_daemon_tasks"
    }

    async fn invoke(
        &self,
        plugin_id: &str,
        method: &str,
        body: &[u8],
    ) -> Result<Vec<u8>, CapabilityError> {
        match method {
            "get" => {
                let request: GetByIdRequest = codec::decode(body)?;
                let task = self
                    .repos
                    .daemon_tasks
                    .get(request.id)
                    .await
                    .map_err(failed)?;
                Ok(codec::encode(&task)?)
            }
            "create" => {
                let request: CreateDaemonTaskRequest = codec::decode(body)?;
                let kind = TaskKind::from_str(&request.kind).ok_or_else(|| {
                    CapabilityError::failed(format!("unknown task kind: {}", request.kind))
                })?;

                tracing::info!(
                    plugin = plugin_id,
                    node = request.node_id,
                    kind = %kind,
                    "Plugin enqueues daemon task"
                );

                // Plugin-created tasks honor the same guard as the engine.
                let task_id = self
                    .repos
                    .daemon_tasks
                    .enqueue(
                        NewDaemonTask {
                            node_id: request.node_id,
                            server_id: request.server_id,
                            kind,
                            run_after: None,
                        },
                        &[kind],
                    )
                    .await
                    .map_err(failed)?;

                Ok(codec::encode(&CreateDaemonTaskResponse { task_id })?)
            }
            other => Err(CapabilityError::UnknownMethod(
                "repo_daemon_tasks".to_string(),
                other.to_string(),
            )),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Server settings
// ═══════════════════════════════════════════════════════════════════════════════

pub struct ServerSettingsRepoCapability {
    repos: Repositories,
}

impl ServerSettingsRepoCapability {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }
}

#[async_trait]
impl CapabilityService for ServerSettingsRepoCapability {
    fn name(&self) -> &'static str {
        "repo_server_settings"
    }

    async fn invoke(
        &self,
        _plugin_id: &str,
        method: &str,
        body: &[u8],
    ) -> Result<Vec<u8>, CapabilityError> {
        match method {
            "get" => {
                let request: ServerSettingGetRequest = codec::decode(body)?;
                let setting = self
                    .repos
                    .server_settings
                    .get(request.server_id, &request.name)
                    .await
                    .map_err(failed)?;
                let response = ServerSettingGetResponse {
                    found: setting.is_some(),
                    value: setting.map(|s| s.value).unwrap_or_default(),
                };
                Ok(codec::encode(&response)?)
            }
            "save" => {
                let request: ServerSettingSaveRequest = codec::decode(body)?;
                self.repos
                    .server_settings
                    .upsert(request.server_id, &request.name, &request.value)
                    .await
                    .map_err(failed)?;
                Ok(Vec::new())
            }
            other => Err(CapabilityError::UnknownMethod(
                "repo_server_settings".to_string(),
                other.to_string(),
            )),
        }
    }
}

/// Register every repository capability on a hub.
pub fn register_all(hub: &super::CapabilityHub, repos: &Repositories) {
    hub.register(Arc::new(ServersRepoCapability::new(repos.clone())));
    hub.register(Arc::new(UsersRepoCapability::new(repos.clone())));
    hub.register(Arc::new(NodesRepoCapability::new(repos.clone())));
    hub.register(Arc::new(GamesRepoCapability::new(repos.clone())));
    hub.register(Arc::new(GameModsRepoCapability::new(repos.clone())));
    hub.register(Arc::new(DaemonTasksRepoCapability::new(repos.clone())));
    hub.register(Arc::new(ServerSettingsRepoCapability::new(repos.clone())));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Server;
    use crate::repo::memory::MemoryServerRepository;

    fn repos_with_server() -> Repositories {
        let repos = Repositories::in_memory();
        let servers = MemoryServerRepository::default();
        servers.insert(Server {
            id: 7,
            uuid: uuid::Uuid::new_v4(),
            name: "cs".into(),
            node_id: 1,
            game_code: "cstrike".into(),
            game_mod_id: None,
            start_command: Some("./start".into()),
            enabled: true,
            installed: true,
        });
        Repositories {
            servers: Arc::new(servers),
            ..repos
        }
    }

    #[tokio::test]
    async fn test_servers_get() {
        let capability = ServersRepoCapability::new(repos_with_server());
        let request = codec::encode(&GetByIdRequest { id: 7 }).unwrap();

        let reply: Option<Server> =
            codec::decode(&capability.invoke("p", "get", &request).await.unwrap()).unwrap();
        assert_eq!(reply.unwrap().name, "cs");
    }

    #[tokio::test]
    async fn test_servers_find_by_node() {
        let capability = ServersRepoCapability::new(repos_with_server());
        let request = codec::encode(&FindRequest {
            filter: vec![("node_id".into(), "1".into())],
        })
        .unwrap();

        let reply: Vec<Server> =
            codec::decode(&capability.invoke("p", "find", &request).await.unwrap()).unwrap();
        assert_eq!(reply.len(), 1);
    }

    #[tokio::test]
    async fn test_settings_roundtrip() {
        let capability = ServerSettingsRepoCapability::new(Repositories::in_memory());

        let save = codec::encode(&ServerSettingSaveRequest {
            server_id: 7,
            name: "autostart".into(),
            value: "1".into(),
        })
        .unwrap();
        capability.invoke("p", "save", &save).await.unwrap();

        let get = codec::encode(&ServerSettingGetRequest {
            server_id: 7,
            name: "autostart".into(),
        })
        .unwrap();
        let reply: ServerSettingGetResponse =
            codec::decode(&capability.invoke("p", "get", &get).await.unwrap()).unwrap();
        assert!(reply.found);
        assert_eq!(reply.value, "1");
    }

    #[tokio::test]
    async fn test_task_create_guarded() {
        let capability = DaemonTasksRepoCapability::new(Repositories::in_memory());
        let request = codec::encode(&CreateDaemonTaskRequest {
            node_id: 1,
            server_id: Some(7),
            kind: "gsstart".into(),
        })
        .unwrap();

        let reply: CreateDaemonTaskResponse =
            codec::decode(&capability.invoke("p", "create", &request).await.unwrap()).unwrap();
        assert!(reply.task_id > 0);

        // Second enqueue of the same kind is rejected while the first waits.
        assert!(capability.invoke("p", "create", &request).await.is_err());
    }
}
