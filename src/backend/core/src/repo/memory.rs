//! In-memory repository implementations.
//!
//! Used by the test suites and by database-less development runs. The daemon
//! task store performs the guard check and the insert under a single lock,
//! which is the in-memory equivalent of the transactional exists-then-insert
//! sequence the Postgres store uses.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::domain::{
    DaemonTask, Game, GameMod, NewDaemonTask, NewPluginCatalogueEntry, Node,
    PersonalAccessToken, PluginCatalogueEntry, PluginStatus, Server, ServerSetting, TaskKind,
    TaskStatus, User,
};
use crate::error::{GshubError, Result};

use super::{
    AccessTokenRepository, DaemonTaskRepository, Filter, GameModRepository, GameRepository,
    NodeRepository, PluginCatalogueRepository, ServerRepository, ServerSettingRepository,
    UserRepository,
};

fn filter_matches(fields: &[(&str, String)], filter: &Filter) -> bool {
    filter.iter().all(|(key, want)| {
        fields
            .iter()
            .any(|(name, have)| name == key && have == want)
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Servers
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MemoryServerRepository {
    servers: Mutex<Vec<Server>>,
}

impl MemoryServerRepository {
    pub fn insert(&self, server: Server) {
        self.servers.lock().push(server);
    }
}

#[async_trait]
impl ServerRepository for MemoryServerRepository {
    async fn get(&self, id: i64) -> Result<Option<Server>> {
        Ok(self.servers.lock().iter().find(|s| s.id == id).cloned())
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Server>> {
        Ok(self
            .servers
            .lock()
            .iter()
            .filter(|s| {
                filter_matches(
                    &[
                        ("node_id", s.node_id.to_string()),
                        ("game_code", s.game_code.clone()),
                        ("enabled", s.enabled.to_string()),
                        ("installed", s.installed.to_string()),
                    ],
                    filter,
                )
            })
            .cloned()
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Nodes
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MemoryNodeRepository {
    nodes: Mutex<Vec<Node>>,
}

impl MemoryNodeRepository {
    pub fn insert(&self, node: Node) {
        self.nodes.lock().push(node);
    }
}

#[async_trait]
impl NodeRepository for MemoryNodeRepository {
    async fn get(&self, id: i64) -> Result<Option<Node>> {
        Ok(self.nodes.lock().iter().find(|n| n.id == id).cloned())
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Node>> {
        Ok(self
            .nodes
            .lock()
            .iter()
            .filter(|n| filter_matches(&[("os", n.os.clone()), ("name", n.name.clone())], filter))
            .cloned()
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Games / game mods
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MemoryGameRepository {
    games: Mutex<Vec<Game>>,
}

impl MemoryGameRepository {
    pub fn insert(&self, game: Game) {
        self.games.lock().push(game);
    }
}

#[async_trait]
impl GameRepository for MemoryGameRepository {
    async fn get(&self, code: &str) -> Result<Option<Game>> {
        Ok(self.games.lock().iter().find(|g| g.code == code).cloned())
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Game>> {
        Ok(self
            .games
            .lock()
            .iter()
            .filter(|g| filter_matches(&[("engine", g.engine.clone())], filter))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryGameModRepository {
    mods: Mutex<Vec<GameMod>>,
}

impl MemoryGameModRepository {
    pub fn insert(&self, game_mod: GameMod) {
        self.mods.lock().push(game_mod);
    }
}

#[async_trait]
impl GameModRepository for MemoryGameModRepository {
    async fn get(&self, id: i64) -> Result<Option<GameMod>> {
        Ok(self.mods.lock().iter().find(|m| m.id == id).cloned())
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<GameMod>> {
        Ok(self
            .mods
            .lock()
            .iter()
            .filter(|m| filter_matches(&[("game_code", m.game_code.clone())], filter))
            .cloned()
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Users / tokens
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MemoryUserRepository {
    users: Mutex<Vec<User>>,
}

impl MemoryUserRepository {
    pub fn insert(&self, user: User) {
        self.users.lock().push(user);
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn get(&self, id: i64) -> Result<Option<User>> {
        Ok(self.users.lock().iter().find(|u| u.id == id).cloned())
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<User>> {
        Ok(self
            .users
            .lock()
            .iter()
            .filter(|u| {
                filter_matches(
                    &[
                        ("login", u.login.clone()),
                        ("email", u.email.clone()),
                        ("admin", u.admin.to_string()),
                    ],
                    filter,
                )
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryAccessTokenRepository {
    tokens: Mutex<Vec<PersonalAccessToken>>,
}

impl MemoryAccessTokenRepository {
    pub fn insert(&self, token: PersonalAccessToken) {
        self.tokens.lock().push(token);
    }
}

#[async_trait]
impl AccessTokenRepository for MemoryAccessTokenRepository {
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<PersonalAccessToken>> {
        Ok(self
            .tokens
            .lock()
            .iter()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Server settings
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MemoryServerSettingRepository {
    settings: Mutex<HashMap<(i64, String), String>>,
}

#[async_trait]
impl ServerSettingRepository for MemoryServerSettingRepository {
    async fn get(&self, server_id: i64, name: &str) -> Result<Option<ServerSetting>> {
        Ok(self
            .settings
            .lock()
            .get(&(server_id, name.to_string()))
            .map(|value| ServerSetting {
                server_id,
                name: name.to_string(),
                value: value.clone(),
            }))
    }

    async fn upsert(&self, server_id: i64, name: &str, value: &str) -> Result<()> {
        self.settings
            .lock()
            .insert((server_id, name.to_string()), value.to_string());
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Daemon tasks
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct TaskStore {
    tasks: Vec<DaemonTask>,
    next_id: i64,
}

impl TaskStore {
    fn active_exists(&self, server_id: i64, kinds: &[TaskKind]) -> bool {
        self.tasks.iter().any(|t| {
            t.server_id == Some(server_id) && t.status.is_active() && kinds.contains(&t.kind)
        })
    }

    fn push(&mut self, new: NewDaemonTask) -> i64 {
        self.next_id += 1;
        let now = Utc::now();
        self.tasks.push(DaemonTask {
            id: self.next_id,
            run_after: new.run_after,
            node_id: new.node_id,
            server_id: new.server_id,
            kind: new.kind,
            status: TaskStatus::Waiting,
            created_at: now,
            updated_at: now,
        });
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryDaemonTaskRepository {
    store: Mutex<TaskStore>,
}

#[async_trait]
impl DaemonTaskRepository for MemoryDaemonTaskRepository {
    async fn get(&self, id: i64) -> Result<Option<DaemonTask>> {
        Ok(self.store.lock().tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn find_by_server(&self, server_id: i64) -> Result<Vec<DaemonTask>> {
        Ok(self
            .store
            .lock()
            .tasks
            .iter()
            .filter(|t| t.server_id == Some(server_id))
            .cloned()
            .collect())
    }

    async fn active_exists(&self, server_id: i64, kinds: &[TaskKind]) -> Result<bool> {
        Ok(self.store.lock().active_exists(server_id, kinds))
    }

    async fn enqueue(&self, task: NewDaemonTask, guard: &[TaskKind]) -> Result<i64> {
        let mut store = self.store.lock();
        if let Some(server_id) = task.server_id {
            if store.active_exists(server_id, guard) {
                return Err(GshubError::task_conflict(server_id, task.kind.as_str()));
            }
        }
        Ok(store.push(task))
    }

    async fn enqueue_chain(
        &self,
        tasks: Vec<NewDaemonTask>,
        guard: &[TaskKind],
    ) -> Result<Vec<i64>> {
        let mut store = self.store.lock();
        if let Some(server_id) = tasks.first().and_then(|t| t.server_id) {
            if store.active_exists(server_id, guard) {
                let kind = tasks[0].kind.as_str();
                return Err(GshubError::task_conflict(server_id, kind));
            }
        }

        let mut ids = Vec::with_capacity(tasks.len());
        let mut previous: Option<i64> = None;
        for mut task in tasks {
            task.run_after = previous;
            let id = store.push(task);
            previous = Some(id);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn update_status(&self, id: i64, status: TaskStatus) -> Result<()> {
        let mut store = self.store.lock();
        let task = store
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| GshubError::not_found("task", id.to_string()))?;
        task.status = status;
        task.updated_at = Utc::now();
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Plugin catalogue
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct CatalogueStore {
    entries: Vec<PluginCatalogueEntry>,
    next_id: i64,
}

#[derive(Default)]
pub struct MemoryPluginCatalogueRepository {
    store: Mutex<CatalogueStore>,
}

#[async_trait]
impl PluginCatalogueRepository for MemoryPluginCatalogueRepository {
    async fn get(&self, id: i64) -> Result<Option<PluginCatalogueEntry>> {
        Ok(self
            .store
            .lock()
            .entries
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn find_by_plugin_id(&self, plugin_id: &str) -> Result<Option<PluginCatalogueEntry>> {
        Ok(self
            .store
            .lock()
            .entries
            .iter()
            .find(|e| e.plugin_id == plugin_id)
            .cloned())
    }

    async fn list_by_status(&self, status: PluginStatus) -> Result<Vec<PluginCatalogueEntry>> {
        Ok(self
            .store
            .lock()
            .entries
            .iter()
            .filter(|e| e.status == status)
            .cloned()
            .collect())
    }

    async fn create(&self, entry: NewPluginCatalogueEntry) -> Result<PluginCatalogueEntry> {
        let mut store = self.store.lock();
        if store.entries.iter().any(|e| e.plugin_id == entry.plugin_id) {
            return Err(GshubError::new(
                crate::error::ErrorCode::DuplicateRecord,
                format!("Catalogue entry already exists: {}", entry.plugin_id),
            ));
        }
        store.next_id += 1;
        let created = PluginCatalogueEntry {
            id: store.next_id,
            plugin_id: entry.plugin_id,
            name: entry.name,
            version: entry.version,
            description: entry.description,
            author: entry.author,
            api_version: entry.api_version,
            filename: entry.filename,
            status: entry.status,
            installed_at: Utc::now(),
            last_loaded_at: None,
        };
        store.entries.push(created.clone());
        Ok(created)
    }

    async fn set_status(&self, id: i64, status: PluginStatus) -> Result<()> {
        let mut store = self.store.lock();
        let entry = store
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| GshubError::not_found("plugin catalogue entry", id.to_string()))?;
        entry.status = status;
        Ok(())
    }

    async fn touch_last_loaded(&self, id: i64) -> Result<()> {
        let mut store = self.store.lock();
        let entry = store
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| GshubError::not_found("plugin catalogue entry", id.to_string()))?;
        entry.last_loaded_at = Some(Utc::now());
        Ok(())
    }
}
