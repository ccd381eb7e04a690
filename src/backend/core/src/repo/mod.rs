//! Repository contracts for the entities the control-plane core consumes.
//!
//! Persistence drivers are collaborators behind these traits: the Postgres
//! implementations in [`postgres`] back the running server, the in-memory
//! implementations in [`memory`] back tests and database-less development.
//!
//! The daemon-task contract owns the single-flight guarantee: `enqueue` and
//! `enqueue_chain` perform the "active task exists?" check and the insert
//! inside one transaction (or one lock acquisition for the in-memory store),
//! so concurrent callers surface the same `TaskConflict` error instead of
//! racing.

pub mod memory;
pub mod postgres;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{
    DaemonTask, Game, GameMod, NewDaemonTask, NewPluginCatalogueEntry, Node,
    PersonalAccessToken, PluginCatalogueEntry, PluginStatus, Server, ServerSetting, TaskKind,
    TaskStatus, User,
};
use crate::error::Result;

/// Column/value equality filter used by the find-by-filter operations.
///
/// Unknown keys are rejected by the individual repositories so plugins cannot
/// probe arbitrary columns.
pub type Filter = HashMap<String, String>;

// ═══════════════════════════════════════════════════════════════════════════════
// Entity repositories
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait ServerRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Server>>;
    async fn find(&self, filter: &Filter) -> Result<Vec<Server>>;
}

#[async_trait]
pub trait NodeRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Node>>;
    async fn find(&self, filter: &Filter) -> Result<Vec<Node>>;
}

#[async_trait]
pub trait GameRepository: Send + Sync {
    async fn get(&self, code: &str) -> Result<Option<Game>>;
    async fn find(&self, filter: &Filter) -> Result<Vec<Game>>;
}

#[async_trait]
pub trait GameModRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<GameMod>>;
    async fn find(&self, filter: &Filter) -> Result<Vec<GameMod>>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<User>>;
    async fn find(&self, filter: &Filter) -> Result<Vec<User>>;
}

#[async_trait]
pub trait AccessTokenRepository: Send + Sync {
    /// Look a token up by the hex-encoded SHA-256 of its raw value.
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<PersonalAccessToken>>;
}

#[async_trait]
pub trait ServerSettingRepository: Send + Sync {
    async fn get(&self, server_id: i64, name: &str) -> Result<Option<ServerSetting>>;
    async fn upsert(&self, server_id: i64, name: &str, value: &str) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Daemon task repository
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait DaemonTaskRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<DaemonTask>>;

    async fn find_by_server(&self, server_id: i64) -> Result<Vec<DaemonTask>>;

    /// Whether a waiting/working task of any of `kinds` exists for the server.
    async fn active_exists(&self, server_id: i64, kinds: &[TaskKind]) -> Result<bool>;

    /// Insert a waiting task unless a guarded task is already active.
    ///
    /// Returns `TaskConflict` when an active task of any kind in `guard`
    /// exists for the same server. The check and the insert are atomic.
    async fn enqueue(&self, task: NewDaemonTask, guard: &[TaskKind]) -> Result<i64>;

    /// Insert several waiting tasks atomically, chaining each task's
    /// `run_after` to its predecessor's id. The guard applies to the whole
    /// chain; a failure persists nothing.
    async fn enqueue_chain(&self, tasks: Vec<NewDaemonTask>, guard: &[TaskKind])
        -> Result<Vec<i64>>;

    async fn update_status(&self, id: i64, status: TaskStatus) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Plugin catalogue repository
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait PluginCatalogueRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<PluginCatalogueEntry>>;

    /// Look an entry up by its dotted plugin identifier.
    async fn find_by_plugin_id(&self, plugin_id: &str) -> Result<Option<PluginCatalogueEntry>>;

    async fn list_by_status(&self, status: PluginStatus) -> Result<Vec<PluginCatalogueEntry>>;

    async fn create(&self, entry: NewPluginCatalogueEntry) -> Result<PluginCatalogueEntry>;

    async fn set_status(&self, id: i64, status: PluginStatus) -> Result<()>;

    async fn touch_last_loaded(&self, id: i64) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Bundle
// ═══════════════════════════════════════════════════════════════════════════════

/// All repository handles the core wires into capabilities and services.
#[derive(Clone)]
pub struct Repositories {
    pub servers: Arc<dyn ServerRepository>,
    pub nodes: Arc<dyn NodeRepository>,
    pub games: Arc<dyn GameRepository>,
    pub game_mods: Arc<dyn GameModRepository>,
    pub users: Arc<dyn UserRepository>,
    pub access_tokens: Arc<dyn AccessTokenRepository>,
    pub server_settings: Arc<dyn ServerSettingRepository>,
    pub daemon_tasks: Arc<dyn DaemonTaskRepository>,
    pub plugin_catalogue: Arc<dyn PluginCatalogueRepository>,
}

impl Repositories {
    /// In-memory repositories for tests and database-less development.
    pub fn in_memory() -> Self {
        Self {
            servers: Arc::new(memory::MemoryServerRepository::default()),
            nodes: Arc::new(memory::MemoryNodeRepository::default()),
            games: Arc::new(memory::MemoryGameRepository::default()),
            game_mods: Arc::new(memory::MemoryGameModRepository::default()),
            users: Arc::new(memory::MemoryUserRepository::default()),
            access_tokens: Arc::new(memory::MemoryAccessTokenRepository::default()),
            server_settings: Arc::new(memory::MemoryServerSettingRepository::default()),
            daemon_tasks: Arc::new(memory::MemoryDaemonTaskRepository::default()),
            plugin_catalogue: Arc::new(memory::MemoryPluginCatalogueRepository::default()),
        }
    }

    /// Postgres-backed repositories sharing one connection pool.
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            servers: Arc::new(postgres::PgServerRepository::new(pool.clone())),
            nodes: Arc::new(postgres::PgNodeRepository::new(pool.clone())),
            games: Arc::new(postgres::PgGameRepository::new(pool.clone())),
            game_mods: Arc::new(postgres::PgGameModRepository::new(pool.clone())),
            users: Arc::new(postgres::PgUserRepository::new(pool.clone())),
            access_tokens: Arc::new(postgres::PgAccessTokenRepository::new(pool.clone())),
            server_settings: Arc::new(postgres::PgServerSettingRepository::new(pool.clone())),
            daemon_tasks: Arc::new(postgres::PgDaemonTaskRepository::new(pool.clone())),
            plugin_catalogue: Arc::new(postgres::PgPluginCatalogueRepository::new(pool)),
        }
    }
}
