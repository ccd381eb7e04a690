//! Postgres repository implementations.
//!
//! Uses PostgreSQL for persistent storage with sqlx. Filters accept a fixed
//! set of columns per repository; unknown filter keys fail with a validation
//! error instead of being interpolated into SQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    DaemonTask, Game, GameMod, NewDaemonTask, NewPluginCatalogueEntry, Node,
    PersonalAccessToken, PluginCatalogueEntry, PluginStatus, Server, ServerSetting, TaskKind,
    TaskStatus, User,
};
use crate::error::{ErrorCode, GshubError, Result};

use super::{
    AccessTokenRepository, DaemonTaskRepository, Filter, GameModRepository, GameRepository,
    NodeRepository, PluginCatalogueRepository, ServerRepository, ServerSettingRepository,
    UserRepository,
};

/// Build a `WHERE` clause from a filter, allowing only the listed columns.
///
/// All values are bound as text and compared with a cast, which keeps the
/// query shape static for every filter combination.
fn build_where(filter: &Filter, allowed: &[&str]) -> Result<(String, Vec<String>)> {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();

    for (key, value) in filter {
        if !allowed.contains(&key.as_str()) {
            return Err(GshubError::new(
                ErrorCode::ValidationError,
                format!("Unknown filter field: {}", key),
            ));
        }
        binds.push(value.clone());
        clauses.push(format!("{}::text = ${}", key, binds.len()));
    }

    let clause = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    Ok((clause, binds))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Servers
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct ServerRow {
    id: i64,
    uuid: Uuid,
    name: String,
    node_id: i64,
    game_code: String,
    game_mod_id: Option<i64>,
    start_command: Option<String>,
    enabled: bool,
    installed: bool,
}

impl From<ServerRow> for Server {
    fn from(row: ServerRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            name: row.name,
            node_id: row.node_id,
            game_code: row.game_code,
            game_mod_id: row.game_mod_id,
            start_command: row.start_command,
            enabled: row.enabled,
            installed: row.installed,
        }
    }
}

const SERVER_COLUMNS: &str =
    "id, uuid, name, node_id, game_code, game_mod_id, start_command, enabled, installed";

pub struct PgServerRepository {
    pool: PgPool,
}

impl PgServerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServerRepository for PgServerRepository {
    async fn get(&self, id: i64) -> Result<Option<Server>> {
        let row = sqlx::query_as::<_, ServerRow>(&format!(
            "SELECT {} FROM servers WHERE id = $1",
            SERVER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Server::from))
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Server>> {
        let (clause, binds) =
            build_where(filter, &["node_id", "game_code", "enabled", "installed"])?;
        let sql = format!("SELECT {} FROM servers{} ORDER BY id", SERVER_COLUMNS, clause);
        let mut query = sqlx::query_as::<_, ServerRow>(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Server::from).collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Nodes
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct NodeRow {
    id: i64,
    name: String,
    host: String,
    port: i32,
    daemon_token: String,
    os: String,
}

impl From<NodeRow> for Node {
    fn from(row: NodeRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            host: row.host,
            port: row.port as u16,
            daemon_token: row.daemon_token,
            os: row.os,
        }
    }
}

pub struct PgNodeRepository {
    pool: PgPool,
}

impl PgNodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NodeRepository for PgNodeRepository {
    async fn get(&self, id: i64) -> Result<Option<Node>> {
        let row = sqlx::query_as::<_, NodeRow>(
            "SELECT id, name, host, port, daemon_token, os FROM nodes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Node::from))
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Node>> {
        let (clause, binds) = build_where(filter, &["os", "name"])?;
        let sql = format!(
            "SELECT id, name, host, port, daemon_token, os FROM nodes{} ORDER BY id",
            clause
        );
        let mut query = sqlx::query_as::<_, NodeRow>(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Node::from).collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Games / game mods
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct GameRow {
    code: String,
    name: String,
    engine: String,
    steam_app_id: Option<i64>,
}

impl From<GameRow> for Game {
    fn from(row: GameRow) -> Self {
        Self {
            code: row.code,
            name: row.name,
            engine: row.engine,
            steam_app_id: row.steam_app_id,
        }
    }
}

pub struct PgGameRepository {
    pool: PgPool,
}

impl PgGameRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GameRepository for PgGameRepository {
    async fn get(&self, code: &str) -> Result<Option<Game>> {
        let row = sqlx::query_as::<_, GameRow>(
            "SELECT code, name, engine, steam_app_id FROM games WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Game::from))
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Game>> {
        let (clause, binds) = build_where(filter, &["engine"])?;
        let sql = format!(
            "SELECT code, name, engine, steam_app_id FROM games{} ORDER BY code",
            clause
        );
        let mut query = sqlx::query_as::<_, GameRow>(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Game::from).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct GameModRow {
    id: i64,
    game_code: String,
    name: String,
}

pub struct PgGameModRepository {
    pool: PgPool,
}

impl PgGameModRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GameModRepository for PgGameModRepository {
    async fn get(&self, id: i64) -> Result<Option<GameMod>> {
        let row = sqlx::query_as::<_, GameModRow>(
            "SELECT id, game_code, name FROM game_mods WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| GameMod {
            id: r.id,
            game_code: r.game_code,
            name: r.name,
        }))
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<GameMod>> {
        let (clause, binds) = build_where(filter, &["game_code"])?;
        let sql = format!("SELECT id, game_code, name FROM game_mods{} ORDER BY id", clause);
        let mut query = sqlx::query_as::<_, GameModRow>(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|r| GameMod {
                id: r.id,
                game_code: r.game_code,
                name: r.name,
            })
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Users / tokens
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    login: String,
    email: String,
    name: Option<String>,
    admin: bool,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            login: row.login,
            email: row.email,
            name: row.name,
            admin: row.admin,
        }
    }
}

pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn get(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, login, email, name, admin FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<User>> {
        let (clause, binds) = build_where(filter, &["login", "email", "admin"])?;
        let sql = format!(
            "SELECT id, login, email, name, admin FROM users{} ORDER BY id",
            clause
        );
        let mut query = sqlx::query_as::<_, UserRow>(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(User::from).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AccessTokenRow {
    id: i64,
    user_id: i64,
    token_hash: String,
    abilities: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

pub struct PgAccessTokenRepository {
    pool: PgPool,
}

impl PgAccessTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccessTokenRepository for PgAccessTokenRepository {
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<PersonalAccessToken>> {
        let row = sqlx::query_as::<_, AccessTokenRow>(
            r#"
            SELECT id, user_id, token_hash, abilities, created_at, updated_at, expires_at
            FROM personal_access_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| PersonalAccessToken {
            id: r.id,
            user_id: r.user_id,
            token_hash: r.token_hash,
            abilities: r.abilities,
            created_at: r.created_at,
            updated_at: r.updated_at,
            expires_at: r.expires_at,
        }))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Server settings
// ═══════════════════════════════════════════════════════════════════════════════

pub struct PgServerSettingRepository {
    pool: PgPool,
}

impl PgServerSettingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServerSettingRepository for PgServerSettingRepository {
    async fn get(&self, server_id: i64, name: &str) -> Result<Option<ServerSetting>> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT value FROM server_settings WHERE server_id = $1 AND name = $2",
        )
        .bind(server_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value.map(|value| ServerSetting {
            server_id,
            name: name.to_string(),
            value,
        }))
    }

    async fn upsert(&self, server_id: i64, name: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO server_settings (server_id, name, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (server_id, name) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(server_id)
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Daemon tasks
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct DaemonTaskRow {
    id: i64,
    run_after: Option<i64>,
    node_id: i64,
    server_id: Option<i64>,
    kind: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DaemonTaskRow> for DaemonTask {
    type Error = GshubError;

    fn try_from(row: DaemonTaskRow) -> Result<Self> {
        let kind = TaskKind::from_str(&row.kind).ok_or_else(|| {
            GshubError::with_internal(
                ErrorCode::DatabaseError,
                "Unknown task kind in storage",
                format!("task {} kind {}", row.id, row.kind),
            )
        })?;
        let status = TaskStatus::from_str(&row.status).ok_or_else(|| {
            GshubError::with_internal(
                ErrorCode::DatabaseError,
                "Unknown task status in storage",
                format!("task {} status {}", row.id, row.status),
            )
        })?;
        Ok(Self {
            id: row.id,
            run_after: row.run_after,
            node_id: row.node_id,
            server_id: row.server_id,
            kind,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const TASK_COLUMNS: &str = "id, run_after, node_id, server_id, kind, status, created_at, updated_at";

pub struct PgDaemonTaskRepository {
    pool: PgPool,
}

impl PgDaemonTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn kind_tags(kinds: &[TaskKind]) -> Vec<String> {
        kinds.iter().map(|k| k.as_str().to_string()).collect()
    }
}

#[async_trait]
impl DaemonTaskRepository for PgDaemonTaskRepository {
    async fn get(&self, id: i64) -> Result<Option<DaemonTask>> {
        let row = sqlx::query_as::<_, DaemonTaskRow>(&format!(
            "SELECT {} FROM daemon_tasks WHERE id = $1",
            TASK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DaemonTask::try_from).transpose()
    }

    async fn find_by_server(&self, server_id: i64) -> Result<Vec<DaemonTask>> {
        let rows = sqlx::query_as::<_, DaemonTaskRow>(&format!(
            "SELECT {} FROM daemon_tasks WHERE server_id = $1 ORDER BY id",
            TASK_COLUMNS
        ))
        .bind(server_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DaemonTask::try_from).collect()
    }

    async fn active_exists(&self, server_id: i64, kinds: &[TaskKind]) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM daemon_tasks
                WHERE server_id = $1
                  AND status IN ('waiting', 'working')
                  AND kind = ANY($2)
            )
            "#,
        )
        .bind(server_id)
        .bind(Self::kind_tags(kinds))
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn enqueue(&self, task: NewDaemonTask, guard: &[TaskKind]) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        if let Some(server_id) = task.server_id {
            // The locked read serializes concurrent exists-then-insert sequences.
            let active: Option<i64> = sqlx::query_scalar(
                r#"
                SELECT id FROM daemon_tasks
                WHERE server_id = $1
                  AND status IN ('waiting', 'working')
                  AND kind = ANY($2)
                LIMIT 1
                FOR UPDATE
                "#,
            )
            .bind(server_id)
            .bind(Self::kind_tags(guard))
            .fetch_optional(&mut *tx)
            .await?;

            if active.is_some() {
                return Err(GshubError::task_conflict(server_id, task.kind.as_str()));
            }
        }

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO daemon_tasks (run_after, node_id, server_id, kind, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'waiting', NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(task.run_after)
        .bind(task.node_id)
        .bind(task.server_id)
        .bind(task.kind.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn enqueue_chain(
        &self,
        tasks: Vec<NewDaemonTask>,
        guard: &[TaskKind],
    ) -> Result<Vec<i64>> {
        let mut tx = self.pool.begin().await?;

        if let Some(server_id) = tasks.first().and_then(|t| t.server_id) {
            let active: Option<i64> = sqlx::query_scalar(
                r#"
                SELECT id FROM daemon_tasks
                WHERE server_id = $1
                  AND status IN ('waiting', 'working')
                  AND kind = ANY($2)
                LIMIT 1
                FOR UPDATE
                "#,
            )
            .bind(server_id)
            .bind(Self::kind_tags(guard))
            .fetch_optional(&mut *tx)
            .await?;

            if active.is_some() {
                let kind = tasks[0].kind.as_str();
                return Err(GshubError::task_conflict(server_id, kind));
            }
        }

        let mut ids = Vec::with_capacity(tasks.len());
        let mut previous: Option<i64> = None;
        for task in tasks {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO daemon_tasks (run_after, node_id, server_id, kind, status, created_at, updated_at)
                VALUES ($1, $2, $3, $4, 'waiting', NOW(), NOW())
                RETURNING id
                "#,
            )
            .bind(previous)
            .bind(task.node_id)
            .bind(task.server_id)
            .bind(task.kind.as_str())
            .fetch_one(&mut *tx)
            .await?;

            previous = Some(id);
            ids.push(id);
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn update_status(&self, id: i64, status: TaskStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE daemon_tasks SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GshubError::not_found("task", id.to_string()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Plugin catalogue
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct PluginCatalogueRow {
    id: i64,
    plugin_id: String,
    name: String,
    version: String,
    description: String,
    author: String,
    api_version: String,
    filename: Option<String>,
    status: String,
    installed_at: DateTime<Utc>,
    last_loaded_at: Option<DateTime<Utc>>,
}

impl TryFrom<PluginCatalogueRow> for PluginCatalogueEntry {
    type Error = GshubError;

    fn try_from(row: PluginCatalogueRow) -> Result<Self> {
        let status = PluginStatus::from_str(&row.status).ok_or_else(|| {
            GshubError::with_internal(
                ErrorCode::DatabaseError,
                "Unknown plugin status in storage",
                format!("plugin {} status {}", row.id, row.status),
            )
        })?;
        Ok(Self {
            id: row.id,
            plugin_id: row.plugin_id,
            name: row.name,
            version: row.version,
            description: row.description,
            author: row.author,
            api_version: row.api_version,
            filename: row.filename,
            status,
            installed_at: row.installed_at,
            last_loaded_at: row.last_loaded_at,
        })
    }
}

const PLUGIN_COLUMNS: &str = "id, plugin_id, name, version, description, author, api_version, \
                              filename, status, installed_at, last_loaded_at";

pub struct PgPluginCatalogueRepository {
    pool: PgPool,
}

impl PgPluginCatalogueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PluginCatalogueRepository for PgPluginCatalogueRepository {
    async fn get(&self, id: i64) -> Result<Option<PluginCatalogueEntry>> {
        let row = sqlx::query_as::<_, PluginCatalogueRow>(&format!(
            "SELECT {} FROM plugins WHERE id = $1",
            PLUGIN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PluginCatalogueEntry::try_from).transpose()
    }

    async fn find_by_plugin_id(&self, plugin_id: &str) -> Result<Option<PluginCatalogueEntry>> {
        let row = sqlx::query_as::<_, PluginCatalogueRow>(&format!(
            "SELECT {} FROM plugins WHERE plugin_id = $1",
            PLUGIN_COLUMNS
        ))
        .bind(plugin_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PluginCatalogueEntry::try_from).transpose()
    }

    async fn list_by_status(&self, status: PluginStatus) -> Result<Vec<PluginCatalogueEntry>> {
        let rows = sqlx::query_as::<_, PluginCatalogueRow>(&format!(
            "SELECT {} FROM plugins WHERE status = $1 ORDER BY id",
            PLUGIN_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PluginCatalogueEntry::try_from).collect()
    }

    async fn create(&self, entry: NewPluginCatalogueEntry) -> Result<PluginCatalogueEntry> {
        let row = sqlx::query_as::<_, PluginCatalogueRow>(&format!(
            r#"
            INSERT INTO plugins (plugin_id, name, version, description, author, api_version,
                                 filename, status, installed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            RETURNING {}
            "#,
            PLUGIN_COLUMNS
        ))
        .bind(&entry.plugin_id)
        .bind(&entry.name)
        .bind(&entry.version)
        .bind(&entry.description)
        .bind(&entry.author)
        .bind(&entry.api_version)
        .bind(&entry.filename)
        .bind(entry.status.as_str())
        .fetch_one(&self.pool)
        .await?;

        PluginCatalogueEntry::try_from(row)
    }

    async fn set_status(&self, id: i64, status: PluginStatus) -> Result<()> {
        let result = sqlx::query("UPDATE plugins SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(GshubError::not_found("plugin catalogue entry", id.to_string()));
        }
        Ok(())
    }

    async fn touch_last_loaded(&self, id: i64) -> Result<()> {
        let result = sqlx::query("UPDATE plugins SET last_loaded_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(GshubError::not_found("plugin catalogue entry", id.to_string()));
        }
        Ok(())
    }
}
