//! Domain entities consumed by the control-plane core.
//!
//! Only the attributes the core itself reads are modelled; the full CRUD
//! surfaces for these entities live behind the repository contracts in
//! [`crate::repo`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// Game servers and nodes
// ═══════════════════════════════════════════════════════════════════════════════

/// A managed game server instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: i64,
    pub uuid: uuid::Uuid,
    pub name: String,
    /// Dedicated server (node) the instance lives on.
    pub node_id: i64,
    pub game_code: String,
    pub game_mod_id: Option<i64>,
    /// Command used to boot the game process; empty means not configured.
    pub start_command: Option<String>,
    pub enabled: bool,
    pub installed: bool,
}

impl Server {
    /// Whether the server has a usable start command.
    pub fn has_start_command(&self) -> bool {
        self.start_command
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }
}

/// A dedicated server (node) running the gshub daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Bearer token for the daemon API.
    pub daemon_token: String,
    /// Operating system tag, e.g. "linux" or "windows".
    pub os: String,
}

/// A supported game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub code: String,
    pub name: String,
    pub engine: String,
    pub steam_app_id: Option<i64>,
}

/// A game modification / flavour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameMod {
    pub id: i64,
    pub game_code: String,
    pub name: String,
}

/// A per-server key/value setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSetting {
    pub server_id: i64,
    pub name: String,
    pub value: String,
}

impl ServerSetting {
    /// Interpret the value as a boolean flag.
    pub fn as_bool(&self) -> bool {
        matches!(self.value.as_str(), "1" | "true" | "yes" | "on")
    }
}

/// Name of the declarative autostart preference.
pub const SETTING_AUTOSTART: &str = "autostart";
/// Name of the flag recording the most recent run intent.
pub const SETTING_AUTOSTART_CURRENT: &str = "autostart_current";

// ═══════════════════════════════════════════════════════════════════════════════
// Users and tokens
// ═══════════════════════════════════════════════════════════════════════════════

/// A panel user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub login: String,
    pub email: String,
    pub name: Option<String>,
    pub admin: bool,
}

/// A personal access token issued to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalAccessToken {
    pub id: i64,
    pub user_id: i64,
    /// SHA-256 of the raw token, hex-encoded.
    pub token_hash: String,
    pub abilities: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PersonalAccessToken {
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| at < Utc::now()).unwrap_or(false)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Daemon tasks
// ═══════════════════════════════════════════════════════════════════════════════

/// Kind of work a daemon task asks a node to perform.
///
/// The string tags are the wire contract with the daemons and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    GameServerStart,
    GameServerStop,
    GameServerRestart,
    GameServerUpdate,
    GameServerInstall,
    GameServerDelete,
    GameServerMove,
    CommandExec,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GameServerStart => "gsstart",
            Self::GameServerStop => "gsstop",
            Self::GameServerRestart => "gsrest",
            Self::GameServerUpdate => "gsupd",
            Self::GameServerInstall => "gsinst",
            Self::GameServerDelete => "gsdel",
            Self::GameServerMove => "gsmove",
            Self::CommandExec => "cmdexec",
        }
    }

    pub fn from_str(tag: &str) -> Option<Self> {
        match tag {
            "gsstart" => Some(Self::GameServerStart),
            "gsstop" => Some(Self::GameServerStop),
            "gsrest" => Some(Self::GameServerRestart),
            "gsupd" => Some(Self::GameServerUpdate),
            "gsinst" => Some(Self::GameServerInstall),
            "gsdel" => Some(Self::GameServerDelete),
            "gsmove" => Some(Self::GameServerMove),
            "cmdexec" => Some(Self::CommandExec),
            _ => None,
        }
    }

    /// Kinds protected by the server-control single-flight guard.
    pub const GUARDED: [TaskKind; 6] = [
        Self::GameServerStart,
        Self::GameServerStop,
        Self::GameServerRestart,
        Self::GameServerUpdate,
        Self::GameServerInstall,
        Self::GameServerDelete,
    ];
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a daemon task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Waiting,
    Working,
    Success,
    Error,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Working => "working",
            Self::Success => "success",
            Self::Error => "error",
            Self::Canceled => "canceled",
        }
    }

    pub fn from_str(tag: &str) -> Option<Self> {
        match tag {
            "waiting" => Some(Self::Waiting),
            "working" => Some(Self::Working),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// A task counts against the single-flight guard while waiting or working.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Waiting | Self::Working)
    }
}

/// The unit of work consumed asynchronously by node daemons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonTask {
    pub id: i64,
    /// Predecessor that must terminate successfully before this task may start.
    pub run_after: Option<i64>,
    pub node_id: i64,
    pub server_id: Option<i64>,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A daemon task about to be persisted.
#[derive(Debug, Clone)]
pub struct NewDaemonTask {
    pub node_id: i64,
    pub server_id: Option<i64>,
    pub kind: TaskKind,
    pub run_after: Option<i64>,
}

impl NewDaemonTask {
    pub fn for_server(server: &Server, kind: TaskKind) -> Self {
        Self {
            node_id: server.node_id,
            server_id: Some(server.id),
            kind,
            run_after: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Plugin catalogue
// ═══════════════════════════════════════════════════════════════════════════════

/// Persisted status of a catalogue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Active,
    Inactive,
    Broken,
}

impl PluginStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Broken => "broken",
        }
    }

    pub fn from_str(tag: &str) -> Option<Self> {
        match tag {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "broken" => Some(Self::Broken),
            _ => None,
        }
    }
}

/// The persisted record of an installed plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginCatalogueEntry {
    pub id: i64,
    /// Dotted plugin identifier as declared by the artifact.
    pub plugin_id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub api_version: String,
    /// Artifact filename inside the plugins directory; `<compact id>.wasm` when absent.
    pub filename: Option<String>,
    pub status: PluginStatus,
    pub installed_at: DateTime<Utc>,
    pub last_loaded_at: Option<DateTime<Utc>>,
}

/// A catalogue entry about to be persisted.
#[derive(Debug, Clone)]
pub struct NewPluginCatalogueEntry {
    pub plugin_id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub api_version: String,
    pub filename: Option<String>,
    pub status: PluginStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_kind_tags_roundtrip() {
        for kind in [
            TaskKind::GameServerStart,
            TaskKind::GameServerStop,
            TaskKind::GameServerRestart,
            TaskKind::GameServerUpdate,
            TaskKind::GameServerInstall,
            TaskKind::GameServerDelete,
            TaskKind::GameServerMove,
            TaskKind::CommandExec,
        ] {
            assert_eq!(TaskKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(TaskKind::from_str("nope"), None);
    }

    #[test]
    fn test_task_status_active() {
        assert!(TaskStatus::Waiting.is_active());
        assert!(TaskStatus::Working.is_active());
        assert!(!TaskStatus::Success.is_active());
        assert!(!TaskStatus::Error.is_active());
        assert!(!TaskStatus::Canceled.is_active());
    }

    #[test]
    fn test_server_start_command() {
        let mut server = Server {
            id: 1,
            uuid: uuid::Uuid::new_v4(),
            name: "cs".into(),
            node_id: 1,
            game_code: "cstrike".into(),
            game_mod_id: None,
            start_command: Some("./hlds_run -game cstrike".into()),
            enabled: true,
            installed: true,
        };
        assert!(server.has_start_command());

        server.start_command = Some("   ".into());
        assert!(!server.has_start_command());

        server.start_command = None;
        assert!(!server.has_start_command());
    }

    #[test]
    fn test_setting_as_bool() {
        let mut setting = ServerSetting {
            server_id: 1,
            name: SETTING_AUTOSTART.into(),
            value: "1".into(),
        };
        assert!(setting.as_bool());
        setting.value = "false".into();
        assert!(!setting.as_bool());
    }
}
