//! Lifecycle events delivered to subscribed plugins.
//!
//! Pre-events fire before an operation commits and may cancel it; post-events
//! and the remaining kinds are informational.

pub mod dispatcher;

pub use dispatcher::{DispatchOutcome, EventDispatcher, SubscriptionRegistry};

use crate::domain::{DaemonTask, Server};
use crate::plugins::codec::EventEnvelope;

// ═══════════════════════════════════════════════════════════════════════════════
// Event kinds
// ═══════════════════════════════════════════════════════════════════════════════

/// Server lifecycle operations that emit pre/post event pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerAction {
    Start,
    Stop,
    Restart,
    Install,
    Update,
    Reinstall,
    Delete,
}

impl ServerAction {
    pub fn pre_event(&self) -> EventKind {
        match self {
            Self::Start => EventKind::ServerPreStart,
            Self::Stop => EventKind::ServerPreStop,
            Self::Restart => EventKind::ServerPreRestart,
            Self::Install => EventKind::ServerPreInstall,
            Self::Update => EventKind::ServerPreUpdate,
            Self::Reinstall => EventKind::ServerPreReinstall,
            Self::Delete => EventKind::ServerPreDelete,
        }
    }

    pub fn post_event(&self) -> EventKind {
        match self {
            Self::Start => EventKind::ServerPostStart,
            Self::Stop => EventKind::ServerPostStop,
            Self::Restart => EventKind::ServerPostRestart,
            Self::Install => EventKind::ServerPostInstall,
            Self::Update => EventKind::ServerPostUpdate,
            Self::Reinstall => EventKind::ServerPostReinstall,
            Self::Delete => EventKind::ServerPostDelete,
        }
    }
}

/// All event kinds plugins may subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ServerPreStart,
    ServerPostStart,
    ServerPreStop,
    ServerPostStop,
    ServerPreRestart,
    ServerPostRestart,
    ServerPreInstall,
    ServerPostInstall,
    ServerPreUpdate,
    ServerPostUpdate,
    ServerPreReinstall,
    ServerPostReinstall,
    ServerPreDelete,
    ServerPostDelete,
    ServerCreated,
    ServerUpdated,
    ServerDeleted,
    TaskCreated,
    TaskCompleted,
    TaskFailed,
}

impl EventKind {
    /// Wire tag used in guest subscriptions and event envelopes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServerPreStart => "server_pre_start",
            Self::ServerPostStart => "server_post_start",
            Self::ServerPreStop => "server_pre_stop",
            Self::ServerPostStop => "server_post_stop",
            Self::ServerPreRestart => "server_pre_restart",
            Self::ServerPostRestart => "server_post_restart",
            Self::ServerPreInstall => "server_pre_install",
            Self::ServerPostInstall => "server_post_install",
            Self::ServerPreUpdate => "server_pre_update",
            Self::ServerPostUpdate => "server_post_update",
            Self::ServerPreReinstall => "server_pre_reinstall",
            Self::ServerPostReinstall => "server_post_reinstall",
            Self::ServerPreDelete => "server_pre_delete",
            Self::ServerPostDelete => "server_post_delete",
            Self::ServerCreated => "server_created",
            Self::ServerUpdated => "server_updated",
            Self::ServerDeleted => "server_deleted",
            Self::TaskCreated => "daemon_task_created",
            Self::TaskCompleted => "daemon_task_completed",
            Self::TaskFailed => "daemon_task_failed",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "server_pre_start" => Some(Self::ServerPreStart),
            "server_post_start" => Some(Self::ServerPostStart),
            "server_pre_stop" => Some(Self::ServerPreStop),
            "server_post_stop" => Some(Self::ServerPostStop),
            "server_pre_restart" => Some(Self::ServerPreRestart),
            "server_post_restart" => Some(Self::ServerPostRestart),
            "server_pre_install" => Some(Self::ServerPreInstall),
            "server_post_install" => Some(Self::ServerPostInstall),
            "server_pre_update" => Some(Self::ServerPreUpdate),
            "server_post_update" => Some(Self::ServerPostUpdate),
            "server_pre_reinstall" => Some(Self::ServerPreReinstall),
            "server_post_reinstall" => Some(Self::ServerPostReinstall),
            "server_pre_delete" => Some(Self::ServerPreDelete),
            "server_post_delete" => Some(Self::ServerPostDelete),
            "server_created" => Some(Self::ServerCreated),
            "server_updated" => Some(Self::ServerUpdated),
            "server_deleted" => Some(Self::ServerDeleted),
            "daemon_task_created" => Some(Self::TaskCreated),
            "daemon_task_completed" => Some(Self::TaskCompleted),
            "daemon_task_failed" => Some(Self::TaskFailed),
            _ => None,
        }
    }

    /// Pre-events may cancel the operation they precede.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            Self::ServerPreStart
                | Self::ServerPreStop
                | Self::ServerPreRestart
                | Self::ServerPreInstall
                | Self::ServerPreUpdate
                | Self::ServerPreReinstall
                | Self::ServerPreDelete
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event payload
// ═══════════════════════════════════════════════════════════════════════════════

/// An event with its entity snapshots.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub server: Option<Server>,
    pub task: Option<DaemonTask>,
    pub metadata: Vec<(String, String)>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            server: None,
            task: None,
            metadata: Vec::new(),
        }
    }

    pub fn with_server(mut self, server: Server) -> Self {
        self.server = Some(server);
        self
    }

    pub fn with_task(mut self, task: DaemonTask) -> Self {
        self.task = Some(task);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// Serialize into the guest wire envelope.
    pub fn to_wire(&self) -> EventEnvelope {
        EventEnvelope {
            kind: self.kind.as_str().to_string(),
            server: self.server.clone(),
            task: self.task.clone(),
            metadata: self.metadata.clone(),
        }
    }
}
