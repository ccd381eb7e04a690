//! Server control task engine.
//!
//! Produces lifecycle daemon tasks consumed asynchronously by node daemons.
//! Each operation dispatches its pre-event first (a subscriber may cancel),
//! validates, couples the autostart settings, enqueues under the
//! single-flight guard and finally dispatches the informational post-event.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::domain::{
    NewDaemonTask, Server, TaskKind, SETTING_AUTOSTART, SETTING_AUTOSTART_CURRENT,
};
use crate::error::{ErrorCode, GshubError, Result};
use crate::events::{DispatchOutcome, Event, EventDispatcher, EventKind, ServerAction};
use crate::repo::Repositories;

pub struct ServerControlService {
    repos: Repositories,
    dispatcher: Arc<EventDispatcher>,
}

impl ServerControlService {
    pub fn new(repos: Repositories, dispatcher: Arc<EventDispatcher>) -> Self {
        Self { repos, dispatcher }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Enqueue a start task.
    ///
    /// Requires a start command; with the declarative `autostart` setting on,
    /// the `autostart_current` intent is raised alongside.
    #[instrument(skip(self))]
    pub async fn start(&self, server_id: i64) -> Result<i64> {
        let server = self.server(server_id).await?;
        self.dispatch_pre(ServerAction::Start, &server).await?;

        self.require_start_command(&server)?;
        self.raise_autostart_current(&server).await?;

        let task_id = self
            .enqueue(&server, TaskKind::GameServerStart, &[TaskKind::GameServerStart])
            .await?;
        self.dispatch_post(ServerAction::Start, &server, task_id).await;
        Ok(task_id)
    }

    /// Enqueue a stop task. The run intent is lowered unconditionally.
    #[instrument(skip(self))]
    pub async fn stop(&self, server_id: i64) -> Result<i64> {
        let server = self.server(server_id).await?;
        self.dispatch_pre(ServerAction::Stop, &server).await?;

        self.repos
            .server_settings
            .upsert(server.id, SETTING_AUTOSTART_CURRENT, "0")
            .await?;

        let task_id = self
            .enqueue(&server, TaskKind::GameServerStop, &[TaskKind::GameServerStop])
            .await?;
        self.dispatch_post(ServerAction::Stop, &server, task_id).await;
        Ok(task_id)
    }

    /// Enqueue a restart task; mirrors the start validation and autostart
    /// coupling.
    #[instrument(skip(self))]
    pub async fn restart(&self, server_id: i64) -> Result<i64> {
        let server = self.server(server_id).await?;
        self.dispatch_pre(ServerAction::Restart, &server).await?;

        self.require_start_command(&server)?;
        self.raise_autostart_current(&server).await?;

        let task_id = self
            .enqueue(
                &server,
                TaskKind::GameServerRestart,
                &[TaskKind::GameServerRestart],
            )
            .await?;
        self.dispatch_post(ServerAction::Restart, &server, task_id).await;
        Ok(task_id)
    }

    /// Enqueue an update task. Update and install guard each other.
    #[instrument(skip(self))]
    pub async fn update(&self, server_id: i64) -> Result<i64> {
        let server = self.server(server_id).await?;
        self.dispatch_pre(ServerAction::Update, &server).await?;

        let task_id = self
            .enqueue(
                &server,
                TaskKind::GameServerUpdate,
                &[TaskKind::GameServerUpdate, TaskKind::GameServerInstall],
            )
            .await?;
        self.dispatch_post(ServerAction::Update, &server, task_id).await;
        Ok(task_id)
    }

    /// Enqueue an install task. Update and install guard each other.
    #[instrument(skip(self))]
    pub async fn install(&self, server_id: i64) -> Result<i64> {
        let server = self.server(server_id).await?;
        self.dispatch_pre(ServerAction::Install, &server).await?;

        let task_id = self
            .enqueue(
                &server,
                TaskKind::GameServerInstall,
                &[TaskKind::GameServerUpdate, TaskKind::GameServerInstall],
            )
            .await?;
        self.dispatch_post(ServerAction::Install, &server, task_id).await;
        Ok(task_id)
    }

    /// Enqueue a delete task.
    #[instrument(skip(self))]
    pub async fn delete(&self, server_id: i64) -> Result<i64> {
        let server = self.server(server_id).await?;
        self.dispatch_pre(ServerAction::Delete, &server).await?;

        let task_id = self
            .enqueue(&server, TaskKind::GameServerDelete, &[TaskKind::GameServerDelete])
            .await?;
        self.dispatch_post(ServerAction::Delete, &server, task_id).await;
        Ok(task_id)
    }

    /// Enqueue the reinstall chain: stop, then delete, then install, each
    /// gated on its predecessor. Persisted atomically; a mid-chain failure
    /// leaves no tasks behind. Returns the install task id.
    #[instrument(skip(self))]
    pub async fn reinstall(&self, server_id: i64) -> Result<i64> {
        let server = self.server(server_id).await?;
        self.dispatch_pre(ServerAction::Reinstall, &server).await?;

        let ids = self
            .repos
            .daemon_tasks
            .enqueue_chain(
                vec![
                    NewDaemonTask::for_server(&server, TaskKind::GameServerStop),
                    NewDaemonTask::for_server(&server, TaskKind::GameServerDelete),
                    NewDaemonTask::for_server(&server, TaskKind::GameServerInstall),
                ],
                &TaskKind::GUARDED,
            )
            .await?;

        for task_id in &ids {
            self.dispatch_task_created(&server, *task_id).await;
        }

        let install_id = *ids.last().ok_or_else(|| {
            GshubError::internal("reinstall chain persisted no tasks")
        })?;

        info!(server = server.id, install_task = install_id, "Reinstall chain enqueued");
        self.dispatch_post(ServerAction::Reinstall, &server, install_id).await;
        Ok(install_id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    async fn server(&self, server_id: i64) -> Result<Server> {
        self.repos
            .servers
            .get(server_id)
            .await?
            .ok_or_else(|| GshubError::not_found("server", server_id.to_string()))
    }

    fn require_start_command(&self, server: &Server) -> Result<()> {
        if !server.has_start_command() {
            return Err(GshubError::new(
                ErrorCode::EmptyStartCommand,
                "empty start command",
            )
            .with_context("server_id", server.id));
        }
        Ok(())
    }

    /// Raise the `autostart_current` intent when the declarative preference
    /// is enabled.
    async fn raise_autostart_current(&self, server: &Server) -> Result<()> {
        let autostart = self
            .repos
            .server_settings
            .get(server.id, SETTING_AUTOSTART)
            .await?
            .map(|s| s.as_bool())
            .unwrap_or(false);

        if autostart {
            self.repos
                .server_settings
                .upsert(server.id, SETTING_AUTOSTART_CURRENT, "1")
                .await?;
        }
        Ok(())
    }

    async fn enqueue(
        &self,
        server: &Server,
        kind: TaskKind,
        guard: &[TaskKind],
    ) -> Result<i64> {
        let task_id = self
            .repos
            .daemon_tasks
            .enqueue(NewDaemonTask::for_server(server, kind), guard)
            .await?;

        info!(server = server.id, task = task_id, kind = %kind, "Daemon task enqueued");
        self.dispatch_task_created(server, task_id).await;
        Ok(task_id)
    }

    /// Dispatch the cancellable pre-event; a cancel vote aborts the
    /// operation before any state change.
    async fn dispatch_pre(&self, action: ServerAction, server: &Server) -> Result<()> {
        let event = Event::new(action.pre_event()).with_server(server.clone());
        match self.dispatcher.dispatch(&event).await {
            DispatchOutcome::Proceed => Ok(()),
            DispatchOutcome::Cancelled { plugin, message } => {
                warn!(
                    server = server.id,
                    plugin = %plugin,
                    message = %message,
                    "Operation cancelled by plugin"
                );
                Err(GshubError::cancelled_by_plugin(plugin, message))
            }
        }
    }

    async fn dispatch_post(&self, action: ServerAction, server: &Server, task_id: i64) {
        let event = Event::new(action.post_event())
            .with_server(server.clone())
            .with_metadata("task_id", task_id.to_string());
        self.dispatcher.dispatch(&event).await;
    }

    async fn dispatch_task_created(&self, server: &Server, task_id: i64) {
        let task = match self.repos.daemon_tasks.get(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return,
            Err(e) => {
                warn!(task = task_id, error = %e, "Task snapshot fetch failed");
                return;
            }
        };
        let event = Event::new(EventKind::TaskCreated)
            .with_server(server.clone())
            .with_task(task);
        self.dispatcher.dispatch(&event).await;
    }
}
