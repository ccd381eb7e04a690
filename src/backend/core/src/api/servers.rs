//! Server control handlers.
//!
//! Thin adapters over the task engine; the engine owns validation, guards
//! and event dispatch.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Serialize;

use crate::error::Result;
use crate::middleware::SessionState;

use super::{require_session, ApiResponse, AppState};

#[derive(Debug, Serialize)]
pub struct TaskCreated {
    pub task_id: i64,
}

macro_rules! control_handler {
    ($name:ident, $operation:ident) => {
        #[doc = concat!("`POST /api/servers/:server_id/", stringify!($operation), "`")]
        pub async fn $name(
            State(state): State<AppState>,
            Extension(session): Extension<SessionState>,
            Path(server_id): Path<i64>,
        ) -> Result<Json<ApiResponse<TaskCreated>>> {
            require_session(session.0.as_deref())?;
            let task_id = state.control.$operation(server_id).await?;
            Ok(Json(ApiResponse::success(TaskCreated { task_id })))
        }
    };
}

control_handler!(start_server, start);
control_handler!(stop_server, stop);
control_handler!(restart_server, restart);
control_handler!(update_server, update);
control_handler!(install_server, install);
control_handler!(reinstall_server, reinstall);
control_handler!(delete_server, delete);
