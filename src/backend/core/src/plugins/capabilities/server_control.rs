//! Server control capability: lifecycle operations for plugins.
//!
//! Delegates to the task engine; outcomes are reported inside the response
//! via the success flag so guard conflicts and validation failures reach the
//! plugin as data rather than as transport errors.

use std::sync::Arc;

use async_trait::async_trait;

use crate::control::ServerControlService;
use crate::plugins::codec::{self, ServerControlRequest, ServerControlResponse};

use super::{CapabilityError, CapabilityService};

pub struct ServerControlCapability {
    control: Arc<ServerControlService>,
}

impl ServerControlCapability {
    pub fn new(control: Arc<ServerControlService>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl CapabilityService for ServerControlCapability {
    fn name(&self) -> &'static str {
        "server_control"
    }

    async fn invoke(
        &self,
        plugin_id: &str,
        method: &str,
        body: &[u8],
    ) -> Result<Vec<u8>, CapabilityError> {
        let request: ServerControlRequest = codec::decode(body)?;
        let server_id = request.server_id;

        tracing::debug!(
            plugin = plugin_id,
            server = server_id,
            operation = method,
            "Plugin server control call"
        );

        let result = match method {
            "start" => self.control.start(server_id).await,
            "stop" => self.control.stop(server_id).await,
            "restart" => self.control.restart(server_id).await,
            "update" => self.control.update(server_id).await,
            "install" => self.control.install(server_id).await,
            "reinstall" => self.control.reinstall(server_id).await,
            other => {
                return Err(CapabilityError::UnknownMethod(
                    "server_control".to_string(),
                    other.to_string(),
                ))
            }
        };

        let response = match result {
            Ok(task_id) => ServerControlResponse {
                success: true,
                task_id,
                error: None,
            },
            Err(e) => ServerControlResponse {
                success: false,
                task_id: 0,
                error: Some(e.user_message().to_string()),
            },
        };
        Ok(codec::encode(&response)?)
    }
}
