//! Host capability libraries exposed to sandboxed plugins.
//!
//! Every capability is a named [`CapabilityService`] registered in the
//! [`CapabilityHub`]. Guests reach them through the single
//! `gshub::host_call` import carrying a [`super::codec::CallEnvelope`]; the
//! hub routes on the capability name and the service routes on the method.
//!
//! Failures never trap the sandbox: the hub stringifies every error and the
//! runtime reports it through the error channel of the packed return value.

pub mod cache;
pub mod http;
pub mod log;
pub mod node;
pub mod repos;
pub mod server_control;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use parking_lot::RwLock;
use thiserror::Error;

use super::codec::CodecError;

/// Errors produced by capability dispatch.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    #[error("unknown method: {0}.{1}")]
    UnknownMethod(String, String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("{0}")]
    Failed(String),
}

impl CapabilityError {
    /// Convenience for domain failures surfaced to the guest.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A named host capability callable from inside the sandbox.
#[async_trait]
pub trait CapabilityService: Send + Sync {
    /// Capability name routed on by the hub, e.g. `cache`.
    fn name(&self) -> &'static str;

    /// Execute one RPC. `plugin_id` is the compact id of the caller.
    async fn invoke(
        &self,
        plugin_id: &str,
        method: &str,
        body: &[u8],
    ) -> Result<Vec<u8>, CapabilityError>;
}

/// Registry of capability services shared by every plugin sandbox.
#[derive(Default)]
pub struct CapabilityHub {
    services: RwLock<HashMap<&'static str, Arc<dyn CapabilityService>>>,
}

impl CapabilityHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability; replaces any previous service of the same name.
    pub fn register(&self, service: Arc<dyn CapabilityService>) {
        self.services.write().insert(service.name(), service);
    }

    /// Route one host call. Errors are stringified for the guest error
    /// channel; they never propagate as host failures.
    pub async fn invoke(
        &self,
        plugin_id: &str,
        capability: &str,
        method: &str,
        body: &[u8],
    ) -> Result<Vec<u8>, String> {
        let service = self
            .services
            .read()
            .get(capability)
            .cloned()
            .ok_or_else(|| CapabilityError::UnknownCapability(capability.to_string()).to_string())?;

        counter!(
            "gshub_capability_calls_total",
            "capability" => capability.to_string(),
            "method" => method.to_string(),
        )
        .increment(1);

        service
            .invoke(plugin_id, method, body)
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::codec;

    struct EchoCapability;

    #[async_trait]
    impl CapabilityService for EchoCapability {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn invoke(
            &self,
            _plugin_id: &str,
            method: &str,
            body: &[u8],
        ) -> Result<Vec<u8>, CapabilityError> {
            match method {
                "echo" => Ok(body.to_vec()),
                other => Err(CapabilityError::UnknownMethod(
                    "echo".to_string(),
                    other.to_string(),
                )),
            }
        }
    }

    #[tokio::test]
    async fn test_hub_routes_by_name() {
        let hub = CapabilityHub::new();
        hub.register(Arc::new(EchoCapability));

        let body = codec::encode(&"hello".to_string()).unwrap();
        let reply = hub.invoke("p", "echo", "echo", &body).await.unwrap();
        assert_eq!(reply, body);
    }

    #[tokio::test]
    async fn test_hub_unknown_capability() {
        let hub = CapabilityHub::new();
        let err = hub.invoke("p", "nope", "x", &[]).await.unwrap_err();
        assert!(err.contains("unknown capability"));
    }

    #[tokio::test]
    async fn test_hub_unknown_method() {
        let hub = CapabilityHub::new();
        hub.register(Arc::new(EchoCapability));
        let err = hub.invoke("p", "echo", "nope", &[]).await.unwrap_err();
        assert!(err.contains("unknown method"));
    }
}
