//! # Plugin Runtime
//!
//! Sandboxed WebAssembly plugin system for the gshub control plane.
//!
//! ## Architecture
//!
//! - **codec**: Binary wire messages exchanged with guests (bincode), plus the
//!   packed pointer/length return convention of the host-call ABI.
//! - **runtime**: Per-plugin wasmtime sandbox implementing [`GuestPlugin`];
//!   owns the guest call convention and the per-plugin serialization lock.
//! - **capabilities**: Host capability libraries (log, cache, HTTP egress,
//!   server control, node filesystem/command, repositories) reachable from
//!   the sandbox through a single indirect host call.
//! - **manager**: Registry of loaded plugins with load/unload/shutdown.
//! - **loader**: Artifact store access, auto-load reconciliation, and the
//!   catalogue-id to manager-id mapping.
//! - **http**: The `/api/plugins/{plugin_id}/...` router and the frontend
//!   bundle aggregation endpoints.

pub mod capabilities;
pub mod codec;
pub mod http;
pub mod loader;
pub mod manager;
pub mod routes;
pub mod runtime;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::{ErrorCode, GshubError};
use codec::CodecError;
use routes::HttpRoute;

pub use manager::PluginManager;

/// Host plugin API version. Guests must report exactly this value from
/// `plugin_service_api_version`.
pub const PLUGIN_API_VERSION: u64 = 1;

// ═══════════════════════════════════════════════════════════════════════════════
// Plugin identity
// ═══════════════════════════════════════════════════════════════════════════════

/// Stable plugin identifier.
///
/// The canonical declaration is the dotted form (`com.example.backups`);
/// the compact form joins the same segments with dashes
/// (`com-example-backups`) and is the only registry key. Identifiers carry
/// at least two segments, each limited to `[a-z0-9_]`, which keeps the two
/// forms interconvertible.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginId {
    segments: Vec<String>,
}

impl PluginId {
    /// Parse an identifier in either dotted or compact form.
    pub fn parse(raw: &str) -> Result<Self, PluginError> {
        if raw.is_empty() {
            return Err(PluginError::InvalidId("empty identifier".to_string()));
        }

        let separator = if raw.contains('.') { '.' } else { '-' };
        let segments: Vec<String> = raw.split(separator).map(str::to_string).collect();

        if segments.len() < 2 {
            return Err(PluginError::InvalidId(format!(
                "identifier needs at least two segments: {}",
                raw
            )));
        }

        for segment in &segments {
            if segment.is_empty() {
                return Err(PluginError::InvalidId(format!(
                    "empty segment in identifier: {}",
                    raw
                )));
            }
            if !segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            {
                return Err(PluginError::InvalidId(format!(
                    "invalid segment {:?} in identifier: {}",
                    segment, raw
                )));
            }
        }

        Ok(Self { segments })
    }

    /// Dotted form, e.g. `com.example.backups`.
    pub fn dotted(&self) -> String {
        self.segments.join(".")
    }

    /// Compact form, e.g. `com-example-backups`. Used as the registry key.
    pub fn compact(&self) -> String {
        self.segments.join("-")
    }
}

impl std::fmt::Display for PluginId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.dotted())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Plugin errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors produced by the plugin runtime and manager.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("sandbox error: {0}")]
    Sandbox(anyhow::Error),

    #[error("missing required export: {0}")]
    MissingExport(&'static str),

    #[error("plugin API version mismatch: host {host}, guest {guest}")]
    ApiVersionMismatch { host: u64, guest: u64 },

    #[error("plugin returned error: {0}")]
    Guest(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("guest memory access out of range")]
    MemoryOutOfRange,

    #[error("invalid plugin id: {0}")]
    InvalidId(String),

    #[error("invalid route: {0}")]
    InvalidRoute(String),

    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("plugin already loaded: {0}")]
    AlreadyLoaded(String),

    #[error("plugin not available")]
    NotAvailable,

    #[error("plugin initialization rejected: {0}")]
    InitRejected(String),

    #[error("guest call timed out")]
    Timeout,
}

impl From<anyhow::Error> for PluginError {
    fn from(error: anyhow::Error) -> Self {
        Self::Sandbox(error)
    }
}

impl From<PluginError> for GshubError {
    fn from(error: PluginError) -> Self {
        let code = match &error {
            PluginError::Sandbox(_) | PluginError::MemoryOutOfRange => ErrorCode::SandboxError,
            PluginError::MissingExport(_) => ErrorCode::MissingExport,
            PluginError::ApiVersionMismatch { .. } => ErrorCode::ApiVersionMismatch,
            PluginError::Guest(_) => ErrorCode::GuestError,
            PluginError::Codec(_) => ErrorCode::CodecError,
            PluginError::InvalidId(_) => ErrorCode::ValidationError,
            PluginError::InvalidRoute(_) => ErrorCode::InvalidRoute,
            PluginError::NotFound(_) => ErrorCode::PluginNotFound,
            PluginError::AlreadyLoaded(_) => ErrorCode::PluginAlreadyLoaded,
            PluginError::NotAvailable => ErrorCode::PluginUnavailable,
            PluginError::InitRejected(_) => ErrorCode::PluginRejected,
            PluginError::Timeout => ErrorCode::GuestTimeout,
        };
        GshubError::with_internal(code, "Plugin operation failed", error.to_string())
            .with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Guest call surface
// ═══════════════════════════════════════════════════════════════════════════════

/// The host-side view of a guest plugin's service exports.
///
/// The wasmtime sandbox in [`runtime`] is the production implementation; tests
/// substitute scripted stand-ins to exercise the manager, dispatcher and
/// router without compiling artifacts.
#[async_trait]
pub trait GuestPlugin: Send + Sync {
    async fn get_info(&self) -> Result<codec::PluginInfo, PluginError>;

    async fn initialize(
        &self,
        config: &[(String, String)],
    ) -> Result<codec::InitializeResult, PluginError>;

    async fn shutdown(&self) -> Result<(), PluginError>;

    async fn handle_event(
        &self,
        event: &codec::EventEnvelope,
    ) -> Result<codec::HandleEventResult, PluginError>;

    async fn subscribed_events(&self) -> Result<Vec<String>, PluginError>;

    async fn http_routes(&self) -> Result<Vec<codec::RouteSpec>, PluginError>;

    async fn handle_http_request(
        &self,
        request: &codec::HttpRequest,
    ) -> Result<codec::HttpResponse, PluginError>;

    /// The frontend bundle export is optional; `Ok(None)` when absent.
    async fn frontend_bundle(&self) -> Result<Option<codec::FrontendBundle>, PluginError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Loaded plugin
// ═══════════════════════════════════════════════════════════════════════════════

/// A live plugin instance owned by the manager.
///
/// The wrapper holds the plugin's serialization point: every guest call goes
/// through `call_lock`, so the dispatcher and the HTTP router can target the
/// same plugin concurrently while at most one invocation is in flight.
pub struct LoadedPlugin {
    pub id: PluginId,
    pub info: codec::PluginInfo,
    pub config: HashMap<String, String>,
    pub routes: Vec<HttpRoute>,
    pub frontend: Option<codec::FrontendBundle>,
    enabled: AtomicBool,
    call_lock: tokio::sync::Mutex<()>,
    guest: Arc<dyn GuestPlugin>,
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("id", &self.id)
            .field("info", &self.info)
            .field("config", &self.config)
            .field("routes", &self.routes)
            .field("frontend", &self.frontend)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl LoadedPlugin {
    pub fn new(
        id: PluginId,
        info: codec::PluginInfo,
        config: HashMap<String, String>,
        routes: Vec<HttpRoute>,
        frontend: Option<codec::FrontendBundle>,
        guest: Arc<dyn GuestPlugin>,
    ) -> Self {
        Self {
            id,
            info,
            config,
            routes,
            frontend,
            enabled: AtomicBool::new(true),
            call_lock: tokio::sync::Mutex::new(()),
            guest,
        }
    }

    /// Deliver an event to the guest under the per-plugin lock.
    pub async fn handle_event(
        &self,
        event: &codec::EventEnvelope,
    ) -> Result<codec::HandleEventResult, PluginError> {
        let _guard = self.call_lock.lock().await;
        self.guest.handle_event(event).await
    }

    /// Deliver an HTTP request to the guest under the per-plugin lock.
    pub async fn handle_http_request(
        &self,
        request: &codec::HttpRequest,
    ) -> Result<codec::HttpResponse, PluginError> {
        let _guard = self.call_lock.lock().await;
        self.guest.handle_http_request(request).await
    }

    /// Best-effort guest shutdown under the per-plugin lock.
    pub async fn shutdown_guest(&self) -> Result<(), PluginError> {
        let _guard = self.call_lock.lock().await;
        self.guest.shutdown().await
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_id_forms() {
        let id = PluginId::parse("com.example.backups").unwrap();
        assert_eq!(id.dotted(), "com.example.backups");
        assert_eq!(id.compact(), "com-example-backups");

        let from_compact = PluginId::parse("com-example-backups").unwrap();
        assert_eq!(from_compact, id);
    }

    #[test]
    fn test_plugin_id_requires_two_segments() {
        assert!(PluginId::parse("backups").is_err());
        assert!(PluginId::parse("example.backups").is_ok());
    }

    #[test]
    fn test_plugin_id_rejects_bad_segments() {
        assert!(PluginId::parse("").is_err());
        assert!(PluginId::parse("com..backups").is_err());
        assert!(PluginId::parse("Com.Example").is_err());
        assert!(PluginId::parse("com.exa mple").is_err());
    }
}
