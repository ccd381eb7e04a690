//! # gshub Core
//!
//! Control plane for game-server orchestration.
//!
//! ## Architecture
//!
//! - **Plugins**: Sandboxed WebAssembly plugin runtime with versioned host
//!   capability libraries, lifecycle events and HTTP route multiplexing
//! - **Control**: Server lifecycle task engine feeding the node daemon queue
//!   with single-flight guards and autostart coupling
//! - **Events**: Pre/post lifecycle events with plugin cancellation votes
//! - **Repositories**: Persistence contracts with Postgres and in-memory
//!   implementations
//! - **File store**: Local or S3-compatible storage for plugin artifacts
//! - **API**: Axum HTTP surface with bearer-session middleware

pub mod api;
pub mod cache;
pub mod config;
pub mod control;
pub mod db;
pub mod domain;
pub mod error;
pub mod events;
pub mod filestore;
pub mod middleware;
pub mod observability;
pub mod plugins;
pub mod repo;

pub use error::{ErrorCode, ErrorDetails, ErrorSeverity, GshubError, Result, ResultExt};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::control::ServerControlService;
    pub use crate::domain::{
        DaemonTask, NewDaemonTask, Node, Server, ServerSetting, TaskKind, TaskStatus, User,
    };
    pub use crate::error::{ErrorCode, GshubError, Result, ResultExt};
    pub use crate::events::{
        DispatchOutcome, Event, EventDispatcher, EventKind, ServerAction, SubscriptionRegistry,
    };
    pub use crate::middleware::{AuthService, Session, SessionState};
    pub use crate::plugins::{
        capabilities::CapabilityHub, GuestPlugin, LoadedPlugin, PluginError, PluginId,
        PluginManager, PLUGIN_API_VERSION,
    };
    pub use crate::repo::Repositories;
}
