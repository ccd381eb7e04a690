//! HTTP middleware.

pub mod auth;

pub use auth::{session_middleware, AuthService, Claims, Session, SessionState};
