//! Error handling for gshub-core.
//!
//! This module provides:
//! - Comprehensive error types with context and chaining
//! - HTTP status code mapping for API responses
//! - Error codes for machine-readable API responses
//! - User-friendly messages vs detailed internal messages
//! - Error logging with tracing integration
//! - Metrics integration for error tracking
//!
//! # Usage
//!
//! ```rust,ignore
//! use gshub_core::error::{ErrorCode, Result, ResultExt};
//!
//! async fn my_function() -> Result<()> {
//!     some_operation()
//!         .await
//!         .describe(ErrorCode::FileStoreError, "Artifact read failed")?;
//!     Ok(())
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for gshub operations.
pub type Result<T> = std::result::Result<T, GshubError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Plugin Errors (1000-1099)
    PluginNotFound,
    PluginAlreadyLoaded,
    PluginDisabled,
    PluginUnavailable,
    PluginRejected,
    InvalidRoute,

    // Sandbox Errors (1100-1199)
    SandboxError,
    MissingExport,
    ApiVersionMismatch,
    GuestError,
    GuestTimeout,

    // Server Control Errors (1200-1299)
    TaskConflict,
    TaskNotFound,
    EmptyStartCommand,
    OperationCancelled,

    // Node Errors (1300-1399)
    NodeNotFound,
    NodeGatewayError,

    // Database Errors (2000-2099)
    DatabaseError,
    DatabaseConnectionFailed,
    DatabaseQueryFailed,
    DatabaseTransactionFailed,
    RecordNotFound,
    DuplicateRecord,

    // Cache Errors (2100-2199)
    CacheError,
    CacheConnectionFailed,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,
    CodecError,

    // File Store Errors (2300-2399)
    FileStoreError,
    ArtifactNotFound,

    // External Service Errors (3000-3099)
    NetworkError,
    ExternalServiceError,

    // Authentication/Authorization (4000-4099)
    Unauthorized,
    Forbidden,
    InvalidToken,
    TokenExpired,

    // Validation Errors (4100-4199)
    ValidationError,
    InvalidInput,
    PayloadTooLarge,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
    Timeout,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            // Plugin Errors
            Self::PluginNotFound => 1000,
            Self::PluginAlreadyLoaded => 1001,
            Self::PluginDisabled => 1002,
            Self::PluginUnavailable => 1003,
            Self::PluginRejected => 1004,
            Self::InvalidRoute => 1005,

            // Sandbox Errors
            Self::SandboxError => 1100,
            Self::MissingExport => 1101,
            Self::ApiVersionMismatch => 1102,
            Self::GuestError => 1103,
            Self::GuestTimeout => 1104,

            // Server Control Errors
            Self::TaskConflict => 1200,
            Self::TaskNotFound => 1201,
            Self::EmptyStartCommand => 1202,
            Self::OperationCancelled => 1203,

            // Node Errors
            Self::NodeNotFound => 1300,
            Self::NodeGatewayError => 1301,

            // Database Errors
            Self::DatabaseError => 2000,
            Self::DatabaseConnectionFailed => 2001,
            Self::DatabaseQueryFailed => 2002,
            Self::DatabaseTransactionFailed => 2003,
            Self::RecordNotFound => 2004,
            Self::DuplicateRecord => 2005,

            // Cache Errors
            Self::CacheError => 2100,
            Self::CacheConnectionFailed => 2101,

            // Serialization Errors
            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,
            Self::CodecError => 2202,

            // File Store Errors
            Self::FileStoreError => 2300,
            Self::ArtifactNotFound => 2301,

            // External Service Errors
            Self::NetworkError => 3000,
            Self::ExternalServiceError => 3001,

            // Auth Errors
            Self::Unauthorized => 4000,
            Self::Forbidden => 4001,
            Self::InvalidToken => 4002,
            Self::TokenExpired => 4003,

            // Validation Errors
            Self::ValidationError => 4100,
            Self::InvalidInput => 4101,
            Self::PayloadTooLarge => 4102,

            // Configuration Errors
            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            // Internal Errors
            Self::InternalError => 9000,
            Self::Timeout => 9001,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            // Not Found (404)
            Self::PluginNotFound
            | Self::TaskNotFound
            | Self::NodeNotFound
            | Self::RecordNotFound
            | Self::ArtifactNotFound => StatusCode::NOT_FOUND,

            // Conflict (409)
            Self::PluginAlreadyLoaded
            | Self::TaskConflict
            | Self::DuplicateRecord
            | Self::OperationCancelled => StatusCode::CONFLICT,

            // Unprocessable Entity (422)
            Self::ValidationError | Self::InvalidRoute | Self::EmptyStartCommand => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            // Bad Request (400)
            Self::InvalidInput | Self::PayloadTooLarge => StatusCode::BAD_REQUEST,

            // Unauthorized (401)
            Self::Unauthorized | Self::InvalidToken | Self::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }

            // Forbidden (403)
            Self::Forbidden => StatusCode::FORBIDDEN,

            // Service Unavailable (503)
            Self::PluginDisabled
            | Self::PluginUnavailable
            | Self::DatabaseConnectionFailed
            | Self::CacheConnectionFailed
            | Self::ExternalServiceError => StatusCode::SERVICE_UNAVAILABLE,

            // Gateway Timeout (504)
            Self::GuestTimeout | Self::Timeout => StatusCode::GATEWAY_TIMEOUT,

            // Bad Gateway (502)
            Self::NetworkError | Self::NodeGatewayError => StatusCode::BAD_GATEWAY,

            // Internal Server Error (500)
            Self::PluginRejected
            | Self::SandboxError
            | Self::MissingExport
            | Self::ApiVersionMismatch
            | Self::GuestError
            | Self::DatabaseError
            | Self::DatabaseQueryFailed
            | Self::DatabaseTransactionFailed
            | Self::CacheError
            | Self::SerializationError
            | Self::DeserializationError
            | Self::CodecError
            | Self::FileStoreError
            | Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InvalidConfiguration
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseConnectionFailed
                | Self::DatabaseQueryFailed
                | Self::CacheConnectionFailed
                | Self::CacheError
                | Self::NetworkError
                | Self::NodeGatewayError
                | Self::ExternalServiceError
                | Self::GuestTimeout
                | Self::Timeout
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "plugin",
            1100..=1199 => "sandbox",
            1200..=1299 => "server_control",
            1300..=1399 => "node",
            2000..=2099 => "database",
            2100..=2199 => "cache",
            2200..=2299 => "serialization",
            2300..=2399 => "filestore",
            3000..=3099 => "external_service",
            4000..=4099 => "authentication",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging and alerting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// User errors (bad input, validation failures)
    Low,
    /// Operational issues (guard conflicts, timeouts)
    Medium,
    /// System errors (database failures, sandbox faults)
    High,
    /// Critical errors requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            // Low severity - user errors
            ErrorCode::PluginNotFound
            | ErrorCode::PluginAlreadyLoaded
            | ErrorCode::TaskNotFound
            | ErrorCode::NodeNotFound
            | ErrorCode::RecordNotFound
            | ErrorCode::ArtifactNotFound
            | ErrorCode::DuplicateRecord
            | ErrorCode::ValidationError
            | ErrorCode::InvalidInput
            | ErrorCode::PayloadTooLarge
            | ErrorCode::InvalidRoute
            | ErrorCode::EmptyStartCommand => Self::Low,

            // Medium severity - operational
            ErrorCode::PluginDisabled
            | ErrorCode::PluginUnavailable
            | ErrorCode::TaskConflict
            | ErrorCode::OperationCancelled
            | ErrorCode::GuestError
            | ErrorCode::GuestTimeout
            | ErrorCode::Timeout => Self::Medium,

            // High severity - system errors
            ErrorCode::PluginRejected
            | ErrorCode::SandboxError
            | ErrorCode::MissingExport
            | ErrorCode::ApiVersionMismatch
            | ErrorCode::NodeGatewayError
            | ErrorCode::DatabaseError
            | ErrorCode::DatabaseQueryFailed
            | ErrorCode::DatabaseTransactionFailed
            | ErrorCode::CacheError
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::CodecError
            | ErrorCode::FileStoreError
            | ErrorCode::NetworkError
            | ErrorCode::ExternalServiceError
            | ErrorCode::Unauthorized
            | ErrorCode::Forbidden
            | ErrorCode::InvalidToken
            | ErrorCode::TokenExpired
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration => Self::High,

            // Critical severity
            ErrorCode::DatabaseConnectionFailed
            | ErrorCode::CacheConnectionFailed
            | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (plugin, server, task, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.context.is_empty() && self.entity_id.is_none() && self.entity_type.is_none()
    }

    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for gshub-core.
///
/// This error type supports:
/// - Structured error codes for API responses
/// - Error chaining with context
/// - User-friendly vs internal messages
/// - HTTP status code mapping
/// - Metrics integration
#[derive(Error, Debug)]
pub struct GshubError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for GshubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl GshubError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create a not found error.
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        Self::new(
            ErrorCode::RecordNotFound,
            format!("{} not found: {}", entity_type, entity_id),
        )
        .with_details(ErrorDetails::new().with_entity(&entity_type, &entity_id))
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create an unauthorized error.
    pub fn unauthorized(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Create a forbidden error.
    pub fn forbidden(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Domain constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a plugin not found error.
    pub fn plugin_not_found(plugin_id: impl Into<String>) -> Self {
        let id = plugin_id.into();
        Self::new(
            ErrorCode::PluginNotFound,
            format!("Plugin not found: {}", id),
        )
        .with_details(ErrorDetails::new().with_entity("plugin", &id))
    }

    /// Create a plugin already loaded error.
    pub fn plugin_already_loaded(plugin_id: impl Into<String>) -> Self {
        let id = plugin_id.into();
        Self::new(
            ErrorCode::PluginAlreadyLoaded,
            format!("Plugin already loaded: {}", id),
        )
        .with_details(ErrorDetails::new().with_entity("plugin", &id))
    }

    /// Create a task guard conflict error.
    pub fn task_conflict(server_id: i64, kind: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::TaskConflict,
            format!("Task already exists for server {}", server_id),
        )
        .with_context("server_id", server_id)
        .with_context("kind", kind.into())
    }

    /// Create an operation cancelled error carrying the cancelling plugin's message.
    pub fn cancelled_by_plugin(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        let plugin = plugin_id.into();
        Self::new(ErrorCode::OperationCancelled, message.into())
            .with_details(ErrorDetails::new().with_entity("plugin", &plugin))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Emit this error to the log, weighted by severity.
    ///
    /// The user message doubles as the event message so log search stays
    /// keyed on stable wording; internal detail and the source chain ride
    /// along as fields on the noisier levels.
    pub fn log(&self) {
        let code = self.code;
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                let detail = self.internal_message.as_deref().unwrap_or("-");
                error!(%code, status, detail, source = ?self.source, "{}", self.user_message);
            }
            ErrorSeverity::Medium => {
                let detail = self.internal_message.as_deref().unwrap_or("-");
                warn!(%code, status, detail, "{}", self.user_message);
            }
            ErrorSeverity::Low => {
                tracing::debug!(%code, status, "{}", self.user_message);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    /// Count the error, keyed by taxonomy group and code.
    fn record_metrics(&self) {
        counter!(
            "gshub_core_errors",
            "kind" => self.code.category(),
            "code" => self.code.to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Whether the request was successful (always false for errors)
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code
    pub numeric_code: u32,

    /// User-friendly error message
    pub message: String,

    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&GshubError> for ErrorResponse {
    fn from(error: &GshubError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: (!error.details.is_empty()).then(|| error.details.clone()),
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for GshubError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Result Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension methods for lifting foreign errors into [`GshubError`].
pub trait ResultExt<T> {
    /// Attach an error code; the source's own message becomes internal detail.
    fn code(self, code: ErrorCode) -> Result<T>;

    /// Attach an error code and a user-facing message.
    fn describe(self, code: ErrorCode, message: &'static str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn code(self, code: ErrorCode) -> Result<T> {
        self.describe(code, "Operation failed")
    }

    fn describe(self, code: ErrorCode, message: &'static str) -> Result<T> {
        self.map_err(|e| GshubError::with_internal(code, message, e.to_string()).with_source(e))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions from library errors
// ═══════════════════════════════════════════════════════════════════════════════
//
// Each conversion only picks the closest ErrorCode; the library's own text is
// preserved as internal detail while the user-facing wording stays generic,
// one fixed phrase per subsystem.

impl From<sqlx::Error> for GshubError {
    fn from(error: sqlx::Error) -> Self {
        let code = match &error {
            sqlx::Error::RowNotFound => ErrorCode::RecordNotFound,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                ErrorCode::DatabaseConnectionFailed
            }
            sqlx::Error::Database(db) => match db.kind() {
                sqlx::error::ErrorKind::UniqueViolation => ErrorCode::DuplicateRecord,
                _ => ErrorCode::DatabaseQueryFailed,
            },
            _ => ErrorCode::DatabaseError,
        };

        Self::with_internal(code, "Storage operation failed", error.to_string())
            .with_source(error)
    }
}

impl From<redis::RedisError> for GshubError {
    fn from(error: redis::RedisError) -> Self {
        let unreachable =
            error.is_connection_refusal() || error.is_connection_dropped() || error.is_io_error();
        let code = if unreachable {
            ErrorCode::CacheConnectionFailed
        } else {
            ErrorCode::CacheError
        };

        Self::with_internal(code, "Cache operation failed", error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for GshubError {
    fn from(error: serde_json::Error) -> Self {
        let code = match error.classify() {
            serde_json::error::Category::Io => ErrorCode::SerializationError,
            _ => ErrorCode::DeserializationError,
        };

        Self::with_internal(code, "Malformed JSON payload", error.to_string()).with_source(error)
    }
}

impl From<reqwest::Error> for GshubError {
    fn from(error: reqwest::Error) -> Self {
        let code = if error.is_timeout() {
            ErrorCode::Timeout
        } else if error.is_status() {
            ErrorCode::ExternalServiceError
        } else {
            ErrorCode::NetworkError
        };
        let detail = match error.url() {
            Some(url) => format!("{} ({})", error, url),
            None => error.to_string(),
        };

        Self::with_internal(code, "Upstream request failed", detail).with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for GshubError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::new(ErrorCode::Timeout, "Deadline exceeded").with_source(error)
    }
}

impl From<std::io::Error> for GshubError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let code = match error.kind() {
            ErrorKind::NotFound => ErrorCode::RecordNotFound,
            ErrorKind::PermissionDenied => ErrorCode::Forbidden,
            ErrorKind::TimedOut => ErrorCode::Timeout,
            kind if matches!(
                kind,
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
            ) =>
            {
                ErrorCode::NetworkError
            }
            _ => ErrorCode::InternalError,
        };

        Self::with_internal(code, "I/O failure", error.to_string()).with_source(error)
    }
}

impl From<anyhow::Error> for GshubError {
    fn from(error: anyhow::Error) -> Self {
        // Unwrap errors that started life as GshubError further down the stack;
        // anything else keeps its full chain as internal detail.
        error
            .downcast::<GshubError>()
            .unwrap_or_else(|other| Self::internal(format!("{:#}", other)))
    }
}

impl From<config::ConfigError> for GshubError {
    fn from(error: config::ConfigError) -> Self {
        let code = if matches!(error, config::ConfigError::NotFound(_)) {
            ErrorCode::MissingConfiguration
        } else {
            ErrorCode::InvalidConfiguration
        };

        Self::with_internal(code, "Configuration is unusable", error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
