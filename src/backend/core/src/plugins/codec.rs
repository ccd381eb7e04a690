//! Wire codec shared between the host and guest plugins.
//!
//! Every message crossing the sandbox boundary is a bincode-encoded struct
//! from this module. The same codec is used in both directions: guest exports
//! receive an encoded request and return a packed `(pointer << 32) | length`
//! value, and the `gshub::host_call` import carries a [`CallEnvelope`] the
//! other way. Bit 31 of the packed length marks the error channel: when set,
//! the referenced bytes are a UTF-8 message rather than an encoded response.

use std::collections::HashMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// Errors and helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors produced while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

/// Encode a wire message.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a wire message.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

/// High bit of the packed length field; marks an error payload.
pub const ERROR_FLAG: u32 = 1 << 31;

/// Pack a guest memory region into the single `i64`-sized return value.
pub fn pack(ptr: u32, len: u32, is_error: bool) -> u64 {
    let len = if is_error { len | ERROR_FLAG } else { len };
    ((ptr as u64) << 32) | len as u64
}

/// Unpack a `(pointer, length, error flag)` triple from a packed value.
pub fn unpack(packed: u64) -> (u32, u32, bool) {
    let ptr = (packed >> 32) as u32;
    let raw_len = (packed & 0xffff_ffff) as u32;
    (ptr, raw_len & !ERROR_FLAG, raw_len & ERROR_FLAG != 0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Host-call envelope (guest -> host)
// ═══════════════════════════════════════════════════════════════════════════════

/// The single indirect-call payload for `gshub::host_call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEnvelope {
    /// Capability name, e.g. `log` or `repo_servers`.
    pub capability: String,
    /// Method within the capability, e.g. `fetch` or `get`.
    pub method: String,
    /// Encoded request body for the method.
    pub body: Vec<u8>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Service exports (host -> guest)
// ═══════════════════════════════════════════════════════════════════════════════

/// Identification record returned by `plugin_service_get_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Dotted identifier.
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    /// Host API version string the plugin was built against.
    pub api_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeRequest {
    pub config: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    pub success: bool,
    pub message: String,
}

/// A route declared by `plugin_service_get_http_routes`, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSpec {
    pub path: String,
    pub methods: Vec<String>,
    pub requires_auth: bool,
    pub admin_only: bool,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribedEvents {
    pub events: Vec<String>,
}

/// Optional frontend assets returned by `plugin_service_get_frontend_bundle`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrontendBundle {
    pub javascript: Vec<u8>,
    pub stylesheet: Vec<u8>,
}

impl FrontendBundle {
    pub fn is_empty(&self) -> bool {
        self.javascript.is_empty() && self.stylesheet.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Events
// ═══════════════════════════════════════════════════════════════════════════════

/// Event payload delivered to `plugin_service_handle_event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event kind tag, e.g. `server_pre_start`.
    pub kind: String,
    /// Server snapshot for server-scoped events.
    pub server: Option<crate::domain::Server>,
    /// Task snapshot for daemon-task events.
    pub task: Option<crate::domain::DaemonTask>,
    pub metadata: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleEventResult {
    pub handled: bool,
    pub should_cancel: bool,
    pub message: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP bridging
// ═══════════════════════════════════════════════════════════════════════════════

/// Session snapshot exposed to guests; absent for unauthenticated requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub user: UserSnapshot,
    pub token: Option<TokenSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: i64,
    pub login: String,
    pub email: String,
    pub admin: bool,
}

/// Personal access token view with timestamps normalized to Unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub id: i64,
    pub abilities: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub expires_at: Option<i64>,
}

/// Request delivered to `plugin_service_handle_http_request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    /// Plugin-local path, with the `/api/plugins/<id>` prefix stripped.
    pub path: String,
    /// First value per header name.
    pub headers: HashMap<String, String>,
    /// Bound `{name}` path parameters.
    pub params: HashMap<String, String>,
    /// Expanded query parameters; comma-separated values are split.
    pub query: HashMap<String, Vec<String>>,
    pub body: Vec<u8>,
    pub session: Option<SessionSnapshot>,
}

/// Response produced by a plugin HTTP handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    /// HTTP status; 0 means "default" and is mapped to 200 by the router.
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Capability messages
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRequest {
    pub level: LogLevel,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheGetRequest {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheGetResponse {
    pub found: bool,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSetRequest {
    pub key: String,
    pub value: Vec<u8>,
    /// Zero means "no expiry".
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheDeleteRequest {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheDeleteResponse {
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerControlRequest {
    pub server_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerControlResponse {
    pub success: bool,
    pub task_id: i64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFsRequest {
    pub node_id: i64,
    pub path: String,
    /// Destination for copy/move/download/upload operations.
    pub destination: Option<String>,
    /// Recursive flag for remove.
    pub recursive: bool,
    /// Mode bits for chmod.
    pub mode: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub mode: u32,
    pub modified_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFsListResponse {
    pub entries: Vec<FileInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFsInfoResponse {
    pub info: FileInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeFsAck {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteCommandRequest {
    pub node_id: i64,
    pub command: String,
    pub work_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteCommandResponse {
    pub output: String,
    pub exit_code: i32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindRequest {
    pub filter: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetByIdRequest {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetByCodeRequest {
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDaemonTaskRequest {
    pub node_id: i64,
    pub server_id: Option<i64>,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDaemonTaskResponse {
    pub task_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettingGetRequest {
    pub server_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettingGetResponse {
    pub found: bool,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettingSaveRequest {
    pub server_id: i64,
    pub name: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let packed = pack(0x1000, 256, false);
        assert_eq!(unpack(packed), (0x1000, 256, false));

        let packed = pack(0xdead_0000, 42, true);
        assert_eq!(unpack(packed), (0xdead_0000, 42, true));
    }

    #[test]
    fn test_error_flag_excluded_from_length() {
        let packed = pack(8, ERROR_FLAG - 1, true);
        let (_, len, is_error) = unpack(packed);
        assert!(is_error);
        assert_eq!(len, ERROR_FLAG - 1);
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = CallEnvelope {
            capability: "cache".into(),
            method: "get".into(),
            body: encode(&CacheGetRequest { key: "k".into() }).unwrap(),
        };

        let bytes = encode(&envelope).unwrap();
        let decoded: CallEnvelope = decode(&bytes).unwrap();
        assert_eq!(decoded.capability, "cache");
        assert_eq!(decoded.method, "get");

        let request: CacheGetRequest = decode(&decoded.body).unwrap();
        assert_eq!(request.key, "k");
    }

    #[test]
    fn test_http_request_roundtrip() {
        let request = HttpRequest {
            method: "GET".into(),
            path: "/status".into(),
            headers: HashMap::from([("accept".into(), "application/json".into())]),
            params: HashMap::new(),
            query: HashMap::from([("tags".into(), vec!["a".into(), "b".into()])]),
            body: Vec::new(),
            session: None,
        };

        let decoded: HttpRequest = decode(&encode(&request).unwrap()).unwrap();
        assert_eq!(decoded.path, "/status");
        assert_eq!(decoded.query["tags"], vec!["a", "b"]);
    }
}
