//! Plugin HTTP route validation and path matching.

use std::collections::HashMap;

use axum::http::Method;

use super::codec::RouteSpec;
use super::PluginError;

/// Methods plugins may declare.
const ALLOWED_METHODS: [Method; 7] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::HEAD,
    Method::OPTIONS,
];

/// A validated route declared by a plugin.
#[derive(Debug, Clone)]
pub struct HttpRoute {
    pub path: String,
    pub methods: Vec<Method>,
    pub requires_auth: bool,
    pub admin_only: bool,
    pub description: String,
}

impl HttpRoute {
    /// Validate a declared route.
    ///
    /// Paths must be non-empty, absolute, free of `..` and empty segments,
    /// and each segment limited to `[A-Za-z0-9_-]` or a `{name}` parameter.
    /// The method list must be non-empty and drawn from the allowed set.
    pub fn validate(spec: &RouteSpec) -> Result<Self, PluginError> {
        validate_path(&spec.path)?;

        if spec.methods.is_empty() {
            return Err(PluginError::InvalidRoute(format!(
                "route {} declares no methods",
                spec.path
            )));
        }

        let mut methods = Vec::with_capacity(spec.methods.len());
        for method in &spec.methods {
            let parsed = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| PluginError::InvalidRoute(format!("invalid method: {}", method)))?;
            if !ALLOWED_METHODS.contains(&parsed) {
                return Err(PluginError::InvalidRoute(format!(
                    "method not allowed: {}",
                    method
                )));
            }
            methods.push(parsed);
        }

        Ok(Self {
            path: spec.path.clone(),
            methods,
            requires_auth: spec.requires_auth,
            // Admin middleware only runs behind auth, so admin_only implies it.
            admin_only: spec.admin_only,
            description: spec.description.clone(),
        })
    }

    /// Whether this route accepts the given method (case-insensitively).
    pub fn allows_method(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    /// Match a request path against this route's pattern, binding `{name}`
    /// segments. Returns `None` when the path does not match.
    pub fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        match_pattern(&self.path, path)
    }
}

fn validate_path(path: &str) -> Result<(), PluginError> {
    if path.is_empty() {
        return Err(PluginError::InvalidRoute("empty path".to_string()));
    }
    if !path.starts_with('/') {
        return Err(PluginError::InvalidRoute(format!(
            "path must start with '/': {}",
            path
        )));
    }
    if path == "/" {
        return Ok(());
    }
    if path.contains("..") {
        return Err(PluginError::InvalidRoute(format!(
            "path must not contain '..': {}",
            path
        )));
    }

    for segment in path[1..].split('/') {
        if segment.is_empty() {
            return Err(PluginError::InvalidRoute(format!(
                "path contains an empty segment: {}",
                path
            )));
        }
        if !segment_is_valid(segment) {
            return Err(PluginError::InvalidRoute(format!(
                "invalid path segment {:?}: {}",
                segment, path
            )));
        }
    }
    Ok(())
}

fn segment_is_valid(segment: &str) -> bool {
    segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '{' | '}'))
}

/// Whether a pattern segment is a `{name}` parameter; returns the name.
fn param_name(segment: &str) -> Option<&str> {
    let inner = segment.strip_prefix('{')?.strip_suffix('}')?;
    if inner.is_empty() {
        return None;
    }
    inner
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
        .then_some(inner)
}

/// Split a pattern and a request path into segments and bind parameters.
///
/// The segment counts must be equal; a root pattern only matches `/`.
fn match_pattern(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    if pattern == "/" {
        return (path == "/" || path.is_empty()).then(HashMap::new);
    }

    let pattern_parts: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let path_parts: Vec<&str> = path.trim_matches('/').split('/').collect();

    if pattern_parts.len() != path_parts.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (pattern_part, path_part) in pattern_parts.iter().zip(&path_parts) {
        if let Some(name) = param_name(pattern_part) {
            if path_part.is_empty() {
                return None;
            }
            params.insert(name.to_string(), path_part.to_string());
        } else if pattern_part != path_part {
            return None;
        }
    }
    Some(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(path: &str, methods: &[&str]) -> RouteSpec {
        RouteSpec {
            path: path.to_string(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            requires_auth: false,
            admin_only: false,
            description: String::new(),
        }
    }

    #[test]
    fn test_validate_accepts_params() {
        let route = HttpRoute::validate(&spec("/users/{id}", &["GET", "DELETE"])).unwrap();
        assert_eq!(route.methods, vec![Method::GET, Method::DELETE]);
    }

    #[test]
    fn test_validate_accepts_root() {
        assert!(HttpRoute::validate(&spec("/", &["GET"])).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_path() {
        assert!(HttpRoute::validate(&spec("", &["GET"])).is_err());
    }

    #[test]
    fn test_validate_rejects_relative_path() {
        assert!(HttpRoute::validate(&spec("foo", &["GET"])).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_segment() {
        assert!(HttpRoute::validate(&spec("/a//b", &["GET"])).is_err());
    }

    #[test]
    fn test_validate_rejects_traversal() {
        assert!(HttpRoute::validate(&spec("/a/../b", &["GET"])).is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_method() {
        assert!(HttpRoute::validate(&spec("/a", &["TRACE"])).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_methods() {
        assert!(HttpRoute::validate(&spec("/a", &[])).is_err());
    }

    #[test]
    fn test_validate_lowercase_method_accepted() {
        let route = HttpRoute::validate(&spec("/a", &["get"])).unwrap();
        assert!(route.allows_method(&Method::GET));
    }

    #[test]
    fn test_match_binds_params() {
        let route = HttpRoute::validate(&spec("/users/{id}/items/{item}", &["GET"])).unwrap();
        let params = route.match_path("/users/7/items/rope").unwrap();
        assert_eq!(params["id"], "7");
        assert_eq!(params["item"], "rope");
    }

    #[test]
    fn test_match_rejects_extra_segments() {
        let route = HttpRoute::validate(&spec("/users/{id}", &["GET"])).unwrap();
        assert!(route.match_path("/users/7/extra").is_none());
        assert!(route.match_path("/users").is_none());
    }

    #[test]
    fn test_match_root_only_matches_root() {
        let route = HttpRoute::validate(&spec("/", &["GET"])).unwrap();
        assert!(route.match_path("/").is_some());
        assert!(route.match_path("/anything").is_none());
    }

    #[test]
    fn test_match_literal_segments() {
        let route = HttpRoute::validate(&spec("/status", &["GET"])).unwrap();
        assert!(route.match_path("/status").is_some());
        assert!(route.match_path("/other").is_none());
    }
}
