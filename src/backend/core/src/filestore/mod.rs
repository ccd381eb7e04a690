//! Plugin artifact storage.
//!
//! The loader reads sealed plugin artifacts through the [`FileStore`]
//! abstraction; the backing store is selected by a DSN:
//!
//! - `local:/var/lib/gshub/plugins` (or a bare path) for the local filesystem
//! - `s3://<access>:<secret>@<endpoint>/<bucket>?ssl=<true|false>` for an
//!   S3-compatible object store; `ssl` defaults to true when omitted and a
//!   missing bucket is a configuration error

pub mod local;
pub mod object;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::{ErrorCode, GshubError};

/// Errors produced by file store operations.
#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid file store DSN: {0}")]
    InvalidDsn(String),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FileStoreError> for GshubError {
    fn from(error: FileStoreError) -> Self {
        let code = match &error {
            FileStoreError::NotFound(_) => ErrorCode::ArtifactNotFound,
            FileStoreError::InvalidDsn(_) => ErrorCode::InvalidConfiguration,
            _ => ErrorCode::FileStoreError,
        };
        GshubError::new(code, error.to_string()).with_source(error)
    }
}

/// Polymorphic blob store for plugin artifacts.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>, FileStoreError>;
    async fn write(&self, path: &str, data: &[u8]) -> Result<(), FileStoreError>;
    async fn delete(&self, path: &str) -> Result<(), FileStoreError>;
    async fn exists(&self, path: &str) -> Result<bool, FileStoreError>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>, FileStoreError>;
}

/// Parsed S3-flavoured DSN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStoreConfig {
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: String,
    pub bucket: String,
    pub ssl: bool,
}

impl ObjectStoreConfig {
    /// Parse `s3://<access>:<secret>@<endpoint>/<bucket>?ssl=<bool>`.
    pub fn from_dsn(dsn: &str) -> Result<Self, FileStoreError> {
        let url = url::Url::parse(dsn).map_err(|e| FileStoreError::InvalidDsn(e.to_string()))?;
        if url.scheme() != "s3" {
            return Err(FileStoreError::InvalidDsn(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }

        let endpoint = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(FileStoreError::InvalidDsn("missing endpoint".to_string()));
            }
        };

        let bucket = url
            .path_segments()
            .and_then(|mut segments| segments.next())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FileStoreError::InvalidDsn("missing bucket".to_string()))?
            .to_string();

        let ssl = match url.query_pairs().find(|(k, _)| k == "ssl") {
            Some((_, value)) => match value.as_ref() {
                "true" | "1" => true,
                "false" | "0" => false,
                other => {
                    return Err(FileStoreError::InvalidDsn(format!(
                        "invalid ssl value: {}",
                        other
                    )));
                }
            },
            None => true,
        };

        Ok(Self {
            access_key: url.username().to_string(),
            secret_key: url.password().unwrap_or_default().to_string(),
            endpoint,
            bucket,
            ssl,
        })
    }
}

/// Build a file store from a DSN.
pub fn from_dsn(dsn: &str) -> Result<Arc<dyn FileStore>, FileStoreError> {
    if let Some(path) = dsn.strip_prefix("local:") {
        return Ok(Arc::new(local::LocalFileStore::new(path)));
    }
    if dsn.starts_with("s3://") {
        let config = ObjectStoreConfig::from_dsn(dsn)?;
        return Ok(Arc::new(object::ObjectFileStore::new(config)?));
    }
    // A bare path selects the local store.
    Ok(Arc::new(local::LocalFileStore::new(dsn)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_dsn() {
        let config =
            ObjectStoreConfig::from_dsn("s3://key:secret@minio.local:9000/plugins?ssl=false")
                .unwrap();
        assert_eq!(config.access_key, "key");
        assert_eq!(config.secret_key, "secret");
        assert_eq!(config.endpoint, "minio.local:9000");
        assert_eq!(config.bucket, "plugins");
        assert!(!config.ssl);
    }

    #[test]
    fn test_parse_s3_dsn_ssl_defaults_true() {
        let config = ObjectStoreConfig::from_dsn("s3://key:secret@s3.example.com/bucket").unwrap();
        assert!(config.ssl);
    }

    #[test]
    fn test_parse_s3_dsn_missing_bucket() {
        let err = ObjectStoreConfig::from_dsn("s3://key:secret@s3.example.com").unwrap_err();
        assert!(matches!(err, FileStoreError::InvalidDsn(_)));

        let err = ObjectStoreConfig::from_dsn("s3://key:secret@s3.example.com/").unwrap_err();
        assert!(matches!(err, FileStoreError::InvalidDsn(_)));
    }

    #[test]
    fn test_parse_s3_dsn_bad_ssl() {
        let err =
            ObjectStoreConfig::from_dsn("s3://key:secret@s3.example.com/bucket?ssl=maybe")
                .unwrap_err();
        assert!(matches!(err, FileStoreError::InvalidDsn(_)));
    }
}
