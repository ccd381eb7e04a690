//! S3-compatible object file store.

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;

use super::{FileStore, FileStoreError, ObjectStoreConfig};

/// File store backed by an S3-compatible object store.
pub struct ObjectFileStore {
    store: AmazonS3,
}

impl ObjectFileStore {
    pub fn new(config: ObjectStoreConfig) -> Result<Self, FileStoreError> {
        let scheme = if config.ssl { "https" } else { "http" };

        let store = AmazonS3Builder::new()
            .with_access_key_id(&config.access_key)
            .with_secret_access_key(&config.secret_key)
            .with_endpoint(format!("{}://{}", scheme, config.endpoint))
            .with_bucket_name(&config.bucket)
            .with_region("us-east-1")
            .with_allow_http(!config.ssl)
            .with_virtual_hosted_style_request(false)
            .build()
            .map_err(|e| FileStoreError::InvalidDsn(e.to_string()))?;

        Ok(Self { store })
    }

    fn map_err(path: &str, error: object_store::Error) -> FileStoreError {
        match error {
            object_store::Error::NotFound { .. } => FileStoreError::NotFound(path.to_string()),
            other => FileStoreError::Backend(other.to_string()),
        }
    }
}

#[async_trait]
impl FileStore for ObjectFileStore {
    async fn read(&self, path: &str) -> Result<Vec<u8>, FileStoreError> {
        let location = ObjectPath::from(path);
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| Self::map_err(path, e))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| Self::map_err(path, e))?;
        Ok(bytes.to_vec())
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<(), FileStoreError> {
        let location = ObjectPath::from(path);
        self.store
            .put(&location, data.to_vec().into())
            .await
            .map_err(|e| Self::map_err(path, e))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), FileStoreError> {
        let location = ObjectPath::from(path);
        self.store
            .delete(&location)
            .await
            .map_err(|e| Self::map_err(path, e))?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, FileStoreError> {
        let location = ObjectPath::from(path);
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(Self::map_err(path, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, FileStoreError> {
        let location = if prefix.is_empty() {
            None
        } else {
            Some(ObjectPath::from(prefix))
        };

        let mut names: Vec<String> = self
            .store
            .list(location.as_ref())
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .map_err(|e| Self::map_err(prefix, e))?;
        names.sort();
        Ok(names)
    }
}
