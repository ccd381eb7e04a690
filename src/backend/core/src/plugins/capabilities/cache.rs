//! Cache capability: per-plugin namespaced key/value storage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::{CacheBackend, CacheEntry};
use crate::plugins::codec::{
    self, CacheDeleteRequest, CacheDeleteResponse, CacheGetRequest, CacheGetResponse,
    CacheSetRequest,
};

use super::{CapabilityError, CapabilityService};

pub struct CacheCapability {
    backend: Arc<dyn CacheBackend>,
}

impl CacheCapability {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Keys are namespaced per plugin so plugins cannot observe each other.
    fn key(plugin_id: &str, key: &str) -> String {
        format!("gshub:plugin:{}:{}", plugin_id, key)
    }
}

#[async_trait]
impl CapabilityService for CacheCapability {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn invoke(
        &self,
        plugin_id: &str,
        method: &str,
        body: &[u8],
    ) -> Result<Vec<u8>, CapabilityError> {
        match method {
            "get" => {
                let request: CacheGetRequest = codec::decode(body)?;
                let value = self
                    .backend
                    .get(&Self::key(plugin_id, &request.key))
                    .await
                    .map_err(|e| CapabilityError::failed(e.to_string()))?;
                let response = CacheGetResponse {
                    found: value.is_some(),
                    value: value.unwrap_or_default(),
                };
                Ok(codec::encode(&response)?)
            }
            "set" => {
                let request: CacheSetRequest = codec::decode(body)?;
                let ttl = (request.ttl_seconds > 0).then(|| Duration::from_secs(request.ttl_seconds));
                self.backend
                    .set(
                        &Self::key(plugin_id, &request.key),
                        CacheEntry::new(request.value, ttl),
                    )
                    .await
                    .map_err(|e| CapabilityError::failed(e.to_string()))?;
                Ok(Vec::new())
            }
            "delete" => {
                let request: CacheDeleteRequest = codec::decode(body)?;
                let deleted = self
                    .backend
                    .delete(&Self::key(plugin_id, &request.key))
                    .await
                    .map_err(|e| CapabilityError::failed(e.to_string()))?;
                Ok(codec::encode(&CacheDeleteResponse { deleted })?)
            }
            other => Err(CapabilityError::UnknownMethod(
                "cache".to_string(),
                other.to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryBackend;

    fn capability() -> CacheCapability {
        CacheCapability::new(Arc::new(InMemoryBackend::new()))
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = capability();

        let set = codec::encode(&CacheSetRequest {
            key: "k".into(),
            value: b"v".to_vec(),
            ttl_seconds: 0,
        })
        .unwrap();
        cache.invoke("p", "set", &set).await.unwrap();

        let get = codec::encode(&CacheGetRequest { key: "k".into() }).unwrap();
        let reply: CacheGetResponse =
            codec::decode(&cache.invoke("p", "get", &get).await.unwrap()).unwrap();
        assert!(reply.found);
        assert_eq!(reply.value, b"v");

        let del = codec::encode(&CacheDeleteRequest { key: "k".into() }).unwrap();
        let reply: CacheDeleteResponse =
            codec::decode(&cache.invoke("p", "delete", &del).await.unwrap()).unwrap();
        assert!(reply.deleted);
    }

    #[tokio::test]
    async fn test_plugins_are_namespaced() {
        let cache = capability();

        let set = codec::encode(&CacheSetRequest {
            key: "k".into(),
            value: b"v".to_vec(),
            ttl_seconds: 0,
        })
        .unwrap();
        cache.invoke("plugin_a", "set", &set).await.unwrap();

        let get = codec::encode(&CacheGetRequest { key: "k".into() }).unwrap();
        let reply: CacheGetResponse =
            codec::decode(&cache.invoke("plugin_b", "get", &get).await.unwrap()).unwrap();
        assert!(!reply.found);
    }
}
