//! HTTP egress capability: outbound fetches on behalf of plugins.
//!
//! No streaming; the whole response is buffered and bounded by the
//! configured cap.

use std::time::Duration;

use async_trait::async_trait;

use crate::plugins::codec::{self, FetchRequest, FetchResponse};

use super::{CapabilityError, CapabilityService};

pub struct HttpEgressCapability {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpEgressCapability {
    pub fn new(client: reqwest::Client, max_body_bytes: usize) -> Self {
        Self {
            client,
            max_body_bytes,
        }
    }

    async fn fetch(&self, plugin_id: &str, request: FetchRequest) -> Result<FetchResponse, CapabilityError> {
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| CapabilityError::failed(format!("invalid method: {}", request.method)))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(Duration::from_secs(request.timeout_seconds.clamp(1, 300)));

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        tracing::debug!(plugin = plugin_id, url = %request.url, "Plugin egress fetch");

        let response = builder
            .send()
            .await
            .map_err(|e| CapabilityError::failed(format!("fetch failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| CapabilityError::failed(format!("read body failed: {}", e)))?;
        if body.len() > self.max_body_bytes {
            return Err(CapabilityError::failed(format!(
                "response body exceeds {} bytes",
                self.max_body_bytes
            )));
        }

        Ok(FetchResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

#[async_trait]
impl CapabilityService for HttpEgressCapability {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn invoke(
        &self,
        plugin_id: &str,
        method: &str,
        body: &[u8],
    ) -> Result<Vec<u8>, CapabilityError> {
        match method {
            "fetch" => {
                let request: FetchRequest = codec::decode(body)?;
                let response = self.fetch(plugin_id, request).await?;
                Ok(codec::encode(&response)?)
            }
            other => Err(CapabilityError::UnknownMethod(
                "http".to_string(),
                other.to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn capability(max_body: usize) -> HttpEgressCapability {
        HttpEgressCapability::new(reqwest::Client::new(), max_body)
    }

    #[tokio::test]
    async fn test_fetch_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("x-source", "gshub"))
            .respond_with(ResponseTemplate::new(201).set_body_string("created"))
            .mount(&server)
            .await;

        let request = codec::encode(&FetchRequest {
            method: "post".into(),
            url: format!("{}/hook", server.uri()),
            headers: vec![("x-source".into(), "gshub".into())],
            body: b"payload".to_vec(),
            timeout_seconds: 5,
        })
        .unwrap();

        let reply: FetchResponse = codec::decode(
            &capability(1024)
                .invoke("p", "fetch", &request)
                .await
                .unwrap(),
        )
        .unwrap();

        assert_eq!(reply.status, 201);
        assert_eq!(reply.body, b"created");
    }

    #[tokio::test]
    async fn test_fetch_body_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
            .mount(&server)
            .await;

        let request = codec::encode(&FetchRequest {
            method: "GET".into(),
            url: format!("{}/big", server.uri()),
            headers: Vec::new(),
            body: Vec::new(),
            timeout_seconds: 5,
        })
        .unwrap();

        let err = capability(16)
            .invoke("p", "fetch", &request)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }
}
