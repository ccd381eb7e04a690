//! Log capability: structured logging from guests into the host tracing
//! pipeline.

use async_trait::async_trait;

use crate::plugins::codec::{self, LogLevel, LogRequest};

use super::{CapabilityError, CapabilityService};

pub struct LogCapability;

#[async_trait]
impl CapabilityService for LogCapability {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn invoke(
        &self,
        plugin_id: &str,
        method: &str,
        body: &[u8],
    ) -> Result<Vec<u8>, CapabilityError> {
        match method {
            "log" => {
                let request: LogRequest = codec::decode(body)?;
                emit(plugin_id, &request);
                Ok(Vec::new())
            }
            other => Err(CapabilityError::UnknownMethod(
                "log".to_string(),
                other.to_string(),
            )),
        }
    }
}

fn emit(plugin_id: &str, request: &LogRequest) {
    // Fields are flattened into one string; guests attach few of them and
    // the plugin id is the dimension operators filter on.
    let fields = request
        .fields
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ");

    match request.level {
        LogLevel::Debug => {
            tracing::debug!(plugin = plugin_id, fields = %fields, "{}", request.message)
        }
        LogLevel::Info => {
            tracing::info!(plugin = plugin_id, fields = %fields, "{}", request.message)
        }
        LogLevel::Warn => {
            tracing::warn!(plugin = plugin_id, fields = %fields, "{}", request.message)
        }
        LogLevel::Error => {
            tracing::error!(plugin = plugin_id, fields = %fields, "{}", request.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_returns_empty_response() {
        let capability = LogCapability;
        let body = codec::encode(&LogRequest {
            level: LogLevel::Info,
            message: "hello from guest".into(),
            fields: vec![("server".into(), "7".into())],
        })
        .unwrap();

        let reply = capability.invoke("p", "log", &body).await.unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_method_rejected() {
        let capability = LogCapability;
        assert!(capability.invoke("p", "nope", &[]).await.is_err());
    }
}
