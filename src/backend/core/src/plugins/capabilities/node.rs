//! Node capabilities: filesystem and command execution on dedicated servers,
//! bridged to the gshub daemon HTTP API.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::Node;
use crate::error::{ErrorCode, GshubError, Result};
use crate::plugins::codec::{
    self, ExecuteCommandRequest, ExecuteCommandResponse, FileInfo, NodeFsAck, NodeFsInfoResponse,
    NodeFsListResponse, NodeFsRequest,
};
use crate::repo::NodeRepository;

use super::{CapabilityError, CapabilityService};

// ═══════════════════════════════════════════════════════════════════════════════
// Node gateway
// ═══════════════════════════════════════════════════════════════════════════════

/// Transport to a node's daemon. The HTTP implementation below talks to the
/// daemon REST API; tests substitute scripted gateways.
#[async_trait]
pub trait NodeGateway: Send + Sync {
    async fn read_dir(&self, node: &Node, path: &str) -> Result<Vec<FileInfo>>;
    async fn mkdir(&self, node: &Node, path: &str) -> Result<()>;
    async fn copy(&self, node: &Node, source: &str, destination: &str) -> Result<()>;
    async fn move_entry(&self, node: &Node, source: &str, destination: &str) -> Result<()>;
    /// Fetch `source_url` onto the node at `destination`.
    async fn download(&self, node: &Node, source_url: &str, destination: &str) -> Result<()>;
    /// Push the node-local `source` to `destination_url`.
    async fn upload(&self, node: &Node, source: &str, destination_url: &str) -> Result<()>;
    async fn remove(&self, node: &Node, path: &str, recursive: bool) -> Result<()>;
    async fn file_info(&self, node: &Node, path: &str) -> Result<FileInfo>;
    async fn chmod(&self, node: &Node, path: &str, mode: u32) -> Result<()>;
    async fn execute(
        &self,
        node: &Node,
        command: &str,
        work_dir: Option<&str>,
    ) -> Result<(String, i32)>;
}

/// Gateway speaking the daemon REST API over HTTP.
pub struct DaemonHttpGateway {
    client: reqwest::Client,
}

#[derive(Serialize)]
struct PathBody<'a> {
    path: &'a str,
}

#[derive(Serialize)]
struct TransferBody<'a> {
    source: &'a str,
    destination: &'a str,
}

#[derive(Serialize)]
struct RemoveBody<'a> {
    path: &'a str,
    recursive: bool,
}

#[derive(Serialize)]
struct ChmodBody<'a> {
    path: &'a str,
    mode: u32,
}

#[derive(Serialize)]
struct ExecBody<'a> {
    command: &'a str,
    work_dir: Option<&'a str>,
}

#[derive(Deserialize)]
struct ListReply {
    entries: Vec<FileInfo>,
}

#[derive(Deserialize)]
struct InfoReply {
    info: FileInfo,
}

#[derive(Deserialize)]
struct ExecReply {
    output: String,
    exit_code: i32,
}

impl DaemonHttpGateway {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn url(node: &Node, path: &str) -> String {
        format!("http://{}:{}/api{}", node.host, node.port, path)
    }

    async fn post<B: Serialize>(&self, node: &Node, path: &str, body: &B) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(Self::url(node, path))
            .bearer_auth(&node.daemon_token)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GshubError::with_internal(
                ErrorCode::NodeGatewayError,
                "Node daemon rejected the request",
                format!("node {} {} -> {}", node.id, path, response.status()),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl NodeGateway for DaemonHttpGateway {
    async fn read_dir(&self, node: &Node, path: &str) -> Result<Vec<FileInfo>> {
        let reply: ListReply = self
            .post(node, "/fs/list", &PathBody { path })
            .await?
            .json()
            .await?;
        Ok(reply.entries)
    }

    async fn mkdir(&self, node: &Node, path: &str) -> Result<()> {
        self.post(node, "/fs/mkdir", &PathBody { path }).await?;
        Ok(())
    }

    async fn copy(&self, node: &Node, source: &str, destination: &str) -> Result<()> {
        self.post(node, "/fs/copy", &TransferBody { source, destination })
            .await?;
        Ok(())
    }

    async fn move_entry(&self, node: &Node, source: &str, destination: &str) -> Result<()> {
        self.post(node, "/fs/move", &TransferBody { source, destination })
            .await?;
        Ok(())
    }

    async fn download(&self, node: &Node, source_url: &str, destination: &str) -> Result<()> {
        self.post(
            node,
            "/fs/download",
            &TransferBody {
                source: source_url,
                destination,
            },
        )
        .await?;
        Ok(())
    }

    async fn upload(&self, node: &Node, source: &str, destination_url: &str) -> Result<()> {
        self.post(
            node,
            "/fs/upload",
            &TransferBody {
                source,
                destination: destination_url,
            },
        )
        .await?;
        Ok(())
    }

    async fn remove(&self, node: &Node, path: &str, recursive: bool) -> Result<()> {
        self.post(node, "/fs/remove", &RemoveBody { path, recursive })
            .await?;
        Ok(())
    }

    async fn file_info(&self, node: &Node, path: &str) -> Result<FileInfo> {
        let reply: InfoReply = self
            .post(node, "/fs/info", &PathBody { path })
            .await?
            .json()
            .await?;
        Ok(reply.info)
    }

    async fn chmod(&self, node: &Node, path: &str, mode: u32) -> Result<()> {
        self.post(node, "/fs/chmod", &ChmodBody { path, mode })
            .await?;
        Ok(())
    }

    async fn execute(
        &self,
        node: &Node,
        command: &str,
        work_dir: Option<&str>,
    ) -> Result<(String, i32)> {
        let reply: ExecReply = self
            .post(node, "/exec", &ExecBody { command, work_dir })
            .await?
            .json()
            .await?;
        Ok((reply.output, reply.exit_code))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Capabilities
// ═══════════════════════════════════════════════════════════════════════════════

pub struct NodeFsCapability {
    nodes: Arc<dyn NodeRepository>,
    gateway: Arc<dyn NodeGateway>,
}

impl NodeFsCapability {
    pub fn new(nodes: Arc<dyn NodeRepository>, gateway: Arc<dyn NodeGateway>) -> Self {
        Self { nodes, gateway }
    }

    async fn node(&self, id: i64) -> std::result::Result<Node, CapabilityError> {
        self.nodes
            .get(id)
            .await
            .map_err(|e| CapabilityError::failed(e.to_string()))?
            .ok_or_else(|| CapabilityError::failed(format!("node not found: {}", id)))
    }
}

fn destination(request: &NodeFsRequest) -> std::result::Result<&str, CapabilityError> {
    request
        .destination
        .as_deref()
        .ok_or_else(|| CapabilityError::failed("missing destination"))
}

#[async_trait]
impl CapabilityService for NodeFsCapability {
    fn name(&self) -> &'static str {
        "node_fs"
    }

    async fn invoke(
        &self,
        _plugin_id: &str,
        method: &str,
        body: &[u8],
    ) -> std::result::Result<Vec<u8>, CapabilityError> {
        let request: NodeFsRequest = codec::decode(body)?;
        let node = self.node(request.node_id).await?;
        let gateway = &self.gateway;

        let failed = |e: GshubError| CapabilityError::failed(e.to_string());

        match method {
            "read_dir" => {
                let entries = gateway
                    .read_dir(&node, &request.path)
                    .await
                    .map_err(failed)?;
                Ok(codec::encode(&NodeFsListResponse { entries })?)
            }
            "mkdir" => {
                gateway.mkdir(&node, &request.path).await.map_err(failed)?;
                Ok(codec::encode(&NodeFsAck {})?)
            }
            "copy" => {
                gateway
                    .copy(&node, &request.path, destination(&request)?)
                    .await
                    .map_err(failed)?;
                Ok(codec::encode(&NodeFsAck {})?)
            }
            "move" => {
                gateway
                    .move_entry(&node, &request.path, destination(&request)?)
                    .await
                    .map_err(failed)?;
                Ok(codec::encode(&NodeFsAck {})?)
            }
            "download" => {
                gateway
                    .download(&node, &request.path, destination(&request)?)
                    .await
                    .map_err(failed)?;
                Ok(codec::encode(&NodeFsAck {})?)
            }
            "upload" => {
                gateway
                    .upload(&node, &request.path, destination(&request)?)
                    .await
                    .map_err(failed)?;
                Ok(codec::encode(&NodeFsAck {})?)
            }
            "remove" => {
                gateway
                    .remove(&node, &request.path, request.recursive)
                    .await
                    .map_err(failed)?;
                Ok(codec::encode(&NodeFsAck {})?)
            }
            "file_info" => {
                let info = gateway
                    .file_info(&node, &request.path)
                    .await
                    .map_err(failed)?;
                Ok(codec::encode(&NodeFsInfoResponse { info })?)
            }
            "chmod" => {
                let mode = request
                    .mode
                    .ok_or_else(|| CapabilityError::failed("missing mode"))?;
                gateway
                    .chmod(&node, &request.path, mode)
                    .await
                    .map_err(failed)?;
                Ok(codec::encode(&NodeFsAck {})?)
            }
            other => Err(CapabilityError::UnknownMethod(
                "node_fs".to_string(),
                other.to_string(),
            )),
        }
    }
}

pub struct NodeCommandCapability {
    nodes: Arc<dyn NodeRepository>,
    gateway: Arc<dyn NodeGateway>,
}

impl NodeCommandCapability {
    pub fn new(nodes: Arc<dyn NodeRepository>, gateway: Arc<dyn NodeGateway>) -> Self {
        Self { nodes, gateway }
    }
}

#[async_trait]
impl CapabilityService for NodeCommandCapability {
    fn name(&self) -> &'static str {
        "node_command"
    }

    async fn invoke(
        &self,
        plugin_id: &str,
        method: &str,
        body: &[u8],
    ) -> std::result::Result<Vec<u8>, CapabilityError> {
        match method {
            "execute" => {
                let request: ExecuteCommandRequest = codec::decode(body)?;
                let node = self
                    .nodes
                    .get(request.node_id)
                    .await
                    .map_err(|e| CapabilityError::failed(e.to_string()))?
                    .ok_or_else(|| {
                        CapabilityError::failed(format!("node not found: {}", request.node_id))
                    })?;

                tracing::info!(
                    plugin = plugin_id,
                    node = node.id,
                    command = %request.command,
                    "Plugin command execution"
                );

                let response = match self
                    .gateway
                    .execute(&node, &request.command, request.work_dir.as_deref())
                    .await
                {
                    Ok((output, exit_code)) => ExecuteCommandResponse {
                        output,
                        exit_code,
                        error: None,
                    },
                    Err(e) => ExecuteCommandResponse {
                        output: String::new(),
                        exit_code: -1,
                        error: Some(e.to_string()),
                    },
                };
                Ok(codec::encode(&response)?)
            }
            other => Err(CapabilityError::UnknownMethod(
                "node_command".to_string(),
                other.to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::memory::MemoryNodeRepository;

    pub(crate) struct ScriptedGateway;

    #[async_trait]
    impl NodeGateway for ScriptedGateway {
        async fn read_dir(&self, _node: &Node, _path: &str) -> Result<Vec<FileInfo>> {
            Ok(vec![FileInfo {
                name: "server.cfg".into(),
                size: 10,
                is_dir: false,
                mode: 0o644,
                modified_at: 0,
            }])
        }

        async fn mkdir(&self, _node: &Node, _path: &str) -> Result<()> {
            Ok(())
        }

        async fn copy(&self, _node: &Node, _source: &str, _destination: &str) -> Result<()> {
            Ok(())
        }

        async fn move_entry(&self, _node: &Node, _source: &str, _destination: &str) -> Result<()> {
            Ok(())
        }

        async fn download(&self, _node: &Node, _source: &str, _destination: &str) -> Result<()> {
            Ok(())
        }

        async fn upload(&self, _node: &Node, _source: &str, _destination: &str) -> Result<()> {
            Ok(())
        }

        async fn remove(&self, _node: &Node, _path: &str, _recursive: bool) -> Result<()> {
            Ok(())
        }

        async fn file_info(&self, _node: &Node, path: &str) -> Result<FileInfo> {
            Ok(FileInfo {
                name: path.to_string(),
                size: 0,
                is_dir: true,
                mode: 0o755,
                modified_at: 0,
            })
        }

        async fn chmod(&self, _node: &Node, _path: &str, _mode: u32) -> Result<()> {
            Ok(())
        }

        async fn execute(
            &self,
            _node: &Node,
            command: &str,
            _work_dir: Option<&str>,
        ) -> Result<(String, i32)> {
            Ok((format!("ran: {}", command), 0))
        }
    }

    fn test_node() -> Node {
        Node {
            id: 1,
            name: "node-1".into(),
            host: "127.0.0.1".into(),
            port: 31717,
            daemon_token: "secret".into(),
            os: "linux".into(),
        }
    }

    #[tokio::test]
    async fn test_read_dir() {
        let nodes = Arc::new(MemoryNodeRepository::default());
        nodes.insert(test_node());
        let capability = NodeFsCapability::new(nodes, Arc::new(ScriptedGateway));

        let request = codec::encode(&NodeFsRequest {
            node_id: 1,
            path: "/srv".into(),
            destination: None,
            recursive: false,
            mode: None,
        })
        .unwrap();

        let reply: NodeFsListResponse =
            codec::decode(&capability.invoke("p", "read_dir", &request).await.unwrap()).unwrap();
        assert_eq!(reply.entries.len(), 1);
        assert_eq!(reply.entries[0].name, "server.cfg");
    }

    #[tokio::test]
    async fn test_unknown_node_is_error() {
        let capability = NodeFsCapability::new(
            Arc::new(MemoryNodeRepository::default()),
            Arc::new(ScriptedGateway),
        );

        let request = codec::encode(&NodeFsRequest {
            node_id: 99,
            path: "/".into(),
            destination: None,
            recursive: false,
            mode: None,
        })
        .unwrap();

        assert!(capability.invoke("p", "read_dir", &request).await.is_err());
    }

    #[tokio::test]
    async fn test_execute_command() {
        let nodes = Arc::new(MemoryNodeRepository::default());
        nodes.insert(test_node());
        let capability = NodeCommandCapability::new(nodes, Arc::new(ScriptedGateway));

        let request = codec::encode(&ExecuteCommandRequest {
            node_id: 1,
            command: "uptime".into(),
            work_dir: None,
        })
        .unwrap();

        let reply: ExecuteCommandResponse =
            codec::decode(&capability.invoke("p", "execute", &request).await.unwrap()).unwrap();
        assert_eq!(reply.exit_code, 0);
        assert_eq!(reply.output, "ran: uptime");
        assert!(reply.error.is_none());
    }
}
