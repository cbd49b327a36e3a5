use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::{
    client::{CommandResult, CommandSpec, VmRpc},
    config::RpcConfig,
    errors::RpcError,
};

/// Response envelope returned by every RPC operation.
#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

/// JSON-over-HTTP client: each operation is `POST {endpoint}/v1/{op}`.
pub struct HttpVmRpc {
    client: reqwest::Client,
    cfg: RpcConfig,
}

impl HttpVmRpc {
    pub fn new(cfg: RpcConfig) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .connect_timeout(cfg.request_timeout)
            .timeout(cfg.request_timeout)
            .build()?;
        Ok(Self { client, cfg })
    }

    pub fn endpoint(&self) -> &str {
        &self.cfg.endpoint
    }

    async fn call<T: DeserializeOwned>(&self, op: &'static str, body: Value) -> Result<T, RpcError> {
        let url = format!("{}/v1/{}", self.cfg.endpoint.trim_end_matches('/'), op);
        trace!(target: "vmwrap.rpc", op, %url, "call");

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        let envelope: Envelope = serde_json::from_str(&text).map_err(|e| {
            RpcError::InvalidResponse(format!("{op}: {e}, status: {status}, body: {text}"))
        })?;
        decode(op, envelope)
    }
}

fn decode<T: DeserializeOwned>(op: &'static str, envelope: Envelope) -> Result<T, RpcError> {
    if !envelope.success {
        return Err(RpcError::Rejected {
            op,
            message: envelope.message,
        });
    }
    serde_json::from_value(envelope.data)
        .map_err(|e| RpcError::InvalidResponse(format!("{op}: unexpected data: {e}")))
}

#[async_trait]
impl VmRpc for HttpVmRpc {
    async fn create(&self, vm: &str, image: &str) -> Result<(), RpcError> {
        self.call("create", json!({ "vm": vm, "image": image })).await
    }

    async fn start(&self, vm: &str) -> Result<(), RpcError> {
        self.call("start", json!({ "vm": vm })).await
    }

    async fn pause(&self, vm: &str) -> Result<(), RpcError> {
        self.call("pause", json!({ "vm": vm })).await
    }

    async fn unpause(&self, vm: &str) -> Result<(), RpcError> {
        self.call("unpause", json!({ "vm": vm })).await
    }

    async fn restore_snapshot(&self, vm: &str) -> Result<bool, RpcError> {
        self.call("restore_snapshot", json!({ "vm": vm })).await
    }

    async fn save_snapshot(&self, vm: &str) -> Result<(), RpcError> {
        self.call("save_snapshot", json!({ "vm": vm })).await
    }

    async fn save_state(&self, vm: &str) -> Result<(), RpcError> {
        self.call("save_state", json!({ "vm": vm })).await
    }

    async fn ping(&self, vm: Option<&str>) -> Result<bool, RpcError> {
        match self.call::<bool>("ping", json!({ "vm": vm })).await {
            Ok(alive) => Ok(alive),
            Err(e) if e.is_connectivity() => {
                debug!(target: "vmwrap.rpc", ?vm, error = %e, "ping: endpoint not reachable");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn submit_command(&self, vm: &str, cmd: &CommandSpec) -> Result<String, RpcError> {
        self.call("submit_command", json!({ "vm": vm, "command": cmd }))
            .await
    }

    async fn list_finished_commands(&self, vm: &str) -> Result<Vec<String>, RpcError> {
        self.call("list_finished_commands", json!({ "vm": vm }))
            .await
    }

    async fn get_command_result(&self, vm: &str, id: &str) -> Result<CommandResult, RpcError> {
        self.call("get_command_result", json!({ "vm": vm, "id": id }))
            .await
    }

    async fn copy_file_in(&self, vm: &str, host: &Path, guest: &str) -> Result<(), RpcError> {
        self.call(
            "copy_file_in",
            json!({ "vm": vm, "host_path": host.to_string_lossy(), "guest_path": guest }),
        )
        .await
    }

    async fn copy_file_out(&self, vm: &str, guest: &str, host: &Path) -> Result<(), RpcError> {
        self.call(
            "copy_file_out",
            json!({ "vm": vm, "guest_path": guest, "host_path": host.to_string_lossy() }),
        )
        .await
    }

    async fn list_running(&self) -> Result<Vec<String>, RpcError> {
        self.call("list_running", json!({})).await
    }

    async fn list_available(&self) -> Result<Vec<String>, RpcError> {
        self.call("list_available", json!({})).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn envelope(raw: &str) -> Envelope {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn decode_unit_from_missing_data() {
        let r: Result<(), _> = decode("start", envelope(r#"{"success": true}"#));
        assert!(r.is_ok());
    }

    #[test]
    fn decode_list() {
        let r: Vec<String> = decode(
            "list_running",
            envelope(r#"{"success": true, "data": ["a", "b"]}"#),
        )
        .unwrap();
        assert_eq!(r, vec!["a", "b"]);
    }

    #[test]
    fn decode_rejection_keeps_message() {
        let r: Result<(), _> = decode(
            "create",
            envelope(r#"{"success": false, "message": "no such image"}"#),
        );
        match r {
            Err(RpcError::Rejected { op, message }) => {
                assert_eq!(op, "create");
                assert_eq!(message, "no such image");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decode_wrong_shape_is_invalid() {
        let r: Result<CommandResult, _> =
            decode("get_command_result", envelope(r#"{"success": true, "data": 5}"#));
        assert!(matches!(r, Err(RpcError::InvalidResponse(_))));
        assert!(!r.unwrap_err().is_connectivity());
    }

    #[tokio::test]
    async fn ping_on_closed_port_is_false() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let rpc = HttpVmRpc::new(RpcConfig {
            endpoint: format!("http://127.0.0.1:{port}"),
            request_timeout: Duration::from_secs(2),
        })
        .unwrap();
        assert!(!rpc.ping(None).await.unwrap());
    }
}
