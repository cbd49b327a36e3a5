use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Base URL of the RPC service, e.g. `http://127.0.0.1:8765`.
    pub endpoint: String,
    /// Ceiling for a single request, connect included.
    pub request_timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8765".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}
