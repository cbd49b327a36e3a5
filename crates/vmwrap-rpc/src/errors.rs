use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("rpc request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("invalid rpc response: {0}")]
    InvalidResponse(String),

    #[error("rpc service rejected `{op}`: {message}")]
    Rejected { op: &'static str, message: String },

    #[error("rpc service unreachable: {0}")]
    Unreachable(String),
}

impl RpcError {
    /// Returns `true` if the failure looks like lost connectivity rather than a refused operation.
    pub fn is_connectivity(&self) -> bool {
        match self {
            RpcError::HttpRequest(e) => e.is_connect() || e.is_timeout(),
            RpcError::Unreachable(_) => true,
            RpcError::InvalidResponse(_) | RpcError::Rejected { .. } => false,
        }
    }
}
