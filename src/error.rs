use reqwest::StatusCode;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status} for {url}: {body}")]
    Status {
        status: StatusCode,
        url: String,
        body: String,
    },

    #[error("unexpected payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Transport(_) => "transport",
            GatewayError::Status { .. } => "status",
            GatewayError::Decode(_) => "decode",
            GatewayError::Io(_) => "io",
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            GatewayError::Status { status, .. } => Some(*status),
            GatewayError::Transport(err) => err.status(),
            _ => None,
        }
    }

    /// JSON rendering shown to the operator in alerts.
    pub fn to_alert(&self) -> String {
        let url = match self {
            GatewayError::Status { url, .. } => Some(url.clone()),
            GatewayError::Transport(err) => err.url().map(|u| u.to_string()),
            _ => None,
        };
        let alert = json!({
            "kind": self.kind(),
            "status": self.status().map(|s| s.as_u16()),
            "url": url,
            "message": self.to_string(),
        });
        serde_json::to_string_pretty(&alert).unwrap_or_else(|_| self.to_string())
    }
}
