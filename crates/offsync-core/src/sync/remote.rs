//! Remote service contract
//!
//! The engine treats the server as an opaque request/response service.
//! Responses are classified into success, retryable failure and
//! non-retryable rejection; transport-level failures are a separate error
//! type because they also tell us connectivity is gone.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::{Method, QueuedAsset};

/// Response from the remote service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// How the engine should treat a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    /// Server-side or throttling failure; try again on a later drain
    Retryable,
    /// Refused by contract; retrying the same payload cannot succeed
    Rejected,
}

impl RemoteResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, serde_json::to_vec(body).unwrap_or_default())
    }

    pub fn classify(&self) -> ResponseClass {
        match self.status {
            200..=299 => ResponseClass::Success,
            408 | 429 => ResponseClass::Retryable,
            400..=499 => ResponseClass::Rejected,
            _ => ResponseClass::Retryable,
        }
    }

    pub fn is_success(&self) -> bool {
        self.classify() == ResponseClass::Success
    }

    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Body as text, truncated for log lines and error records
    pub fn body_excerpt(&self) -> String {
        const MAX: usize = 200;
        let text = String::from_utf8_lossy(&self.body);
        if text.chars().count() <= MAX {
            text.into_owned()
        } else {
            let cut: String = text.chars().take(MAX).collect();
            format!("{}...", cut)
        }
    }
}

/// The request never produced a response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("remote unreachable: {0}")]
    Unreachable(String),
    #[error("request timed out")]
    Timeout,
}

/// Mutating calls and uploads against the remote service
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn call(
        &self,
        method: Method,
        target_path: &str,
        payload: &[u8],
    ) -> Result<RemoteResponse, TransportError>;

    async fn upload_asset(&self, asset: &QueuedAsset) -> Result<RemoteResponse, TransportError>;
}

/// Independent liveness check used by the connectivity monitor
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// `true` if the remote service answered
    async fn check(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify() {
        assert_eq!(RemoteResponse::new(201, "").classify(), ResponseClass::Success);
        assert_eq!(RemoteResponse::new(204, "").classify(), ResponseClass::Success);
        assert_eq!(RemoteResponse::new(503, "").classify(), ResponseClass::Retryable);
        assert_eq!(RemoteResponse::new(429, "").classify(), ResponseClass::Retryable);
        assert_eq!(RemoteResponse::new(408, "").classify(), ResponseClass::Retryable);
        assert_eq!(RemoteResponse::new(422, "").classify(), ResponseClass::Rejected);
        assert_eq!(RemoteResponse::new(404, "").classify(), ResponseClass::Rejected);
    }

    #[test]
    fn test_body_json() {
        let response = RemoteResponse::json(201, &json!({"id": 42}));
        assert_eq!(response.body_json().unwrap()["id"], 42);
        assert!(RemoteResponse::new(500, "oops").body_json().is_none());
    }

    #[test]
    fn test_body_excerpt_truncates() {
        let long = "x".repeat(500);
        let excerpt = RemoteResponse::new(500, long).body_excerpt();
        assert_eq!(excerpt.len(), 203);
        assert!(excerpt.ends_with("..."));
    }
}
