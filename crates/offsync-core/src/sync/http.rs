//! HTTP implementation of the remote contract
//!
//! CREATE/UPDATE/DELETE map to POST/PUT/DELETE with a JSON body. Assets are
//! POSTed raw to the upload path. Liveness is a GET of the health path.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::remote::{LivenessProbe, RemoteResponse, RemoteService, TransportError};
use crate::config::Config;
use crate::models::{Method, QueuedAsset};

/// Remote service reached over HTTP
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    health_path: String,
    upload_path: String,
}

impl HttpRemote {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            health_path: "/api/health".to_string(),
            upload_path: "/api/uploads".to_string(),
        })
    }

    /// Build from configuration; `None` when no server is configured
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        let Some(ref server_url) = config.server_url else {
            return Ok(None);
        };

        let mut remote = Self::new(server_url, config.request_timeout())?;
        remote.health_path = config.health_path.clone();
        remote.upload_path = config.upload_path.clone();
        Ok(Some(remote))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn call(
        &self,
        method: Method,
        target_path: &str,
        payload: &[u8],
    ) -> Result<RemoteResponse, TransportError> {
        let url = self.url(target_path);
        debug!("{} {}", method, url);

        let request = match method {
            Method::Create => self.client.post(&url),
            Method::Update => self.client.put(&url),
            Method::Delete => self.client.delete(&url),
        };
        let request = if payload.is_empty() {
            request
        } else {
            request
                .header(CONTENT_TYPE, "application/json")
                .body(payload.to_vec())
        };

        let response = request.send().await.map_err(transport_error)?;
        read_response(response).await
    }

    async fn upload_asset(&self, asset: &QueuedAsset) -> Result<RemoteResponse, TransportError> {
        let url = self.url(&self.upload_path);
        debug!("Uploading {} ({} bytes) to {}", asset.id, asset.size_bytes, url);

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, header_safe(&asset.mime_type))
            .header("X-File-Name", header_safe(&asset.name))
            .header("X-Asset-Id", header_safe(&asset.id))
            .body(asset.content.clone())
            .send()
            .await
            .map_err(transport_error)?;

        read_response(response).await
    }
}

#[async_trait]
impl LivenessProbe for HttpRemote {
    async fn check(&self) -> bool {
        match self.client.get(self.url(&self.health_path)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Liveness check failed: {}", e);
                false
            }
        }
    }
}

async fn read_response(response: reqwest::Response) -> Result<RemoteResponse, TransportError> {
    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(transport_error)?;
    Ok(RemoteResponse::new(status, body.to_vec()))
}

fn transport_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Unreachable(error.to_string())
    }
}

/// Header values must be visible ASCII
fn header_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let remote = HttpRemote::new("http://localhost:5000/", Duration::from_secs(5)).unwrap();

        assert_eq!(remote.base_url(), "http://localhost:5000");
        assert_eq!(remote.url("/api/members"), "http://localhost:5000/api/members");
        assert_eq!(remote.url("api/members"), "http://localhost:5000/api/members");
        assert_eq!(
            remote.url("https://cdn.example.org/x"),
            "https://cdn.example.org/x"
        );
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        assert!(HttpRemote::from_config(&config).unwrap().is_none());

        config.server_url = Some("https://members.example.org".to_string());
        config.upload_path = "/files".to_string();
        let remote = HttpRemote::from_config(&config).unwrap().unwrap();
        assert_eq!(remote.url(&remote.upload_path), "https://members.example.org/files");
    }

    #[test]
    fn test_header_safe() {
        assert_eq!(header_safe("café photo.jpg"), "caf_ photo.jpg");
        assert_eq!(header_safe("image/png"), "image/png");
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        // Port 9 (discard) on localhost is closed on test machines
        let remote = HttpRemote::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();

        assert!(!remote.check().await);
        let err = remote
            .call(Method::Delete, "/api/members/1", b"")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Unreachable(_) | TransportError::Timeout
        ));
    }
}
