//! Verification collaborators.

use anyhow::{Context, Result};
use async_trait::async_trait;
use launchpad_common::{DeploymentId, VerificationOutcome, VerificationProvider};
use std::time::Duration;

/// Always returns the configured answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticVerifier {
    complete: bool,
}

impl StaticVerifier {
    pub fn new(complete: bool) -> Self {
        Self { complete }
    }
}

#[async_trait]
impl VerificationProvider for StaticVerifier {
    async fn verify(&self, _deployment_id: &DeploymentId, step: &str) -> Result<VerificationOutcome> {
        if self.complete {
            Ok(VerificationOutcome::complete())
        } else {
            Ok(VerificationOutcome::incomplete(format!(
                "no verification configured for {}",
                step
            )))
        }
    }
}

/// GETs a health endpoint; any 2xx means verified.
///
/// Connection failures are reported as incomplete, not as errors: an
/// unreachable service is simply not verified yet.
#[derive(Debug, Clone)]
pub struct HttpHealthVerifier {
    url: String,
    client: reqwest::Client,
}

impl HttpHealthVerifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl VerificationProvider for HttpHealthVerifier {
    async fn verify(&self, deployment_id: &DeploymentId, _step: &str) -> Result<VerificationOutcome> {
        match self.client.get(&self.url).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(deployment = %deployment_id, url = %self.url, "health check passed");
                Ok(VerificationOutcome::complete())
            }
            Ok(response) => Ok(VerificationOutcome::incomplete(format!(
                "{} returned {}",
                self.url,
                response.status()
            ))),
            Err(e) => Ok(VerificationOutcome::incomplete(format!(
                "{} unreachable: {}",
                self.url, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on an ephemeral port.
    async fn one_shot_server(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{}/health", addr)
    }

    #[tokio::test]
    async fn test_static_verifier() {
        let id = DeploymentId::new("d1");
        assert!(StaticVerifier::new(true).verify(&id, "verified").await.unwrap().complete);
        let outcome = StaticVerifier::new(false).verify(&id, "verified").await.unwrap();
        assert!(!outcome.complete);
        assert!(outcome.details.unwrap().contains("verified"));
    }

    #[tokio::test]
    async fn test_http_verifier_accepts_2xx() {
        let url = one_shot_server("HTTP/1.1 200 OK").await;
        let verifier = HttpHealthVerifier::new(url, Duration::from_secs(5)).unwrap();
        let outcome = verifier
            .verify(&DeploymentId::new("d1"), "verified")
            .await
            .unwrap();
        assert!(outcome.complete);
    }

    #[tokio::test]
    async fn test_http_verifier_rejects_5xx() {
        let url = one_shot_server("HTTP/1.1 503 Service Unavailable").await;
        let verifier = HttpHealthVerifier::new(url, Duration::from_secs(5)).unwrap();
        let outcome = verifier
            .verify(&DeploymentId::new("d1"), "verified")
            .await
            .unwrap();
        assert!(!outcome.complete);
        assert!(outcome.details.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_http_verifier_unreachable_is_incomplete() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let verifier =
            HttpHealthVerifier::new(format!("http://{}/health", addr), Duration::from_secs(2))
                .unwrap();
        let outcome = verifier
            .verify(&DeploymentId::new("d1"), "verified")
            .await
            .unwrap();
        assert!(!outcome.complete);
    }
}
