//! Client side of the verification endpoint contract.

use crate::{
    api::{GenerateCodeRequest, GeneratedCode, VerifyResponse},
    error::{Error, Result},
    APP_USER_AGENT,
};
use anyhow::anyhow;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::future::Future;
use tracing::{error, instrument};
use url::Url;

/// The two calls the login broker makes against the authentication service.
pub trait VerificationApi: Send + Sync + 'static {
    fn generate_code(&self, purpose: &str) -> impl Future<Output = Result<GeneratedCode>> + Send;

    fn verify(&self, code: &str) -> impl Future<Output = Result<VerifyResponse>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpVerificationClient {
    base_url: String,
    client: Client,
}

impl HttpVerificationClient {
    /// # Errors
    /// Returns an error if `base_url` is not an http(s) URL with a host, or the HTTP
    /// client cannot be built.
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base_url = base_endpoint(base_url)?;
        let client = Client::builder().user_agent(APP_USER_AGENT).build()?;
        Ok(Self { base_url, client })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            error!("verification service replied {status}");
            return Err(Error::UpstreamUnavailable(format!(
                "unexpected status {status}"
            )));
        }
        Ok(response.json().await?)
    }
}

impl VerificationApi for HttpVerificationClient {
    #[instrument(skip(self))]
    async fn generate_code(&self, purpose: &str) -> Result<GeneratedCode> {
        let request = GenerateCodeRequest {
            purpose: Some(purpose.to_string()),
        };
        let response = self
            .client
            .post(format!("{}/api/auth/generate-code", self.base_url))
            .json(&request)
            .send()
            .await?;
        Self::decode(response).await
    }

    #[instrument(skip(self))]
    async fn verify(&self, code: &str) -> Result<VerifyResponse> {
        let response = self
            .client
            .get(format!("{}/api/auth/verify/{code}", self.base_url))
            .send()
            .await?;
        Self::decode(response).await
    }
}

/// `scheme://host:port` with the default port filled in and any path dropped.
fn base_endpoint(url: &str) -> anyhow::Result<String> {
    let url = Url::parse(url)?;

    let scheme = url.scheme();

    let host = url
        .host()
        .ok_or_else(|| anyhow!("Error parsing URL: no host specified"))?
        .to_owned();

    let port = match url.port() {
        Some(p) => p,
        None => match scheme {
            "http" => 80,
            "https" => 443,
            _ => return Err(anyhow!("Error parsing URL: unsupported scheme {scheme}")),
        },
    };

    Ok(format!("{scheme}://{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_endpoint_fills_default_ports() -> anyhow::Result<()> {
        assert_eq!(
            base_endpoint("http://localhost:3000")?,
            "http://localhost:3000"
        );
        assert_eq!(
            base_endpoint("https://auth.example.com/")?,
            "https://auth.example.com:443"
        );
        assert_eq!(base_endpoint("http://10.0.0.1/x")?, "http://10.0.0.1:80");
        Ok(())
    }

    #[test]
    fn base_endpoint_rejects_bad_urls() {
        assert!(base_endpoint("ftp://example.com").is_err());
        assert!(base_endpoint("not a url").is_err());
    }

    #[tokio::test]
    async fn unreachable_service_is_upstream_unavailable() -> anyhow::Result<()> {
        // Port 1 on loopback is never served in test environments.
        let client = HttpVerificationClient::new("http://127.0.0.1:1")?;
        let err = client.verify("deadbeef").await.err();
        assert!(matches!(err, Some(Error::UpstreamUnavailable(_))));
        Ok(())
    }
}
