use async_trait::async_trait;
use reqwest::StatusCode;

use crate::errors::EtlError;
use crate::external::prisma_cloud::PrismaCloudClient;
use crate::models::{Credentials, Validation};

#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// `Ok(None)` when nothing is configured yet; that is not an error.
    async fn fetch(&self) -> Result<Option<Credentials>, EtlError>;

    async fn validate(&self, credentials: &Credentials) -> Result<Validation, EtlError>;
}

/// Reads credentials from the backend settings API and checks them upstream.
pub struct HttpCredentialSource {
    client: reqwest::Client,
    base_url: String,
    upstream: PrismaCloudClient,
}

impl HttpCredentialSource {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            upstream: PrismaCloudClient::new(client.clone()),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CredentialSource for HttpCredentialSource {
    async fn fetch(&self) -> Result<Option<Credentials>, EtlError> {
        let resp = self
            .client
            .get(format!("{}/api/credentials", self.base_url))
            .send()
            .await
            .map_err(|e| EtlError::TransientInfra(format!("credential service: {}", e)))?;

        match resp.status() {
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::OK | StatusCode::CREATED => {
                let body = resp
                    .text()
                    .await
                    .map_err(|e| EtlError::TransientInfra(format!("credential service: {}", e)))?;
                if body.trim().is_empty() {
                    return Ok(None);
                }
                let credentials: Credentials = serde_json::from_str(&body).map_err(|e| {
                    EtlError::TransientInfra(format!("credential service sent bad body: {}", e))
                })?;
                Ok(Some(credentials))
            }
            status => Err(EtlError::TransientInfra(format!(
                "credential service returned {}",
                status
            ))),
        }
    }

    async fn validate(&self, credentials: &Credentials) -> Result<Validation, EtlError> {
        self.upstream.validate(credentials).await
    }
}
