use async_trait::async_trait;
use tracing::info;

use crate::errors::EtlError;
use crate::external::prisma_cloud::PrismaCloudClient;
use crate::jobs::ExtractionStrategy;
use crate::models::{Credentials, Defender};

/// Pulls the list of connected defenders.
pub struct DefendersDeployedJob {
    client: PrismaCloudClient,
}

impl DefendersDeployedJob {
    pub fn new(client: PrismaCloudClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExtractionStrategy for DefendersDeployedJob {
    type Record = Defender;

    async fn fetch(&self, credentials: &Credentials) -> Result<Vec<Defender>, EtlError> {
        info!("Pulling connected defenders from {}", credentials.url);
        let defenders = self.client.list_connected_defenders(credentials).await?;

        if let Some(bad) = defenders.iter().find(|d| d.hostname.trim().is_empty()) {
            return Err(EtlError::UpstreamData(format!(
                "defender without hostname (category {}, version {})",
                bad.category, bad.version
            )));
        }
        Ok(defenders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_defender_without_hostname() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/login")
            .with_status(200)
            .with_body(r#"{"token":"t"}"#)
            .create_async()
            .await;
        let _listing = server
            .mock("GET", "/api/v1/defenders")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                r#"[{"hostname":"","version":"31.0","type":"daemonset","category":"container","connected":true}]"#,
            )
            .create_async()
            .await;

        let job = DefendersDeployedJob::new(PrismaCloudClient::new(reqwest::Client::new()));
        let creds = Credentials {
            url: server.url(),
            key: "k".into(),
            secret: "s".into(),
        };
        let err = job.fetch(&creds).await.unwrap_err();
        assert!(matches!(err, EtlError::UpstreamData(_)));
    }
}
