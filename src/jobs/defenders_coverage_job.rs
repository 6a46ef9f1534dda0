use async_trait::async_trait;
use tracing::info;

use crate::errors::EtlError;
use crate::external::prisma_cloud::PrismaCloudClient;
use crate::jobs::ExtractionStrategy;
use crate::models::{CoverageEntry, Credentials};

/// Pulls the cloud discovery export: which assets exist and whether they are defended.
pub struct DefendersCoverageJob {
    client: PrismaCloudClient,
}

impl DefendersCoverageJob {
    pub fn new(client: PrismaCloudClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExtractionStrategy for DefendersCoverageJob {
    type Record = CoverageEntry;

    async fn fetch(&self, credentials: &Credentials) -> Result<Vec<CoverageEntry>, EtlError> {
        info!("Retrieving cloud discovery coverage from {}", credentials.url);
        let entries = self.client.download_cloud_discovery(credentials).await?;
        let defended = entries.iter().filter(|e| e.defended).count();
        info!("{} of {} discovered assets are defended", defended, entries.len());
        Ok(entries)
    }
}
