use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::errors::EtlError;
use crate::models::{JobDescriptor, Lease, LeaseRequest, RecordRunRequest, RunUpdate};

/// Durable home of every connector's Job Descriptor.
#[async_trait]
pub trait JobStateStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<JobDescriptor>, EtlError>;

    /// Returns `false` when a descriptor with that name already exists.
    async fn create(&self, descriptor: &JobDescriptor) -> Result<bool, EtlError>;

    /// Persists a completed run. Fails with `LeaseLost` if `holder` no longer owns the job.
    async fn record_run(&self, name: &str, update: &RunUpdate, holder: &str) -> Result<(), EtlError>;

    /// Compare-and-swap on the job's lease. `None` means someone else holds it.
    async fn acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>, EtlError>;

    async fn release_lease(&self, name: &str, holder: &str) -> Result<(), EtlError>;
}

/// Client for the backend's `/api/jobs` endpoints.
pub struct HttpJobStateStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpJobStateStore {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn jobs_url(&self) -> String {
        format!("{}/api/jobs", self.base_url)
    }
}

fn unreachable(e: reqwest::Error) -> EtlError {
    EtlError::TransientInfra(format!("job state service: {}", e))
}

fn unexpected(status: StatusCode, op: &str) -> EtlError {
    EtlError::TransientInfra(format!("job state service returned {} on {}", status, op))
}

#[async_trait]
impl JobStateStore for HttpJobStateStore {
    async fn get(&self, name: &str) -> Result<Option<JobDescriptor>, EtlError> {
        let resp = self
            .client
            .get(self.jobs_url())
            .query(&[("name", name)])
            .send()
            .await
            .map_err(unreachable)?;

        match resp.status() {
            StatusCode::NO_CONTENT => Ok(None),
            // older backends answer lookups with 201
            StatusCode::OK | StatusCode::CREATED => {
                let mut descriptors: Vec<JobDescriptor> = resp.json().await.map_err(unreachable)?;
                debug!("job state lookup for {} returned {} row(s)", name, descriptors.len());
                Ok(if descriptors.is_empty() {
                    None
                } else {
                    Some(descriptors.swap_remove(0))
                })
            }
            status => Err(unexpected(status, "get")),
        }
    }

    async fn create(&self, descriptor: &JobDescriptor) -> Result<bool, EtlError> {
        let resp = self
            .client
            .post(self.jobs_url())
            .json(descriptor)
            .send()
            .await
            .map_err(unreachable)?;

        match resp.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(true),
            StatusCode::CONFLICT => Ok(false),
            status => Err(unexpected(status, "create")),
        }
    }

    async fn record_run(&self, name: &str, update: &RunUpdate, holder: &str) -> Result<(), EtlError> {
        let body = RecordRunRequest {
            update: update.clone(),
            lease_holder: holder.to_string(),
        };
        let resp = self
            .client
            .patch(format!("{}/{}", self.jobs_url(), name))
            .json(&body)
            .send()
            .await
            .map_err(unreachable)?;

        match resp.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(EtlError::LeaseLost(name.to_string())),
            status => Err(unexpected(status, "record_run")),
        }
    }

    async fn acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>, EtlError> {
        let body = LeaseRequest {
            holder: holder.to_string(),
            ttl_secs: ttl.as_secs(),
        };
        let resp = self
            .client
            .post(format!("{}/{}/lease", self.jobs_url(), name))
            .json(&body)
            .send()
            .await
            .map_err(unreachable)?;

        match resp.status() {
            StatusCode::OK => Ok(Some(resp.json().await.map_err(unreachable)?)),
            StatusCode::CONFLICT => Ok(None),
            status => Err(unexpected(status, "acquire_lease")),
        }
    }

    async fn release_lease(&self, name: &str, holder: &str) -> Result<(), EtlError> {
        let resp = self
            .client
            .delete(format!("{}/{}/lease", self.jobs_url(), name))
            .query(&[("holder", holder)])
            .send()
            .await
            .map_err(unreachable)?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(unexpected(resp.status(), "release_lease"))
        }
    }
}
