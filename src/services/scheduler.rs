//! The self-scheduling loop shared by every connector.
//!
//! Each tick: make sure the job's descriptor exists, check whether it is due, take the
//! job's lease, re-check under the lease, gate on credentials, run extraction, purge,
//! write, publish, and finally write the descriptor back. Nothing in the descriptor
//! changes unless the whole run made it to the historical store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{ConnectorConfig, DetailScope, SchedulerSettings};
use crate::errors::EtlError;
use crate::external::aggregate_cache::AggregateCache;
use crate::external::credential_source::CredentialSource;
use crate::external::job_state::JobStateStore;
use crate::jobs::{ExtractedBatch, ExtractionStrategy, HistoricalStore};
use crate::models::{AggregateSnapshot, CachePayload, Credentials, DetailSnapshot, JobDescriptor};
use crate::services::backoff::Backoff;
use crate::services::clock::Clock;
use crate::services::credential_gate::{CredentialGate, NotReadyReason, Readiness};
use crate::services::publisher::publish_with_retry;
use crate::services::retention::{purge_expired, RetentionPolicy};

/// External collaborators every connector loop shares.
#[derive(Clone)]
pub struct SchedulerPorts {
    pub job_state: Arc<dyn JobStateStore>,
    pub credentials: Arc<dyn CredentialSource>,
    pub cache: Arc<dyn AggregateCache>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub extracted: usize,
    pub written: u64,
    pub purged: Option<u64>,
    pub total_rows: Option<u64>,
    pub published: bool,
    /// `None` when the connector has no detail projection.
    pub detail_published: Option<bool>,
    pub next_run: DateTime<Utc>,
}

#[derive(Debug)]
pub enum TickOutcome {
    NotDue { next_run: DateTime<Utc> },
    NotReady(NotReadyReason),
    /// Another instance holds the job's lease.
    LeaseHeld,
    /// Infrastructure trouble before anything ran; retried next tick.
    Skipped(EtlError),
    /// The run started but was abandoned; the descriptor is untouched.
    Failed(EtlError),
    Completed(RunReport),
}

pub struct SchedulerLoop<E, H> {
    config: ConnectorConfig,
    settings: SchedulerSettings,
    holder: String,
    ports: SchedulerPorts,
    gate: CredentialGate,
    strategy: E,
    store: H,
}

impl<E, H> SchedulerLoop<E, H>
where
    E: ExtractionStrategy,
    H: HistoricalStore<Record = E::Record>,
{
    pub fn new(
        config: ConnectorConfig,
        settings: SchedulerSettings,
        ports: SchedulerPorts,
        strategy: E,
        store: H,
    ) -> Self {
        let holder = format!("{}-{}", config.name, Uuid::new_v4());
        Self {
            gate: CredentialGate::new(ports.credentials.clone()),
            config,
            settings,
            holder,
            ports,
            strategy,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Reads the descriptor, creating it on first check-in. Safe to call repeatedly;
    /// a lost creation race falls back to the winner's record.
    pub async fn ensure_descriptor(&self) -> Result<JobDescriptor, EtlError> {
        let name = self.name();
        if let Some(descriptor) = self.ports.job_state.get(name).await? {
            return Ok(descriptor);
        }

        let fresh = JobDescriptor::bootstrap(&self.config, self.ports.clock.now());
        if self.ports.job_state.create(&fresh).await? {
            info!(
                "Registered job {} (retention {} days, every {} day(s))",
                name, fresh.retention_days, fresh.interval_days
            );
            return Ok(fresh);
        }

        self.ports.job_state.get(name).await?.ok_or_else(|| {
            EtlError::TransientInfra(format!("job {} reported as existing but not found", name))
        })
    }

    pub async fn tick(&self) -> TickOutcome {
        let descriptor = match self.ensure_descriptor().await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("Job state unavailable, skipping tick: {}", e);
                return TickOutcome::Skipped(e);
            }
        };

        if !descriptor.is_due(self.ports.clock.now()) {
            debug!("Not due until {}", descriptor.next_run);
            return TickOutcome::NotDue {
                next_run: descriptor.next_run,
            };
        }

        match self
            .ports
            .job_state
            .acquire_lease(self.name(), &self.holder, self.settings.lease_ttl)
            .await
        {
            Ok(Some(lease)) => debug!("Lease held until {}", lease.expires_at),
            Ok(None) => {
                info!("Job {} is leased by another instance; skipping", self.name());
                return TickOutcome::LeaseHeld;
            }
            Err(e) => {
                warn!("Could not acquire lease: {}", e);
                return TickOutcome::Skipped(e);
            }
        }

        let outcome = self.run_leased().await;

        if let Err(e) = self
            .ports
            .job_state
            .release_lease(self.name(), &self.holder)
            .await
        {
            // it expires on its own after lease_ttl
            warn!("Could not release lease: {}", e);
        }

        outcome
    }

    async fn run_leased(&self) -> TickOutcome {
        // another instance may have finished between our first read and the lease
        let descriptor = match self.ports.job_state.get(self.name()).await {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                return TickOutcome::Skipped(EtlError::TransientInfra(format!(
                    "job {} disappeared while leased",
                    self.name()
                )))
            }
            Err(e) => return TickOutcome::Skipped(e),
        };

        let started_at = self.ports.clock.now();
        if !descriptor.is_due(started_at) {
            return TickOutcome::NotDue {
                next_run: descriptor.next_run,
            };
        }

        // a descriptor whose next_run cannot be computed must fail before anything is written
        if let Err(e) = descriptor.completion(started_at, started_at) {
            error!("Refusing to run {}: {}", self.name(), e);
            return TickOutcome::Failed(e);
        }

        let credentials = match self.gate.check().await {
            Readiness::Ready(credentials) => credentials,
            Readiness::NotReady(reason) => return TickOutcome::NotReady(reason),
        };

        info!("Refresh of {} initiated", self.name());
        let mut report = match self.execute(&descriptor, &credentials, started_at).await {
            Ok(report) => report,
            Err(e) => {
                error!("Run of {} failed, next_run left at {}: {}", self.name(), descriptor.next_run, e);
                return TickOutcome::Failed(e);
            }
        };

        let update = match descriptor.completion(started_at, self.ports.clock.now()) {
            Ok(update) => update,
            Err(e) => return TickOutcome::Failed(e),
        };
        if let Err(e) = self
            .ports
            .job_state
            .record_run(self.name(), &update, &self.holder)
            .await
        {
            error!("Run of {} finished but could not be recorded: {}", self.name(), e);
            return TickOutcome::Failed(e);
        }

        report.next_run = update.next_run;
        info!(
            "Run of {} complete in {}; next run after {}",
            self.name(),
            crate::models::hms::format(&update.elapsed),
            update.next_run
        );
        TickOutcome::Completed(report)
    }

    async fn execute(
        &self,
        descriptor: &JobDescriptor,
        credentials: &Credentials,
        started_at: DateTime<Utc>,
    ) -> Result<RunReport, EtlError> {
        let records = self.strategy.fetch(credentials).await?;
        let today = started_at.date_naive();
        info!("Extracted {} records", records.len());

        // the batch is consumed by the write, so a current-batch projection is taken now
        let mut detail = match &self.config.detail {
            Some(projection) if projection.scope == DetailScope::CurrentBatch => Some(
                DetailSnapshot::from_batch(self.name(), self.ports.clock.now(), today, &records),
            ),
            _ => None,
        };

        let batch = ExtractedBatch {
            date_added: today,
            records,
        };
        let extracted = batch.len();

        let purged = purge_expired(
            &self.store,
            RetentionPolicy::new(descriptor.retention_days),
            today,
        )
        .await;

        let written = self.store.append(batch).await?;

        // the write above is the durable part; from here on failures only cost freshness
        let (total_rows, published) = match self.store.read_all().await {
            Ok(rows) => {
                let generated_at = self.ports.clock.now();
                let snapshot = AggregateSnapshot::rollup(self.name(), generated_at, &rows);
                let total = snapshot.total_count();
                let published = self
                    .publish(&self.config.cache_key, &CachePayload::Rollup(snapshot))
                    .await;

                if matches!(&self.config.detail, Some(p) if p.scope == DetailScope::History) {
                    detail = Some(DetailSnapshot::from_history(self.name(), generated_at, &rows));
                }
                (Some(total), published)
            }
            Err(e) => {
                error!("Could not read history back for aggregation: {}", e);
                (None, false)
            }
        };

        let detail_published = match (&self.config.detail, detail) {
            (None, _) => None,
            (Some(_), None) => Some(false),
            (Some(projection), Some(Err(e))) => {
                error!("Could not serialize detail rows for {}: {}", projection.key, e);
                Some(false)
            }
            (Some(projection), Some(Ok(detail))) => Some(
                self.publish(&projection.key, &CachePayload::Detail(detail))
                    .await,
            ),
        };

        Ok(RunReport {
            extracted,
            written,
            purged,
            total_rows,
            published,
            detail_published,
            next_run: descriptor.next_run,
        })
    }

    async fn publish(&self, key: &str, payload: &CachePayload) -> bool {
        match publish_with_retry(
            self.ports.cache.as_ref(),
            key,
            payload,
            self.settings.publish_attempts,
            self.settings.publish_backoff,
        )
        .await
        {
            Ok(_) => true,
            Err(e) => {
                error!("Giving up on cache publish for {}: {}", key, e);
                false
            }
        }
    }

    /// Ticks until `shutdown` flips to `true` or its sender goes away.
    ///
    /// Not-ready ticks back off exponentially up to the tick interval; every other
    /// outcome waits a full tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let span = info_span!("connector", name = %self.config.name);
        async move {
            info!(
                "Scheduler started (tick {:?}, holder {})",
                self.settings.tick_interval, self.holder
            );
            let mut backoff = Backoff::new(
                self.settings.credential_backoff,
                self.settings.tick_interval,
            );

            while !*shutdown.borrow() {
                let delay = match self.tick().await {
                    TickOutcome::NotReady(reason) => {
                        let delay = backoff.next_delay();
                        info!("Not ready ({:?}); retrying in {:?}", reason, delay);
                        delay
                    }
                    outcome => {
                        backoff.reset();
                        log_outcome(&outcome, self.settings.tick_interval);
                        self.settings.tick_interval
                    }
                };

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            info!("Scheduler stopped");
        }
        .instrument(span)
        .await
    }
}

fn log_outcome(outcome: &TickOutcome, tick: Duration) {
    match outcome {
        TickOutcome::NotDue { next_run } => {
            info!("Not time to refresh yet (next run after {}); sleeping {:?}", next_run, tick)
        }
        TickOutcome::Completed(report) => debug!("Tick completed a run: {:?}", report),
        TickOutcome::LeaseHeld => debug!("Lease held elsewhere; sleeping {:?}", tick),
        TickOutcome::Skipped(e) => debug!("Tick skipped: {}", e),
        TickOutcome::Failed(e) => debug!("Tick failed: {}", e),
        TickOutcome::NotReady(_) => {}
    }
}
