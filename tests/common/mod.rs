//! In-memory stand-ins for every scheduler port.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;

use cloudsec_etl::config::{ConnectorConfig, SchedulerSettings};
use cloudsec_etl::errors::EtlError;
use cloudsec_etl::external::aggregate_cache::AggregateCache;
use cloudsec_etl::external::credential_source::CredentialSource;
use cloudsec_etl::external::job_state::JobStateStore;
use cloudsec_etl::jobs::{ExtractedBatch, ExtractionStrategy, HistoricalStore};
use cloudsec_etl::models::{
    AggregateSnapshot, CachePayload, Credentials, Defender, DetailSnapshot, HistoricalRow,
    JobDescriptor, Lease, RunUpdate, Validation,
};
use cloudsec_etl::services::clock::ManualClock;
use cloudsec_etl::services::scheduler::{SchedulerLoop, SchedulerPorts};

pub const JOB: &str = "defenders_deployed";
pub const CACHE_KEY: &str = "df_defenders";

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn defender(hostname: &str, category: &str) -> Defender {
    Defender {
        hostname: hostname.to_string(),
        version: "31.02".to_string(),
        defender_type: "docker".to_string(),
        category: category.to_string(),
        connected: true,
        account_id: "aws".to_string(),
    }
}

#[derive(Default)]
pub struct FakeJobState {
    pub descriptors: Mutex<HashMap<String, JobDescriptor>>,
    /// name -> holder
    pub leases: Mutex<HashMap<String, String>>,
    pub creates: AtomicUsize,
    pub record_runs: AtomicUsize,
    pub releases: AtomicUsize,
    pub unavailable: AtomicBool,
}

impl FakeJobState {
    pub fn descriptor(&self, name: &str) -> Option<JobDescriptor> {
        self.descriptors.lock().get(name).cloned()
    }

    pub fn insert(&self, descriptor: JobDescriptor) {
        self.descriptors
            .lock()
            .insert(descriptor.name.clone(), descriptor);
    }

    fn check_available(&self) -> Result<(), EtlError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EtlError::TransientInfra("job state offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStateStore for FakeJobState {
    async fn get(&self, name: &str) -> Result<Option<JobDescriptor>, EtlError> {
        self.check_available()?;
        Ok(self.descriptor(name))
    }

    async fn create(&self, descriptor: &JobDescriptor) -> Result<bool, EtlError> {
        self.check_available()?;
        let mut descriptors = self.descriptors.lock();
        if descriptors.contains_key(&descriptor.name) {
            return Ok(false);
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        descriptors.insert(descriptor.name.clone(), descriptor.clone());
        Ok(true)
    }

    async fn record_run(&self, name: &str, update: &RunUpdate, holder: &str) -> Result<(), EtlError> {
        self.check_available()?;
        if self.leases.lock().get(name).map(String::as_str) != Some(holder) {
            return Err(EtlError::LeaseLost(name.to_string()));
        }
        let mut descriptors = self.descriptors.lock();
        let descriptor = descriptors
            .get_mut(name)
            .ok_or_else(|| EtlError::TransientInfra("missing".into()))?;
        descriptor.last_run = update.last_run;
        descriptor.next_run = update.next_run;
        descriptor.elapsed = update.elapsed;
        self.record_runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn acquire_lease(
        &self,
        name: &str,
        holder: &str,
        _ttl: Duration,
    ) -> Result<Option<Lease>, EtlError> {
        self.check_available()?;
        let mut leases = self.leases.lock();
        match leases.get(name) {
            Some(current) if current != holder => Ok(None),
            _ => {
                leases.insert(name.to_string(), holder.to_string());
                Ok(Some(Lease {
                    name: name.to_string(),
                    holder: holder.to_string(),
                    expires_at: Utc::now() + chrono::Duration::hours(1),
                }))
            }
        }
    }

    async fn release_lease(&self, name: &str, holder: &str) -> Result<(), EtlError> {
        let mut leases = self.leases.lock();
        if leases.get(name).map(String::as_str) == Some(holder) {
            leases.remove(name);
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub struct FakeCredentials {
    pub stored: Mutex<Option<Credentials>>,
    pub verdict: Mutex<Validation>,
}

impl FakeCredentials {
    pub fn valid() -> Self {
        Self {
            stored: Mutex::new(Some(Credentials {
                url: "https://api.example.com".into(),
                key: "key".into(),
                secret: "secret".into(),
            })),
            verdict: Mutex::new(Validation::Valid),
        }
    }

    pub fn missing() -> Self {
        Self {
            stored: Mutex::new(None),
            verdict: Mutex::new(Validation::Valid),
        }
    }
}

#[async_trait]
impl CredentialSource for FakeCredentials {
    async fn fetch(&self) -> Result<Option<Credentials>, EtlError> {
        Ok(self.stored.lock().clone())
    }

    async fn validate(&self, _credentials: &Credentials) -> Result<Validation, EtlError> {
        Ok(self.verdict.lock().clone())
    }
}

#[derive(Default)]
pub struct FakeCache {
    pub entries: Mutex<HashMap<String, CachePayload>>,
    pub attempts: AtomicU32,
    /// Transient failures to return before succeeding.
    pub failures_left: AtomicU32,
}

impl FakeCache {
    pub fn snapshot(&self, key: &str) -> Option<AggregateSnapshot> {
        match self.entries.lock().get(key) {
            Some(CachePayload::Rollup(snapshot)) => Some(snapshot.clone()),
            _ => None,
        }
    }

    pub fn detail(&self, key: &str) -> Option<DetailSnapshot> {
        match self.entries.lock().get(key) {
            Some(CachePayload::Detail(detail)) => Some(detail.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl AggregateCache for FakeCache {
    async fn publish(&self, key: &str, payload: &CachePayload) -> Result<(), EtlError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(EtlError::TransientInfra("cache down".into()));
        }
        self.entries.lock().insert(key.to_string(), payload.clone());
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<CachePayload>, EtlError> {
        Ok(self.entries.lock().get(key).cloned())
    }
}

#[derive(Clone, Default)]
pub struct FakeExtraction {
    pub records: Arc<Mutex<Vec<Defender>>>,
    pub fail: Arc<AtomicBool>,
    pub calls: Arc<AtomicUsize>,
}

impl FakeExtraction {
    pub fn returning(records: Vec<Defender>) -> Self {
        let fake = Self::default();
        *fake.records.lock() = records;
        fake
    }
}

#[async_trait]
impl ExtractionStrategy for FakeExtraction {
    type Record = Defender;

    async fn fetch(&self, _credentials: &Credentials) -> Result<Vec<Defender>, EtlError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(EtlError::UpstreamData("defenders endpoint returned garbage".into()));
        }
        Ok(self.records.lock().clone())
    }
}

#[derive(Clone, Default)]
pub struct FakeStore {
    pub rows: Arc<Mutex<Vec<HistoricalRow<Defender>>>>,
    pub fail_purge: Arc<AtomicBool>,
    pub fail_read: Arc<AtomicBool>,
    pub appends: Arc<AtomicUsize>,
}

impl FakeStore {
    pub fn seed(&self, date_added: NaiveDate, count: usize) {
        let mut rows = self.rows.lock();
        for i in 0..count {
            rows.push(HistoricalRow {
                date_added,
                record: defender(&format!("seed-{}-{}", date_added, i), "host"),
            });
        }
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<_> = self.rows.lock().iter().map(|r| r.date_added).collect();
        dates.sort();
        dates.dedup();
        dates
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }
}

#[async_trait]
impl HistoricalStore for FakeStore {
    type Record = Defender;

    async fn purge_before(&self, cutoff: NaiveDate) -> Result<u64, EtlError> {
        if self.fail_purge.load(Ordering::SeqCst) {
            return Err(EtlError::TransientInfra("delete timed out".into()));
        }
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|r| r.date_added >= cutoff);
        Ok((before - rows.len()) as u64)
    }

    async fn append(&self, batch: ExtractedBatch<Defender>) -> Result<u64, EtlError> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        let written = batch.len() as u64;
        let mut rows = self.rows.lock();
        for record in batch.records {
            rows.push(HistoricalRow {
                date_added: batch.date_added,
                record,
            });
        }
        Ok(written)
    }

    async fn read_all(&self) -> Result<Vec<HistoricalRow<Defender>>, EtlError> {
        if self.fail_read.load(Ordering::SeqCst) {
            return Err(EtlError::TransientInfra("select timed out".into()));
        }
        Ok(self.rows.lock().clone())
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub job_state: Arc<FakeJobState>,
    pub credentials: Arc<FakeCredentials>,
    pub cache: Arc<FakeCache>,
    pub extraction: FakeExtraction,
    pub store: FakeStore,
}

impl Harness {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            clock: Arc::new(ManualClock::new(start)),
            job_state: Arc::new(FakeJobState::default()),
            credentials: Arc::new(FakeCredentials::valid()),
            cache: Arc::new(FakeCache::default()),
            extraction: FakeExtraction::returning(vec![
                defender("host-a", "host"),
                defender("host-b", "host"),
                defender("node-c", "container"),
            ]),
            store: FakeStore::default(),
        }
    }

    pub fn config() -> ConnectorConfig {
        ConnectorConfig::new(JOB, 30, 7, CACHE_KEY)
    }

    pub fn settings() -> SchedulerSettings {
        SchedulerSettings {
            tick_interval: Duration::from_millis(20),
            lease_ttl: Duration::from_secs(60),
            credential_backoff: Duration::from_millis(1),
            publish_attempts: 3,
            publish_backoff: Duration::from_millis(1),
        }
    }

    pub fn scheduler(&self) -> SchedulerLoop<FakeExtraction, FakeStore> {
        self.scheduler_with(Self::config())
    }

    pub fn scheduler_with(&self, config: ConnectorConfig) -> SchedulerLoop<FakeExtraction, FakeStore> {
        self.scheduler_with_cache(config, self.cache.clone())
    }

    pub fn scheduler_with_cache(
        &self,
        config: ConnectorConfig,
        cache: Arc<dyn AggregateCache>,
    ) -> SchedulerLoop<FakeExtraction, FakeStore> {
        let ports = SchedulerPorts {
            job_state: self.job_state.clone(),
            credentials: self.credentials.clone(),
            cache,
            clock: self.clock.clone(),
        };
        SchedulerLoop::new(
            config,
            Self::settings(),
            ports,
            self.extraction.clone(),
            self.store.clone(),
        )
    }
}
