//! Connectors
//!
//! A connector is one pull-ETL job type. The scheduling loop is shared; what differs per
//! connector is how a batch is pulled from the upstream API ([`ExtractionStrategy`]) and
//! where its rows live ([`HistoricalStore`]).
//!
//! # Available connectors
//!
//! - `defenders_deployed_job` - connected defenders, daily, 30 days kept
//! - `defenders_coverage_job` - cloud discovery coverage, weekly, 35 days kept

pub mod defenders_deployed_job;
pub mod defenders_coverage_job;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::config::{ConnectorConfig, DetailScope};
use crate::errors::EtlError;
use crate::models::{Credentials, HistoricalRow, ReportRecord};

/// One run's worth of records, all stamped with the same day.
#[derive(Debug, Clone)]
pub struct ExtractedBatch<R> {
    pub date_added: NaiveDate,
    pub records: Vec<R>,
}

impl<R> ExtractedBatch<R> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    type Record: ReportRecord;

    async fn fetch(&self, credentials: &Credentials) -> Result<Vec<Self::Record>, EtlError>;
}

#[async_trait]
pub trait HistoricalStore: Send + Sync {
    type Record: ReportRecord;

    /// Deletes rows whose `date_added` is strictly before `cutoff`.
    async fn purge_before(&self, cutoff: NaiveDate) -> Result<u64, EtlError>;

    async fn append(&self, batch: ExtractedBatch<Self::Record>) -> Result<u64, EtlError>;

    async fn read_all(&self) -> Result<Vec<HistoricalRow<Self::Record>>, EtlError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorKind {
    DefendersDeployed,
    DefendersCoverage,
}

impl ConnectorKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "defenders_deployed" => Some(Self::DefendersDeployed),
            "defenders_coverage" => Some(Self::DefendersCoverage),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::DefendersDeployed => "defenders_deployed",
            Self::DefendersCoverage => "defenders_coverage",
        }
    }

    pub fn default_config(&self) -> ConnectorConfig {
        match self {
            Self::DefendersDeployed => ConnectorConfig::new(self.name(), 30, 1, "df_defenders")
                .with_detail("df_all_defenders", DetailScope::History),
            Self::DefendersCoverage => ConnectorConfig::new(self.name(), 35, 7, "df_coverage")
                .with_detail("curr_coverage", DetailScope::CurrentBatch),
        }
    }
}
