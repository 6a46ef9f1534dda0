use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::aggregate::{HistoricalRow, ReportRecord};

/// One discovered cloud asset and whether a defender protects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageEntry {
    pub provider: String,
    pub service: String,
    pub region: String,
    pub registry: String,
    pub credential: String,
    pub account_id: Option<String>,
    pub name: Option<String>,
    pub vm_instance: Option<String>,
    pub defended: bool,
    pub runtime: Option<String>,
    pub version: Option<String>,
}

impl ReportRecord for CoverageEntry {
    fn dimensions(&self) -> Vec<(&'static str, String)> {
        vec![
            ("provider", self.provider.clone()),
            ("service", self.service.clone()),
            ("defended", self.defended.to_string()),
        ]
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CoverageRow {
    pub provider: String,
    pub service: String,
    pub region: String,
    pub registry: String,
    pub credential: String,
    pub account_id: Option<String>,
    pub name: Option<String>,
    pub vm_instance: Option<String>,
    pub defended: bool,
    pub runtime: Option<String>,
    pub version: Option<String>,
    pub date_added: NaiveDate,
}

impl From<CoverageRow> for HistoricalRow<CoverageEntry> {
    fn from(row: CoverageRow) -> Self {
        HistoricalRow {
            date_added: row.date_added,
            record: CoverageEntry {
                provider: row.provider,
                service: row.service,
                region: row.region,
                registry: row.registry,
                credential: row.credential,
                account_id: row.account_id,
                name: row.name,
                vm_instance: row.vm_instance,
                defended: row.defended,
                runtime: row.runtime,
                version: row.version,
            },
        }
    }
}
