use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::aggregate::{HistoricalRow, ReportRecord};

/// Account used when the upstream reports no cloud account for a defender.
pub const DEFAULT_ACCOUNT_ID: &str = "aws";

/// A deployed, connected defender as reported by the upstream API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defender {
    pub hostname: String,
    pub version: String,
    pub defender_type: String,
    pub category: String,
    pub connected: bool,
    pub account_id: String,
}

impl ReportRecord for Defender {
    fn dimensions(&self) -> Vec<(&'static str, String)> {
        vec![
            ("category", self.category.clone()),
            ("version", self.version.clone()),
            ("connected", self.connected.to_string()),
            ("account_id", self.account_id.clone()),
        ]
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DefenderRow {
    pub hostname: String,
    pub version: String,
    pub defender_type: String,
    pub category: String,
    pub connected: bool,
    pub account_id: String,
    pub date_added: NaiveDate,
}

impl From<DefenderRow> for HistoricalRow<Defender> {
    fn from(row: DefenderRow) -> Self {
        HistoricalRow {
            date_added: row.date_added,
            record: Defender {
                hostname: row.hostname,
                version: row.version,
                defender_type: row.defender_type,
                category: row.category,
                connected: row.connected,
                account_id: row.account_id,
            },
        }
    }
}
