use chrono::{Duration, NaiveDate};
use tracing::{info, warn};

use crate::jobs::HistoricalStore;

/// How long extracted rows are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    retention_days: i32,
}

impl RetentionPolicy {
    pub fn new(retention_days: i32) -> Self {
        Self {
            retention_days: retention_days.max(0),
        }
    }

    /// Oldest `date_added` that survives a purge run on `today`. A window reaching past
    /// the earliest representable date keeps everything.
    pub fn cutoff(&self, today: NaiveDate) -> NaiveDate {
        Duration::try_days(i64::from(self.retention_days))
            .and_then(|window| today.checked_sub_signed(window))
            .unwrap_or(NaiveDate::MIN)
    }

    pub fn retains(&self, date_added: NaiveDate, today: NaiveDate) -> bool {
        date_added >= self.cutoff(today)
    }
}

/// Best-effort purge ahead of a write. Failure is logged and swallowed so ingestion
/// still happens; returns the number of deleted rows when the purge succeeded.
pub async fn purge_expired<H>(store: &H, policy: RetentionPolicy, today: NaiveDate) -> Option<u64>
where
    H: HistoricalStore + ?Sized,
{
    let cutoff = policy.cutoff(today);
    match store.purge_before(cutoff).await {
        Ok(deleted) => {
            info!("Purged {} rows dated before {}", deleted, cutoff);
            Some(deleted)
        }
        Err(e) => {
            warn!("Purge of rows before {} failed, continuing with write: {}", cutoff, e);
            None
        }
    }
}
