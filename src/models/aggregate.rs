use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A record that can be rolled up into the aggregate snapshot.
pub trait ReportRecord: Serialize + Send + Sync + 'static {
    /// Reporting dimensions in a fixed order, e.g. `[("category", "host"), ("version", "31.0")]`.
    fn dimensions(&self) -> Vec<(&'static str, String)>;
}

/// One stored row: the record plus the day its batch was written.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalRow<R> {
    pub date_added: NaiveDate,
    pub record: R,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateGroup {
    pub date_added: NaiveDate,
    pub dimensions: BTreeMap<String, String>,
    pub total: u64,
}

/// Grouped counts over the whole historical store, published to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub connector: String,
    pub generated_at: DateTime<Utc>,
    pub groups: Vec<AggregateGroup>,
}

impl AggregateSnapshot {
    /// Recomputes the rollup from scratch. Groups come out sorted by date, then dimensions.
    pub fn rollup<R: ReportRecord>(
        connector: &str,
        generated_at: DateTime<Utc>,
        rows: &[HistoricalRow<R>],
    ) -> Self {
        let mut counts: BTreeMap<(NaiveDate, Vec<(&'static str, String)>), u64> = BTreeMap::new();
        for row in rows {
            *counts
                .entry((row.date_added, row.record.dimensions()))
                .or_insert(0) += 1;
        }

        let groups = counts
            .into_iter()
            .map(|((date_added, dims), total)| AggregateGroup {
                date_added,
                dimensions: dims.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
                total,
            })
            .collect();

        Self {
            connector: connector.to_string(),
            generated_at,
            groups,
        }
    }

    pub fn total_count(&self) -> u64 {
        self.groups.iter().map(|g| g.total).sum()
    }
}

/// Row-level projection published next to the rollup, for dashboards that list
/// individual assets. Each row is the record's fields plus `date_added`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailSnapshot {
    pub connector: String,
    pub generated_at: DateTime<Utc>,
    pub rows: Vec<serde_json::Value>,
}

#[derive(Serialize)]
struct RowView<'a, R> {
    date_added: NaiveDate,
    #[serde(flatten)]
    record: &'a R,
}

impl DetailSnapshot {
    /// Every row currently in the historical store.
    pub fn from_history<R: ReportRecord>(
        connector: &str,
        generated_at: DateTime<Utc>,
        rows: &[HistoricalRow<R>],
    ) -> Result<Self, serde_json::Error> {
        let rows = rows
            .iter()
            .map(|row| {
                serde_json::to_value(RowView {
                    date_added: row.date_added,
                    record: &row.record,
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            connector: connector.to_string(),
            generated_at,
            rows,
        })
    }

    /// Only the records one run extracted.
    pub fn from_batch<R: ReportRecord>(
        connector: &str,
        generated_at: DateTime<Utc>,
        date_added: NaiveDate,
        records: &[R],
    ) -> Result<Self, serde_json::Error> {
        let rows = records
            .iter()
            .map(|record| serde_json::to_value(RowView { date_added, record }))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            connector: connector.to_string(),
            generated_at,
            rows,
        })
    }
}

/// What the aggregate cache stores under a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachePayload {
    Rollup(AggregateSnapshot),
    Detail(DetailSnapshot),
}
