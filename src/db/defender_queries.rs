use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use crate::errors::EtlError;
use crate::jobs::{ExtractedBatch, HistoricalStore};
use crate::models::{Defender, DefenderRow, HistoricalRow};

// 7 binds per row keeps each statement far below the 65535 parameter limit
const INSERT_CHUNK: usize = 1000;

/// Historical store for the `defenders` table.
#[derive(Clone)]
pub struct PgDefenderStore {
    pool: PgPool,
}

impl PgDefenderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub async fn delete_before(pool: &PgPool, cutoff: NaiveDate) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM defenders WHERE date_added < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn insert_many(
    pool: &PgPool,
    date_added: NaiveDate,
    defenders: &[Defender],
) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for chunk in defenders.chunks(INSERT_CHUNK) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO defenders (hostname, version, defender_type, category, connected, account_id, date_added) ",
        );
        qb.push_values(chunk, |mut row, d| {
            row.push_bind(d.hostname.clone())
                .push_bind(d.version.clone())
                .push_bind(d.defender_type.clone())
                .push_bind(d.category.clone())
                .push_bind(d.connected)
                .push_bind(d.account_id.clone())
                .push_bind(date_added);
        });
        inserted += qb.build().execute(&mut *tx).await?.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

pub async fn fetch_all(pool: &PgPool) -> Result<Vec<DefenderRow>, sqlx::Error> {
    sqlx::query_as::<_, DefenderRow>(
        "SELECT hostname, version, defender_type, category, connected, account_id, date_added
         FROM defenders
         ORDER BY date_added ASC",
    )
    .fetch_all(pool)
    .await
}

#[async_trait]
impl HistoricalStore for PgDefenderStore {
    type Record = Defender;

    async fn purge_before(&self, cutoff: NaiveDate) -> Result<u64, EtlError> {
        Ok(delete_before(&self.pool, cutoff).await?)
    }

    async fn append(&self, batch: ExtractedBatch<Defender>) -> Result<u64, EtlError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let inserted = insert_many(&self.pool, batch.date_added, &batch.records).await?;
        debug!("Inserted {} defender rows for {}", inserted, batch.date_added);
        Ok(inserted)
    }

    async fn read_all(&self) -> Result<Vec<HistoricalRow<Defender>>, EtlError> {
        let rows = fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(HistoricalRow::from).collect())
    }
}
