use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use crate::errors::EtlError;
use crate::jobs::{ExtractedBatch, HistoricalStore};
use crate::models::{CoverageEntry, CoverageRow, HistoricalRow};

const INSERT_CHUNK: usize = 1000;

/// Historical store for the `coverage` table.
#[derive(Clone)]
pub struct PgCoverageStore {
    pool: PgPool,
}

impl PgCoverageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub async fn delete_before(pool: &PgPool, cutoff: NaiveDate) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM coverage WHERE date_added < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn insert_many(
    pool: &PgPool,
    date_added: NaiveDate,
    entries: &[CoverageEntry],
) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for chunk in entries.chunks(INSERT_CHUNK) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO coverage (provider, service, region, registry, credential, account_id, \
             name, vm_instance, defended, runtime, version, date_added) ",
        );
        qb.push_values(chunk, |mut row, e| {
            row.push_bind(e.provider.clone())
                .push_bind(e.service.clone())
                .push_bind(e.region.clone())
                .push_bind(e.registry.clone())
                .push_bind(e.credential.clone())
                .push_bind(e.account_id.clone())
                .push_bind(e.name.clone())
                .push_bind(e.vm_instance.clone())
                .push_bind(e.defended)
                .push_bind(e.runtime.clone())
                .push_bind(e.version.clone())
                .push_bind(date_added);
        });
        inserted += qb.build().execute(&mut *tx).await?.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

pub async fn fetch_all(pool: &PgPool) -> Result<Vec<CoverageRow>, sqlx::Error> {
    sqlx::query_as::<_, CoverageRow>(
        "SELECT provider, service, region, registry, credential, account_id, name, vm_instance,
                defended, runtime, version, date_added
         FROM coverage
         ORDER BY date_added ASC",
    )
    .fetch_all(pool)
    .await
}

#[async_trait]
impl HistoricalStore for PgCoverageStore {
    type Record = CoverageEntry;

    async fn purge_before(&self, cutoff: NaiveDate) -> Result<u64, EtlError> {
        Ok(delete_before(&self.pool, cutoff).await?)
    }

    async fn append(&self, batch: ExtractedBatch<CoverageEntry>) -> Result<u64, EtlError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let inserted = insert_many(&self.pool, batch.date_added, &batch.records).await?;
        debug!("Inserted {} coverage rows for {}", inserted, batch.date_added);
        Ok(inserted)
    }

    async fn read_all(&self) -> Result<Vec<HistoricalRow<CoverageEntry>>, EtlError> {
        let rows = fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(HistoricalRow::from).collect())
    }
}
