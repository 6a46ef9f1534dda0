use sqlx::PgPool;

use crate::models::Credentials;

const CREDENTIAL_KIND: &str = "prisma";

pub async fn fetch(pool: &PgPool) -> Result<Option<Credentials>, sqlx::Error> {
    sqlx::query_as::<_, Credentials>(
        "SELECT url, api_key AS key, api_secret AS secret
         FROM credentials
         WHERE kind = $1",
    )
    .bind(CREDENTIAL_KIND)
    .fetch_optional(pool)
    .await
}

pub async fn upsert(pool: &PgPool, credentials: &Credentials) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO credentials (kind, url, api_key, api_secret, updated_at)
         VALUES ($1, $2, $3, $4, NOW())
         ON CONFLICT (kind) DO UPDATE SET
           url = EXCLUDED.url,
           api_key = EXCLUDED.api_key,
           api_secret = EXCLUDED.api_secret,
           updated_at = EXCLUDED.updated_at",
    )
    .bind(CREDENTIAL_KIND)
    .bind(&credentials.url)
    .bind(&credentials.key)
    .bind(&credentials.secret)
    .execute(pool)
    .await?;

    Ok(())
}
