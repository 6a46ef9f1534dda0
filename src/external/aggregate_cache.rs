use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::errors::EtlError;
use crate::models::CachePayload;

/// Key/value target the dashboard reads snapshots from.
#[async_trait]
pub trait AggregateCache: Send + Sync {
    /// Overwrites whatever is stored under `key`.
    async fn publish(&self, key: &str, payload: &CachePayload) -> Result<(), EtlError>;

    /// `None` means nothing has been published yet.
    async fn fetch(&self, key: &str) -> Result<Option<CachePayload>, EtlError>;
}

/// Redis-backed cache. The connection is opened on first use; until Redis answers,
/// every call fails with `TransientInfra` and the next call tries again.
pub struct RedisAggregateCache {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
    timeout: Duration,
}

impl fmt::Debug for RedisAggregateCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisAggregateCache")
            .field("connected", &self.conn.initialized())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisAggregateCache {
    /// Only the URL is checked here; nothing is dialed yet.
    pub fn new(redis_url: &str, timeout: Duration) -> Result<Self, EtlError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| EtlError::FatalConfig(format!("invalid REDIS_URL: {}", e)))?;

        Ok(Self {
            client,
            conn: OnceCell::new(),
            timeout,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, EtlError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                info!("Connecting to aggregate cache");
                let conn = tokio::time::timeout(
                    self.timeout,
                    ConnectionManager::new(self.client.clone()),
                )
                .await
                .map_err(|_| EtlError::TransientInfra("cache connect timed out".into()))??;
                info!("Aggregate cache connected");
                Ok::<_, EtlError>(conn)
            })
            .await?;

        // ConnectionManager is a cheap handle over a shared multiplexed connection
        Ok(conn.clone())
    }
}

#[async_trait]
impl AggregateCache for RedisAggregateCache {
    async fn publish(&self, key: &str, payload: &CachePayload) -> Result<(), EtlError> {
        let json = serde_json::to_string(payload)
            .map_err(|e| EtlError::UpstreamData(format!("payload serialization: {}", e)))?;
        debug!("Cache SET: {} ({} bytes)", key, json.len());

        let mut conn = self.connection().await?;
        tokio::time::timeout(self.timeout, conn.set::<_, _, ()>(key, json))
            .await
            .map_err(|_| EtlError::TransientInfra(format!("cache SET {} timed out", key)))??;
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<CachePayload>, EtlError> {
        let mut conn = self.connection().await?;
        let data: Option<String> = tokio::time::timeout(self.timeout, conn.get::<_, Option<String>>(key))
            .await
            .map_err(|_| EtlError::TransientInfra(format!("cache GET {} timed out", key)))??;

        match data {
            Some(json) => {
                debug!("Cache HIT: {}", key);
                serde_json::from_str(&json)
                    .map(Some)
                    .map_err(|e| EtlError::UpstreamData(format!("cached payload {}: {}", key, e)))
            }
            None => {
                debug!("Cache MISS: {}", key);
                Ok(None)
            }
        }
    }
}
