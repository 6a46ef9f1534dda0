use std::time::Duration;

use tracing::{info, warn};

use crate::errors::EtlError;
use crate::external::aggregate_cache::AggregateCache;
use crate::models::CachePayload;
use crate::services::backoff::Backoff;

/// Publishes `payload` under `key`, retrying transient cache failures with backoff.
///
/// Returns the attempt number that succeeded. Non-transient errors are not retried.
pub async fn publish_with_retry(
    cache: &dyn AggregateCache,
    key: &str,
    payload: &CachePayload,
    max_attempts: u32,
    initial_delay: Duration,
) -> Result<u32, EtlError> {
    let max_attempts = max_attempts.max(1);
    let mut backoff = Backoff::new(initial_delay, initial_delay.saturating_mul(8));
    let mut attempt = 1;

    loop {
        match cache.publish(key, payload).await {
            Ok(()) => {
                match payload {
                    CachePayload::Rollup(snapshot) => info!(
                        "Published {} groups ({} rows) to cache key {}",
                        snapshot.groups.len(),
                        snapshot.total_count(),
                        key
                    ),
                    CachePayload::Detail(detail) => {
                        info!("Published {} detail rows to cache key {}", detail.rows.len(), key)
                    }
                }
                return Ok(attempt);
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = backoff.next_delay();
                warn!(
                    "Cache publish attempt {}/{} for {} failed: {}; retrying in {:?}",
                    attempt, max_attempts, key, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
