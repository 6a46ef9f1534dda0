use std::sync::Arc;

use sqlx::PgPool;

use crate::external::aggregate_cache::AggregateCache;
use crate::external::prisma_cloud::PrismaCloudClient;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub cache: Arc<dyn AggregateCache>,
    pub upstream: PrismaCloudClient,
}
