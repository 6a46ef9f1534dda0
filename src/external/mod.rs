pub mod aggregate_cache;
pub mod credential_source;
pub mod job_state;
pub mod prisma_cloud;
