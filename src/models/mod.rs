mod job_descriptor;
mod credentials;
mod aggregate;
mod defender;
mod coverage;
mod lease;

pub use job_descriptor::{
    hms, JobDescriptor, RecordRunRequest, RunUpdate, MAX_INTERVAL_DAYS, MAX_NAME_LEN,
    MAX_RETENTION_DAYS,
};
pub use credentials::{Credentials, Validation};
pub use aggregate::{
    AggregateGroup, AggregateSnapshot, CachePayload, DetailSnapshot, HistoricalRow, ReportRecord,
};
pub use defender::{Defender, DefenderRow, DEFAULT_ACCOUNT_ID};
pub use coverage::{CoverageEntry, CoverageRow};
pub use lease::{Lease, LeaseRequest};
