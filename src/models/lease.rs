use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exclusive right to run one job until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub name: String,
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRequest {
    pub holder: String,
    pub ttl_secs: u64,
}
