use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConnectorConfig;
use crate::errors::EtlError;

pub const MAX_NAME_LEN: usize = 128;
/// A century; anything longer is a typo.
pub const MAX_RETENTION_DAYS: i32 = 36_500;
pub const MAX_INTERVAL_DAYS: i32 = 3_650;

/// Persisted scheduling record for one connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub name: String,
    pub registered_since: DateTime<Utc>,
    pub last_run: DateTime<Utc>,
    pub next_run: DateTime<Utc>,
    #[serde(with = "hms")]
    pub elapsed: Duration,
    pub retention_days: i32,
    pub interval_days: i32,
}

impl JobDescriptor {
    /// First-check-in descriptor: eligible to run immediately.
    pub fn bootstrap(config: &ConnectorConfig, now: DateTime<Utc>) -> Self {
        Self {
            name: config.name.clone(),
            registered_since: now,
            last_run: now,
            next_run: now,
            elapsed: Duration::zero(),
            retention_days: config.retention_days,
            interval_days: config.interval_days,
        }
    }

    /// Strictly after `next_run`; a check-in landing exactly on it waits one more tick.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now > self.next_run
    }

    pub fn interval(&self) -> Option<Duration> {
        Duration::try_days(i64::from(self.interval_days.max(0)))
    }

    /// Where `next_run` lands for a run starting at `started_at`. `None` when the
    /// interval pushes it past what a timestamp can represent.
    pub fn next_run_after(&self, started_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        started_at.checked_add_signed(self.interval()?)
    }

    /// Bookkeeping for a run that started at `started_at` and just finished.
    pub fn completion(
        &self,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Result<RunUpdate, EtlError> {
        let next_run = self.next_run_after(started_at).ok_or_else(|| {
            EtlError::UpstreamData(format!(
                "{}: interval of {} days overflows from {}",
                self.name, self.interval_days, started_at
            ))
        })?;
        Ok(RunUpdate {
            last_run: started_at,
            next_run,
            elapsed: (finished_at - started_at).max(Duration::zero()),
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() || self.name.len() > MAX_NAME_LEN {
            return Err(format!("job name must be 1..={} characters", MAX_NAME_LEN));
        }
        if !(0..=MAX_RETENTION_DAYS).contains(&self.retention_days) {
            return Err(format!("retention_days must be 0..={}", MAX_RETENTION_DAYS));
        }
        if !(0..=MAX_INTERVAL_DAYS).contains(&self.interval_days) {
            return Err(format!("interval_days must be 0..={}", MAX_INTERVAL_DAYS));
        }
        if self.next_run < self.last_run {
            return Err("next_run must not precede last_run".to_string());
        }
        Ok(())
    }
}

/// The only fields a completed run is allowed to change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunUpdate {
    pub last_run: DateTime<Utc>,
    pub next_run: DateTime<Utc>,
    #[serde(with = "hms")]
    pub elapsed: Duration,
}

impl RunUpdate {
    pub fn validate(&self) -> Result<(), String> {
        if self.next_run < self.last_run {
            return Err(format!(
                "next_run {} is before last_run {}",
                self.next_run, self.last_run
            ));
        }
        if self.elapsed < Duration::zero() {
            return Err("elapsed must not be negative".to_string());
        }
        Ok(())
    }
}

/// Write-back body sent by a scheduler holding the job's lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRunRequest {
    #[serde(flatten)]
    pub update: RunUpdate,
    pub lease_holder: String,
}

/// Elapsed durations travel as `HH:MM:SS`; hours may exceed 23.
pub mod hms {
    use chrono::Duration;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn format(value: &Duration) -> String {
        let total = value.num_seconds().max(0);
        format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
    }

    pub fn parse(raw: &str) -> Result<Duration, String> {
        let parts: Vec<&str> = raw.trim().split(':').collect();
        if parts.len() != 3 {
            return Err(format!("expected HH:MM:SS, got {:?}", raw));
        }
        let mut fields = [0i64; 3];
        for (slot, part) in fields.iter_mut().zip(&parts) {
            *slot = part
                .parse::<i64>()
                .map_err(|_| format!("expected HH:MM:SS, got {:?}", raw))?;
            if *slot < 0 {
                return Err(format!("negative component in {:?}", raw));
            }
        }
        let [hours, minutes, seconds] = fields;
        if minutes > 59 || seconds > 59 {
            return Err(format!("minutes/seconds out of range in {:?}", raw));
        }
        hours
            .checked_mul(3600)
            .and_then(|h| h.checked_add(minutes * 60 + seconds))
            .and_then(Duration::try_seconds)
            .ok_or_else(|| format!("duration out of range: {:?}", raw))
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(de::Error::custom)
    }
}
