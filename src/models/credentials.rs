use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Upstream API credentials as stored by the settings service.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Credentials {
    pub url: String,
    pub key: String,
    pub secret: String,
}

impl Credentials {
    pub fn login_url(&self) -> String {
        format!("{}/login", self.url.trim_end_matches('/'))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() || self.key.trim().is_empty() || self.secret.is_empty() {
            return Err("url, key and secret are all required".to_string());
        }
        url::Url::parse(&self.url).map_err(|e| format!("invalid url {}: {}", self.url, e))?;
        Ok(())
    }
}

// Keep the secret out of logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.url)
            .field("key", &self.key)
            .field("secret", &"***")
            .finish()
    }
}

/// Result of probing the upstream login endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    /// The upstream answered but refused the credentials; this will not heal on its own.
    Rejected { status: u16 },
}
