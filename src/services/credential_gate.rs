use std::sync::Arc;

use tracing::info;

use crate::external::credential_source::CredentialSource;
use crate::models::{Credentials, Validation};

/// Why a due job cannot run yet. Every reason is retried on a later tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotReadyReason {
    NotConfigured,
    /// Upstream refused the credentials; an operator has to fix them.
    Rejected { status: u16 },
    /// Credential service or upstream could not be reached.
    Unreachable(String),
}

#[derive(Debug, Clone)]
pub enum Readiness {
    Ready(Credentials),
    NotReady(NotReadyReason),
}

/// Turns stored credentials into validated ones, or a definitive "not yet".
#[derive(Clone)]
pub struct CredentialGate {
    source: Arc<dyn CredentialSource>,
}

impl CredentialGate {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self { source }
    }

    pub async fn check(&self) -> Readiness {
        let credentials = match self.source.fetch().await {
            Ok(Some(credentials)) => credentials,
            Ok(None) => {
                info!("No upstream credentials configured; waiting for an operator");
                return Readiness::NotReady(NotReadyReason::NotConfigured);
            }
            Err(e) => {
                info!("Not ready: could not fetch credentials: {}", e);
                return Readiness::NotReady(NotReadyReason::Unreachable(e.to_string()));
            }
        };

        match self.source.validate(&credentials).await {
            Ok(Validation::Valid) => {
                info!("Upstream credentials validated");
                Readiness::Ready(credentials)
            }
            Ok(Validation::Rejected { status }) => {
                info!(
                    "Not ready: upstream rejected credentials for {} (status {}); they must be updated",
                    credentials.url, status
                );
                Readiness::NotReady(NotReadyReason::Rejected { status })
            }
            Err(e) => {
                info!("Not ready: could not validate credentials against {}: {}", credentials.url, e);
                Readiness::NotReady(NotReadyReason::Unreachable(e.to_string()))
            }
        }
    }
}
