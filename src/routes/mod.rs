pub(crate) mod credentials;
pub(crate) mod health;
pub(crate) mod jobs;
pub(crate) mod reports;
