pub mod backoff;
pub mod clock;
pub mod credential_gate;
pub mod publisher;
pub mod retention;
pub mod scheduler;
