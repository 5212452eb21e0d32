//! In-memory lookups used by the RPC layer: job id to job, and caller
//! identity to permission. Nothing here survives a restart.

pub mod jobs;
pub mod users;

pub use jobs::JobRegistry;
pub use users::{Operation, Permission, UserDirectory};
