pub mod auth;
pub mod exec_service;
pub mod server;

pub use auth::{Authenticator, CallerIdentity};
pub use exec_service::ExecService;
pub use server::GrpcServer;
