pub mod config;
pub mod error;
pub mod grpc;
pub mod job;
pub mod registry;
pub mod shutdown;
pub mod tls;
pub mod worker;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("remote_exec");
}
