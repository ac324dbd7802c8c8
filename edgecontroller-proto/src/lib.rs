//! Protobuf types for the edge controller's node enrollment API.

/// Generated protobuf types
pub mod auth {
    tonic::include_proto!("openness.auth");
}

pub use auth::*;

/// File descriptor set for gRPC reflection
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("auth_descriptor");
