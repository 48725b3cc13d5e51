//! Generated gRPC bindings for the ManMan control plane.
//!
//! Everything lives in the `manman.v1` protobuf package; both services
//! (`ManManApi`, `WorkshopService`) are compiled into the same module. The
//! file descriptor set is exported for server reflection.

pub mod v1 {
    tonic::include_proto!("manman.v1");
}

/// Encoded file descriptor set for gRPC reflection.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("manman_descriptor");
