pub mod v1 {
    tonic::include_proto!("mimir.v1");
}

/// Encoded descriptor set for gRPC server reflection.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("descriptor");
