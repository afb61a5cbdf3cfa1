mod convert;
mod kv_service;

pub use kv_service::KvServiceImpl;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tonic_reflection::server::Builder as ReflectionBuilder;

use mimir_consensus::RaftLog;
use mimir_kv::KvCore;
use mimir_proto::v1::kv_service_server::KvServiceServer;

pub async fn serve<L: RaftLog>(
    addr: SocketAddr,
    core: Arc<KvCore<L>>,
    node_id: u64,
) -> anyhow::Result<()> {
    let reflection = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(mimir_proto::FILE_DESCRIPTOR_SET)
        .build_v1()
        .context("failed to build reflection service")?;
    tracing::info!(%addr, "kv gRPC server starting");
    tonic::transport::Server::builder()
        .add_service(KvServiceServer::new(KvServiceImpl::new(core, node_id)))
        .add_service(reflection)
        .serve(addr)
        .await
        .map_err(Into::into)
}
