use std::sync::Arc;

use tonic::{Request, Response, Status};

use mimir_consensus::RaftLog;
use mimir_kv::KvCore;
use mimir_proto::v1::{
    kv_service_server::KvService, GetRequest, GetResponse, PutAppendOp, PutAppendRequest,
    PutAppendResponse,
};

use crate::convert::{kv_error_to_status, response_header};

pub struct KvServiceImpl<L> {
    core: Arc<KvCore<L>>,
    node_id: u64,
}

impl<L> KvServiceImpl<L> {
    pub fn new(core: Arc<KvCore<L>>, node_id: u64) -> Self {
        KvServiceImpl { core, node_id }
    }
}

#[tonic::async_trait]
impl<L: RaftLog> KvService for KvServiceImpl<L> {
    async fn get(&self, request: Request<GetRequest>) -> Result<Response<GetResponse>, Status> {
        let req = request.into_inner();
        if req.key.is_empty() {
            return Err(Status::invalid_argument("key must not be empty"));
        }
        let value = self
            .core
            .get(&req.key, req.client_id, req.seq_number)
            .await
            .map_err(kv_error_to_status)?;
        Ok(Response::new(GetResponse {
            header: Some(response_header(self.node_id)),
            value,
        }))
    }

    async fn put_append(
        &self,
        request: Request<PutAppendRequest>,
    ) -> Result<Response<PutAppendResponse>, Status> {
        let req = request.into_inner();
        if req.key.is_empty() {
            return Err(Status::invalid_argument("key must not be empty"));
        }
        match PutAppendOp::try_from(req.op) {
            Ok(PutAppendOp::Put) => {
                self.core
                    .put(&req.key, req.value, req.client_id, req.seq_number)
                    .await
            }
            Ok(PutAppendOp::Append) => {
                self.core
                    .append(&req.key, req.value, req.client_id, req.seq_number)
                    .await
            }
            Ok(PutAppendOp::Unspecified) | Err(_) => {
                return Err(Status::invalid_argument("op must be PUT or APPEND"));
            }
        }
        .map_err(kv_error_to_status)?;
        Ok(Response::new(PutAppendResponse {
            header: Some(response_header(self.node_id)),
        }))
    }
}
