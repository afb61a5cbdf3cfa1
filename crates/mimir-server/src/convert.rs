use tonic::Status;

use mimir_proto::v1::ResponseHeader;
use mimir_types::KvError;

pub fn response_header(node_id: u64) -> ResponseHeader {
    ResponseHeader { node_id }
}

/// The closed client-visible error set, mapped onto gRPC status codes.
/// Everything except `StaleRequest` is safe to retry; `WrongLeader` means
/// retry on another replica.
pub fn kv_error_to_status(err: KvError) -> Status {
    match &err {
        KvError::WrongLeader => Status::unavailable(err.to_string()),
        KvError::LostLeadership => Status::aborted(err.to_string()),
        KvError::Timeout => Status::deadline_exceeded(err.to_string()),
        KvError::StaleRequest { .. } => Status::failed_precondition(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn error_codes_match_the_retry_contract() {
        assert_eq!(kv_error_to_status(KvError::WrongLeader).code(), Code::Unavailable);
        assert_eq!(kv_error_to_status(KvError::LostLeadership).code(), Code::Aborted);
        assert_eq!(kv_error_to_status(KvError::Timeout).code(), Code::DeadlineExceeded);
        assert_eq!(
            kv_error_to_status(KvError::StaleRequest { seq: 8, latest: 10 }).code(),
            Code::FailedPrecondition
        );
    }

    #[test]
    fn stale_request_status_names_both_sequences() {
        let status = kv_error_to_status(KvError::StaleRequest { seq: 8, latest: 10 });
        assert!(status.message().contains('8'));
        assert!(status.message().contains("10"));
    }
}
