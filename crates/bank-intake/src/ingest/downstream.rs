use crate::statements::FileType;
use serde::Serialize;
use std::fmt::Debug;
use tracing::info;

/// Payload handed to the downstream ERP function for one decoded file.
#[derive(Debug, Clone, Serialize)]
pub struct DownstreamRequest {
    pub function_name: String,
    pub source_name: String,
    pub file_type: FileType,
    #[serde(skip)]
    pub raw_bytes: Vec<u8>,
    pub parsed_representation: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownstreamReply {
    pub acknowledgement: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownstreamError {
    #[error("downstream unavailable: {0}")]
    Unavailable(String),
    #[error("downstream rejected {function_name}: {reason}")]
    Rejected {
        function_name: String,
        reason: String,
    },
    #[error("could not encode payload: {0}")]
    Encoding(String),
}

/// Outbound hook towards the ERP. Delivery is at-least-once; failures are recorded on the
/// job rather than retried here.
pub trait DownstreamGateway: Debug + Send + Sync {
    fn notify(&self, request: &DownstreamRequest) -> Result<DownstreamReply, DownstreamError>;
}

/// Logs each request and acknowledges it. Used until a real ERP adapter is configured.
#[derive(Debug, Default, Clone)]
pub struct LoggingDownstream;

impl DownstreamGateway for LoggingDownstream {
    fn notify(&self, request: &DownstreamRequest) -> Result<DownstreamReply, DownstreamError> {
        info!(
            function = %request.function_name,
            source = %request.source_name,
            file_type = %request.file_type,
            bytes = request.raw_bytes.len(),
            "forwarding decoded file downstream"
        );
        Ok(DownstreamReply {
            acknowledgement: format!("logged {}", request.source_name),
        })
    }
}
