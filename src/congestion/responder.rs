//! Maps admission rejections onto gRPC errors.

use http::header::{HeaderValue, CONTENT_TYPE};
use tonic::body::BoxBody;
use tonic::Status;
use tracing::error;

use super::gate::AdmissionDecision;

/// Message carried by every congestion rejection. Callers match on it.
pub const REJECTION_MESSAGE: &str = "Congestion control: rate limit exceeded";

/// Converts rejections into `RESOURCE_EXHAUSTED` statuses.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectionResponder;

impl RejectionResponder {
    /// The status for a rejected decision, or `None` if it was admitted.
    pub fn respond(&self, decision: &AdmissionDecision) -> Option<Status> {
        match decision {
            AdmissionDecision::Admit => None,
            AdmissionDecision::Reject(_) => Some(Status::resource_exhausted(REJECTION_MESSAGE)),
        }
    }

    /// Trailers-only gRPC response carrying `status`, sent in place of the handler's.
    pub fn into_response(&self, status: &Status) -> http::Response<BoxBody> {
        let mut response = http::Response::new(tonic::body::empty_body());
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
        if let Err(e) = status.add_header(headers) {
            error!(error = %e, "Failed to encode congestion control status");
        }
        response
    }
}
