//! Admin service: the control-plane port for congestion policy.
//!
//! Served on its own listener without the admission layer, so operators can
//! always reach it while traffic is being shed.

use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{info, instrument};

use super::proto::congestion_control_server::CongestionControl;
use super::proto::{
    OperationCount, PolicyAck, PolicyRequest, StatusRequest, StatusResponse,
};
use crate::congestion::{self, AdmissionGate, ControlChannel, PolicyUpdate, RateLimitPolicy};
use crate::error::CongestionError;

/// Implementation of `congestion.admin.CongestionControl`.
#[derive(Debug, Clone)]
pub struct CongestionControlImpl {
    control: ControlChannel,
    gate: Arc<AdmissionGate>,
}

impl CongestionControlImpl {
    pub fn new(control: ControlChannel, gate: Arc<AdmissionGate>) -> Self {
        Self { control, gate }
    }
}

fn policy_view(generation: u64, policy: &RateLimitPolicy) -> PolicyAck {
    PolicyAck {
        generation,
        enabled: policy.enabled,
        max_requests_per_second: policy.max_requests_per_second,
        exempt_operations: policy
            .exempt_operations
            .iter()
            .map(|op| op.as_str().to_string())
            .collect(),
    }
}

fn to_status(err: CongestionError) -> Status {
    match err {
        CongestionError::Policy(e) => Status::invalid_argument(e.to_string()),
        CongestionError::ControlChannelClosed => Status::unavailable(err.to_string()),
        CongestionError::AckTimeout { .. } | CongestionError::UpdateTimeout { .. } => {
            Status::deadline_exceeded(err.to_string())
        }
        other => Status::internal(other.to_string()),
    }
}

#[tonic::async_trait]
impl CongestionControl for CongestionControlImpl {
    #[instrument(
        skip(self, request),
        fields(
            enabled = request.get_ref().enabled,
            max_requests_per_second = ?request.get_ref().max_requests_per_second
        )
    )]
    async fn apply_policy(
        &self,
        request: Request<PolicyRequest>,
    ) -> Result<Response<PolicyAck>, Status> {
        let req = request.into_inner();
        let update = PolicyUpdate {
            enabled: req.enabled,
            max_requests_per_second: req.max_requests_per_second,
        };

        let ack: congestion::PolicyAck =
            self.control.apply_policy(update).await.map_err(to_status)?;

        info!(generation = ack.generation, "Policy update acknowledged over admin port");
        Ok(Response::new(policy_view(ack.generation, &ack.policy)))
    }

    async fn get_status(
        &self,
        _request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let state = self.gate.state();
        let policy = state.get();
        let stats = self.gate.stats();

        Ok(Response::new(StatusResponse {
            policy: Some(policy_view(state.generation(), &policy)),
            admitted: stats.admitted,
            exempt: stats.exempt,
            rejected: stats.rejected,
            rejected_by_operation: stats
                .rejected_by_operation
                .into_iter()
                .map(|(operation, rejected)| OperationCount {
                    operation: operation.as_str().to_string(),
                    rejected,
                })
                .collect(),
            current_window_count: self.gate.current_window_count(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::{OperationName, RateLimitState};
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn setup() -> CongestionControlImpl {
        let exempt: BTreeSet<_> = [OperationName::from("/samples.api.GreeterService/Ping")]
            .into_iter()
            .collect();
        let state = Arc::new(RateLimitState::new(RateLimitPolicy::disabled(exempt.clone())));
        let (control, _handle) = ControlChannel::spawn(state.clone(), exempt, Duration::from_secs(1));
        CongestionControlImpl::new(control, Arc::new(AdmissionGate::new(state)))
    }

    #[tokio::test]
    async fn test_apply_policy_returns_ack() {
        let service = setup();

        let ack = service
            .apply_policy(Request::new(PolicyRequest {
                enabled: true,
                max_requests_per_second: Some(0),
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(ack.generation, 1);
        assert!(ack.enabled);
        assert_eq!(ack.max_requests_per_second, Some(0));
        assert_eq!(
            ack.exempt_operations,
            vec!["/samples.api.GreeterService/Ping".to_string()]
        );
    }

    #[tokio::test]
    async fn test_negative_rate_is_invalid_argument() {
        let service = setup();

        let result = service
            .apply_policy(Request::new(PolicyRequest {
                enabled: true,
                max_requests_per_second: Some(-1),
            }))
            .await;

        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_status_reports_rejections() {
        let service = setup();
        service
            .apply_policy(Request::new(PolicyRequest {
                enabled: true,
                max_requests_per_second: Some(0),
            }))
            .await
            .unwrap();

        let op = OperationName::from("/samples.api.GreeterService/SayHello");
        service.gate.decide(&op);
        service.gate.decide(&op);
        service.gate.decide(&"/samples.api.GreeterService/Ping".into());

        let status = service
            .get_status(Request::new(StatusRequest {}))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(status.policy.unwrap().generation, 1);
        assert_eq!(status.rejected, 2);
        assert_eq!(status.exempt, 1);
        assert_eq!(
            status.rejected_by_operation,
            vec![OperationCount {
                operation: op.as_str().to_string(),
                rejected: 2,
            }]
        );
    }

    #[test]
    fn test_timeouts_map_to_deadline_exceeded() {
        let update = to_status(CongestionError::UpdateTimeout { timeout_ms: 5 });
        assert_eq!(update.code(), tonic::Code::DeadlineExceeded);
        assert!(update.message().contains("may still be applied"));

        let ack = to_status(CongestionError::AckTimeout {
            generation: 3,
            timeout_ms: 5,
        });
        assert_eq!(ack.code(), tonic::Code::DeadlineExceeded);
    }
}
