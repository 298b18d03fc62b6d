//! Sample greeter service hosted behind the admission gate.

use tonic::{Request, Response, Status};
use tracing::{debug, instrument, warn};

use super::proto::greeter_service_server::GreeterService;
use super::proto::{GreetingRequest, GreetingResponse, PingRequest, PingResponse};

/// Every path served by `samples.api.GreeterService`.
pub const GREETER_OPERATIONS: [&str; 2] = [
    "/samples.api.GreeterService/SayHello",
    "/samples.api.GreeterService/Ping",
];

/// Implementation of `samples.api.GreeterService`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GreeterServiceImpl;

impl GreeterServiceImpl {
    pub fn new() -> Self {
        Self
    }
}

#[tonic::async_trait]
impl GreeterService for GreeterServiceImpl {
    #[instrument(skip(self, request), fields(name = %request.get_ref().name))]
    async fn say_hello(
        &self,
        request: Request<GreetingRequest>,
    ) -> Result<Response<GreetingResponse>, Status> {
        let req = request.into_inner();

        if req.name.is_empty() {
            warn!("Received greeting request with empty name");
            return Err(Status::invalid_argument("name is required"));
        }

        debug!("Greeting");
        Ok(Response::new(GreetingResponse {
            greeting: format!("Hello, {}!", req.name),
        }))
    }

    /// Liveness probe; normally configured as exempt from congestion control.
    async fn ping(&self, _request: Request<PingRequest>) -> Result<Response<PingResponse>, Status> {
        Ok(Response::new(PingResponse {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_say_hello() {
        let service = GreeterServiceImpl::new();

        let response = service
            .say_hello(Request::new(GreetingRequest {
                name: "Python".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.greeting, "Hello, Python!");
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let service = GreeterServiceImpl::new();

        let result = service
            .say_hello(Request::new(GreetingRequest {
                name: String::new(),
            }))
            .await;

        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_ping() {
        let service = GreeterServiceImpl::new();
        assert!(service.ping(Request::new(PingRequest {})).await.is_ok());
    }
}
