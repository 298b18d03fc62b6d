//! gRPC server implementation.

use futures::FutureExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{error, info};

use super::admin::CongestionControlImpl;
use super::layer::AdmissionLayer;
use super::proto::congestion_control_server::CongestionControlServer;
use super::proto::greeter_service_server::GreeterServiceServer;
use super::service::{GreeterServiceImpl, GREETER_OPERATIONS};
use crate::congestion::{AdmissionGate, ControlChannel};
use crate::error::{CongestionError, Result};

/// Hosts the gated greeter service and the ungated admin service.
pub struct GrpcServer {
    /// Address of the application (gated) listener
    grpc_addr: SocketAddr,
    /// Address of the admin (ungated) listener
    admin_addr: SocketAddr,
    gate: Arc<AdmissionGate>,
    control: ControlChannel,
}

impl GrpcServer {
    pub fn new(
        grpc_addr: SocketAddr,
        admin_addr: SocketAddr,
        gate: Arc<AdmissionGate>,
        control: ControlChannel,
    ) -> Self {
        Self {
            grpc_addr,
            admin_addr,
            gate,
            control,
        }
    }

    /// Bind both listeners and serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let app_listener = TcpListener::bind(self.grpc_addr).await?;
        let admin_listener = TcpListener::bind(self.admin_addr).await?;
        self.serve_with_listeners(app_listener, admin_listener, signal)
            .await
    }

    /// Serve on already-bound listeners until `signal` resolves.
    pub async fn serve_with_listeners<F>(
        self,
        app_listener: TcpListener,
        admin_listener: TcpListener,
        signal: F,
    ) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        info!(
            addr = ?app_listener.local_addr().ok(),
            admin_addr = ?admin_listener.local_addr().ok(),
            "Starting gRPC server with congestion control"
        );

        let shutdown = signal.shared();

        let app = Server::builder()
            .layer(AdmissionLayer::new(self.gate.clone()).with_routes(GREETER_OPERATIONS))
            .add_service(GreeterServiceServer::new(GreeterServiceImpl::new()))
            .serve_with_incoming_shutdown(TcpListenerStream::new(app_listener), shutdown.clone());

        let admin = Server::builder()
            .add_service(CongestionControlServer::new(CongestionControlImpl::new(
                self.control,
                self.gate,
            )))
            .serve_with_incoming_shutdown(TcpListenerStream::new(admin_listener), shutdown);

        tokio::try_join!(app, admin).map(|_| ()).map_err(|e| {
            error!(error = %e, "gRPC server failed");
            CongestionError::Grpc(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::{RateLimitPolicy, RateLimitState};
    use std::collections::BTreeSet;
    use std::time::Duration;

    #[tokio::test]
    async fn test_server_shuts_down_on_signal() {
        let state = Arc::new(RateLimitState::new(RateLimitPolicy::default()));
        let (control, _handle) =
            ControlChannel::spawn(state.clone(), BTreeSet::new(), Duration::from_secs(1));
        let gate = Arc::new(AdmissionGate::new(state));

        let app_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let admin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = GrpcServer::new(
            app_listener.local_addr().unwrap(),
            admin_listener.local_addr().unwrap(),
            gate,
            control,
        );

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            server.serve_with_listeners(app_listener, admin_listener, async {}),
        )
        .await;

        assert!(matches!(result, Ok(Ok(()))));
    }
}
