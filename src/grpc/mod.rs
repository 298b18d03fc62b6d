//! gRPC surface: the gated sample service, the admin port, and the
//! middleware that connects them to the admission gate.

mod admin;
mod layer;
mod server;
mod service;

pub mod proto;

pub use admin::CongestionControlImpl;
pub use layer::{AdmissionLayer, AdmissionService};
pub use server::GrpcServer;
pub use service::{GreeterServiceImpl, GREETER_OPERATIONS};

// Re-export commonly used types
pub use proto::congestion_control_client::CongestionControlClient;
pub use proto::greeter_service_client::GreeterServiceClient;
pub use proto::{GreetingRequest, PingRequest, PolicyRequest, StatusRequest};
