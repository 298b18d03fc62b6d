//! Wire messages for the greeter and admin services.
//!
//! Service stubs are generated by `build.rs` and included at the bottom.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GreetingRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GreetingResponse {
    #[prost(string, tag = "1")]
    pub greeting: ::prost::alloc::string::String,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct PingRequest {}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct PingResponse {}

/// Policy update pushed through the admin port.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct PolicyRequest {
    #[prost(bool, tag = "1")]
    pub enabled: bool,
    /// Signed so that negative values reach validation instead of wrapping
    #[prost(int64, optional, tag = "2")]
    pub max_requests_per_second: ::core::option::Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PolicyAck {
    #[prost(uint64, tag = "1")]
    pub generation: u64,
    #[prost(bool, tag = "2")]
    pub enabled: bool,
    #[prost(uint32, optional, tag = "3")]
    pub max_requests_per_second: ::core::option::Option<u32>,
    #[prost(string, repeated, tag = "4")]
    pub exempt_operations: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct StatusRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OperationCount {
    #[prost(string, tag = "1")]
    pub operation: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub rejected: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatusResponse {
    #[prost(message, optional, tag = "1")]
    pub policy: ::core::option::Option<PolicyAck>,
    #[prost(uint64, tag = "2")]
    pub admitted: u64,
    #[prost(uint64, tag = "3")]
    pub exempt: u64,
    #[prost(uint64, tag = "4")]
    pub rejected: u64,
    #[prost(message, repeated, tag = "5")]
    pub rejected_by_operation: ::prost::alloc::vec::Vec<OperationCount>,
    #[prost(uint32, tag = "6")]
    pub current_window_count: u32,
}

include!(concat!(env!("OUT_DIR"), "/samples.api.GreeterService.rs"));
include!(concat!(env!("OUT_DIR"), "/congestion.admin.CongestionControl.rs"));
