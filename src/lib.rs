//! Congestion Gate - runtime congestion control for gRPC servers
//!
//! This crate implements an admission controller that sits in front of a
//! tonic server's routes. Operators push rate-limit policies through a
//! control channel; every inbound request is admitted or rejected with
//! `RESOURCE_EXHAUSTED` before its handler runs, and the limit can be
//! engaged and lifted without restarting the server.

pub mod config;
pub mod congestion;
pub mod error;
pub mod grpc;
