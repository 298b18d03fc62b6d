//! Congestion control: admission policy, state, and the per-request gate.

mod control;
mod counter;
mod gate;
mod policy;
mod responder;
mod state;

pub use control::{ControlChannel, PolicyAck};
pub use counter::{Clock, CounterError, ManualClock, RateCounter, SystemClock, WINDOW};
pub use gate::{
    AdmissionDecision, AdmissionGate, AdmissionStats, RejectReason, StatsSnapshot,
    MAX_TRACKED_OPERATIONS, OTHER_OPERATIONS,
};
pub use policy::{OperationName, PolicyError, PolicyUpdate, RateLimitPolicy};
pub use responder::{RejectionResponder, REJECTION_MESSAGE};
pub use state::RateLimitState;
