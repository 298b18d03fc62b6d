//! Admission policy and the updates that replace it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Identifier of the RPC method being invoked, as its gRPC path
/// (`/package.Service/Method`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationName(String);

impl OperationName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The method segment of the path (`SayHello` for `/samples.api.GreeterService/SayHello`).
    pub fn method(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// True for `/service/method` with both segments non-empty.
    pub fn is_full_path(&self) -> bool {
        match self.0.strip_prefix('/').and_then(|rest| rest.split_once('/')) {
            Some((service, method)) => {
                !service.is_empty() && !method.is_empty() && !method.contains('/')
            }
            None => false,
        }
    }
}

impl fmt::Display for OperationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Validation failures for policies and policy updates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("max requests per second must not be negative, got {0}")]
    NegativeRate(i64),

    #[error("max requests per second {0} exceeds {}", u32::MAX)]
    RateOutOfRange(i64),

    #[error("exempt operation names must not be empty")]
    EmptyExemption,

    #[error("exempt operation {0:?} is not a full gRPC path (/package.Service/Method)")]
    InvalidExemption(String),

    #[error("malformed policy update: {0}")]
    Malformed(String),
}

/// The admission policy in force.
///
/// Replaced wholesale on every update, never mutated in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// When false nothing is rejected, whatever the limit says
    pub enabled: bool,
    /// Admitted requests per second; `Some(0)` sheds every non-exempt request
    #[serde(default)]
    pub max_requests_per_second: Option<u32>,
    /// Operations that are always admitted
    #[serde(default)]
    pub exempt_operations: BTreeSet<OperationName>,
}

impl RateLimitPolicy {
    /// A disabled policy carrying the given exemptions.
    pub fn disabled(exempt_operations: BTreeSet<OperationName>) -> Self {
        Self {
            enabled: false,
            max_requests_per_second: None,
            exempt_operations,
        }
    }

    /// An engaged policy with the given per-second limit.
    pub fn limited(limit: u32, exempt_operations: BTreeSet<OperationName>) -> Self {
        Self {
            enabled: true,
            max_requests_per_second: Some(limit),
            exempt_operations,
        }
    }

    /// Exemption entries are full paths, so a same-named method on another
    /// service is not exempt.
    pub fn is_exempt(&self, operation: &OperationName) -> bool {
        self.exempt_operations.contains(operation)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        for op in &self.exempt_operations {
            if op.as_str().is_empty() {
                return Err(PolicyError::EmptyExemption);
            }
            if !op.is_full_path() {
                return Err(PolicyError::InvalidExemption(op.to_string()));
            }
        }
        Ok(())
    }
}

/// A limit change as it arrives over the control boundary.
///
/// Updates never carry exemptions; those come from server configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    pub enabled: bool,
    #[serde(default)]
    pub max_requests_per_second: Option<i64>,
}

/// Control-hook payload: `{"force-rps-limit": N}` engages, `{}` disengages.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ForcedLimit {
    #[serde(rename = "force-rps-limit")]
    force_rps_limit: Option<i64>,
}

impl PolicyUpdate {
    /// Engage full shedding.
    pub fn shed_all() -> Self {
        Self::limit(0)
    }

    pub fn limit(max_requests_per_second: i64) -> Self {
        Self {
            enabled: true,
            max_requests_per_second: Some(max_requests_per_second),
        }
    }

    pub fn disable() -> Self {
        Self::default()
    }

    /// Parse the JSON payload used by control hooks.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let forced: ForcedLimit =
            serde_json::from_str(json).map_err(|e| PolicyError::Malformed(e.to_string()))?;
        Ok(match forced.force_rps_limit {
            Some(limit) => Self::limit(limit),
            None => Self::disable(),
        })
    }

    /// Validate the update and build the resulting policy.
    pub fn into_policy(
        self,
        exempt_operations: BTreeSet<OperationName>,
    ) -> Result<RateLimitPolicy, PolicyError> {
        let max_requests_per_second = match self.max_requests_per_second {
            Some(rate) if rate < 0 => return Err(PolicyError::NegativeRate(rate)),
            Some(rate) => {
                Some(u32::try_from(rate).map_err(|_| PolicyError::RateOutOfRange(rate))?)
            }
            None => None,
        };

        let policy = RateLimitPolicy {
            enabled: self.enabled,
            max_requests_per_second,
            exempt_operations,
        };
        policy.validate()?;
        Ok(policy)
    }
}
