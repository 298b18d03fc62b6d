//! Shared, concurrently updatable admission policy.

use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use super::policy::{PolicyError, RateLimitPolicy};
use crate::error::{CongestionError, Result};

/// Single source of truth for the policy in force.
///
/// Reads are wait-free snapshots; writes swap in a whole new policy, so a
/// reader never sees a partially updated one. Every successful write bumps
/// the generation. `apply_and_acknowledge` additionally publishes that
/// generation to subscribers once the new policy is visible.
#[derive(Debug)]
pub struct RateLimitState {
    policy: ArcSwap<RateLimitPolicy>,
    generation: AtomicU64,
    applied: watch::Sender<u64>,
}

impl RateLimitState {
    pub fn new(initial: RateLimitPolicy) -> Self {
        let (applied, _) = watch::channel(0);
        Self {
            policy: ArcSwap::from_pointee(initial),
            generation: AtomicU64::new(0),
            applied,
        }
    }

    /// Snapshot of the current policy.
    pub fn get(&self) -> Arc<RateLimitPolicy> {
        self.policy.load_full()
    }

    /// Generation of the current policy; 0 until the first update.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Validate and install a new policy, returning its generation.
    ///
    /// Requests already admitted are not affected.
    pub fn apply(&self, policy: RateLimitPolicy) -> std::result::Result<u64, PolicyError> {
        policy.validate()?;

        info!(
            enabled = policy.enabled,
            max_requests_per_second = ?policy.max_requests_per_second,
            exempt = policy.exempt_operations.len(),
            "Applying congestion control policy"
        );

        self.policy.store(Arc::new(policy));
        Ok(self.generation.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Install a new policy and signal subscribers that it is in effect.
    pub fn apply_and_acknowledge(
        &self,
        policy: RateLimitPolicy,
    ) -> std::result::Result<u64, PolicyError> {
        let generation = self.apply(policy)?;
        // Generations can be applied out of order by racing writers; never
        // move the acknowledged generation backwards.
        self.applied.send_if_modified(|acked| {
            if generation > *acked {
                *acked = generation;
                true
            } else {
                false
            }
        });
        Ok(generation)
    }

    /// Receiver that observes every acknowledged generation.
    pub fn subscribe_applied(&self) -> watch::Receiver<u64> {
        self.applied.subscribe()
    }

    /// Wait until `generation` (or a later one) has been acknowledged.
    pub async fn wait_applied(&self, generation: u64, timeout: Duration) -> Result<()> {
        let mut applied = self.subscribe_applied();
        // Drop the borrowed value inside the timeout so no `watch::Ref` outlives `applied`.
        let wait = async {
            applied
                .wait_for(|acked| *acked >= generation)
                .await
                .map(|_| ())
        };

        let result = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(())) => Ok(()),
            // The sender lives as long as `self`, so this only happens during teardown.
            Ok(Err(_)) => Err(CongestionError::ControlChannelClosed),
            Err(_) => Err(CongestionError::AckTimeout {
                generation,
                timeout_ms: timeout.as_millis() as u64,
            }),
        };
        result
    }
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new(RateLimitPolicy::default())
    }
}
