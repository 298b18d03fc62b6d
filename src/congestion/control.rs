//! Out-of-band control channel for policy updates.
//!
//! Updates are queued to a dedicated task that owns the write side of
//! [`RateLimitState`]. The caller gets a [`PolicyAck`] back only after the
//! new policy is what the next `decide` call will read.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::policy::{OperationName, PolicyError, PolicyUpdate, RateLimitPolicy};
use super::state::RateLimitState;
use crate::error::{CongestionError, Result};

const QUEUE_DEPTH: usize = 64;

/// Confirmation that an update is in effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyAck {
    pub generation: u64,
    pub policy: RateLimitPolicy,
}

type Reply = oneshot::Sender<std::result::Result<PolicyAck, PolicyError>>;

/// Handle to the control task. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ControlChannel {
    tx: mpsc::Sender<(PolicyUpdate, Reply)>,
    state: Arc<RateLimitState>,
    ack_timeout: Duration,
}

impl ControlChannel {
    /// Spawn the control task on the current runtime.
    ///
    /// `exempt_operations` is merged into every policy built from an update.
    pub fn spawn(
        state: Arc<RateLimitState>,
        exempt_operations: BTreeSet<OperationName>,
        ack_timeout: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<(PolicyUpdate, Reply)>(QUEUE_DEPTH);

        let worker_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Some((update, reply)) = rx.recv().await {
                let result = update
                    .into_policy(exempt_operations.clone())
                    .and_then(|policy| {
                        let generation = worker_state.apply_and_acknowledge(policy.clone())?;
                        Ok(PolicyAck { generation, policy })
                    });

                match &result {
                    Ok(ack) => info!(
                        generation = ack.generation,
                        enabled = ack.policy.enabled,
                        max_requests_per_second = ?ack.policy.max_requests_per_second,
                        "Congestion control policy applied"
                    ),
                    Err(e) => warn!(error = %e, ?update, "Rejected congestion control update"),
                }

                let _ = reply.send(result);
            }
            info!("Congestion control channel closed");
        });

        (
            Self {
                tx,
                state,
                ack_timeout,
            },
            handle,
        )
    }

    /// Push an update and wait until it is visible to the admission gate.
    ///
    /// On [`CongestionError::UpdateTimeout`] the update has already been
    /// queued and may still take effect; check [`ControlChannel::current`].
    pub async fn apply_policy(&self, update: PolicyUpdate) -> Result<PolicyAck> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((update, reply_tx))
            .await
            .map_err(|_| CongestionError::ControlChannelClosed)?;

        let ack = match tokio::time::timeout(self.ack_timeout, reply_rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(CongestionError::ControlChannelClosed),
            Err(_) => {
                warn!(?update, "Control task did not confirm update in time");
                return Err(CongestionError::UpdateTimeout {
                    timeout_ms: self.ack_timeout.as_millis() as u64,
                });
            }
        };

        self.state.wait_applied(ack.generation, self.ack_timeout).await?;
        Ok(ack)
    }

    /// Apply a control-hook JSON payload (`{"force-rps-limit": N}` or `{}`).
    pub async fn apply_json(&self, payload: &str) -> Result<PolicyAck> {
        let update = PolicyUpdate::from_json(payload)?;
        self.apply_policy(update).await
    }

    /// Disengage congestion control.
    pub async fn clear(&self) -> Result<PolicyAck> {
        self.apply_policy(PolicyUpdate::disable()).await
    }

    pub fn current(&self) -> Arc<RateLimitPolicy> {
        self.state.get()
    }

    pub fn state(&self) -> &Arc<RateLimitState> {
        &self.state
    }
}
